//! Frame timing report

use std::fmt;

use serde::Serialize;

use super::optimizer::OptimizationLevel;

/// Snapshot of optimizer state, printable as a terminal report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub target_fps: f32,
    pub level: OptimizationLevel,
    pub average_fps: f64,
    pub average_frame_ms: f64,
    pub p95_frame_ms: f64,
    pub budget_ms: f64,
    pub window_frames: usize,
    pub total_frames: u64,
    pub escalations: u32,
    pub relaxations: u32,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const W: usize = 46;
        let line = "=".repeat(W);
        let thin = "-".repeat(W);

        writeln!(f, "{line}")?;
        writeln!(f, "{:^W$}", format!("Frame Timing [{} fps target]", self.target_fps))?;
        writeln!(f, "{line}")?;
        writeln!(f, " Average:         {:>8.1} fps", self.average_fps)?;
        writeln!(f, " Frame time:      {:>8.2} ms", self.average_frame_ms)?;
        writeln!(f, " p95 frame time:  {:>8.2} ms", self.p95_frame_ms)?;
        writeln!(f, " Budget:          {:>8.2} ms", self.budget_ms)?;
        writeln!(f, "{thin}")?;
        writeln!(
            f,
            " Level:           {:>8} ({:?})",
            self.level.index(),
            self.level
        )?;
        writeln!(f, " Escalations:     {:>8}", self.escalations)?;
        writeln!(f, " Relaxations:     {:>8}", self.relaxations)?;
        writeln!(
            f,
            " Frames:          {:>8} ({} in window)",
            self.total_frames, self.window_frames
        )?;
        write!(f, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::PerformanceOptimizer;

    #[test]
    fn report_lists_key_figures() {
        let mut optimizer = PerformanceOptimizer::new(120.0);
        for _ in 0..4 {
            optimizer.record_frame_time(20.0);
        }
        let text = optimizer.report().to_string();
        assert!(text.contains("Frame Timing [120 fps target]"));
        assert!(text.contains("50.0 fps"));
        assert!(text.contains("20.00 ms"));
        assert!(text.contains("1 (Mild)"));
        assert!(text.contains("Escalations:            1"));
    }
}

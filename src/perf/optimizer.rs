//! Adaptive performance optimizer
//!
//! Watches frame times against the frame budget and moves between three
//! quality levels. Escalation reacts to a short burst of slow frames;
//! relaxing back requires a long run of fast ones.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::report::PerformanceReport;
use super::simplify::{douglas_peucker, reduce_density};
use crate::core::settings::SessionSettings;
use crate::input::Point;

/// Frame samples kept for averages
pub const SAMPLE_WINDOW: usize = 60;
/// Frames above the critical threshold needed to escalate (strictly more than 3)
const SLOW_FRAMES_TO_ESCALATE: u32 = 4;
/// Fast frames needed before relaxing one level
const FAST_FRAMES_TO_RELAX: usize = 30;
const CRITICAL_RATIO: f64 = 0.8;
const RELAXED_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub frame_time_ms: f64,
    /// Milliseconds since the optimizer was created
    pub timestamp: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    #[default]
    Full,
    Mild,
    Aggressive,
}

/// Parameters fed back into stroke processing and rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSettings {
    pub stroke_smoothing: f32,
    pub path_complexity: f32,
    pub rendering_quality: f32,
    pub point_density: f32,
    pub simplify_paths: bool,
    pub reduce_point_density: bool,
    pub batch_renders: bool,
    pub batch_size: u32,
}

impl OptimizationLevel {
    pub fn index(self) -> u8 {
        match self {
            OptimizationLevel::Full => 0,
            OptimizationLevel::Mild => 1,
            OptimizationLevel::Aggressive => 2,
        }
    }

    pub fn escalated(self) -> Self {
        match self {
            OptimizationLevel::Full => OptimizationLevel::Mild,
            _ => OptimizationLevel::Aggressive,
        }
    }

    pub fn relaxed(self) -> Self {
        match self {
            OptimizationLevel::Aggressive => OptimizationLevel::Mild,
            _ => OptimizationLevel::Full,
        }
    }

    pub fn settings(self) -> OptimizationSettings {
        let (stroke_smoothing, path_complexity, rendering_quality, point_density, batch_size) =
            match self {
                OptimizationLevel::Full => (0.5, 1.0, 1.0, 1.0, 1),
                OptimizationLevel::Mild => (0.3, 0.7, 0.8, 0.7, 4),
                OptimizationLevel::Aggressive => (0.1, 0.4, 0.6, 0.4, 8),
            };
        let degraded = self != OptimizationLevel::Full;
        OptimizationSettings {
            stroke_smoothing,
            path_complexity,
            rendering_quality,
            point_density,
            simplify_paths: degraded,
            reduce_point_density: degraded,
            batch_renders: degraded,
            batch_size,
        }
    }
}

/// A level transition, reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub from: OptimizationLevel,
    pub to: OptimizationLevel,
}

pub struct PerformanceOptimizer {
    target_fps: f32,
    samples: VecDeque<PerformanceSample>,
    level: OptimizationLevel,
    slow_streak: u32,
    frames_since_change: usize,
    escalations: u32,
    relaxations: u32,
    total_frames: u64,
    frame_start: Option<Instant>,
    clock_ms: f64,
}

impl PerformanceOptimizer {
    pub fn new(target_fps: f32) -> Self {
        let target_fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps
        } else {
            60.0
        };
        Self {
            target_fps,
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            level: OptimizationLevel::Full,
            slow_streak: 0,
            frames_since_change: 0,
            escalations: 0,
            relaxations: 0,
            total_frames: 0,
            frame_start: None,
            clock_ms: 0.0,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.target_fps())
    }

    pub fn target_fps(&self) -> f32 {
        self.target_fps
    }

    /// Frame budget in milliseconds
    pub fn budget_ms(&self) -> f64 {
        1000.0 / self.target_fps as f64
    }

    pub fn level(&self) -> OptimizationLevel {
        self.level
    }

    pub fn settings(&self) -> OptimizationSettings {
        self.level.settings()
    }

    pub fn samples(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    pub fn start_frame(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// Close the frame opened by `start_frame`; without one this is a no-op
    pub fn end_frame(&mut self) -> Option<LevelChange> {
        let start = self.frame_start.take()?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        self.record_frame_time(elapsed)
    }

    /// Feed one frame time and apply the transition rules
    pub fn record_frame_time(&mut self, frame_time_ms: f64) -> Option<LevelChange> {
        if !frame_time_ms.is_finite() || frame_time_ms < 0.0 {
            return None;
        }
        self.clock_ms += frame_time_ms;
        if self.samples.len() == SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(PerformanceSample {
            frame_time_ms,
            timestamp: self.clock_ms,
        });
        self.total_frames += 1;
        self.frames_since_change += 1;

        let budget = self.budget_ms();
        if frame_time_ms > budget * CRITICAL_RATIO {
            self.slow_streak += 1;
        } else {
            self.slow_streak = 0;
        }

        if self.slow_streak >= SLOW_FRAMES_TO_ESCALATE && self.level != OptimizationLevel::Aggressive {
            self.escalations += 1;
            return Some(self.change_level(self.level.escalated()));
        }

        if self.level != OptimizationLevel::Full
            && self.frames_since_change >= FAST_FRAMES_TO_RELAX
            && self
                .samples
                .iter()
                .rev()
                .take(FAST_FRAMES_TO_RELAX)
                .all(|s| s.frame_time_ms < budget * RELAXED_RATIO)
        {
            self.relaxations += 1;
            return Some(self.change_level(self.level.relaxed()));
        }
        None
    }

    /// Jump straight to the most aggressive level (resource errors)
    pub fn force_max_level(&mut self) -> Option<LevelChange> {
        if self.level == OptimizationLevel::Aggressive {
            return None;
        }
        self.escalations += 1;
        tracing::warn!("[Optimizer] Resource pressure, forcing aggressive level");
        Some(self.change_level(OptimizationLevel::Aggressive))
    }

    fn change_level(&mut self, to: OptimizationLevel) -> LevelChange {
        let from = self.level;
        self.level = to;
        self.slow_streak = 0;
        self.frames_since_change = 0;
        tracing::info!(
            "[Optimizer] Level {} -> {} (avg {:.1} fps)",
            from.index(),
            to.index(),
            self.average_fps()
        );
        LevelChange { from, to }
    }

    pub fn average_frame_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.frame_time_ms).sum::<f64>() / self.samples.len() as f64
    }

    /// Moving-average FPS over the sample window
    pub fn average_fps(&self) -> f64 {
        let avg = self.average_frame_ms();
        if avg <= 0.0 {
            0.0
        } else {
            1000.0 / avg
        }
    }

    /// 95th percentile frame time over the window
    pub fn p95_frame_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut times: Vec<f64> = self.samples.iter().map(|s| s.frame_time_ms).collect();
        times.sort_by(f64::total_cmp);
        let rank = ((times.len() as f64 * 0.95).ceil() as usize).clamp(1, times.len());
        times[rank - 1]
    }

    /// Reduce and simplify stroke points per the current level
    pub fn optimize_stroke(&self, points: &[Point]) -> Vec<Point> {
        let settings = self.settings();
        let mut out = if settings.reduce_point_density {
            reduce_density(points, settings.point_density)
        } else {
            points.to_vec()
        };
        if settings.simplify_paths {
            let epsilon = (1.0 - settings.path_complexity) * 5.0;
            out = douglas_peucker(&out, epsilon);
        }
        out
    }

    pub fn report(&self) -> PerformanceReport {
        PerformanceReport {
            target_fps: self.target_fps,
            level: self.level,
            average_fps: self.average_fps(),
            average_frame_ms: self.average_frame_ms(),
            p95_frame_ms: self.p95_frame_ms(),
            budget_ms: self.budget_ms(),
            window_frames: self.samples.len(),
            total_frames: self.total_frames,
            escalations: self.escalations,
            relaxations: self.relaxations,
        }
    }
}

//! Input processor - filters and smooths stroke samples before the brush engine

use std::collections::VecDeque;

use super::Point;

/// Pressure smoother - smooths pressure values using a sliding window average.
///
/// Starts with an empty buffer, so the first samples of a stroke are averaged
/// over fewer values ("soft start").
#[derive(Debug, Clone)]
pub struct PressureSmoother {
    window_size: usize,
    values: VecDeque<f32>,
    sum: f32,
}

impl PressureSmoother {
    /// Create a new pressure smoother with the specified window size.
    pub fn new(window_size: usize) -> Self {
        let size = window_size.max(1);
        Self {
            window_size: size,
            values: VecDeque::with_capacity(size),
            sum: 0.0,
        }
    }

    /// Smooth a pressure value.
    pub fn smooth(&mut self, pressure: f32) -> f32 {
        self.values.push_back(pressure);
        self.sum += pressure;

        if self.values.len() > self.window_size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }

        (self.sum / self.values.len() as f32).clamp(0.0, 1.0)
    }

    /// Reset the smoother state (call when stroke ends).
    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        !self.values.is_empty()
    }
}

impl Default for PressureSmoother {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for input processing
#[derive(Debug, Clone)]
pub struct InputProcessorConfig {
    /// Minimum distance between points to register (pixels)
    pub min_distance: f32,
    /// Position smoothing strength (0 = raw input, 1 = heaviest smoothing)
    pub smoothing: f32,
    /// Window size for pressure smoothing (0 to disable)
    pub pressure_smoothing_window: usize,
}

impl Default for InputProcessorConfig {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            smoothing: 0.5,
            pressure_smoothing_window: 3,
        }
    }
}

/// Heaviest smoothing still keeps this share of each new sample
const MIN_FOLLOW: f32 = 0.15;

/// Processes raw stroke points before they reach the brush engine
pub struct InputProcessor {
    config: InputProcessorConfig,
    last_point: Option<Point>,
    /// Last raw sample that was filtered out, emitted by `finish`
    dropped_tail: Option<Point>,
    pressure_smoother: Option<PressureSmoother>,
}

impl InputProcessor {
    /// Create a new input processor with default config
    pub fn new() -> Self {
        Self::with_config(InputProcessorConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: InputProcessorConfig) -> Self {
        let pressure_smoother = if config.pressure_smoothing_window > 0 {
            Some(PressureSmoother::new(config.pressure_smoothing_window))
        } else {
            None
        };

        Self {
            config,
            last_point: None,
            dropped_tail: None,
            pressure_smoother,
        }
    }

    /// Change the smoothing strength; takes effect on the next sample
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.config.smoothing = smoothing.clamp(0.0, 1.0);
    }

    pub fn smoothing(&self) -> f32 {
        self.config.smoothing
    }

    /// Process a new input point
    /// Returns Some if the point should be used, None if filtered out
    pub fn process(&mut self, mut point: Point) -> Option<Point> {
        if let (Some(smoother), Some(pressure)) =
            (self.pressure_smoother.as_mut(), point.pressure)
        {
            point.pressure = Some(smoother.smooth(pressure));
        }

        let Some(last) = self.last_point else {
            // First point always passes, unsmoothed
            self.last_point = Some(point);
            self.dropped_tail = None;
            return Some(point);
        };

        if point.distance_to(&last) < self.config.min_distance {
            self.dropped_tail = Some(point);
            return None;
        }

        let follow = 1.0 - self.config.smoothing * (1.0 - MIN_FOLLOW);
        point.x = last.x + (point.x - last.x) * follow;
        point.y = last.y + (point.y - last.y) * follow;

        self.dropped_tail = None;
        self.last_point = Some(point);
        Some(point)
    }

    /// End the stroke, returning the final raw sample if it was filtered
    /// out so the stroke still ends where the pointer was lifted.
    pub fn finish(&mut self) -> Option<Point> {
        let tail = self.dropped_tail.take();
        self.reset();
        tail
    }

    /// Reset the processor state (call when stroke ends)
    pub fn reset(&mut self) {
        self.last_point = None;
        self.dropped_tail = None;
        if let Some(ref mut smoother) = self.pressure_smoother {
            smoother.reset();
        }
    }
}

impl Default for InputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

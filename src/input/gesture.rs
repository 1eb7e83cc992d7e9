//! Touch gesture recognizer
//!
//! Classifies each frame's active touch set into a gesture. Classification
//! precedence is fixed: compound gestures (two-finger tap, quick-menu hold,
//! three-finger swipe, four-finger tap), then single-touch, then two-touch,
//! then three-or-more touch. `Draw`, `Pan`, `Pinch` and `Rotate` are sticky
//! for the rest of the touch sequence; discrete gestures latch the same way
//! so their command fires exactly once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::TouchPoint;
use crate::core::settings::{GestureConfig, SessionSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GestureType {
    #[default]
    None,
    Tap,
    LongPress,
    Draw,
    Pan,
    Pinch,
    Rotate,
    Swipe,
    QuickMenu,
}

impl GestureType {
    /// Continuous gestures keep their classification until all touches lift
    pub fn is_sticky(self) -> bool {
        matches!(
            self,
            GestureType::Draw | GestureType::Pan | GestureType::Pinch | GestureType::Rotate
        )
    }

    fn is_latched(self) -> bool {
        self != GestureType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GesturePhase {
    #[default]
    Possible,
    Began,
    Changed,
    Ended,
}

/// Discrete commands produced by compound gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureCommand {
    Undo,
    Redo,
    ToggleUi,
    OpenQuickMenu,
}

/// Per-frame output of the recognizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureEvent {
    pub gesture_type: GestureType,
    pub phase: GesturePhase,
    pub touch_count: usize,
    /// Accumulated centroid translation since the sequence began
    pub translation: (f32, f32),
    /// Accumulated two-finger scale factor (1.0 = unchanged)
    pub scale: f32,
    /// Accumulated two-finger rotation in degrees
    pub rotation_degrees: f32,
    /// Earliest still-active touch
    pub primary: Option<TouchPoint>,
    /// Command to run, emitted once per sequence
    pub command: Option<GestureCommand>,
}

impl GestureEvent {
    fn idle() -> Self {
        Self {
            gesture_type: GestureType::None,
            phase: GesturePhase::Possible,
            touch_count: 0,
            translation: (0.0, 0.0),
            scale: 1.0,
            rotation_degrees: 0.0,
            primary: None,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TouchTrack {
    start_x: f32,
    start_y: f32,
    touch: TouchPoint,
}

impl TouchTrack {
    fn displacement(&self) -> (f32, f32) {
        (self.touch.x - self.start_x, self.touch.y - self.start_y)
    }

    fn movement(&self) -> f32 {
        let (dx, dy) = self.displacement();
        (dx * dx + dy * dy).sqrt()
    }
}

/// Reference geometry captured when exactly two touches form a pair
#[derive(Debug, Clone, Copy)]
struct PairReference {
    ids: (u32, u32),
    distance: f32,
    angle_deg: f32,
    centroid: (f32, f32),
}

#[derive(Debug, Clone, Copy)]
struct FrameGeometry {
    /// Order-sensitive signature of the active touch ids
    signature: u64,
    pair_ids: (u32, u32),
    centroid: (f32, f32),
    count: usize,
    pair: Option<(f32, f32)>,
}

pub struct GestureRecognizer {
    config: GestureConfig,
    palm_rejection: bool,
    palm_radius: f32,
    left_handed: bool,
    touches: IndexMap<u32, TouchTrack>,
    gesture_type: GestureType,
    phase: GesturePhase,
    start_time_ms: u64,
    max_touch_count: usize,
    max_movement: f32,
    translation: (f32, f32),
    scale: f32,
    rotation_deg: f32,
    pair_reference: Option<PairReference>,
    last_geometry: Option<FrameGeometry>,
    command_emitted: bool,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            palm_rejection: false,
            palm_radius: f32::INFINITY,
            left_handed: false,
            touches: IndexMap::new(),
            gesture_type: GestureType::None,
            phase: GesturePhase::Possible,
            start_time_ms: 0,
            max_touch_count: 0,
            max_movement: 0.0,
            translation: (0.0, 0.0),
            scale: 1.0,
            rotation_deg: 0.0,
            pair_reference: None,
            last_geometry: None,
            command_emitted: false,
        }
    }

    /// Build from session settings (thresholds, palm rejection, handedness)
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let mut recognizer = Self::new(settings.gestures.clone());
        recognizer.palm_rejection = settings.palm_rejection;
        recognizer.palm_radius = settings.palm_radius;
        recognizer.left_handed = settings.left_handed;
        recognizer
    }

    pub fn gesture_type(&self) -> GestureType {
        self.gesture_type
    }

    pub fn phase(&self) -> GesturePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        !self.touches.is_empty()
    }

    /// Process one input frame's active touch set.
    pub fn update(&mut self, touches: &[TouchPoint], now_ms: u64) -> GestureEvent {
        let accepted: Vec<TouchPoint> = touches
            .iter()
            .filter(|t| !self.is_palm(t))
            .copied()
            .collect();

        if accepted.is_empty() {
            if self.touches.is_empty() {
                return GestureEvent::idle();
            }
            return self.finish(now_ms);
        }

        if self.touches.is_empty() {
            self.begin(&accepted, now_ms);
        } else {
            self.track(&accepted);
            self.phase = GesturePhase::Changed;
        }

        self.accumulate();

        if !self.gesture_type.is_latched() {
            let previous = self.gesture_type;
            self.classify(now_ms);
            if self.gesture_type != previous {
                tracing::debug!(
                    "Gesture classified as {:?} with {} touches after {}ms",
                    self.gesture_type,
                    self.touches.len(),
                    now_ms.saturating_sub(self.start_time_ms)
                );
            }
        }

        let command = self.take_command();
        self.event(command)
    }

    /// Abort the current sequence (touches lost or cancelled by the platform)
    pub fn cancel(&mut self) -> Option<GestureEvent> {
        if self.touches.is_empty() {
            return None;
        }
        tracing::debug!("Gesture {:?} cancelled", self.gesture_type);
        self.phase = GesturePhase::Ended;
        let event = self.event(None);
        self.reset();
        Some(event)
    }

    fn is_palm(&self, touch: &TouchPoint) -> bool {
        self.palm_rejection
            && touch
                .radius
                .map(|r| r.is_finite() && r > self.palm_radius)
                .unwrap_or(false)
    }

    fn begin(&mut self, touches: &[TouchPoint], now_ms: u64) {
        self.reset();
        for touch in touches {
            self.touches.insert(
                touch.id,
                TouchTrack {
                    start_x: touch.x,
                    start_y: touch.y,
                    touch: *touch,
                },
            );
        }
        self.start_time_ms = now_ms;
        self.phase = GesturePhase::Began;
    }

    fn track(&mut self, touches: &[TouchPoint]) {
        self.touches
            .retain(|id, _| touches.iter().any(|t| t.id == *id));
        for touch in touches {
            self.touches
                .entry(touch.id)
                .and_modify(|track| track.touch = *touch)
                .or_insert(TouchTrack {
                    start_x: touch.x,
                    start_y: touch.y,
                    touch: *touch,
                });
        }
    }

    fn geometry(&self) -> FrameGeometry {
        let count = self.touches.len();
        let (sum_x, sum_y) = self
            .touches
            .values()
            .fold((0.0, 0.0), |(sx, sy), t| (sx + t.touch.x, sy + t.touch.y));
        let centroid = (sum_x / count as f32, sum_y / count as f32);

        let signature = self.touches.keys().fold(0u64, |h, id| {
            h.wrapping_mul(31).wrapping_add(u64::from(*id) + 1)
        });

        let mut tracks = self.touches.values();
        let (pair_ids, pair) = match (tracks.next(), tracks.next(), count) {
            (Some(a), Some(b), 2) => {
                let dx = b.touch.x - a.touch.x;
                let dy = b.touch.y - a.touch.y;
                (
                    (a.touch.id, b.touch.id),
                    Some(((dx * dx + dy * dy).sqrt(), dy.atan2(dx).to_degrees())),
                )
            }
            _ => ((u32::MAX, u32::MAX), None),
        };

        FrameGeometry {
            signature,
            pair_ids,
            centroid,
            count,
            pair,
        }
    }

    /// Fold this frame's motion into the accumulators. Motion is only
    /// accumulated between frames with the same touch set, so touches
    /// landing or lifting never register as a jump.
    fn accumulate(&mut self) {
        let geometry = self.geometry();

        self.max_touch_count = self.max_touch_count.max(geometry.count);
        let movement = self
            .touches
            .values()
            .map(TouchTrack::movement)
            .fold(0.0f32, f32::max);
        self.max_movement = self.max_movement.max(movement);

        if let Some(last) = self.last_geometry {
            if last.signature == geometry.signature {
                self.translation.0 += geometry.centroid.0 - last.centroid.0;
                self.translation.1 += geometry.centroid.1 - last.centroid.1;

                if let (Some((last_dist, last_angle)), Some((dist, angle))) =
                    (last.pair, geometry.pair)
                {
                    if last_dist > f32::EPSILON {
                        self.scale *= dist / last_dist;
                    }
                    self.rotation_deg += wrap_degrees(angle - last_angle);
                }
            }
        }

        match (geometry.pair, self.pair_reference) {
            (Some((distance, angle_deg)), reference)
                if reference.map(|r| r.ids != geometry.pair_ids).unwrap_or(true) =>
            {
                self.pair_reference = Some(PairReference {
                    ids: geometry.pair_ids,
                    distance,
                    angle_deg,
                    centroid: geometry.centroid,
                });
            }
            (None, Some(_)) => self.pair_reference = None,
            _ => {}
        }

        self.last_geometry = Some(geometry);
    }

    fn classify(&mut self, now_ms: u64) {
        let count = self.touches.len();
        let duration = now_ms.saturating_sub(self.start_time_ms);
        let stationary = self.max_movement <= self.config.pan_threshold;

        // Compound gestures
        if self.max_touch_count >= 3 && count >= 3 {
            if let Some(kind) = self.classify_multi_touch() {
                self.gesture_type = kind;
            }
            return;
        }
        if count == 2
            && self.max_touch_count == 2
            && stationary
            && duration > self.config.long_press_duration_ms
        {
            self.gesture_type = GestureType::QuickMenu;
            return;
        }

        // Single touch
        if count == 1 && self.max_touch_count == 1 {
            if !stationary {
                self.gesture_type = GestureType::Draw;
            } else if duration > self.config.long_press_duration_ms {
                self.gesture_type = GestureType::LongPress;
            }
            return;
        }

        // Two touches
        if count == 2 && self.max_touch_count == 2 {
            self.gesture_type = self.classify_pair().unwrap_or(GestureType::None);
        }
    }

    fn classify_pair(&self) -> Option<GestureType> {
        let reference = self.pair_reference?;
        let (distance, angle) = self.last_geometry?.pair?;
        let centroid = self.last_geometry?.centroid;

        let scale_change = if reference.distance > f32::EPSILON {
            (distance / reference.distance - 1.0).abs()
        } else {
            0.0
        };
        let rotation_change = wrap_degrees(angle - reference.angle_deg).abs();

        if scale_change > self.config.pinch_threshold
            || rotation_change > self.config.rotation_threshold_deg
        {
            return if scale_change > rotation_change / 45.0 {
                Some(GestureType::Pinch)
            } else {
                Some(GestureType::Rotate)
            };
        }

        let dx = centroid.0 - reference.centroid.0;
        let dy = centroid.1 - reference.centroid.1;
        if (dx * dx + dy * dy).sqrt() > self.config.pan_threshold {
            return Some(GestureType::Pan);
        }
        None
    }

    /// Three-or-more touches: horizontal three-finger swipe, otherwise pan
    fn classify_multi_touch(&self) -> Option<GestureType> {
        let count = self.touches.len() as f32;
        let (sum_dx, sum_dy) = self.touches.values().fold((0.0, 0.0), |(sx, sy), t| {
            let (dx, dy) = t.displacement();
            (sx + dx, sy + dy)
        });
        let (dx, dy) = (sum_dx / count, sum_dy / count);
        let horizontal = dx.abs() > 2.0 * dy.abs();

        if self.max_touch_count == 3 && horizontal {
            if dx.abs() > self.config.swipe_threshold {
                return Some(GestureType::Swipe);
            }
            return None;
        }

        if self.max_movement > self.config.pan_threshold {
            return Some(GestureType::Pan);
        }
        None
    }

    fn take_command(&mut self) -> Option<GestureCommand> {
        if self.command_emitted {
            return None;
        }
        let command = match self.gesture_type {
            GestureType::Swipe => {
                let swiped_left = self.translation.0 < 0.0;
                // Left-handed mode mirrors the swipe direction
                if swiped_left != self.left_handed {
                    Some(GestureCommand::Undo)
                } else {
                    Some(GestureCommand::Redo)
                }
            }
            GestureType::QuickMenu => Some(GestureCommand::OpenQuickMenu),
            _ => None,
        };
        if command.is_some() {
            self.command_emitted = true;
        }
        command
    }

    /// All touches lifted: resolve release-time taps, emit `Ended`, reset
    fn finish(&mut self, now_ms: u64) -> GestureEvent {
        let mut command = None;
        if !self.gesture_type.is_latched() {
            let duration = now_ms.saturating_sub(self.start_time_ms);
            let stationary = self.max_movement <= self.config.pan_threshold;
            if stationary && duration <= self.config.tap_duration_ms {
                self.gesture_type = GestureType::Tap;
                command = match self.max_touch_count {
                    2 => Some(GestureCommand::Undo),
                    4 => Some(GestureCommand::ToggleUi),
                    _ => None,
                };
            } else if stationary && duration > self.config.long_press_duration_ms {
                // Held past the threshold with no frame in between
                match self.max_touch_count {
                    1 => self.gesture_type = GestureType::LongPress,
                    2 => {
                        self.gesture_type = GestureType::QuickMenu;
                        command = self.take_command();
                    }
                    _ => {}
                }
            }
        }

        self.phase = GesturePhase::Ended;
        let mut event = self.event(command);
        event.touch_count = 0;
        tracing::debug!(
            "Gesture {:?} ended after {}ms",
            event.gesture_type,
            now_ms.saturating_sub(self.start_time_ms)
        );
        self.reset();
        event
    }

    fn event(&self, command: Option<GestureCommand>) -> GestureEvent {
        GestureEvent {
            gesture_type: self.gesture_type,
            phase: self.phase,
            touch_count: self.touches.len(),
            translation: self.translation,
            scale: self.scale,
            rotation_degrees: self.rotation_deg,
            primary: self.touches.values().next().map(|t| t.touch),
            command,
        }
    }

    fn reset(&mut self) {
        self.touches.clear();
        self.gesture_type = GestureType::None;
        self.phase = GesturePhase::Possible;
        self.start_time_ms = 0;
        self.max_touch_count = 0;
        self.max_movement = 0.0;
        self.translation = (0.0, 0.0);
        self.scale = 1.0;
        self.rotation_deg = 0.0;
        self.pair_reference = None;
        self.last_geometry = None;
        self.command_emitted = false;
    }
}

impl Default for GestureRecognizer {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}

/// Wrap an angle difference into (-180, 180]
fn wrap_degrees(delta: f32) -> f32 {
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

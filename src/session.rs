//! Drawing session - one explicitly constructed context per canvas
//!
//! Owns one of each manager and routes every input frame: gesture
//! classification first, then either stroke building or viewport and
//! command handling. Only a completed pointer-up commits a stroke.

use std::sync::Arc;

use image::RgbaImage;

use crate::brush::library::BrushLibrary;
use crate::brush::{Brush, BrushEngine, Color};
use crate::core::errors::CoreError;
use crate::core::settings::SessionSettings;
use crate::file::{load_async, spawn_save, LayerStorage, SaveHandle};
use crate::input::{
    GestureCommand, GestureEvent, GesturePhase, GestureRecognizer, GestureType, InputProcessor,
    InputProcessorConfig, Point, TouchPoint,
};
use crate::layer::{LayerId, LayerStack, Stroke, StrokeId};
use crate::perf::{LevelChange, OptimizationLevel, PerformanceOptimizer, PerformanceReport};

const MIN_ZOOM: f32 = 0.1;
const MAX_ZOOM: f32 = 32.0;

/// Typed session callbacks; every method defaults to a no-op
pub trait SessionObserver {
    fn stroke_committed(&mut self, _layer: LayerId, _stroke: StrokeId) {}

    /// `applied` is false when the command had nothing to act on
    fn command_executed(&mut self, _command: GestureCommand, _applied: bool) {}

    fn level_changed(&mut self, _change: LevelChange) {}

    fn layers_changed(&mut self) {}
}

/// Screen-to-canvas mapping driven by pan, pinch and rotate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
    pub rotation_degrees: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
            rotation_degrees: 0.0,
        }
    }
}

impl Viewport {
    pub fn screen_to_canvas(&self, x: f32, y: f32) -> (f32, f32) {
        let dx = x - self.offset_x;
        let dy = y - self.offset_y;
        let (sin, cos) = (-self.rotation_degrees.to_radians()).sin_cos();
        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;
        (rx / self.zoom, ry / self.zoom)
    }

    /// This viewport moved by a gesture's accumulated motion
    fn moved_by(&self, event: &GestureEvent) -> Self {
        let mut next = *self;
        next.offset_x += event.translation.0;
        next.offset_y += event.translation.1;
        match event.gesture_type {
            GestureType::Pinch => {
                next.zoom = (self.zoom * event.scale).clamp(MIN_ZOOM, MAX_ZOOM);
            }
            GestureType::Rotate => {
                next.rotation_degrees =
                    (self.rotation_degrees + event.rotation_degrees).rem_euclid(360.0);
            }
            _ => {}
        }
        next
    }
}

pub struct DrawingSession {
    settings: SessionSettings,
    gestures: GestureRecognizer,
    input: InputProcessor,
    engine: BrushEngine,
    brushes: BrushLibrary,
    layers: LayerStack,
    optimizer: PerformanceOptimizer,
    viewport: Viewport,
    /// Viewport when the current touch sequence began
    gesture_origin: Viewport,
    /// Primary-touch samples seen before the gesture was classified
    undecided: Vec<Point>,
    /// Touch the buffered samples or the live stroke belong to
    stroke_touch: Option<u32>,
    /// Processed points of the stroke being drawn
    pending: Vec<Point>,
    drawing: bool,
    ui_visible: bool,
    quick_menu_open: bool,
    observers: Vec<Box<dyn SessionObserver>>,
}

impl DrawingSession {
    pub fn new(settings: SessionSettings) -> Result<Self, CoreError> {
        let settings = settings.sanitized();
        let layers = LayerStack::with_budget(
            settings.canvas_width,
            settings.canvas_height,
            settings.surface_budget_bytes as u64,
        )?;
        let input = InputProcessor::with_config(InputProcessorConfig {
            smoothing: settings.brush.smoothing,
            ..InputProcessorConfig::default()
        });
        tracing::info!(
            "[Session] Started {}x{} at {} fps",
            settings.canvas_width,
            settings.canvas_height,
            settings.target_fps()
        );
        Ok(Self {
            gestures: GestureRecognizer::from_settings(&settings),
            input,
            engine: BrushEngine::from_defaults(&settings.brush),
            brushes: BrushLibrary::with_builtins(),
            layers,
            optimizer: PerformanceOptimizer::from_settings(&settings),
            viewport: Viewport::default(),
            gesture_origin: Viewport::default(),
            undecided: Vec::new(),
            stroke_touch: None,
            pending: Vec::new(),
            drawing: false,
            ui_visible: true,
            quick_menu_open: false,
            observers: Vec::new(),
            settings,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Direct stack access; structural edits made here skip observers
    pub fn layers_mut(&mut self) -> &mut LayerStack {
        &mut self.layers
    }

    pub fn brush_engine(&self) -> &BrushEngine {
        &self.engine
    }

    pub fn brush_library(&self) -> &BrushLibrary {
        &self.brushes
    }

    pub fn optimizer(&self) -> &PerformanceOptimizer {
        &self.optimizer
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Points of the uncommitted stroke, for live preview
    pub fn pending_points(&self) -> &[Point] {
        &self.pending
    }

    pub fn ui_visible(&self) -> bool {
        self.ui_visible
    }

    pub fn quick_menu_open(&self) -> bool {
        self.quick_menu_open
    }

    pub fn close_quick_menu(&mut self) {
        self.quick_menu_open = false;
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    // ========================================================================
    // Brush
    // ========================================================================

    /// Select a brush from the library by id
    pub fn select_brush(&mut self, id: &str) -> bool {
        match self.brushes.get(id) {
            Some(brush) => {
                self.engine.set_brush(brush);
                true
            }
            None => false,
        }
    }

    /// Save or replace a brush in the library
    pub fn save_brush(&mut self, brush: Brush) -> Result<(), CoreError> {
        self.brushes.insert(brush)
    }

    pub fn edit_brush<F: FnOnce(&mut Brush)>(&mut self, edit: F) {
        self.engine.edit_brush(edit);
    }

    pub fn set_color(&mut self, color: Color) {
        self.engine.set_color(color);
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Run one input frame with the currently active touches
    pub fn handle_touches(&mut self, touches: &[TouchPoint], now_ms: u64) -> GestureEvent {
        let event = self.gestures.update(touches, now_ms);
        if event.phase == GesturePhase::Began {
            self.gesture_origin = self.viewport;
        }

        match event.gesture_type {
            GestureType::Draw => self.continue_stroke(&event, touches, now_ms),
            GestureType::None if event.phase != GesturePhase::Ended => {
                match (event.touch_count, event.primary) {
                    (1, Some(primary)) => self.buffer_undecided(&primary, now_ms),
                    _ => self.clear_undecided(),
                }
            }
            GestureType::Pan | GestureType::Pinch | GestureType::Rotate => {
                self.clear_undecided();
                self.viewport = self.gesture_origin.moved_by(&event);
            }
            _ => self.clear_undecided(),
        }

        if let Some(command) = event.command {
            self.run_command(command);
        }
        if event.phase == GesturePhase::Ended {
            self.clear_undecided();
        }
        event
    }

    /// Drop any uncommitted stroke; nothing is recorded
    pub fn cancel_input(&mut self) {
        self.gestures.cancel();
        if self.drawing || !self.pending.is_empty() {
            tracing::debug!("[Session] Discarded stroke with {} points", self.pending.len());
        }
        self.input.reset();
        self.pending.clear();
        self.drawing = false;
        self.clear_undecided();
    }

    fn buffer_undecided(&mut self, touch: &TouchPoint, now_ms: u64) {
        if self.stroke_touch != Some(touch.id) {
            self.undecided.clear();
            self.stroke_touch = Some(touch.id);
        }
        let point = self.canvas_point(touch, now_ms);
        self.undecided.push(point);
    }

    fn clear_undecided(&mut self) {
        self.undecided.clear();
        if !self.drawing {
            self.stroke_touch = None;
        }
    }

    fn canvas_point(&self, touch: &TouchPoint, now_ms: u64) -> Point {
        let (x, y) = self.viewport.screen_to_canvas(touch.x, touch.y);
        let mut point = touch.to_point(now_ms);
        point.x = x;
        point.y = y;
        point
    }

    /// Follow the touch that started the stroke; other fingers never
    /// contribute points, and lifting that touch commits the stroke
    fn continue_stroke(&mut self, event: &GestureEvent, touches: &[TouchPoint], now_ms: u64) {
        if event.phase == GesturePhase::Ended {
            if self.drawing {
                self.commit_stroke();
            }
            self.stroke_touch = None;
            return;
        }

        if !self.drawing {
            // Stroke already committed earlier in this touch sequence
            if self.undecided.is_empty() && self.stroke_touch.is_some() {
                return;
            }
            self.start_stroke(event);
        }
        let Some(id) = self.stroke_touch else {
            return;
        };
        match touches.iter().find(|t| t.id == id) {
            Some(touch) => {
                let point = self.canvas_point(touch, now_ms);
                self.push_point(point);
            }
            None => {
                tracing::debug!("[Session] Drawing touch {} lifted", id);
                self.commit_stroke();
            }
        }
    }

    fn start_stroke(&mut self, event: &GestureEvent) {
        let primary = event.primary.map(|t| t.id);
        if self.stroke_touch != primary {
            self.undecided.clear();
            self.stroke_touch = primary;
        }
        self.drawing = true;
        self.pending.clear();
        self.input.reset();
        self.input.set_smoothing(self.effective_smoothing());
        for point in std::mem::take(&mut self.undecided) {
            self.push_point(point);
        }
    }

    /// Brush smoothing, reduced as the optimizer sheds work
    fn effective_smoothing(&self) -> f32 {
        let full = OptimizationLevel::Full.settings().stroke_smoothing;
        let current = self.optimizer.settings().stroke_smoothing;
        (self.engine.brush().smoothing * current / full).clamp(0.0, 1.0)
    }

    fn push_point(&mut self, point: Point) {
        if let Some(processed) = self.input.process(point) {
            self.pending.push(processed);
        }
    }

    fn commit_stroke(&mut self) {
        self.drawing = false;
        if let Some(tail) = self.input.finish() {
            self.pending.push(tail);
        }
        let points = std::mem::take(&mut self.pending);
        if points.is_empty() {
            return;
        }

        let points = self.optimizer.optimize_stroke(&points);
        self.engine
            .set_point_density(self.optimizer.settings().point_density);
        let dabs = self.engine.build_dabs(&points);
        let stroke = Stroke::new(self.engine.brush(), self.engine.color(), points, dabs);

        let layer = self.layers.active_layer_id();
        match self.layers.add_stroke(layer, stroke) {
            Some(stroke_id) => {
                for observer in &mut self.observers {
                    observer.stroke_committed(layer, stroke_id);
                    observer.layers_changed();
                }
            }
            None => tracing::warn!("[Session] Active layer {} refused the stroke", layer),
        }
    }

    fn run_command(&mut self, command: GestureCommand) -> bool {
        let applied = match command {
            GestureCommand::Undo => self.layers.undo(),
            GestureCommand::Redo => self.layers.redo(),
            GestureCommand::ToggleUi => {
                self.ui_visible = !self.ui_visible;
                true
            }
            GestureCommand::OpenQuickMenu => {
                self.quick_menu_open = true;
                true
            }
        };
        tracing::debug!("[Session] Command {:?} applied={}", command, applied);
        let history_moved =
            applied && matches!(command, GestureCommand::Undo | GestureCommand::Redo);
        for observer in &mut self.observers {
            observer.command_executed(command, applied);
            if history_moved {
                observer.layers_changed();
            }
        }
        applied
    }

    // ========================================================================
    // Layers and resources
    // ========================================================================

    pub fn create_layer(&mut self, name: Option<&str>) -> Result<LayerId, CoreError> {
        let result = self.layers.create_layer(name);
        self.after_layer_result(result)
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<Option<LayerId>, CoreError> {
        let result = self.layers.duplicate_layer(id);
        self.after_layer_result(result)
    }

    pub fn undo(&mut self) -> bool {
        self.run_command(GestureCommand::Undo)
    }

    pub fn redo(&mut self) -> bool {
        self.run_command(GestureCommand::Redo)
    }

    fn after_layer_result<T>(&mut self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        match &result {
            Ok(_) => {
                for observer in &mut self.observers {
                    observer.layers_changed();
                }
            }
            Err(e) if e.is_resource_error() => self.handle_resource_error(e),
            Err(_) => {}
        }
        result
    }

    /// Surface allocation failed: shed every optional cost
    fn handle_resource_error(&mut self, error: &CoreError) {
        tracing::error!("[Session] {}", error);
        self.layers.handle_memory_pressure();
        if let Some(change) = self.optimizer.force_max_level() {
            self.notify_level_change(change);
        }
    }

    /// Memory warning from the platform
    pub fn handle_memory_pressure(&mut self) {
        self.layers.handle_memory_pressure();
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Composite the canvas, timing the frame for the optimizer
    pub fn render_frame(&mut self) -> &RgbaImage {
        self.optimizer.start_frame();
        let frame = self.layers.composite();
        if let Some(change) = self.optimizer.end_frame() {
            announce_level_change(&mut self.engine, &mut self.observers, change);
        }
        frame
    }

    /// Feed an externally measured frame time
    pub fn record_frame_time(&mut self, frame_time_ms: f64) {
        if let Some(change) = self.optimizer.record_frame_time(frame_time_ms) {
            self.notify_level_change(change);
        }
    }

    pub fn performance_report(&self) -> PerformanceReport {
        self.optimizer.report()
    }

    fn notify_level_change(&mut self, change: LevelChange) {
        announce_level_change(&mut self.engine, &mut self.observers, change);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the layers and save them on the blocking pool
    ///
    /// Drawing continues while the save runs; cancel through the handle.
    pub fn save_async(&self, storage: Arc<dyn LayerStorage>) -> SaveHandle {
        spawn_save(storage, self.layers.snapshot())
    }

    /// Replace the layers with the stored payload; returns false when
    /// storage is empty. A bad payload leaves the session unchanged.
    pub async fn load(&mut self, storage: Arc<dyn LayerStorage>) -> Result<bool, CoreError> {
        let Some(data) = load_async(storage).await? else {
            return Ok(false);
        };
        self.cancel_input();
        let result = self.layers.restore_save_data(&data);
        self.after_layer_result(result)?;
        Ok(true)
    }
}

fn announce_level_change(
    engine: &mut BrushEngine,
    observers: &mut [Box<dyn SessionObserver>],
    change: LevelChange,
) {
    engine.set_point_density(change.to.settings().point_density);
    for observer in observers.iter_mut() {
        observer.level_changed(change);
    }
}

#![allow(clippy::unwrap_used)]

use image::{Rgba, RgbaImage};

use super::*;
use crate::brush::{library, BlendMode, BrushEngine, Color};
use crate::core::errors::CoreError;
use crate::input::Point;

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn paint(stack: &mut LayerStack, id: LayerId, from: (u32, u32), to: (u32, u32), px: [u8; 4]) {
    let layer = stack.layers.get_mut(&id).unwrap();
    for y in from.1..to.1 {
        for x in from.0..to.0 {
            layer.base.put_pixel(x, y, Rgba(px));
            layer.surface.put_pixel(x, y, Rgba(px));
        }
    }
    stack.compositor.invalidate_all();
}

fn stroke_at(x: f32, y: f32) -> Stroke {
    let mut engine = BrushEngine::with_seed(library::ink_pen(), 7);
    engine.set_color(Color::rgba(1.0, 0.0, 0.0, 1.0));
    let points = vec![
        Point::with_pressure(x, y, 1.0, 0),
        Point::with_pressure(x + 12.0, y, 1.0, 16),
    ];
    let dabs = engine.build_dabs(&points);
    Stroke::new(engine.brush(), engine.color(), points, dabs)
}

fn has_paint(image: &RgbaImage) -> bool {
    image.pixels().any(|p| p.0[3] > 0)
}

#[test]
fn new_stack_has_one_active_layer() {
    let stack = LayerStack::new(16, 16).unwrap();
    assert_eq!(stack.layer_count(), 1);
    assert_eq!(stack.active_layer_id(), stack.layer_order()[0]);
    assert!(!stack.can_undo());
    assert_eq!(stack.surface_bytes(), 2 * 16 * 16 * 4);
}

#[test]
fn deleting_the_last_layer_is_refused() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let only = stack.active_layer_id();
    assert!(!stack.delete_layer(only));
    assert_eq!(stack.layer_count(), 1);
    assert_eq!(stack.history_len(), 0);
}

#[test]
fn unknown_ids_fail_without_history() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let ghost = LayerId(99);
    assert!(!stack.delete_layer(ghost));
    assert!(!stack.set_opacity(ghost, 0.5));
    assert!(!stack.merge_down(ghost));
    assert!(stack.add_stroke(ghost, stroke_at(1.0, 1.0)).is_none());
    assert!(!stack.remove_stroke(stack.active_layer_id(), StrokeId(42)));
    assert!(!stack.undo());
    assert!(!stack.redo());
    assert_eq!(stack.history_len(), 0);
}

#[test]
fn create_inserts_above_active_and_undoes() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let first = stack.active_layer_id();
    let second = stack.create_layer(Some("Ink")).unwrap();
    assert_eq!(stack.layer_order(), &[first, second]);
    assert_eq!(stack.active_layer_id(), second);

    stack.set_active_layer(first);
    let third = stack.create_layer(None).unwrap();
    assert_eq!(stack.layer_order(), &[first, third, second]);

    assert!(stack.undo());
    assert_eq!(stack.layer_order(), &[first, second]);
    assert_eq!(stack.active_layer_id(), first);
    assert!(stack.redo());
    assert_eq!(stack.layer_order(), &[first, third, second]);
    assert_eq!(stack.layer(third).unwrap().name, format!("Layer {}", third.0));
}

#[test]
fn opacity_is_clamped() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let id = stack.active_layer_id();

    assert!(stack.set_opacity(id, 0.5));
    assert!(stack.set_opacity(id, 1.5));
    assert_eq!(stack.layer(id).unwrap().opacity, 1.0);
    assert!(stack.set_opacity(id, -0.2));
    assert_eq!(stack.layer(id).unwrap().opacity, 0.0);
    assert!(!stack.set_opacity(id, f32::NAN));

    assert!(stack.undo());
    assert_eq!(stack.layer(id).unwrap().opacity, 1.0);
}

#[test]
fn property_changes_undo_and_redo() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let id = stack.active_layer_id();
    let original = stack.layer(id).unwrap().properties();

    assert!(stack.set_blend_mode(id, BlendMode::Screen));
    assert!(stack.set_visibility(id, false));
    assert!(stack.set_locked(id, true));
    assert!(stack.rename(id, "Sketch"));
    assert!(!stack.rename(id, "   "));
    assert_eq!(stack.history_len(), 4);
    assert_eq!(stack.last_action(), Some(HistoryKind::PropertyChange));

    for _ in 0..4 {
        assert!(stack.undo());
    }
    assert_eq!(stack.layer(id).unwrap().properties(), original);
    assert!(!stack.undo());

    assert!(stack.redo());
    assert_eq!(stack.layer(id).unwrap().blend_mode, BlendMode::Screen);
}

#[test]
fn new_edit_discards_redo() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let id = stack.active_layer_id();
    stack.set_opacity(id, 0.3);
    stack.undo();
    assert!(stack.can_redo());
    stack.set_opacity(id, 0.6);
    assert!(!stack.can_redo());
    assert!(!stack.redo());
}

#[test]
fn layer_limit_is_reported() {
    let mut stack = LayerStack::new(1, 1).unwrap();
    for _ in 1..MAX_LAYERS {
        stack.create_layer(None).unwrap();
    }
    assert_eq!(stack.layer_count(), MAX_LAYERS);

    let err = stack.create_layer(None).unwrap_err();
    assert!(matches!(err, CoreError::LayerLimit { max: MAX_LAYERS }));
    assert!(stack.create_group(None).is_err());
    assert_eq!(stack.layer_count(), MAX_LAYERS);

    // The newest entry is still the last successful create
    assert!(stack.undo());
    assert_eq!(stack.layer_count(), MAX_LAYERS - 1);
}

#[test]
fn exhausted_budget_is_a_resource_error() {
    let mut stack = LayerStack::with_budget(4, 4, 3 * 64).unwrap();
    let err = stack.create_layer(None).unwrap_err();
    assert!(err.is_resource_error());
    assert_eq!(stack.layer_count(), 1);
    assert_eq!(stack.history_len(), 0);
    assert_eq!(stack.surface_bytes(), 2 * 64);
}

#[test]
fn stroke_add_undo_restores_pixels() {
    let mut stack = LayerStack::new(64, 64).unwrap();
    let id = stack.active_layer_id();

    let stroke_id = stack.add_stroke(id, stroke_at(20.0, 20.0)).unwrap();
    let painted = stack.layer(id).unwrap().surface.clone();
    assert!(has_paint(&painted));
    assert_eq!(stack.layer(id).unwrap().stroke(stroke_id).unwrap().layer_id, id);

    assert!(stack.undo());
    assert!(!has_paint(&stack.layer(id).unwrap().surface));
    assert!(stack.layer(id).unwrap().strokes.is_empty());

    assert!(stack.redo());
    assert_eq!(stack.layer(id).unwrap().surface, painted);
}

#[test]
fn locked_layers_refuse_strokes() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let id = stack.active_layer_id();
    stack.set_locked(id, true);
    let history = stack.history_len();
    assert!(stack.add_stroke(id, stroke_at(5.0, 5.0)).is_none());
    assert!(!stack.clear_layer(id));
    assert_eq!(stack.history_len(), history);
}

#[test]
fn remove_stroke_rebuilds_and_undoes() {
    let mut stack = LayerStack::new(64, 64).unwrap();
    let id = stack.active_layer_id();
    let first = stack.add_stroke(id, stroke_at(5.0, 5.0)).unwrap();
    let second = stack.add_stroke(id, stroke_at(5.0, 40.0)).unwrap();
    let both = stack.layer(id).unwrap().surface.clone();

    assert!(stack.remove_stroke(id, first));
    let layer = stack.layer(id).unwrap();
    assert_eq!(layer.strokes.len(), 1);
    assert_eq!(layer.surface.get_pixel(8, 5).0[3], 0);

    assert!(stack.undo());
    let layer = stack.layer(id).unwrap();
    let ids: Vec<StrokeId> = layer.strokes.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(layer.surface, both);
}

#[test]
fn merge_down_is_one_history_entry() {
    let mut stack = LayerStack::new(48, 48).unwrap();
    let bottom = stack.active_layer_id();
    paint(&mut stack, bottom, (0, 0), (48, 48), [200, 200, 200, 255]);
    let middle = stack.create_layer(None).unwrap();
    stack.add_stroke(middle, stroke_at(10.0, 10.0)).unwrap();
    let top = stack.create_layer(None).unwrap();
    stack.add_stroke(top, stroke_at(10.0, 30.0)).unwrap();
    stack.set_blend_mode(top, BlendMode::Multiply);
    stack.set_opacity(top, 0.5);

    let before = stack.composite().clone();
    let order = stack.layer_order().to_vec();
    let top_props = stack.layer(top).unwrap().properties();
    let entries = stack.history_len();

    assert!(stack.merge_down(top));
    assert_eq!(stack.layer_count(), 2);
    assert_eq!(stack.history_len(), entries + 1);
    assert_eq!(stack.last_action(), Some(HistoryKind::Merge));
    assert_eq!(stack.active_layer_id(), middle);
    let merged = stack.layer(middle).unwrap();
    assert_eq!(merged.strokes.len(), 2);
    assert!(merged.strokes.iter().all(|s| s.baked && s.layer_id == middle));
    assert!(merged.surface.get_pixel(12, 30).0[3] > 0);

    assert!(stack.undo());
    assert_eq!(stack.layer_order(), order.as_slice());
    assert_eq!(stack.layer(top).unwrap().properties(), top_props);
    assert!(stack.layer(middle).unwrap().strokes.iter().all(|s| !s.baked));
    assert_eq!(stack.composite(), &before);

    assert!(stack.redo());
    assert_eq!(stack.layer_count(), 2);
    assert!(stack.layer(top).is_none());
}

#[test]
fn merging_the_middle_of_three_layers_undoes_exactly() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let first = stack.active_layer_id();
    let second = stack.create_layer(None).unwrap();
    let third = stack.create_layer(None).unwrap();
    assert_eq!(stack.layer_order(), &[first, second, third]);
    let stroke = stack.add_stroke(second, stroke_at(6.0, 6.0)).unwrap();

    assert!(stack.merge_down(second));
    assert_eq!(stack.layer_count(), 2);
    assert!(stack.undo());

    assert_eq!(stack.layer_count(), 3);
    assert_eq!(stack.layer_order(), &[first, second, third]);
    let restored = stack.layer(second).unwrap();
    assert_eq!(restored.strokes.len(), 1);
    assert_eq!(restored.strokes[0].id, stroke);
    assert!(!restored.strokes[0].baked);
    assert!(has_paint(&restored.surface));
    let below = stack.layer(first).unwrap();
    assert!(below.strokes.is_empty());
    assert!(!has_paint(&below.surface));
}

#[test]
fn merge_down_hands_clips_to_the_merged_layer() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let bottom = stack.active_layer_id();
    let base = stack.create_layer(None).unwrap();
    paint(&mut stack, base, (2, 2), (4, 4), RED);
    let clip = stack.create_layer(None).unwrap();
    paint(&mut stack, clip, (0, 0), (8, 8), BLUE);
    assert!(stack.set_clipping_mask(clip, Some(base)));
    assert_eq!(stack.composite().get_pixel(3, 3).0, BLUE);

    assert!(stack.merge_down(base));
    assert_eq!(stack.layer(clip).unwrap().clipping_mask_of, Some(bottom));
    let frame = stack.composite();
    assert_eq!(frame.get_pixel(3, 3).0, BLUE);
    assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 0]);

    assert!(stack.undo());
    assert_eq!(stack.layer(clip).unwrap().clipping_mask_of, Some(base));
    assert!(stack.redo());
    assert_eq!(stack.layer(clip).unwrap().clipping_mask_of, Some(bottom));
}

type Observed = (Vec<LayerId>, Vec<(LayerProperties, Vec<(StrokeId, bool)>)>, RgbaImage);

fn observe(stack: &mut LayerStack) -> Observed {
    let layers = stack
        .layers_in_order()
        .map(|l| {
            let strokes = l.strokes.iter().map(|s| (s.id, s.baked)).collect();
            (l.properties(), strokes)
        })
        .collect();
    (stack.layer_order().to_vec(), layers, stack.composite().clone())
}

#[test]
fn every_history_kind_undoes_and_redoes() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let mut states = vec![observe(&mut stack)];
    let mut kinds = Vec::new();
    macro_rules! step {
        ($done:expr) => {{
            assert!($done);
            kinds.push(stack.last_action().unwrap());
            states.push(observe(&mut stack));
        }};
    }

    let a = stack.active_layer_id();
    step!(stack.add_stroke(a, stroke_at(4.0, 4.0)).is_some());
    let b = stack.create_layer(None).unwrap();
    kinds.push(stack.last_action().unwrap());
    states.push(observe(&mut stack));
    step!(stack.add_stroke(b, stroke_at(4.0, 16.0)).is_some());
    step!(stack.set_blend_mode(b, BlendMode::Multiply));
    step!(stack.set_opacity(b, 0.6));
    let c = stack.create_layer(None).unwrap();
    kinds.push(stack.last_action().unwrap());
    states.push(observe(&mut stack));
    let doomed = stack.add_stroke(c, stroke_at(16.0, 4.0)).unwrap();
    kinds.push(stack.last_action().unwrap());
    states.push(observe(&mut stack));
    step!(stack.set_clipping_mask(c, Some(b)));
    let g = stack.create_group(Some("Folder")).unwrap();
    kinds.push(stack.last_action().unwrap());
    states.push(observe(&mut stack));
    step!(stack.set_layer_group(a, Some(g)));
    step!(stack.set_opacity(g, 0.5));
    step!(stack.reorder(3, 0));
    step!(stack.remove_stroke(c, doomed));
    let d = stack.duplicate_layer(b).unwrap().unwrap();
    kinds.push(stack.last_action().unwrap());
    states.push(observe(&mut stack));
    step!(stack.clear_layer(d));
    step!(stack.merge_down(d));
    step!(stack.set_transform(
        a,
        Transform {
            translate_x: 3.0,
            ..Transform::default()
        }
    ));
    step!(stack.delete_layer(c));

    for kind in [
        HistoryKind::Create,
        HistoryKind::Delete,
        HistoryKind::PropertyChange,
        HistoryKind::StrokeAdd,
        HistoryKind::StrokeRemove,
        HistoryKind::Merge,
        HistoryKind::Reorder,
        HistoryKind::Clear,
    ] {
        assert!(kinds.contains(&kind), "{:?} not exercised", kind);
    }

    for expected in states.iter().rev().skip(1) {
        assert!(stack.undo());
        assert!(observe(&mut stack) == *expected);
    }
    assert!(!stack.undo());

    for expected in states.iter().skip(1) {
        assert!(stack.redo());
        assert!(observe(&mut stack) == *expected);
    }
    assert!(!stack.redo());

    // Import replaces the stack wholesale and starts a fresh history
    let export = stack.export_all().unwrap();
    stack.import_all(&export).unwrap();
    assert!(!stack.can_undo());
    assert_eq!(observe(&mut stack).0, states.last().unwrap().0);
}

#[test]
fn merge_down_refuses_bottom_and_locked() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let bottom = stack.active_layer_id();
    let top = stack.create_layer(None).unwrap();
    assert!(!stack.merge_down(bottom));
    stack.set_locked(bottom, true);
    let entries = stack.history_len();
    assert!(!stack.merge_down(top));
    assert_eq!(stack.history_len(), entries);
}

#[test]
fn delete_undo_restores_layer_and_clip_links() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let base = stack.active_layer_id();
    paint(&mut stack, base, (0, 0), (2, 2), RED);
    let clip = stack.create_layer(None).unwrap();
    assert!(stack.set_clipping_mask(clip, Some(base)));

    assert!(stack.delete_layer(base));
    assert_eq!(stack.layer(clip).unwrap().clipping_mask_of, None);
    assert_eq!(stack.surface_bytes(), 2 * 8 * 8 * 4);

    assert!(stack.undo());
    assert_eq!(stack.layer_order(), &[base, clip]);
    assert_eq!(stack.layer(clip).unwrap().clipping_mask_of, Some(base));
    assert_eq!(stack.layer(base).unwrap().base.get_pixel(1, 1).0, RED);
    assert_eq!(stack.surface_bytes(), 4 * 8 * 8 * 4);
}

#[test]
fn clipping_layer_draws_only_inside_base() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let base = stack.active_layer_id();
    paint(&mut stack, base, (2, 2), (4, 4), RED);
    let clip = stack.create_layer(None).unwrap();
    paint(&mut stack, clip, (0, 0), (8, 8), BLUE);
    assert!(stack.set_clipping_mask(clip, Some(base)));

    let frame = stack.composite();
    assert_eq!(frame.get_pixel(3, 3).0, BLUE);
    assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 0]);

    stack.set_visibility(base, false);
    assert_eq!(stack.composite().get_pixel(3, 3).0, [0, 0, 0, 0]);
}

#[test]
fn clipping_rules_are_enforced() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let bottom = stack.active_layer_id();
    let middle = stack.create_layer(None).unwrap();
    let top = stack.create_layer(None).unwrap();

    assert!(!stack.set_clipping_mask(bottom, Some(middle)));
    assert!(!stack.set_clipping_mask(middle, Some(middle)));
    assert!(stack.set_clipping_mask(middle, Some(bottom)));
    // A clipping layer cannot serve as a base
    assert!(!stack.set_clipping_mask(top, Some(middle)));
    // A base cannot itself become a clipping layer
    assert!(!stack.set_clipping_mask(bottom, Some(top)));

    // Moving the clip below its base would orphan it
    assert!(!stack.reorder(1, 0));
    assert_eq!(stack.layer_order(), &[bottom, middle, top]);
}

#[test]
fn reorder_undoes() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let a = stack.active_layer_id();
    let b = stack.create_layer(None).unwrap();
    let c = stack.create_layer(None).unwrap();

    assert!(stack.reorder(2, 0));
    assert_eq!(stack.layer_order(), &[c, a, b]);
    assert!(!stack.reorder(0, 3));
    assert!(stack.undo());
    assert_eq!(stack.layer_order(), &[a, b, c]);
    assert!(stack.redo());
    assert_eq!(stack.layer_order(), &[c, a, b]);
}

#[test]
fn editing_a_layer_invalidates_dependent_caches() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let bottom = stack.active_layer_id();
    let normal = stack.create_layer(None).unwrap();
    let multiply = stack.create_layer(None).unwrap();
    stack.set_blend_mode(multiply, BlendMode::Multiply);

    stack.composite();
    for id in [bottom, normal, multiply] {
        assert!(stack.compositor().is_cached(id));
    }

    stack.add_stroke(bottom, stroke_at(4.0, 4.0)).unwrap();
    assert!(!stack.compositor().is_cached(bottom));
    assert!(stack.compositor().is_cached(normal));
    assert!(!stack.compositor().is_cached(multiply));
}

#[test]
fn hiding_and_memory_pressure_prune_caches() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let a = stack.active_layer_id();
    let b = stack.create_layer(None).unwrap();
    stack.composite();
    assert_eq!(stack.compositor().cached_layers(), 2);

    stack.set_visibility(b, false);
    assert!(!stack.compositor().is_cached(b));
    assert!(stack.compositor().is_cached(a));

    stack.handle_memory_pressure();
    assert_eq!(stack.compositor().cached_layers(), 0);
}

#[test]
fn blend_mode_changes_the_composite() {
    let mut stack = LayerStack::new(4, 4).unwrap();
    let bottom = stack.active_layer_id();
    paint(&mut stack, bottom, (0, 0), (4, 4), [200, 200, 200, 255]);
    let top = stack.create_layer(None).unwrap();
    paint(&mut stack, top, (0, 0), (4, 4), [128, 128, 128, 255]);

    assert_eq!(stack.composite().get_pixel(0, 0).0, [128, 128, 128, 255]);
    stack.set_blend_mode(top, BlendMode::Multiply);
    assert_eq!(stack.composite().get_pixel(0, 0).0, [100, 100, 100, 255]);
}

#[test]
fn group_opacity_flows_into_children() {
    let mut stack = LayerStack::new(4, 4).unwrap();
    let child = stack.active_layer_id();
    paint(&mut stack, child, (0, 0), (4, 4), RED);
    let group = stack.create_group(Some("Folder")).unwrap();
    assert!(stack.set_layer_group(child, Some(group)));
    assert!(!stack.set_layer_group(child, Some(child)));
    assert!(stack.set_opacity(group, 0.5));

    assert_eq!(stack.composite().get_pixel(0, 0).0, [255, 0, 0, 128]);

    assert!(stack.delete_layer(group));
    assert_eq!(stack.layer(child).unwrap().parent, None);
    assert!(stack.undo());
    assert_eq!(stack.layer(child).unwrap().parent, Some(group));
}

#[test]
fn group_edit_refreshes_blended_layers_above_its_children() {
    let mut stack = LayerStack::new(4, 4).unwrap();
    let bottom = stack.active_layer_id();
    paint(&mut stack, bottom, (0, 0), (4, 4), RED);
    let child = stack.create_layer(None).unwrap();
    paint(&mut stack, child, (0, 0), (4, 4), BLUE);
    let multiply = stack.create_layer(None).unwrap();
    paint(&mut stack, multiply, (0, 0), (4, 4), [128, 128, 128, 255]);
    stack.set_blend_mode(multiply, BlendMode::Multiply);
    let group = stack.create_group(None).unwrap();
    stack.set_layer_group(child, Some(group));
    assert_eq!(stack.layer_order().last(), Some(&group));

    assert_eq!(stack.composite().get_pixel(0, 0).0, [0, 0, 128, 255]);
    assert!(stack.set_opacity(group, 0.0));
    assert!(!stack.compositor().is_cached(multiply));
    let cached = stack.composite().clone();

    stack.compositor.invalidate_all();
    assert_eq!(stack.composite(), &cached);
    assert_eq!(cached.get_pixel(0, 0).0, [128, 0, 0, 255]);
}

#[test]
fn duplicate_copies_pixels_with_fresh_stroke_ids() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let id = stack.active_layer_id();
    let stroke = stack.add_stroke(id, stroke_at(4.0, 4.0)).unwrap();

    let copy = stack.duplicate_layer(id).unwrap().unwrap();
    let original = stack.layer(id).unwrap();
    let duplicate = stack.layer(copy).unwrap();
    assert_eq!(duplicate.surface, original.surface);
    assert_eq!(duplicate.strokes.len(), 1);
    assert_ne!(duplicate.strokes[0].id, stroke);
    assert_eq!(duplicate.strokes[0].layer_id, copy);
    assert!(duplicate.name.ends_with("copy"));

    assert!(stack.undo());
    assert!(stack.layer(copy).is_none());
}

#[test]
fn clear_layer_undoes() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let id = stack.active_layer_id();
    paint(&mut stack, id, (0, 0), (8, 8), RED);
    assert!(stack.clear_layer(id));
    assert!(!has_paint(&stack.layer(id).unwrap().surface));
    assert!(stack.undo());
    assert_eq!(stack.layer(id).unwrap().surface.get_pixel(7, 7).0, RED);
}

#[test]
fn transform_moves_pixels_at_composite_time() {
    let mut stack = LayerStack::new(16, 16).unwrap();
    let id = stack.active_layer_id();
    paint(&mut stack, id, (1, 1), (2, 2), RED);
    assert!(stack.set_transform(
        id,
        Transform {
            translate_x: 4.0,
            ..Transform::default()
        }
    ));

    let frame = stack.composite();
    assert_eq!(frame.get_pixel(5, 1).0, RED);
    assert_eq!(frame.get_pixel(1, 1).0, [0, 0, 0, 0]);
}

#[test]
fn export_import_round_trip() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let bottom = stack.active_layer_id();
    paint(&mut stack, bottom, (0, 0), (32, 8), BLUE);
    let top = stack.create_layer(Some("Lines")).unwrap();
    stack.add_stroke(top, stroke_at(4.0, 20.0)).unwrap();
    stack.set_blend_mode(top, BlendMode::Overlay);
    let group = stack.create_group(None).unwrap();
    stack.set_layer_group(top, Some(group));
    let frame = stack.composite().clone();

    let export = stack.export_all().unwrap();
    assert_eq!(export.layers.len(), 2);
    assert_eq!(export.groups.len(), 1);
    let json = serde_json::to_string(&export).unwrap();
    let parsed = serde_json::from_str(&json).unwrap();

    let mut restored = LayerStack::new(4, 4).unwrap();
    restored.import_all(&parsed).unwrap();
    assert_eq!((restored.width(), restored.height()), (32, 32));
    assert_eq!(restored.layer_order(), stack.layer_order());
    assert_eq!(restored.active_layer_id(), stack.active_layer_id());
    assert_eq!(restored.composite(), &frame);
    assert!(!restored.can_undo());

    // New ids never collide with imported ones
    let fresh = restored.create_layer(None).unwrap();
    assert!(fresh.0 > group.0);
}

#[test]
fn import_failures_leave_stack_untouched() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let id = stack.active_layer_id();
    paint(&mut stack, id, (0, 0), (8, 8), RED);
    let good = stack.export_all().unwrap();
    stack.create_layer(None).unwrap();
    let order = stack.layer_order().to_vec();

    let mut bad_hash = good.clone();
    bad_hash.layers[0].content_hash = Some("00".repeat(32));
    assert!(matches!(
        stack.import_all(&bad_hash).unwrap_err(),
        CoreError::InvalidImport(_)
    ));

    let mut bad_version = good.clone();
    bad_version.version = 2;
    assert!(matches!(
        stack.import_all(&bad_version).unwrap_err(),
        CoreError::UnsupportedVersion(2)
    ));

    let mut bad_order = good.clone();
    bad_order.order.push(77);
    assert!(stack.import_all(&bad_order).is_err());

    let mut bad_blob = good;
    bad_blob.layers[0].image_data = Some("not base64!".into());
    bad_blob.layers[0].content_hash = None;
    assert!(stack.import_all(&bad_blob).is_err());

    assert_eq!(stack.layer_order(), order.as_slice());
    assert!(stack.can_undo());
    assert_eq!(stack.layer(id).unwrap().surface.get_pixel(0, 0).0, RED);
}

#[test]
fn import_rejects_unusable_stroke_records() {
    let mut stack = LayerStack::new(32, 32).unwrap();
    let id = stack.active_layer_id();
    stack.add_stroke(id, stroke_at(4.0, 4.0)).unwrap();
    stack.add_stroke(id, stroke_at(4.0, 20.0)).unwrap();
    let good = stack.export_all().unwrap();
    let before = stack.composite().clone();

    let mut huge_dab = good.clone();
    huge_dab.layers[0].strokes[0].dabs[0].paint.size = 1.0e9;
    assert!(matches!(
        stack.import_all(&huge_dab).unwrap_err(),
        CoreError::InvalidImport(_)
    ));

    let mut nan_dab = good.clone();
    nan_dab.layers[0].strokes[0].dabs[0].x = f32::NAN;
    assert!(stack.import_all(&nan_dab).is_err());

    let mut max_id = good.clone();
    max_id.layers[0].strokes[0].id = u64::MAX;
    assert!(matches!(
        stack.import_all(&max_id).unwrap_err(),
        CoreError::InvalidImport(_)
    ));

    let mut duplicate = good.clone();
    duplicate.layers[0].strokes[1].id = duplicate.layers[0].strokes[0].id;
    assert!(stack.import_all(&duplicate).is_err());

    assert_eq!(stack.layer(id).unwrap().strokes.len(), 2);
    assert_eq!(stack.composite(), &before);

    stack.import_all(&good).unwrap();
    let next = stack.add_stroke(id, stroke_at(20.0, 4.0)).unwrap();
    assert!(next.0 > good.layers[0].strokes[1].id);
}

#[test]
fn save_data_round_trip_keeps_groups_inline() {
    let mut stack = LayerStack::new(8, 8).unwrap();
    let group = stack.create_group(None).unwrap();
    let child = stack.create_layer(None).unwrap();
    stack.set_layer_group(child, Some(group));

    let data = stack.to_save_data().unwrap();
    assert_eq!(data.layers.len(), 3);
    assert_eq!(data.current_layer_id, Some(child.0));

    let mut restored = LayerStack::new(8, 8).unwrap();
    restored.restore_save_data(&data).unwrap();
    assert_eq!(restored.layer_order(), stack.layer_order());
    assert_eq!(restored.layer(child).unwrap().parent, Some(group));
    assert!(restored.layer(group).unwrap().is_group());
}

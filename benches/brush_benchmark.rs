//! Brush engine, compositing and stroke optimization benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use inkstone_lib::brush::library::{airbrush, ink_pen, pencil};
use inkstone_lib::brush::BrushEngine;
use inkstone_lib::input::Point;
use inkstone_lib::layer::{LayerStack, Stroke};
use inkstone_lib::perf::{OptimizationLevel, PerformanceOptimizer};

fn generate_stroke(count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let t = i as f32 / count as f32;
            Point::with_tilt(
                t * 1000.0,
                (t * std::f32::consts::PI * 4.0).sin() * 100.0 + 500.0,
                0.3 + t * 0.4,
                10.0,
                -5.0,
                i as u64 * 4,
            )
        })
        .collect()
}

fn benchmark_dab_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("Dab Building");

    for count in [10, 50, 100, 500, 1000].iter() {
        let points = generate_stroke(*count);
        let mut engine = BrushEngine::with_seed(ink_pen(), 7);

        group.bench_with_input(BenchmarkId::new("ink_pen", count), &points, |b, points| {
            b.iter(|| engine.build_dabs(points))
        });
    }

    group.finish();
}

fn benchmark_brush_presets(c: &mut Criterion) {
    let mut group = c.benchmark_group("Brush Preset Impact");

    let points = generate_stroke(100);

    for brush in [pencil(), ink_pen(), airbrush()] {
        let name = brush.id.clone();
        let mut engine = BrushEngine::with_seed(brush, 7);
        group.bench_function(name, |b| b.iter(|| engine.build_dabs(&points)));
    }

    group.finish();
}

fn benchmark_compositing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Compositing");
    group.sample_size(20);

    let points = generate_stroke(200);
    let mut engine = BrushEngine::with_seed(ink_pen(), 7);
    let dabs = engine.build_dabs(&points);

    for layers in [1usize, 4, 8].iter() {
        let mut stack = match LayerStack::new(1024, 768) {
            Ok(stack) => stack,
            Err(_) => return,
        };
        for _ in 1..*layers {
            if stack.create_layer(None).is_err() {
                return;
            }
        }
        for id in stack.layer_order().to_vec() {
            let stroke = Stroke::new(engine.brush(), engine.color(), points.clone(), dabs.clone());
            stack.add_stroke(id, stroke);
        }

        group.bench_with_input(BenchmarkId::new("full_recomposite", layers), layers, |b, _| {
            b.iter(|| {
                stack.handle_memory_pressure();
                stack.composite().width()
            })
        });
    }

    group.finish();
}

fn benchmark_stroke_optimization(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stroke Optimization");

    let points = generate_stroke(1000);
    for level in [
        OptimizationLevel::Full,
        OptimizationLevel::Mild,
        OptimizationLevel::Aggressive,
    ] {
        let mut optimizer = PerformanceOptimizer::new(120.0);
        while optimizer.level() != level {
            optimizer.record_frame_time(50.0);
        }
        group.bench_function(format!("{:?}", level), |b| {
            b.iter(|| optimizer.optimize_stroke(&points))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_dab_building,
    benchmark_brush_presets,
    benchmark_compositing,
    benchmark_stroke_optimization
);
criterion_main!(benches);

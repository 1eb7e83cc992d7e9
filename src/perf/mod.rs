//! Performance optimizer - frame timing feedback into stroke and render quality

mod optimizer;
mod report;
pub mod simplify;

pub use optimizer::{
    LevelChange, OptimizationLevel, OptimizationSettings, PerformanceOptimizer, PerformanceSample,
    SAMPLE_WINDOW,
};
pub use report::PerformanceReport;

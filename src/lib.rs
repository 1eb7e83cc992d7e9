//! Inkstone - low-latency freehand drawing engine
//!
//! Brush dynamics, a layer stack with undo, gesture recognition and an
//! adaptive performance optimizer. A `DrawingSession` ties them together
//! for one canvas; hosts feed it touch frames and read composited frames.

pub mod brush;
pub mod core;
pub mod file;
pub mod input;
pub mod layer;
pub mod perf;
pub mod session;

pub use session::{DrawingSession, SessionObserver, Viewport};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init_logging() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkstone_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!("Inkstone initializing...");
    }
}

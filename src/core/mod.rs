//! Shared core: error type, session settings and persisted payload contracts.
//!
//! Nothing here depends on rendering or input handling.

pub mod contracts;
pub mod errors;
pub mod settings;

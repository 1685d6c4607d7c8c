#![forbid(unsafe_code)]

//! Application assembly for the AutoGet daemon: configuration resolution,
//! logging initialisation, engine construction, pass scheduling, and
//! signal-driven shutdown.

pub mod bootstrap;
pub mod error;
pub mod telemetry;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};

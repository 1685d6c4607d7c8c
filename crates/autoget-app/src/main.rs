#![forbid(unsafe_code)]

//! Binary entrypoint that wires the AutoGet services together.

use autoget_app::{AppResult, run_app};

/// Bootstraps the daemon and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}

pub mod config;
pub mod crypto;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod schema;

pub use pipeline::{ExtractRequest, ExtractionPipeline, PipelineError, Table};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `config::default_log_filter()` applies.
/// Calling this more than once is harmless (later calls are ignored).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::info!("{} v{} tracing initialised", config::APP_NAME, config::APP_VERSION);
}

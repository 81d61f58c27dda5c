// PCM Speaker - pluggable audio output core
// Blocking backend drivers behind an async write pipeline

// Module declarations
pub mod config;
pub mod engine;
pub mod error;
pub mod speaker;
pub mod telemetry;

// Re-exports for convenience
pub use config::AppConfig;
pub use engine::{
    create_module, BackendKind, Encoding, EncodingSet, LifecycleState, OpenRequest, OutputBackend,
    OutputDevice, OutputModule, OutputParams, PendingWrite, ProgressSnapshot,
};
pub use error::{ErrorCode, OutputError};
pub use speaker::{Speaker, SpeakerEvent, SpeakerOptions};

use once_cell::sync::OnceCell;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the fmt subscriber (which also captures `log` records).
///
/// Safe to call more than once; only the first call has an effect, and an
/// already-installed global subscriber is left in place.
pub fn init_logging(verbose: bool) {
    LOGGING.get_or_init(|| {
        let level = if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

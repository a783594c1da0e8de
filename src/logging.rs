//! Usage: Tracing subscriber setup for the hosting shell.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `NOTION_WHISPER_LOG` overrides the level
/// (standard `EnvFilter` syntax); defaults to `info`. Safe to call more than
/// once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_env("NOTION_WHISPER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

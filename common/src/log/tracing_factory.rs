use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-shot global `tracing` subscriber installer.
///
/// Safe to call more than once: the second and later calls are no-ops, so
/// tests and multiple `main`-adjacent entry points can call it freely.
#[derive(Debug, Clone, Default)]
pub struct TracingFactory;

impl TracingFactory {
    pub fn init_log(debug: bool) {
        Self::init_log_at(if debug { Level::DEBUG } else { Level::INFO })
    }

    pub fn init_log_at(level: Level) {
        if INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
        {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(true)
                .compact()
                .try_init();
        }
    }
}

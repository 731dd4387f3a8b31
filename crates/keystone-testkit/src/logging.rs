//! Test log output

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Install a test-writer subscriber once per process
///
/// Honors `RUST_LOG`; otherwise logs the workspace crates at debug level.
pub fn init_test_tracing() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "keystone_vault=debug,keystone_manifest=debug,keystone_authorization=debug,\
                 keystone_guards=debug,keystone_kernel=debug",
            )
        });
        // Another harness may already own the global subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

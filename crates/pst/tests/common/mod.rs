use tracing_subscriber::EnvFilter;

/// Route the decoder's `tracing` events through the test harness, so skipped nodes show up in
/// the output of a failing test. `RUST_LOG` picks the level, `warn` by default.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to debug
/// output for the foundit crates. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "foundit_sync=debug,foundit_feed=debug,foundit_db=info".into()
            }),
        )
        .try_init();
}

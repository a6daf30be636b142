use tracing_subscriber::EnvFilter;

/// Installs the global subscriber for the binaries. `RUST_LOG` overrides the default
/// `info` filter. Output goes to stderr so JSON written to stdout stays clean.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

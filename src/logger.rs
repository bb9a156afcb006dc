use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the tracing subscriber for the CLI.
///
/// The log level is controlled through the RUST_LOG environment variable;
/// the default is `warn` so table output stays clean.
///
/// Examples:
/// - RUST_LOG=debug jsonlt list data.jsonlt
/// - RUST_LOG=jsonlt=trace jsonlt compact data.jsonlt
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

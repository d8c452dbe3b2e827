//! Global logging setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber: JSON lines on stderr, filtered by
/// `RUST_LOG`. Crates still on the `log` facade are bridged into the same
/// stream.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));
    let subscriber = fmt()
        .json()
        .flatten_event(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

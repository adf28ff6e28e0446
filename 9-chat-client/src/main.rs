use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use chat_client::{cli::ClientArgs, client};

/// Grace period for blocking tasks once the session is over. The stdin
/// reader sits in a blocking read that only returns on the next line.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(client::run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    if let Err(err) = &result {
        warn!("client exited with error: {err:?}");
    }
    result.map(|_| ())
}

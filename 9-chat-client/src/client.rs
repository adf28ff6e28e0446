use anyhow::{Context, Result};
use tokio::io::{self, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    handshake,
    identity::{prompt_identity, validate_identity},
    session::SessionReport,
    shutdown::{ShutdownSignal, StopReason},
};

/// Connects with the given arguments and chats over stdin/stdout until the
/// session stops.
pub async fn run(args: ClientArgs) -> Result<SessionReport> {
    let mut stdin = BufReader::new(io::stdin());
    let mut stdout = io::stdout();

    let identity = resolve_identity(&args, &mut stdin, &mut stdout).await?;
    let config = args.to_config(identity);
    config.validate().context("invalid client configuration")?;

    let session = handshake::connect(&config)
        .await
        .with_context(|| format!("could not join chat at {}", config.endpoint))?;

    write_stdout(
        &mut stdout,
        &format!("*** connected to {} as {}", config.endpoint, config.identity),
    )
    .await?;

    let ctrl_c = tokio::spawn(stop_on_ctrl_c(session.shutdown_signal()));
    let report = session.run(stdin, stdout).await;
    ctrl_c.abort();

    info!(
        reason = %report.reason,
        sent = report.sent,
        received = report.received,
        "disconnected"
    );
    Ok(report)
}

async fn resolve_identity(
    args: &ClientArgs,
    stdin: &mut BufReader<io::Stdin>,
    stdout: &mut io::Stdout,
) -> Result<String> {
    match &args.name {
        Some(name) => validate_identity(name).context("invalid --name"),
        None => {
            let name = prompt_identity(stdin, stdout)
                .await
                .context("invalid username")?;
            write_stdout(stdout, &format!("Welcome {name}")).await?;
            Ok(name)
        }
    }
}

async fn stop_on_ctrl_c(shutdown: ShutdownSignal) {
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "ctrl-c handler failed");
                return;
            }
            info!("interrupted, disconnecting");
            shutdown.raise(StopReason::Requested);
        }
        _ = shutdown.raised() => {}
    }
}

async fn write_stdout(stdout: &mut io::Stdout, line: &str) -> Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

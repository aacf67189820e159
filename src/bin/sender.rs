use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpStream;

use skiff::connection::Connection;
use skiff::transfer::{AckObserver, TransferOrchestrator};
use skiff::DEFAULT_PORT;

/// Send a file or directory tree to a skiff receiver.
#[derive(Parser, Debug)]
#[command(name = "sender", version, about)]
struct Args {
    /// File or directory to send
    path: PathBuf,

    /// Receiver address
    server_ip: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // Argument errors exit 1; --help/--version keep clap's exit 0.
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    if !args.path.exists() {
        bail!("path does not exist: {}", args.path.display());
    }

    let stream = TcpStream::connect((args.server_ip.as_str(), DEFAULT_PORT))
        .await
        .with_context(|| format!("connect {}:{DEFAULT_PORT}", args.server_ip))?;
    println!("[client] connected to {}:{DEFAULT_PORT}", args.server_ip);

    let connection = Connection::new();
    let handle = connection.handle();
    let task = connection.start(stream, AckObserver::default());

    // The orchestrator owns the only sender handle; the blocking
    // backpressure sleep lives on its worker thread, off the runtime.
    let mut orchestrator = TransferOrchestrator::new(Arc::new(handle));
    orchestrator.start_transfer(&args.path);
    tokio::task::spawn_blocking(move || {
        let result = orchestrator.wait();
        drop(orchestrator);
        result
    })
    .await
    .context("transfer worker")??;

    // Every handle is gone once the orchestrator is dropped, so the write
    // task flushes the remaining queue and shuts the socket down.
    task.writer.await.context("connection writer")?;
    Ok(())
}

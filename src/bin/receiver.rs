use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use skiff::server::serve;
use skiff::DEFAULT_PORT;

/// Receive files over the skiff protocol into a destination folder.
#[derive(Parser, Debug)]
#[command(name = "receiver", version, about)]
struct Args {
    /// Folder incoming files are written under (created if absent)
    dest: PathBuf,
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

    if !args.dest.exists() {
        std::fs::create_dir_all(&args.dest)
            .with_context(|| format!("create directory {}", args.dest.display()))?;
        println!("[server] created directory: {}", args.dest.display());
    }
    let dest = args
        .dest
        .canonicalize()
        .with_context(|| format!("resolve {}", args.dest.display()))?;

    let listener = TcpListener::bind(("0.0.0.0", DEFAULT_PORT))
        .await
        .with_context(|| format!("bind 0.0.0.0:{DEFAULT_PORT}"))?;
    println!("[server] listening on port {DEFAULT_PORT}, saving to {}", dest.display());

    serve(listener, dest).await
}

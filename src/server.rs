//! Accept loop: one session (writer + receiver + connection) per client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::connection::Connection;
use crate::receiver::FileReceiver;
use crate::writer::DiskWriter;

/// Accept connections forever, wiring each one to its own file receiver
/// writing under `dest_dir`. The ack path is the connection's own handle,
/// bound at session construction.
pub async fn serve(listener: TcpListener, dest_dir: PathBuf) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        println!("[server] client connected: {peer}");

        let connection = Connection::new();
        let handle = connection.handle();
        let receiver =
            FileReceiver::new(DiskWriter::new(dest_dir.clone())).with_sender(Arc::new(handle));
        connection.start(stream, receiver);
    }
}

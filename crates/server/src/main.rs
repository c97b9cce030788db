//! driftsync-server: the authoritative metadata and block store
//!
//! Serves the framed driftsync protocol over TCP, one thread per
//! connection, against a single lock-guarded facade.

use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::{debug, error, info, warn, Level};

use driftsync_core::protocol::{Message, ProtocolReader, ProtocolWriter};
use driftsync_core::store::{SyncServer, UpdateReply};

#[derive(Parser)]
#[command(name = "driftsync-server")]
#[command(version)]
#[command(about = "Authoritative block and metadata store for driftsync clients")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let server = Arc::new(SyncServer::new());
    let listener = TcpListener::bind(&cli.listen)?;
    info!("listening on {}", cli.listen);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let server = Arc::clone(&server);
                std::thread::spawn(move || {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "unknown".to_string());
                    debug!(%peer, "client connected");
                    if let Err(e) = serve_connection(&server, stream) {
                        warn!(%peer, "connection ended with error: {e:#}");
                    } else {
                        debug!(%peer, "client disconnected");
                    }
                });
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }

    Ok(())
}

/// Serve one client until it shuts down or the stream ends.
///
/// Lock discipline lives in the facade: snapshot and block reads take
/// the shared lock; updates, uploads, and presence checks take the
/// exclusive lock.
fn serve_connection(server: &SyncServer, stream: TcpStream) -> Result<()> {
    let mut reader = ProtocolReader::new(BufReader::new(stream.try_clone()?));
    let mut writer = ProtocolWriter::new(BufWriter::new(stream));

    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(e) => {
                // EOF is the normal end of a session.
                debug!("read ended: {e}");
                break;
            }
        };

        match message {
            Message::InfoMapReq => {
                writer.send_info_map_resp(&server.file_info_map())?;
            }

            Message::UpdateFile(candidate) => {
                debug!(
                    file = %candidate.filename,
                    version = candidate.version,
                    "update proposal"
                );
                match server.update_file(candidate) {
                    UpdateReply::Accepted(version) => {
                        writer.send_update_accepted(version)?;
                        log_meta_map(server);
                    }
                    UpdateReply::Stale { current } => {
                        writer.send_update_stale(current)?;
                    }
                }
            }

            Message::GetBlock(hash) => {
                writer.send_block_resp(&server.get_block(&hash))?;
            }

            Message::PutBlock(block) => {
                let success = server.put_block(block);
                writer.send_put_ok(success)?;
            }

            Message::HasBlocks(hashes) => {
                writer.send_present_blocks(&server.has_blocks(&hashes))?;
            }

            Message::Shutdown => break,

            other => {
                writer.send_error(&format!("unexpected message: {other:?}"))?;
            }
        }
    }

    Ok(())
}

/// Dump the metadata map at debug level after each accepted update.
fn log_meta_map(server: &SyncServer) {
    if !tracing::enabled!(Level::DEBUG) {
        return;
    }
    for (name, meta) in server.file_info_map() {
        debug!(file = %name, version = meta.version, hashes = ?meta.hashes, "meta");
    }
}

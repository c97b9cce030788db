//! TCP transport speaking the framed driftsync protocol
//!
//! One connection per client run; one request frame per operation, one
//! response frame per request. Calls are synchronous and blocking.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::TcpStream;

use color_eyre::eyre::bail;
use color_eyre::Result;
use tracing::debug;

use driftsync_core::block::Block;
use driftsync_core::hash::BlockHash;
use driftsync_core::meta::FileMetadata;
use driftsync_core::protocol::{Message, ProtocolReader, ProtocolWriter};
use driftsync_core::remote::RemoteStore;
use driftsync_core::store::UpdateReply;

/// A remote store reached over TCP.
pub struct TcpStore {
    reader: ProtocolReader<BufReader<TcpStream>>,
    writer: ProtocolWriter<BufWriter<TcpStream>>,
}

impl TcpStore {
    /// Connect to a driftsync server at `addr` (host:port).
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected");

        let reader = ProtocolReader::new(BufReader::new(stream.try_clone()?));
        let writer = ProtocolWriter::new(BufWriter::new(stream));
        Ok(Self { reader, writer })
    }

    /// Tell the server this session is done and drop the connection.
    pub fn shutdown(mut self) -> Result<()> {
        self.writer.send_shutdown()?;
        Ok(())
    }

    /// Read one reply, surfacing server-reported errors.
    fn read_reply(&mut self) -> Result<Message> {
        match self.reader.read_message()? {
            Message::Error(message) => bail!("server error: {message}"),
            message => Ok(message),
        }
    }
}

impl RemoteStore for TcpStore {
    fn file_info_map(&mut self) -> Result<HashMap<String, FileMetadata>> {
        self.writer.send_info_map_req()?;
        match self.read_reply()? {
            Message::InfoMapResp(map) => Ok(map),
            other => bail!("unexpected reply to info map request: {other:?}"),
        }
    }

    fn update_file(&mut self, candidate: &FileMetadata) -> Result<UpdateReply> {
        self.writer.send_update_file(candidate)?;
        match self.read_reply()? {
            Message::UpdateAccepted(version) => Ok(UpdateReply::Accepted(version)),
            Message::UpdateStale(current) => Ok(UpdateReply::Stale { current }),
            other => bail!("unexpected reply to update: {other:?}"),
        }
    }

    fn get_block(&mut self, hash: &BlockHash) -> Result<Block> {
        self.writer.send_get_block(hash)?;
        match self.read_reply()? {
            Message::BlockResp(block) => Ok(block),
            other => bail!("unexpected reply to block fetch: {other:?}"),
        }
    }

    fn put_block(&mut self, block: Block) -> Result<bool> {
        self.writer.send_put_block(&block)?;
        match self.read_reply()? {
            Message::PutOk(success) => Ok(success),
            other => bail!("unexpected reply to block upload: {other:?}"),
        }
    }

    fn has_blocks(&mut self, candidates: &[BlockHash]) -> Result<Vec<BlockHash>> {
        self.writer.send_has_blocks(candidates)?;
        match self.read_reply()? {
            Message::PresentBlocks(present) => Ok(present),
            other => bail!("unexpected reply to presence check: {other:?}"),
        }
    }
}

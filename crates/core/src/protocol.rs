//! Binary protocol between clients and the driftsync server
//!
//! Wire format (all integers are big-endian):
//!
//! Request/Response frame:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Message types:
//! - 0x01: InfoMapReq (no payload)
//! - 0x02: InfoMapResp (count:4, metadata*count)
//! - 0x03: UpdateFile (metadata)
//! - 0x04: UpdateAccepted (version:8)
//! - 0x05: UpdateStale (current:8)
//! - 0x06: GetBlock (hash:32)
//! - 0x07: BlockResp (data; empty payload = absent block)
//! - 0x08: PutBlock (data)
//! - 0x09: PutOk (success:1)
//! - 0x0A: HasBlocks (count:4, hashes:[32]*count)
//! - 0x0B: PresentBlocks (count:4, hashes:[32]*count)
//! - 0x0C: Error (message)
//! - 0x0D: Shutdown (no payload)
//!
//! Metadata encoding: name_len:2, name, version:8, tombstone:1, then for
//! non-tombstones count:4 and raw 32-byte hashes.

use std::collections::HashMap;
use std::io::{Read, Write};

use bytes::Bytes;
use color_eyre::Result;

use crate::block::Block;
use crate::hash::BlockHash;
use crate::meta::{FileMetadata, HashList};

/// Message type identifiers
pub mod msg {
    pub const INFO_MAP_REQ: u8 = 0x01;
    pub const INFO_MAP_RESP: u8 = 0x02;
    pub const UPDATE_FILE: u8 = 0x03;
    pub const UPDATE_ACCEPTED: u8 = 0x04;
    pub const UPDATE_STALE: u8 = 0x05;
    pub const GET_BLOCK: u8 = 0x06;
    pub const BLOCK_RESP: u8 = 0x07;
    pub const PUT_BLOCK: u8 = 0x08;
    pub const PUT_OK: u8 = 0x09;
    pub const HAS_BLOCKS: u8 = 0x0A;
    pub const PRESENT_BLOCKS: u8 = 0x0B;
    pub const ERROR: u8 = 0x0C;
    pub const SHUTDOWN: u8 = 0x0D;
}

/// Write a frame header (type + length)
fn write_header<W: Write>(w: &mut W, msg_type: u8, len: u32) -> std::io::Result<()> {
    w.write_all(&[msg_type])?;
    w.write_all(&len.to_be_bytes())?;
    Ok(())
}

/// Read a frame header, returns (type, length)
fn read_header<R: Read>(r: &mut R) -> std::io::Result<(u8, u32)> {
    let mut type_buf = [0u8; 1];
    r.read_exact(&mut type_buf)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;

    Ok((type_buf[0], u32::from_be_bytes(len_buf)))
}

/// Append a filename as length-prefixed bytes
fn encode_name(buf: &mut Vec<u8>, name: &str) {
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
}

/// Decode a filename from reader
fn decode_name<R: Read>(r: &mut R) -> std::io::Result<String> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut name_buf = vec![0u8; len];
    r.read_exact(&mut name_buf)?;

    Ok(String::from_utf8_lossy(&name_buf).to_string())
}

fn encode_metadata(buf: &mut Vec<u8>, meta: &FileMetadata) {
    encode_name(buf, &meta.filename);
    buf.extend_from_slice(&meta.version.to_be_bytes());
    match &meta.hashes {
        HashList::Tombstone => buf.push(1),
        HashList::Blocks(hashes) => {
            buf.push(0);
            buf.extend_from_slice(&(hashes.len() as u32).to_be_bytes());
            for hash in hashes {
                buf.extend_from_slice(hash.as_bytes());
            }
        }
    }
}

fn decode_metadata<R: Read>(r: &mut R) -> std::io::Result<FileMetadata> {
    let filename = decode_name(r)?;

    let mut version_buf = [0u8; 8];
    r.read_exact(&mut version_buf)?;
    let version = u64::from_be_bytes(version_buf);

    let mut flag_buf = [0u8; 1];
    r.read_exact(&mut flag_buf)?;

    let hashes = if flag_buf[0] == 1 {
        HashList::Tombstone
    } else {
        HashList::Blocks(decode_hashes(r)?)
    };

    Ok(FileMetadata {
        filename,
        version,
        hashes,
    })
}

fn encoded_metadata_len(meta: &FileMetadata) -> usize {
    let hashes_len = match &meta.hashes {
        HashList::Tombstone => 0,
        HashList::Blocks(hashes) => 4 + hashes.len() * 32,
    };
    2 + meta.filename.len() + 8 + 1 + hashes_len
}

fn encode_hashes(buf: &mut Vec<u8>, hashes: &[BlockHash]) {
    buf.extend_from_slice(&(hashes.len() as u32).to_be_bytes());
    for hash in hashes {
        buf.extend_from_slice(hash.as_bytes());
    }
}

fn decode_hashes<R: Read>(r: &mut R) -> std::io::Result<Vec<BlockHash>> {
    let mut count_buf = [0u8; 4];
    r.read_exact(&mut count_buf)?;
    let count = u32::from_be_bytes(count_buf) as usize;

    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        let mut hash_buf = [0u8; 32];
        r.read_exact(&mut hash_buf)?;
        hashes.push(BlockHash::from_raw(hash_buf));
    }
    Ok(hashes)
}

/// Protocol writer for sending messages
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Request the full metadata snapshot
    pub fn send_info_map_req(&mut self) -> Result<()> {
        write_header(&mut self.inner, msg::INFO_MAP_REQ, 0)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send the metadata snapshot
    pub fn send_info_map_resp(&mut self, map: &HashMap<String, FileMetadata>) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(map.len() as u32).to_be_bytes());
        for meta in map.values() {
            encode_metadata(&mut payload, meta);
        }
        write_header(&mut self.inner, msg::INFO_MAP_RESP, payload.len() as u32)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Propose a metadata update
    pub fn send_update_file(&mut self, meta: &FileMetadata) -> Result<()> {
        let mut payload = Vec::with_capacity(encoded_metadata_len(meta));
        encode_metadata(&mut payload, meta);
        write_header(&mut self.inner, msg::UPDATE_FILE, payload.len() as u32)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Answer an accepted update with the new version
    pub fn send_update_accepted(&mut self, version: u64) -> Result<()> {
        write_header(&mut self.inner, msg::UPDATE_ACCEPTED, 8)?;
        self.inner.write_all(&version.to_be_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Answer a stale update with the store's current version
    pub fn send_update_stale(&mut self, current: u64) -> Result<()> {
        write_header(&mut self.inner, msg::UPDATE_STALE, 8)?;
        self.inner.write_all(&current.to_be_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Request one block by hash
    pub fn send_get_block(&mut self, hash: &BlockHash) -> Result<()> {
        write_header(&mut self.inner, msg::GET_BLOCK, 32)?;
        self.inner.write_all(hash.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send block content; an empty payload is the absent block
    pub fn send_block_resp(&mut self, block: &Block) -> Result<()> {
        write_header(&mut self.inner, msg::BLOCK_RESP, block.len() as u32)?;
        self.inner.write_all(block.data())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Upload block content
    pub fn send_put_block(&mut self, block: &Block) -> Result<()> {
        write_header(&mut self.inner, msg::PUT_BLOCK, block.len() as u32)?;
        self.inner.write_all(block.data())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Acknowledge a block upload
    pub fn send_put_ok(&mut self, success: bool) -> Result<()> {
        write_header(&mut self.inner, msg::PUT_OK, 1)?;
        self.inner.write_all(&[u8::from(success)])?;
        self.inner.flush()?;
        Ok(())
    }

    /// Ask which of these hashes the server already stores
    pub fn send_has_blocks(&mut self, hashes: &[BlockHash]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + hashes.len() * 32);
        encode_hashes(&mut payload, hashes);
        write_header(&mut self.inner, msg::HAS_BLOCKS, payload.len() as u32)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Answer with the stored subset
    pub fn send_present_blocks(&mut self, hashes: &[BlockHash]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + hashes.len() * 32);
        encode_hashes(&mut payload, hashes);
        write_header(&mut self.inner, msg::PRESENT_BLOCKS, payload.len() as u32)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send error response
    pub fn send_error(&mut self, message: &str) -> Result<()> {
        let payload = message.as_bytes();
        write_header(&mut self.inner, msg::ERROR, payload.len() as u32)?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Announce the end of this session
    pub fn send_shutdown(&mut self) -> Result<()> {
        write_header(&mut self.inner, msg::SHUTDOWN, 0)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Message received from protocol
#[derive(Debug)]
pub enum Message {
    InfoMapReq,
    InfoMapResp(HashMap<String, FileMetadata>),
    UpdateFile(FileMetadata),
    UpdateAccepted(u64),
    UpdateStale(u64),
    GetBlock(BlockHash),
    BlockResp(Block),
    PutBlock(Block),
    PutOk(bool),
    HasBlocks(Vec<BlockHash>),
    PresentBlocks(Vec<BlockHash>),
    Error(String),
    Shutdown,
}

/// Protocol reader for receiving messages
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: Read> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read next message
    pub fn read_message(&mut self) -> Result<Message> {
        let (msg_type, len) = read_header(&mut self.inner)?;

        match msg_type {
            msg::INFO_MAP_REQ => Ok(Message::InfoMapReq),

            msg::INFO_MAP_RESP => {
                let mut count_buf = [0u8; 4];
                self.inner.read_exact(&mut count_buf)?;
                let count = u32::from_be_bytes(count_buf) as usize;

                let mut map = HashMap::with_capacity(count);
                for _ in 0..count {
                    let meta = decode_metadata(&mut self.inner)?;
                    map.insert(meta.filename.clone(), meta);
                }
                Ok(Message::InfoMapResp(map))
            }

            msg::UPDATE_FILE => Ok(Message::UpdateFile(decode_metadata(&mut self.inner)?)),

            msg::UPDATE_ACCEPTED => {
                let mut version_buf = [0u8; 8];
                self.inner.read_exact(&mut version_buf)?;
                Ok(Message::UpdateAccepted(u64::from_be_bytes(version_buf)))
            }

            msg::UPDATE_STALE => {
                let mut version_buf = [0u8; 8];
                self.inner.read_exact(&mut version_buf)?;
                Ok(Message::UpdateStale(u64::from_be_bytes(version_buf)))
            }

            msg::GET_BLOCK => {
                let mut hash_buf = [0u8; 32];
                self.inner.read_exact(&mut hash_buf)?;
                Ok(Message::GetBlock(BlockHash::from_raw(hash_buf)))
            }

            msg::BLOCK_RESP => {
                let mut data = vec![0u8; len as usize];
                self.inner.read_exact(&mut data)?;
                Ok(Message::BlockResp(Block::new(Bytes::from(data))))
            }

            msg::PUT_BLOCK => {
                let mut data = vec![0u8; len as usize];
                self.inner.read_exact(&mut data)?;
                Ok(Message::PutBlock(Block::new(Bytes::from(data))))
            }

            msg::PUT_OK => {
                let mut flag_buf = [0u8; 1];
                self.inner.read_exact(&mut flag_buf)?;
                Ok(Message::PutOk(flag_buf[0] != 0))
            }

            msg::HAS_BLOCKS => Ok(Message::HasBlocks(decode_hashes(&mut self.inner)?)),

            msg::PRESENT_BLOCKS => Ok(Message::PresentBlocks(decode_hashes(&mut self.inner)?)),

            msg::ERROR => {
                let mut payload = vec![0u8; len as usize];
                self.inner.read_exact(&mut payload)?;
                Ok(Message::Error(
                    String::from_utf8_lossy(&payload).to_string(),
                ))
            }

            msg::SHUTDOWN => Ok(Message::Shutdown),

            _ => Err(color_eyre::eyre::eyre!("Unknown message type: {msg_type}")),
        }
    }

    /// Get inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

//! Packet layout of the sync extension.
//!
//! Every packet travels as `[len: u32 BE][body]`. Sync request bodies are
//! `[tag: u8][id: u32][path: string][payload: string]`, where a string is a
//! `u32` BE length followed by that many bytes. Replies are either a data
//! packet on the request's own tag or an SFTP status packet.

use crate::delta::{BlockSignature, DeltaOp, SignatureSet, STRONG_LEN};
use crate::{DeltaBoxError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// SFTP status packet type
pub const FXP_STATUS: u8 = 101;

/// Upper bound on a single packet body
pub const MAX_PACKET_LEN: usize = 256 * 1024 * 1024;

/// SFTP status codes
pub mod status {
    pub const OK: u32 = 0;
    pub const EOF: u32 = 1;
    pub const NO_SUCH_FILE: u32 = 2;
    pub const PERMISSION_DENIED: u32 = 3;
    pub const FAILURE: u32 = 4;
    pub const BAD_MESSAGE: u32 = 5;
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// The three sync operations layered on top of the file-transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Block checksums of a server file
    BlockChk,
    /// Delta of a server file against a client signature
    Delta,
    /// Apply a delta to a server file in place
    Patch,
}

impl Command {
    pub const fn tag(self) -> u8 {
        match self {
            Command::BlockChk => 240,
            Command::Delta => 241,
            Command::Patch => 242,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            240 => Some(Command::BlockChk),
            241 => Some(Command::Delta),
            242 => Some(Command::Patch),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::BlockChk => "BLOCKCHK",
            Command::Delta => "DELTA",
            Command::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u32,
    pub command: Command,
    pub path: String,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13 + self.path.len() + self.payload.len());
        buf.push(self.command.tag());
        put_u32(&mut buf, self.id);
        put_bytes(&mut buf, self.path.as_bytes());
        put_bytes(&mut buf, &self.payload);
        buf
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(body);
        let tag = r.get_u8()?;
        let command = Command::from_tag(tag)
            .ok_or_else(|| DeltaBoxError::Protocol(format!("unknown sync command tag {}", tag)))?;
        let id = r.get_u32()?;
        let path = r.get_string()?;
        // BLOCKCHK may legitimately omit the payload field
        let payload = if r.is_empty() { Vec::new() } else { r.get_bytes()?.to_vec() };
        Ok(Self { id, command, path, payload })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply payload on the request's command tag
    Data { command: Command, id: u32, payload: Vec<u8> },
    Status { id: u32, code: u32, message: String },
}

impl Response {
    pub fn ok(id: u32) -> Self {
        Response::Status { id, code: status::OK, message: "OK".into() }
    }

    pub fn failure(id: u32, err: &DeltaBoxError) -> Self {
        Response::Status {
            id,
            code: err.status_code(),
            message: err.to_string(),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Response::Data { id, .. } | Response::Status { id, .. } => *id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Response::Data { command, id, payload } => {
                buf.push(command.tag());
                put_u32(&mut buf, *id);
                put_bytes(&mut buf, payload);
            }
            Response::Status { id, code, message } => {
                buf.push(FXP_STATUS);
                put_u32(&mut buf, *id);
                put_u32(&mut buf, *code);
                put_bytes(&mut buf, message.as_bytes());
                put_bytes(&mut buf, b"");
            }
        }
        buf
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(body);
        let tag = r.get_u8()?;
        let id = r.get_u32()?;
        if tag == FXP_STATUS {
            let code = r.get_u32()?;
            let message = if r.is_empty() { String::new() } else { r.get_string()? };
            return Ok(Response::Status { id, code, message });
        }
        let command = Command::from_tag(tag)
            .ok_or_else(|| DeltaBoxError::Protocol(format!("unexpected reply type {}", tag)))?;
        let payload = r.get_bytes()?.to_vec();
        Ok(Response::Data { command, id, payload })
    }
}

/// Request id of any SFTP request packet (`[type][id]...`), if present
pub fn peek_request_id(body: &[u8]) -> Option<u32> {
    let mut r = PacketReader::new(body);
    r.get_u8().ok()?;
    r.get_u32().ok()
}

/// Status packet for a raw request id
pub fn status_packet(id: u32, code: u32, message: &str) -> Vec<u8> {
    Response::Status { id, code, message: message.to_string() }.encode()
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Fields past `u32::MAX` saturate; such a body is over `MAX_PACKET_LEN`
/// and `write_frame` refuses to send it.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, u32::try_from(data.len()).unwrap_or(u32::MAX));
    buf.extend_from_slice(data);
}

struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(DeltaBoxError::Protocol(format!(
                "truncated packet: wanted {} bytes, {} left",
                n,
                self.buf.len()
            )));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DeltaBoxError::Protocol("string field is not valid UTF-8".into()))
    }
}

/// JSON form of one block signature
#[derive(Debug, Serialize, Deserialize)]
struct WireBlock {
    index: u32,
    weak: u32,
    strong: String,
}

/// JSON form of one delta op: `{"c": index}` or `{"l": base64}`
#[derive(Debug, Serialize, Deserialize)]
enum WireOp {
    #[serde(rename = "c")]
    Copy(u32),
    #[serde(rename = "l")]
    Literal(String),
}

pub fn encode_signatures(sig: &SignatureSet) -> Result<Vec<u8>> {
    let wire: Vec<WireBlock> = sig
        .blocks
        .iter()
        .map(|b| WireBlock {
            index: b.index,
            weak: b.weak,
            strong: hex::encode(b.strong),
        })
        .collect();
    serde_json::to_vec(&wire).map_err(|e| DeltaBoxError::Protocol(format!("Serialize failed: {}", e)))
}

/// Decode a signature list, requiring contiguous indices from 0
pub fn decode_signatures(payload: &[u8], block_size: usize) -> Result<SignatureSet> {
    let wire: Vec<WireBlock> = serde_json::from_slice(payload)
        .map_err(|e| DeltaBoxError::Protocol(format!("invalid signature list: {}", e)))?;

    let mut blocks = Vec::with_capacity(wire.len());
    for (pos, w) in wire.into_iter().enumerate() {
        if w.index as usize != pos {
            return Err(DeltaBoxError::Protocol(format!(
                "signature entry {} has index {}",
                pos, w.index
            )));
        }
        let raw = hex::decode(&w.strong)
            .map_err(|e| DeltaBoxError::Protocol(format!("bad strong hash for block {}: {}", w.index, e)))?;
        let strong: [u8; STRONG_LEN] = raw.as_slice().try_into().map_err(|_| {
            DeltaBoxError::Protocol(format!(
                "strong hash for block {} is {} bytes, expected {}",
                w.index,
                raw.len(),
                STRONG_LEN
            ))
        })?;
        blocks.push(BlockSignature { index: w.index, weak: w.weak, strong });
    }

    Ok(SignatureSet { blocks, block_size })
}

pub fn encode_ops(ops: &[DeltaOp]) -> Result<Vec<u8>> {
    let wire: Vec<WireOp> = ops
        .iter()
        .map(|op| match op {
            DeltaOp::Copy { index } => WireOp::Copy(*index),
            DeltaOp::Literal { data } => WireOp::Literal(BASE64.encode(data)),
        })
        .collect();
    serde_json::to_vec(&wire).map_err(|e| DeltaBoxError::Protocol(format!("Serialize failed: {}", e)))
}

pub fn decode_ops(payload: &[u8]) -> Result<Vec<DeltaOp>> {
    let wire: Vec<WireOp> = serde_json::from_slice(payload)
        .map_err(|e| DeltaBoxError::Protocol(format!("invalid delta: {}", e)))?;

    wire.into_iter()
        .map(|op| match op {
            WireOp::Copy(index) => Ok(DeltaOp::Copy { index }),
            WireOp::Literal(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map(|data| DeltaOp::Literal { data })
                .map_err(|e| DeltaBoxError::Protocol(format!("bad literal encoding: {}", e))),
        })
        .collect()
}

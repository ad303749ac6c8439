//! Routes sync requests to the delta engines; everything else goes to the
//! file-transfer fallback.

use crate::delta::{compute_delta, patch_file, signature_for_path, DeltaStats};
use crate::protocol::{self, status, Command, Request, Response, MAX_PACKET_LEN};
use crate::{DeltaBoxError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Standard file-transfer handling for packets that are not sync requests
pub trait FileTransferSubsystem: Send {
    /// Handle one request packet and return the reply packets to send
    fn handle_packet(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Fallback that answers every request with `OP_UNSUPPORTED`
#[derive(Debug, Default)]
pub struct UnsupportedSubsystem;

impl FileTransferSubsystem for UnsupportedSubsystem {
    fn handle_packet(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>> {
        let id = protocol::peek_request_id(body)
            .ok_or_else(|| DeltaBoxError::Protocol("packet too short to carry a request id".into()))?;
        debug!(packet_type = body[0], id, "unsupported request");
        Ok(vec![protocol::status_packet(
            id,
            status::OP_UNSUPPORTED,
            "operation not supported",
        )])
    }
}

/// `[tag][id][payload len]` ahead of a data reply's payload
const DATA_HEADER_LEN: usize = 9;

pub struct Dispatcher {
    root: PathBuf,
    block_size: usize,
    fallback: Box<dyn FileTransferSubsystem>,
    max_packet_len: usize,
}

impl Dispatcher {
    pub fn new(root: impl Into<PathBuf>, block_size: usize) -> Self {
        Self::with_fallback(root, block_size, Box::new(UnsupportedSubsystem))
    }

    pub fn with_fallback(
        root: impl Into<PathBuf>,
        block_size: usize,
        fallback: Box<dyn FileTransferSubsystem>,
    ) -> Self {
        Self {
            root: root.into(),
            block_size,
            fallback,
            max_packet_len: MAX_PACKET_LEN,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle one packet body and return the replies.
    ///
    /// Request failures become status replies; an `Err` means the packet
    /// envelope itself was unreadable and the connection should be dropped.
    pub fn dispatch(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>> {
        let tag = *body
            .first()
            .ok_or_else(|| DeltaBoxError::Protocol("empty packet".into()))?;

        if Command::from_tag(tag).is_none() {
            return self.fallback.handle_packet(body);
        }

        match Request::decode(body) {
            Ok(req) => Ok(vec![self.handle(&req).encode()]),
            Err(e) => match protocol::peek_request_id(body) {
                Some(id) => {
                    warn!(id, "Malformed sync request: {}", e);
                    Ok(vec![Response::failure(id, &e).encode()])
                }
                None => Err(e),
            },
        }
    }

    pub fn handle(&self, req: &Request) -> Response {
        debug!(id = req.id, command = req.command.name(), path = %req.path, "request");

        let result = match req.command {
            Command::BlockChk => self.block_checksums(&req.path).map(Some),
            Command::Delta => self.delta(&req.path, &req.payload).map(Some),
            Command::Patch => self.patch(&req.path, &req.payload).map(|_| None),
        };

        match result {
            Ok(Some(payload)) if payload.len() > self.max_packet_len.saturating_sub(DATA_HEADER_LEN) => {
                warn!(id = req.id, command = req.command.name(), bytes = payload.len(), "Reply too large");
                Response::Status {
                    id: req.id,
                    code: status::FAILURE,
                    message: format!("{} reply of {} bytes exceeds packet limit", req.command.name(), payload.len()),
                }
            }
            Ok(Some(payload)) => Response::Data {
                command: req.command,
                id: req.id,
                payload,
            },
            Ok(None) => Response::ok(req.id),
            Err(e) => {
                warn!(id = req.id, command = req.command.name(), path = %req.path, "Request failed: {}", e);
                Response::failure(req.id, &e)
            }
        }
    }

    /// Map a request path onto the root; `..` is refused, never clamped.
    ///
    /// The deepest existing part of the result must also canonicalize to a
    /// place under the root, so symlinks cannot lead outside it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(DeltaBoxError::Protocol(format!("path escapes root: {}", path)));
                }
            }
        }

        let root = self.root.canonicalize()?;
        let existing = resolved
            .ancestors()
            .find_map(|p| p.canonicalize().ok())
            .ok_or_else(|| DeltaBoxError::Protocol(format!("path escapes root: {}", path)))?;
        if !existing.starts_with(&root) {
            return Err(DeltaBoxError::Protocol(format!("path escapes root: {}", path)));
        }
        Ok(resolved)
    }

    fn block_checksums(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        let sig = signature_for_path(&full, self.block_size)?;
        debug!(path = %full.display(), blocks = sig.blocks.len(), "computed block checksums");
        protocol::encode_signatures(&sig)
    }

    fn delta(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        let remote_sig = protocol::decode_signatures(payload, self.block_size)?;
        let local_data = std::fs::read(&full)?;

        let ops = compute_delta(&local_data, &remote_sig);
        let stats = DeltaStats::of(&ops);
        info!(
            path = %full.display(),
            copied_blocks = stats.copied_blocks,
            literal_bytes = stats.literal_bytes,
            "computed delta"
        );
        protocol::encode_ops(&ops)
    }

    fn patch(&self, path: &str, payload: &[u8]) -> Result<()> {
        if !Path::new(path).components().any(|c| matches!(c, Component::Normal(_))) {
            return Err(DeltaBoxError::Protocol(format!("cannot patch the root itself: {:?}", path)));
        }
        let full = self.resolve(path)?;
        let ops = protocol::decode_ops(payload)?;
        let written = patch_file(&full, &full, &ops, self.block_size)?;
        info!(path = %full.display(), bytes = written, "patched file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::signature_from_bytes;
    use std::fs;
    use tempfile::TempDir;

    fn request(id: u32, command: Command, path: &str, payload: Vec<u8>) -> Vec<u8> {
        Request { id, command, path: path.into(), payload }.encode()
    }

    fn single_reply(dispatcher: &mut Dispatcher, body: &[u8]) -> Response {
        let replies = dispatcher.dispatch(body).unwrap();
        assert_eq!(replies.len(), 1);
        Response::decode(&replies[0]).unwrap()
    }

    #[test]
    fn test_resolve_stays_under_root() {
        let dir = TempDir::new().unwrap();
        let d = Dispatcher::new(dir.path(), 4096);
        assert_eq!(d.resolve("a/b.txt").unwrap(), dir.path().join("a/b.txt"));
        assert_eq!(d.resolve("/a/./b.txt").unwrap(), dir.path().join("a/b.txt"));
        assert!(matches!(d.resolve("../etc/passwd"), Err(DeltaBoxError::Protocol(_))));
        assert!(matches!(d.resolve("a/../../x"), Err(DeltaBoxError::Protocol(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_rejected() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), b"top secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        fs::create_dir(root.path().join("inner")).unwrap();
        fs::write(root.path().join("inner/f"), b"fine").unwrap();
        std::os::unix::fs::symlink(root.path().join("inner"), root.path().join("alias")).unwrap();

        let mut d = Dispatcher::new(root.path(), 4);
        for (id, command, path) in [
            (1, Command::BlockChk, "link/secret"),
            (2, Command::Delta, "link/secret"),
            (3, Command::Patch, "link/new-file"),
        ] {
            let payload = match command {
                Command::BlockChk => vec![],
                Command::Delta => b"[]".to_vec(),
                Command::Patch => protocol::encode_ops(&[crate::delta::DeltaOp::Literal { data: b"x".to_vec() }]).unwrap(),
            };
            match single_reply(&mut d, &request(id, command, path, payload)) {
                Response::Status { code, message, .. } => {
                    assert_eq!(code, status::BAD_MESSAGE);
                    assert!(message.contains("escapes root"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(!outside.path().join("new-file").exists());

        // links that stay inside the root still work
        assert!(matches!(
            single_reply(&mut d, &request(4, Command::BlockChk, "alias/f", vec![])),
            Response::Data { id: 4, .. }
        ));
    }

    #[test]
    fn test_patch_of_root_rejected() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("served");
        fs::create_dir(&root).unwrap();
        let mut d = Dispatcher::new(&root, 4);

        let payload = protocol::encode_ops(&[crate::delta::DeltaOp::Literal { data: b"x".to_vec() }]).unwrap();
        for (id, path) in [(1, ""), (2, "/"), (3, ".")] {
            match single_reply(&mut d, &request(id, Command::Patch, path, payload.clone())) {
                Response::Status { code, .. } => assert_eq!(code, status::BAD_MESSAGE),
                other => panic!("unexpected {:?}", other),
            }
        }
        let names: Vec<_> = fs::read_dir(parent.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("served")]);
        assert!(root.is_dir());
    }

    #[test]
    fn test_oversized_reply_becomes_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big"), vec![1u8; 200]).unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);
        d.max_packet_len = 128;

        match single_reply(&mut d, &request(6, Command::Delta, "big", b"[]".to_vec())) {
            Response::Status { id, code, message } => {
                assert_eq!((id, code), (6, status::FAILURE));
                assert!(message.contains("exceeds packet limit"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // small replies still fit
        fs::write(dir.path().join("small"), b"ab").unwrap();
        assert!(matches!(
            single_reply(&mut d, &request(7, Command::BlockChk, "small", vec![])),
            Response::Data { id: 7, .. }
        ));
    }

    #[test]
    fn test_blockchk_reply() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.bin"), vec![7u8; 10]).unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);

        match single_reply(&mut d, &request(1, Command::BlockChk, "f.bin", vec![])) {
            Response::Data { command, id, payload } => {
                assert_eq!((command, id), (Command::BlockChk, 1));
                let sig = protocol::decode_signatures(&payload, 4).unwrap();
                assert_eq!(sig, signature_from_bytes(&[7u8; 10], 4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_status() {
        let dir = TempDir::new().unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);
        match single_reply(&mut d, &request(5, Command::BlockChk, "nope", vec![])) {
            Response::Status { id, code, .. } => assert_eq!((id, code), (5, status::NO_SUCH_FILE)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_traversal_rejected_with_bad_message() {
        let dir = TempDir::new().unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);
        match single_reply(&mut d, &request(2, Command::BlockChk, "../outside", vec![])) {
            Response::Status { code, message, .. } => {
                assert_eq!(code, status::BAD_MESSAGE);
                assert!(message.contains("escapes root"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delta_then_patch_updates_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        let old = b"the quick brown fox jumps over the lazy dog".to_vec();
        let new = b"the quick brown cat jumps over the lazy dog!".to_vec();
        fs::write(&path, &new).unwrap();
        let mut d = Dispatcher::new(dir.path(), 8);

        // client holds `old`, asks for the delta to the server's `new`
        let sig_payload = protocol::encode_signatures(&signature_from_bytes(&old, 8)).unwrap();
        let ops_payload = match single_reply(&mut d, &request(3, Command::Delta, "doc.txt", sig_payload)) {
            Response::Data { payload, .. } => payload,
            other => panic!("unexpected {:?}", other),
        };
        let ops = protocol::decode_ops(&ops_payload).unwrap();

        let mut rebuilt: Vec<u8> = Vec::new();
        crate::delta::apply_delta(&mut std::io::Cursor::new(&old), &ops, 8, &mut rebuilt).unwrap();
        assert_eq!(rebuilt, new);

        // and the other direction: push `old` back onto the server
        let server_sig = signature_from_bytes(&new, 8);
        let push = protocol::encode_ops(&compute_delta(&old, &server_sig)).unwrap();
        assert_eq!(single_reply(&mut d, &request(4, Command::Patch, "doc.txt", push)), Response::ok(4));
        assert_eq!(fs::read(&path).unwrap(), old);
    }

    #[test]
    fn test_malformed_delta_payload() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), b"data").unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);
        match single_reply(&mut d, &request(8, Command::Delta, "x", b"{oops".to_vec())) {
            Response::Status { id, code, .. } => assert_eq!((id, code), (8, status::BAD_MESSAGE)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_copy_index_fails_and_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x");
        fs::write(&path, b"data").unwrap();
        let mut d = Dispatcher::new(dir.path(), 4);

        let payload = protocol::encode_ops(&[crate::delta::DeltaOp::Copy { index: 10 }]).unwrap();
        match single_reply(&mut d, &request(9, Command::Patch, "x", payload)) {
            Response::Status { code, message, .. } => {
                assert_eq!(code, status::FAILURE);
                assert!(message.starts_with("Algorithm error"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn test_unknown_tag_goes_to_fallback() {
        let mut d = Dispatcher::new("/tmp", 4);
        // SSH_FXP_OPEN with id 11
        let body = [3u8, 0, 0, 0, 11, 0, 0, 0, 0];
        match single_reply(&mut d, &body) {
            Response::Status { id, code, .. } => assert_eq!((id, code), (11, status::OP_UNSUPPORTED)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_envelope_is_error() {
        let mut d = Dispatcher::new("/tmp", 4);
        assert!(d.dispatch(&[]).is_err());
        assert!(d.dispatch(&[Command::Delta.tag(), 0, 1]).is_err());
    }
}

use crate::delta::{DeltaOp, SignatureSet};
use crate::protocol::{self, status, Command, Request, Response};
use crate::transport::Session;
use crate::{DeltaBoxError, Result};
use tracing::debug;

/// Client half of the sync extension, talking to a remote agent
pub struct AgentRemote<S: Session> {
    session: S,
    next_id: u32,
    block_size: usize,
}

impl<S: Session> AgentRemote<S> {
    pub fn new(session: S, block_size: usize) -> Self {
        Self {
            session,
            next_id: 1,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// BLOCKCHK: signatures of the remote file
    pub fn get_signature(&mut self, path: &str) -> Result<SignatureSet> {
        let payload = self.call_data(Command::BlockChk, path, Vec::new())?;
        protocol::decode_signatures(&payload, self.block_size)
    }

    /// DELTA: ops turning the file described by `local_sig` into the remote file
    pub fn get_delta(&mut self, path: &str, local_sig: &SignatureSet) -> Result<Vec<DeltaOp>> {
        let payload = protocol::encode_signatures(local_sig)?;
        let reply = self.call_data(Command::Delta, path, payload)?;
        protocol::decode_ops(&reply)
    }

    /// PATCH: apply `ops` to the remote file in place
    pub fn apply_delta(&mut self, path: &str, ops: &[DeltaOp]) -> Result<()> {
        let payload = protocol::encode_ops(ops)?;
        match self.call(Command::Patch, path, payload)? {
            Response::Status { code: status::OK, .. } => Ok(()),
            resp => Err(unexpected(Command::Patch, resp)),
        }
    }

    pub fn close(mut self) -> Result<()> {
        self.session.close()
    }

    fn call_data(&mut self, command: Command, path: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        match self.call(command, path, payload)? {
            Response::Data { command: got, payload, .. } if got == command => Ok(payload),
            resp => Err(unexpected(command, resp)),
        }
    }

    fn call(&mut self, command: Command, path: &str, payload: Vec<u8>) -> Result<Response> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let req = Request {
            id,
            command,
            path: path.to_string(),
            payload,
        };
        debug!(id, command = command.name(), path, "sending request");
        self.session.send_frame(&req.encode())?;

        let body = self
            .session
            .recv_frame()?
            .ok_or_else(|| DeltaBoxError::Protocol("agent closed the session".into()))?;
        let resp = Response::decode(&body)?;

        if resp.id() != id {
            return Err(DeltaBoxError::Protocol(format!(
                "reply for request {} while waiting for {}",
                resp.id(),
                id
            )));
        }
        Ok(resp)
    }
}

fn unexpected(command: Command, resp: Response) -> DeltaBoxError {
    match resp {
        Response::Status { code, message, .. } => DeltaBoxError::RemoteStatus { code, message },
        Response::Data { command: got, .. } => DeltaBoxError::Protocol(format!(
            "Unexpected {} reply for {}",
            got.name(),
            command.name()
        )),
    }
}

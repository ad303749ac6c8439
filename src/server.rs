use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, FileTransferSubsystem, UnsupportedSubsystem};
use crate::transport::{Acceptor, Session, StdioAcceptor};
use crate::Result;
use std::thread;
use tracing::{debug, error, info};

/// Serves one session: packets in, replies out, strictly in order
pub struct ConnectionHandler<S: Session> {
    session: S,
    dispatcher: Dispatcher,
}

impl<S: Session> ConnectionHandler<S> {
    pub fn new(session: S, dispatcher: Dispatcher) -> Self {
        Self { session, dispatcher }
    }

    pub fn run(&mut self) -> Result<()> {
        info!(root = %self.dispatcher.root().display(), "Session started");
        let mut served = 0u64;

        loop {
            let body = match self.session.recv_frame() {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    error!("Server read error: {}", e);
                    let _ = self.session.close();
                    return Err(e);
                }
            };

            let replies = match self.dispatcher.dispatch(&body) {
                Ok(replies) => replies,
                Err(e) => {
                    error!("Dropping session on unreadable packet: {}", e);
                    let _ = self.session.close();
                    return Err(e);
                }
            };

            for reply in replies {
                self.session.send_frame(&reply)?;
            }
            served += 1;
        }

        debug!(requests = served, "Session closed by peer");
        self.session.close()
    }

    pub fn into_session(self) -> S {
        self.session
    }
}

fn unsupported() -> Box<dyn FileTransferSubsystem> {
    Box::new(UnsupportedSubsystem)
}

pub struct Server {
    config: ServerConfig,
    fallback: fn() -> Box<dyn FileTransferSubsystem>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            fallback: unsupported,
        }
    }

    /// Use a different file-transfer subsystem for non-sync requests
    pub fn with_fallback(mut self, fallback: fn() -> Box<dyn FileTransferSubsystem>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Serve the single session on stdin/stdout
    pub fn run(&self) -> Result<()> {
        self.serve(&mut StdioAcceptor::new())
    }

    /// Accept sessions until the acceptor runs dry, one thread each
    pub fn serve<A: Acceptor>(&self, acceptor: &mut A) -> Result<()> {
        let mut workers = Vec::new();

        while let Some(session) = acceptor.accept_connection()? {
            let dispatcher = Dispatcher::with_fallback(
                self.config.root.clone(),
                self.config.block_size,
                (self.fallback)(),
            );
            let worker = thread::spawn(move || ConnectionHandler::new(session, dispatcher).run());
            workers.push(worker);
        }

        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Session ended with error: {}", e),
                Err(_) => error!("Session worker panicked"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{status, Command, Request, Response};
    use crate::transport::PacketStream;
    use std::io::{self, Cursor};

    fn framed(bodies: &[Vec<u8>]) -> Vec<u8> {
        let mut out = PacketStream::new(io::empty(), Vec::<u8>::new());
        for body in bodies {
            out.send_frame(body).unwrap();
        }
        out.into_inner().1
    }

    fn replies(bytes: Vec<u8>) -> Vec<Response> {
        let mut input = PacketStream::new(Cursor::new(bytes), io::sink());
        let mut out = Vec::new();
        while let Some(body) = input.recv_frame().unwrap() {
            out.push(Response::decode(&body).unwrap());
        }
        out
    }

    #[test]
    fn test_unreadable_envelope_ends_session() {
        let input = framed(&[vec![Command::Patch.tag(), 0]]);
        let session = PacketStream::new(Cursor::new(input), Vec::<u8>::new());
        let mut handler = ConnectionHandler::new(session, Dispatcher::new("/tmp", 4));
        assert!(handler.run().is_err());
    }

    #[test]
    fn test_session_survives_bad_request() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"hello").unwrap();

        let input = framed(&[
            Request { id: 1, command: Command::Delta, path: "f".into(), payload: b"garbage".to_vec() }.encode(),
            Request { id: 2, command: Command::BlockChk, path: "f".into(), payload: vec![] }.encode(),
        ]);
        let session = PacketStream::new(Cursor::new(input), Vec::<u8>::new());
        let mut handler = ConnectionHandler::new(session, Dispatcher::new(dir.path(), 4));
        handler.run().unwrap();
        let (_, out) = handler.into_session().into_inner();

        let responses = replies(out);
        assert_eq!(responses.len(), 2);
        assert!(matches!(responses[0], Response::Status { id: 1, code: status::BAD_MESSAGE, .. }));
        assert!(matches!(responses[1], Response::Data { id: 2, command: Command::BlockChk, .. }));
    }
}

use crate::protocol::MAX_PACKET_LEN;
use crate::{DeltaBoxError, Result};
use std::io::{self, Read, Write};
use std::path::Path;

pub mod ssh;

/// Plain remote file operations used next to the sync agent
pub trait Transport {
    fn upload_file(&self, local: &Path, remote: &Path) -> Result<()>;
    /// Recursively create a directory.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// An authenticated, ordered, reliable packet channel
pub trait Session {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;
    /// Next packet body, or `None` once the peer closed the stream cleanly
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>>;
    fn close(&mut self) -> Result<()>;
}

/// Hands out sessions whose authorization has already been decided
pub trait Acceptor {
    type Session: Session + Send + 'static;

    /// `None` once no further connections will arrive
    fn accept_connection(&mut self) -> Result<Option<Self::Session>>;
}

/// `[len: u32 BE][body]` packets over a byte stream pair
pub struct PacketStream<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> PacketStream<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Session for PacketStream<R, W> {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        write_frame(&mut self.writer, frame)
    }

    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        read_frame(&mut self.reader)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Write one packet; bodies the peer would refuse are rejected up front
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, frame: &[u8]) -> Result<()> {
    let len = u32::try_from(frame.len())
        .ok()
        .filter(|&len| len as usize <= MAX_PACKET_LEN)
        .ok_or_else(|| DeltaBoxError::Protocol(format!("packet of {} bytes exceeds limit", frame.len())))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one packet body; `None` on a clean end of stream
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(DeltaBoxError::Io(e));
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_PACKET_LEN {
        return Err(DeltaBoxError::Protocol(format!("packet of {} bytes exceeds limit", len)));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// The single session on stdin/stdout of a process spawned by sshd
pub type StdioSession = PacketStream<io::Stdin, io::Stdout>;

/// Yields the stdio session once; sshd has already authenticated the peer
#[derive(Default)]
pub struct StdioAcceptor {
    taken: bool,
}

impl StdioAcceptor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Acceptor for StdioAcceptor {
    type Session = StdioSession;

    fn accept_connection(&mut self) -> Result<Option<Self::Session>> {
        if self.taken {
            return Ok(None);
        }
        self.taken = true;
        Ok(Some(PacketStream::new(io::stdin(), io::stdout())))
    }
}

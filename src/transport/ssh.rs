use crate::transport::{read_frame, write_frame, Session, Transport};
use crate::{DeltaBoxError, Result};
use ssh2::{Channel, Session as SshSession, Sftp};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

pub struct SshConnection {
    session: SshSession,
    _tcp: TcpStream,
}

impl Transport for SshConnection {
    fn upload_file(&self, local: &Path, remote: &Path) -> Result<()> {
        let mut local_file = std::fs::File::open(local)?;
        let sftp = self.sftp()?;

        let mut remote_file = sftp
            .create(remote)
            .map_err(|e| DeltaBoxError::SshConnection(format!("Remote file create failed {:?}: {}", remote, e)))?;

        std::io::copy(&mut local_file, &mut remote_file)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let sftp = self.sftp()?;
        create_dir_recursive(&sftp, path)
    }
}

fn create_dir_recursive(sftp: &Sftp, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || sftp.stat(path).is_ok() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if parent != path {
            create_dir_recursive(sftp, parent)?;
        }
    }

    match sftp.mkdir(path, 0o755) {
        Ok(_) => Ok(()),
        // lost a race with another creator
        Err(_) if sftp.stat(path).is_ok() => Ok(()),
        Err(e) => Err(DeltaBoxError::SshConnection(format!("Failed to create dir {:?}: {}", path, e))),
    }
}

impl SshConnection {
    pub fn connect(config: &SshConfig) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            DeltaBoxError::SshConnection(format!("Failed to connect to {}:{}: {}", config.host, config.port, e))
        })?;

        let mut session = SshSession::new().map_err(|e| DeltaBoxError::SshConnection(e.to_string()))?;
        session.set_tcp_stream(tcp.try_clone()?);
        session
            .handshake()
            .map_err(|e| DeltaBoxError::SshConnection(format!("Handshake failed: {}", e)))?;

        if let Some(key) = &config.key_path {
            session
                .userauth_pubkey_file(&config.user, None, key, None)
                .map_err(|e| DeltaBoxError::Authentication(format!("Key auth failed: {}", e)))?;
        } else if session.userauth_agent(&config.user).is_err() || !session.authenticated() {
            let home = std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            let default_keys = [
                PathBuf::from(&home).join(".ssh/id_rsa"),
                PathBuf::from(&home).join(".ssh/id_ed25519"),
            ];

            for key in default_keys.iter().filter(|k| k.exists()) {
                debug!("Trying key {:?}", key);
                if session.userauth_pubkey_file(&config.user, None, key, None).is_ok() && session.authenticated() {
                    break;
                }
            }
        }

        if !session.authenticated() {
            return Err(DeltaBoxError::Authentication(
                "Authentication failed (agent and default keys tried)".into(),
            ));
        }

        Ok(Self { session, _tcp: tcp })
    }

    pub fn sftp(&self) -> Result<Sftp> {
        self.session
            .sftp()
            .map_err(|e| DeltaBoxError::SshConnection(format!("SFTP init failed: {}", e)))
    }

    /// Start `remote_cmd` (the server-mode agent) and talk packets to it
    pub fn open_agent(&self, remote_cmd: &str) -> Result<ChannelSession> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| DeltaBoxError::SshConnection(format!("Channel open failed: {}", e)))?;
        channel
            .exec(remote_cmd)
            .map_err(|e| DeltaBoxError::RemoteCommand(format!("Failed to exec agent: {}", e)))?;
        Ok(ChannelSession { channel })
    }
}

/// Packet session over an SSH exec channel
pub struct ChannelSession {
    channel: Channel,
}

impl Session for ChannelSession {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        write_frame(&mut self.channel, frame)
    }

    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        read_frame(&mut self.channel)
    }

    fn close(&mut self) -> Result<()> {
        self.channel
            .send_eof()
            .and_then(|_| self.channel.wait_close())
            .map_err(|e| DeltaBoxError::SshConnection(format!("Channel close failed: {}", e)))?;
        match self.channel.exit_status() {
            Ok(0) | Err(_) => Ok(()),
            Ok(code) => Err(DeltaBoxError::RemoteCommand(format!("agent exited with code {}", code))),
        }
    }
}

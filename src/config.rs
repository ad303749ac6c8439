use crate::delta::DEFAULT_BLOCK_SIZE;
use crate::{DeltaBoxError, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source path (local path, or user@host:path with --pull)
    #[arg(value_name = "SOURCE", required_unless_present = "server")]
    pub source: Option<String>,

    /// Destination path (user@host:path, or local path with --pull)
    #[arg(value_name = "DESTINATION", required_unless_present = "server")]
    pub destination: Option<String>,

    /// Fetch SOURCE from the remote side into local DESTINATION
    #[arg(long, default_value_t = false)]
    pub pull: bool,

    /// Exclude patterns (gitignore style)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Perform a trial run with no changes made
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Show progress during transfer
    #[arg(short = 'P', long, default_value_t = false)]
    pub progress: bool,

    /// Block size in bytes; both peers must use the same value
    #[arg(short = 'B', long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Identity file for SSH
    #[arg(short = 'i', long)]
    pub identity: Option<PathBuf>,

    /// Port for SSH
    #[arg(short = 'p', long, default_value_t = 22)]
    pub port: u16,

    /// Agent binary to start on the remote host
    #[arg(long, default_value = "deltabox")]
    pub remote_bin: String,

    /// Directory the remote agent serves; remote paths are relative to it
    #[arg(long, default_value = ".")]
    pub remote_root: String,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Run in server mode (agent on stdin/stdout)
    #[arg(long, default_value_t = false, hide = true)]
    pub server: bool,

    /// Root directory served in server mode
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

impl Args {
    /// Command line used to start the agent on the remote host
    pub fn remote_command(&self) -> String {
        format!(
            "{} --server --block-size {} --root '{}'",
            self.remote_bin,
            self.block_size,
            escape_posix_literal(&self.remote_root)
        )
    }
}

/// Settings a server-side connection handler runs with
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub block_size: usize,
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(DeltaBoxError::Config("block size must be non-zero".into()));
        }
        Ok(Self {
            root: root.into(),
            block_size,
        })
    }

    pub fn from_args(args: &Args) -> Result<Self> {
        let root = args
            .root
            .canonicalize()
            .map_err(|e| DeltaBoxError::Config(format!("root {:?} is not usable: {}", args.root, e)))?;
        if !root.is_dir() {
            return Err(DeltaBoxError::Config(format!("root {:?} is not a directory", root)));
        }
        Self::new(root, args.block_size)
    }
}

/// `user@host:path` split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub user: String,
    pub host: String,
    pub path: String,
}

pub fn parse_remote(spec: &str) -> Option<RemoteSpec> {
    let (user_host, path) = spec.split_once(':')?;
    let (user, host) = user_host.split_once('@')?;
    if user.is_empty() || host.is_empty() {
        return None;
    }
    Some(RemoteSpec {
        user: user.to_string(),
        host: host.to_string(),
        path: path.to_string(),
    })
}

pub fn escape_posix_literal(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote() {
        let spec = parse_remote("alice@example.org:docs/report.txt").unwrap();
        assert_eq!(spec.user, "alice");
        assert_eq!(spec.host, "example.org");
        assert_eq!(spec.path, "docs/report.txt");

        assert!(parse_remote("example.org:docs").is_none());
        assert!(parse_remote("alice@example.org").is_none());
        assert!(parse_remote("@host:x").is_none());
    }

    #[test]
    fn test_server_args() {
        let args = Args::parse_from(["deltabox", "--server", "--root", "/srv/box", "-B", "1024"]);
        assert!(args.server);
        assert_eq!(args.block_size, 1024);
        assert_eq!(args.root, PathBuf::from("/srv/box"));
    }

    #[test]
    fn test_remote_command_quotes_root() {
        let args = Args::parse_from(["deltabox", "src", "u@h:dst", "--remote-root", "it's here"]);
        assert_eq!(
            args.remote_command(),
            "deltabox --server --block-size 4096 --root 'it'\\''s here'"
        );
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(matches!(ServerConfig::new("/tmp", 0), Err(DeltaBoxError::Config(_))));
    }
}

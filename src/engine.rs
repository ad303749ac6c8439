use crate::config::{parse_remote, Args, RemoteSpec};
use crate::delta::{compute_delta, patch_file_or_empty, signature_for_path, DeltaStats, SignatureSet};
use crate::remote::AgentRemote;
use crate::scanner::{LocalScanner, Scanner};
use crate::transport::ssh::{SshConfig, SshConnection};
use crate::transport::{Session, Transport};
use crate::{DeltaBoxError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Synchronized through a delta
    Delta(DeltaStats),
    /// No remote copy existed; sent whole
    Uploaded { bytes: u64 },
    /// Dry run; nothing was changed
    Planned(DeltaStats),
}

/// Send `local` to the agent's `remote` path. A missing remote file is
/// created by a plain upload to `upload_path` over `transport`.
pub fn push_file<S: Session>(
    agent: &mut AgentRemote<S>,
    transport: &dyn Transport,
    local: &Path,
    remote: &str,
    upload_path: &Path,
    dry_run: bool,
) -> Result<FileOutcome> {
    let local_data = std::fs::read(local)?;

    let remote_sig = match agent.get_signature(remote) {
        Ok(sig) => sig,
        Err(e) if e.is_not_found() => {
            if dry_run {
                return Ok(FileOutcome::Planned(DeltaStats {
                    copied_blocks: 0,
                    literal_bytes: local_data.len() as u64,
                }));
            }
            debug!("Remote {} missing, uploading whole file", remote);
            if let Some(parent) = upload_path.parent() {
                transport.create_dir_all(parent)?;
            }
            transport.upload_file(local, upload_path)?;
            return Ok(FileOutcome::Uploaded {
                bytes: local_data.len() as u64,
            });
        }
        Err(e) => return Err(e),
    };

    let ops = compute_delta(&local_data, &remote_sig);
    let stats = DeltaStats::of(&ops);
    if dry_run {
        return Ok(FileOutcome::Planned(stats));
    }

    agent.apply_delta(remote, &ops)?;
    Ok(FileOutcome::Delta(stats))
}

/// Bring `local` up to date with the agent's `remote` file
pub fn pull_file<S: Session>(agent: &mut AgentRemote<S>, remote: &str, local: &Path, dry_run: bool) -> Result<FileOutcome> {
    let block_size = agent.block_size();
    let local_sig = match signature_for_path(local, block_size) {
        Ok(sig) => sig,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SignatureSet::empty(block_size),
        Err(e) => return Err(e.into()),
    };

    let ops = agent.get_delta(remote, &local_sig)?;
    let stats = DeltaStats::of(&ops);
    if dry_run {
        return Ok(FileOutcome::Planned(stats));
    }

    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    patch_file_or_empty(local, local, &ops, block_size)?;
    Ok(FileOutcome::Delta(stats))
}

pub struct SyncEngine {
    args: Args,
}

impl SyncEngine {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub fn run(&self) -> Result<()> {
        let (source, destination) = match (&self.args.source, &self.args.destination) {
            (Some(s), Some(d)) => (s.as_str(), d.as_str()),
            _ => return Err(DeltaBoxError::Config("SOURCE and DESTINATION are required".into())),
        };

        let remote_arg = if self.args.pull { source } else { destination };
        let remote = parse_remote(remote_arg).ok_or_else(|| {
            DeltaBoxError::Config(format!("Invalid remote {:?}. Expected user@host:path", remote_arg))
        })?;

        info!("Connecting to {}@{}...", remote.user, remote.host);
        let conn = SshConnection::connect(&SshConfig {
            host: remote.host.clone(),
            port: self.args.port,
            user: remote.user.clone(),
            key_path: self.args.identity.clone(),
        })?;
        info!("Connected.");

        let remote_cmd = self.args.remote_command();
        debug!("Starting remote agent: {}", remote_cmd);
        let session = conn.open_agent(&remote_cmd).map_err(|e| {
            error!("Failed to start remote agent. Make sure '{}' is installed on remote and in PATH.", self.args.remote_bin);
            e
        })?;
        let mut agent = AgentRemote::new(session, self.args.block_size);

        let result = if self.args.pull {
            self.pull(&mut agent, &remote, Path::new(destination))
        } else {
            self.push(&mut agent, &conn, Path::new(source), &remote)
        };

        agent.close()?;
        result
    }

    fn pull<S: Session>(&self, agent: &mut AgentRemote<S>, remote: &RemoteSpec, local: &Path) -> Result<()> {
        info!("Pulling {} into {:?}", remote.path, local);
        let outcome = pull_file(agent, &remote.path, local, self.args.dry_run)?;
        report(&remote.path, &outcome);
        Ok(())
    }

    fn push<S: Session>(
        &self,
        agent: &mut AgentRemote<S>,
        conn: &SshConnection,
        local: &Path,
        remote: &RemoteSpec,
    ) -> Result<()> {
        if !local.exists() {
            return Err(DeltaBoxError::Config(format!("Source path does not exist: {:?}", local)));
        }

        if local.is_file() {
            let outcome = push_file(
                agent,
                conn,
                local,
                &remote.path,
                &self.upload_path(&remote.path),
                self.args.dry_run,
            )?;
            report(&remote.path, &outcome);
            return Ok(());
        }

        info!("Scanning local directory: {:?}", local);
        let manifest = LocalScanner::new(self.args.exclude.clone()).scan(local)?;
        info!(
            "Found {} local items ({} bytes).",
            manifest.entries.len(),
            manifest.total_bytes()
        );

        let pb = if self.args.progress && !self.args.quiet {
            let pb = ProgressBar::new(manifest.entries.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            {
                pb.set_style(style);
            }
            Some(pb)
        } else {
            None
        };

        let mut errors = Vec::new();
        for entry in &manifest.entries {
            let remote_rel = join_remote(&remote.path, &entry.path);
            if let Some(pb) = &pb {
                pb.set_message(entry.path.clone());
            }

            let result = if entry.is_dir {
                if self.args.dry_run {
                    Ok(())
                } else {
                    conn.create_dir_all(&self.upload_path(&remote_rel))
                }
            } else {
                push_file(
                    agent,
                    conn,
                    &local.join(&entry.path),
                    &remote_rel,
                    &self.upload_path(&remote_rel),
                    self.args.dry_run,
                )
                .map(|outcome| report(&remote_rel, &outcome))
            };

            if let Err(e) = result {
                error!("Sync error for {}: {}", entry.path, e);
                errors.push(format!("{}: {}", entry.path, e));
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = &pb {
            pb.finish_with_message("Done");
        }

        if !errors.is_empty() {
            error!("Encountered {} errors during sync.", errors.len());
            return Err(DeltaBoxError::RemoteCommand(format!(
                "sync completed with {} errors",
                errors.len()
            )));
        }

        info!("Sync completed successfully.");
        Ok(())
    }

    /// SFTP path of a path relative to the agent's root
    fn upload_path(&self, remote_rel: &str) -> PathBuf {
        Path::new(&self.args.remote_root).join(remote_rel.trim_start_matches('/'))
    }
}

fn join_remote(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", base, rel)
    }
}

fn report(path: &str, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Delta(stats) => info!(
            path,
            copied_blocks = stats.copied_blocks,
            literal_bytes = stats.literal_bytes,
            "synced"
        ),
        FileOutcome::Uploaded { bytes } => info!(path, bytes, "uploaded"),
        FileOutcome::Planned(stats) => println!(
            "SYNC: {} ({} blocks reused, {} bytes to send)",
            path, stats.copied_blocks, stats.literal_bytes
        ),
    }
}

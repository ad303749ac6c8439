use super::DeltaOp;
use crate::{DeltaBoxError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Rebuild the target described by `ops` into `out`, reading copied blocks
/// from `base`. Returns the number of bytes written.
pub fn apply_delta<R, W>(base: &mut R, ops: &[DeltaOp], block_size: usize, out: &mut W) -> Result<u64>
where
    R: Read + Seek + ?Sized,
    W: Write + ?Sized,
{
    if block_size == 0 {
        return Err(DeltaBoxError::Algorithm("block size must be non-zero".into()));
    }
    let base_len = base.seek(SeekFrom::End(0))?;
    let mut written = 0u64;

    for op in ops {
        match op {
            DeltaOp::Literal { data } => {
                out.write_all(data)?;
                written += data.len() as u64;
            }
            DeltaOp::Copy { index } => {
                let offset = *index as u64 * block_size as u64;
                if offset >= base_len {
                    return Err(DeltaBoxError::Algorithm(format!(
                        "block {} is outside the base file ({} bytes)",
                        index, base_len
                    )));
                }
                base.seek(SeekFrom::Start(offset))?;

                // The final block may be shorter than block_size
                let want = (base_len - offset).min(block_size as u64);
                let mut block = (&mut *base).take(want);
                let copied = io::copy(&mut block, out)?;
                if copied != want {
                    return Err(DeltaBoxError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("base file shrank while copying block {}", index),
                    )));
                }
                written += copied;
            }
        }
    }

    out.flush()?;
    Ok(written)
}

/// Apply `ops` to the file at `base_path` and atomically replace `target_path`
/// with the result. The target is untouched unless the whole stream was written.
pub fn patch_file(base_path: &Path, target_path: &Path, ops: &[DeltaOp], block_size: usize) -> Result<u64> {
    let base = File::open(base_path)?;
    let permissions = base.metadata()?.permissions();
    let mut reader = BufReader::new(base);

    let written = replace_atomically(target_path, Some(permissions), |out| {
        apply_delta(&mut reader, ops, block_size, out)
    })?;
    debug!(target = %target_path.display(), bytes = written, "patched");
    Ok(written)
}

/// Like [`patch_file`], but a missing base counts as an empty file
pub fn patch_file_or_empty(base_path: &Path, target_path: &Path, ops: &[DeltaOp], block_size: usize) -> Result<u64> {
    match File::open(base_path) {
        Ok(_) => patch_file(base_path, target_path, ops, block_size),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut empty = Cursor::new(Vec::<u8>::new());
            replace_atomically(target_path, None, |out| apply_delta(&mut empty, ops, block_size, out))
        }
        Err(e) => Err(e.into()),
    }
}

fn replace_atomically<F>(target_path: &Path, permissions: Option<fs::Permissions>, write: F) -> Result<u64>
where
    F: FnOnce(&mut dyn Write) -> Result<u64>,
{
    let dir = match target_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    // Dropping `tmp` on any early return removes the temporary file
    let mut tmp = tempfile::Builder::new()
        .prefix(".deltabox-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let written = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let n = write(&mut writer)?;
        writer.flush()?;
        n
    };
    tmp.as_file().sync_all()?;

    if let Some(perms) = permissions {
        fs::set_permissions(tmp.path(), perms)?;
    }

    tmp.persist(target_path).map_err(|e| DeltaBoxError::Io(e.error))?;
    Ok(written)
}

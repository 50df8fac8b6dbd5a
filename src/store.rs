//! Disk placement for transferred files.
//!
//! The protocol core never touches the filesystem; the driver binary and
//! anything embedding it use these helpers to turn received files into disk
//! files and disk files into send jobs.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::modem::{FileJob, ReceivedFile};

/// Destination for a peer-supplied path: flattened into `dir` with `/`
/// replaced by `_`, so a transfer cannot place files outside it.
pub fn sanitized_path(dir: &Path, peer_path: &str) -> Result<PathBuf> {
    if peer_path.is_empty() {
        bail!("peer sent a blank file path");
    }
    Ok(dir.join(peer_path.replace('/', "_")))
}

/// Write a received body to `dest`. With `apply_metadata`, the declared
/// permission bits and mtime follow; failures there are logged, not fatal.
pub async fn store_received(
    mut file: ReceivedFile,
    dest: &Path,
    apply_metadata: bool,
) -> Result<()> {
    let mut out = File::create(dest)
        .await
        .with_context(|| format!("cannot create {}", dest.display()))?;
    tokio::io::copy(&mut file.body, &mut out).await?;
    out.flush().await?;
    drop(out);

    if apply_metadata {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(file.mode);
            if let Err(e) = std::fs::set_permissions(dest, perms) {
                tracing::warn!("failed to set permissions on {}: {}", dest.display(), e);
            }
        }
        let mtime = filetime::FileTime::from_unix_time(file.mtime, 0);
        if let Err(e) = filetime::set_file_mtime(dest, mtime) {
            tracing::warn!("failed to set mtime on {}: {}", dest.display(), e);
        }
    }
    Ok(())
}

/// Build a send job from a disk file: length, mtime, and permission bits
/// come from its metadata.
pub async fn job_from_path(path: &Path) -> Result<FileJob> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o777
    };
    #[cfg(not(unix))]
    let mode = 0o644;
    let body = File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok(FileJob {
        path: path.to_string_lossy().into_owned(),
        length: meta.len(),
        mtime,
        mode,
        body: Box::new(body) as Box<dyn AsyncRead + Send + Unpin>,
    })
}

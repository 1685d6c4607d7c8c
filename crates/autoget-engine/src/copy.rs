//! File duplication from the daemon's download directory into the finished
//! directory.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use autoget_torrent::Torrent;

/// Copy every file of `torrent` into `finished_dir/<hash>/`, preserving the
/// daemon-reported relative paths.
///
/// Returns the list of copied relative paths; the caller persists it as the
/// record's authoritative `file_list`. The first failing file aborts the
/// whole torrent so the caller retries the record on a later pass.
pub(crate) fn copy_torrent_files(
    torrent: &Torrent,
    hash: &str,
    finished_dir: &Path,
) -> Result<Vec<String>> {
    let download_dir = Path::new(&torrent.download_dir);
    let target_root = finished_dir.join(hash);

    let mut copied = Vec::with_capacity(torrent.files.len());
    for file in &torrent.files {
        let from = download_dir.join(&file.name);
        let target = target_root.join(&file.name);

        if let Some(parent) = target.parent() {
            create_dirs(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let mut source =
            File::open(&from).with_context(|| format!("failed to open {}", from.display()))?;
        let mut destination = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut source, &mut destination).with_context(|| {
            format!(
                "failed to copy {} to {}",
                from.display(),
                target.display()
            )
        })?;

        copied.push(file.name.clone());
    }

    Ok(copied)
}

#[cfg(unix)]
fn create_dirs(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dirs(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

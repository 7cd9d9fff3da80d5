//! # Archives
//!
//! gzip'd tarballs for extension/theme trees and the media library.
//!
//! ```text
//! pack_dir(extensions/seo)          ──► [gz tar: ./readme.txt, ./src/...]
//! pack_files(uploads, [a.png, ...]) ──► [gz tar: a.png, 2024/b.jpg]
//!
//! unpack(data, dest, Replace)  stage in dest's parent, swap in on success
//! unpack(data, dest, Merge)    write over existing files, keep the rest
//! ```
//!
//! Entries whose path would leave the destination are refused and fail the
//! whole unpack. Packing and unpacking are blocking; the `*_blocking`
//! helpers move them onto the blocking pool.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// What happens to files already in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackMode {
    /// The destination ends up holding exactly the archive's content.
    Replace,
    /// Archive entries overwrite, other files stay.
    Merge,
}

// =============================================================================
// Packing
// =============================================================================

/// Packs a whole directory tree, entries relative to `dir`.
pub fn pack_dir(dir: &Path) -> AgentResult<Vec<u8>> {
    if !dir.is_dir() {
        return Err(AgentError::NotFound(format!("{} is not a directory", dir.display())));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| AgentError::Archive(format!("packing {}: {}", dir.display(), e)))?;

    finish(builder)
}

/// Packs selected files below `root`, entries named by their relative path.
///
/// Paths that don't exist on disk are left out.
pub fn pack_files(root: &Path, paths: &[String]) -> AgentResult<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for relative in paths {
        let source = root.join(relative);
        if !source.is_file() {
            debug!(path = %relative, "Skipping missing media file");
            continue;
        }
        let mut file = File::open(&source)?;
        builder
            .append_file(relative, &mut file)
            .map_err(|e| AgentError::Archive(format!("packing {}: {}", relative, e)))?;
    }

    finish(builder)
}

fn finish(builder: tar::Builder<GzEncoder<Vec<u8>>>) -> AgentResult<Vec<u8>> {
    let encoder = builder
        .into_inner()
        .map_err(|e| AgentError::Archive(e.to_string()))?;
    let data = encoder.finish()?;
    Ok(data)
}

// =============================================================================
// Unpacking
// =============================================================================

/// Unpacks `data` into `dest` and returns the number of files written.
pub fn unpack(data: &[u8], dest: &Path, mode: UnpackMode) -> AgentResult<usize> {
    match mode {
        UnpackMode::Merge => {
            std::fs::create_dir_all(dest)?;
            unpack_into(data, dest)
        }
        UnpackMode::Replace => {
            let parent = dest
                .parent()
                .ok_or_else(|| AgentError::Archive(format!("{} has no parent", dest.display())))?;
            std::fs::create_dir_all(parent)?;

            let staging = tempfile::Builder::new()
                .prefix(".incoming-")
                .tempdir_in(parent)?;
            let files = unpack_into(data, staging.path())?;

            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            std::fs::rename(staging.path(), dest)?;
            Ok(files)
        }
    }
}

fn unpack_into(data: &[u8], dest: &Path) -> AgentResult<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut files = 0;

    let entries = archive
        .entries()
        .map_err(|e| AgentError::Archive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| AgentError::Archive(e.to_string()))?;
        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let is_file = entry.header().entry_type().is_file();

        let inside = entry
            .unpack_in(dest)
            .map_err(|e| AgentError::Archive(format!("unpacking {}: {}", path, e)))?;
        if !inside {
            return Err(AgentError::Archive(format!(
                "entry '{}' escapes the destination",
                path
            )));
        }
        if is_file {
            files += 1;
        }
    }

    Ok(files)
}

// =============================================================================
// Async Wrappers
// =============================================================================

pub async fn pack_dir_blocking(dir: PathBuf) -> AgentResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || pack_dir(&dir)).await?
}

pub async fn pack_files_blocking(root: PathBuf, paths: Vec<String>) -> AgentResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || pack_files(&root, &paths)).await?
}

pub async fn unpack_blocking(data: Vec<u8>, dest: PathBuf, mode: UnpackMode) -> AgentResult<usize> {
    tokio::task::spawn_blocking(move || unpack(&data, &dest, mode)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_pack_and_replace() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("seo.php"), "<?php // seo");
        write(&src.path().join("assets/app.js"), "console.log(1)");

        let data = pack_dir(src.path()).unwrap();

        let site = tempfile::tempdir().unwrap();
        let dest = site.path().join("extensions/seo");
        write(&dest.join("stale.txt"), "old");

        let files = unpack(&data, &dest, UnpackMode::Replace).unwrap();
        assert_eq!(files, 2);
        assert!(dest.join("assets/app.js").is_file());
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn test_merge_keeps_other_files() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("2024/a.png"), "png");

        let data = pack_files(root.path(), &["2024/a.png".into(), "missing.png".into()]).unwrap();

        let uploads = tempfile::tempdir().unwrap();
        write(&uploads.path().join("keep.png"), "keep");
        let files = unpack(&data, uploads.path(), UnpackMode::Merge).unwrap();

        assert_eq!(files, 1);
        assert!(uploads.path().join("keep.png").is_file());
        assert_eq!(
            std::fs::read_to_string(uploads.path().join("2024/a.png")).unwrap(),
            "png"
        );
    }

    #[test]
    fn test_escaping_entry_rejected() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let body = b"owned";
        let mut header = tar::Header::new_gnu();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &body[..]).unwrap();
        let data = builder.into_inner().unwrap().finish().unwrap();

        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("inner");
        let err = unpack(&data, &dest, UnpackMode::Merge).unwrap_err();

        assert!(matches!(err, AgentError::Archive(_)));
        assert!(!outer.path().join("evil.txt").exists());
    }

    #[test]
    fn test_pack_missing_dir() {
        let err = pack_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("style.css"), "body{}");
        let data = pack_dir_blocking(src.path().to_path_buf()).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("themes/dark");
        let files = unpack_blocking(data, target.clone(), UnpackMode::Replace)
            .await
            .unwrap();
        assert_eq!(files, 1);
        assert!(target.join("style.css").is_file());
    }
}

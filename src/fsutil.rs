// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Path and filesystem primitives: `cp`-style copies, relative symlinks, and directory listings.

use log::debug;
use path_clean::PathClean;
use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

type Result<T> = std::result::Result<T, FsError>;

/// Errors from filesystem mutations performed while assembling a bundle.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Failed to create directory: {path:?}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to copy file {from:?} to {to:?}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create symlink {link:?} pointing to {target:?}")]
    SymlinkFailed {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to remove existing file: {path:?}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set permissions on {path:?}")]
    PermissionsFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Symlinks with absolute targets are not supported: {target:?}")]
    AbsoluteLinksUnsupported { target: PathBuf },
}

/// Apply `cp`'s destination handling: a destination that ends with `/` or
/// names an existing directory receives the source's filename.
pub(crate) fn resolve_cp_destination(from: &Path, to: &Path) -> PathBuf {
    if to.to_string_lossy().ends_with('/') || to.is_dir() {
        to.join(from.file_name().unwrap_or_default())
    } else {
        to.to_path_buf()
    }
}

/// Copy a file, mimicking the `cp` command.
///
/// Missing parent directories are created. With `overwrite` unset, an
/// existing target makes the call a successful no-op.
///
/// # Errors
/// Returns an error if a parent directory cannot be created or the copy
/// itself fails.
pub fn copy_file(from: &Path, to: &Path, overwrite: bool) -> Result<()> {
    debug!("Copying file {} to {}", from.display(), to.display());

    let to = resolve_cp_destination(from, to);
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir_all(parent).map_err(|e| FsError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    if !overwrite && to.exists() {
        debug!("File exists, skipping: {}", to.display());
        return Ok(());
    }

    fs::copy(from, &to).map_err(|e| FsError::CopyFailed {
        from: from.to_path_buf(),
        to: to.clone(),
        source: e,
    })?;
    Ok(())
}

/// Create a symlink whose stored target is relative to the link's directory.
///
/// A `link` that names a directory receives `target`'s filename. A file or
/// symlink already present at the link location is removed first.
///
/// # Errors
/// Returns an error when `relative` is unset (absolute link targets are not
/// supported) or when removing/creating the link fails.
pub fn symlink_file(target: &Path, link: &Path, relative: bool) -> Result<()> {
    debug!(
        "Creating symlink for file {} in/as {}",
        target.display(),
        link.display()
    );

    if !relative {
        return Err(FsError::AbsoluteLinksUnsupported {
            target: target.to_path_buf(),
        });
    }

    let link = resolve_cp_destination(target, link);
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link).map_err(|e| FsError::RemoveFailed {
            path: link.clone(),
            source: e,
        })?;
    }

    let base = link.parent().unwrap_or_else(|| Path::new("."));
    let stored_target = relative_path(target, base);
    std::os::unix::fs::symlink(&stored_target, &link).map_err(|e| FsError::SymlinkFailed {
        link: link.clone(),
        target: target.to_path_buf(),
        source: e,
    })
}

/// List regular files in a directory. An absent directory yields an empty
/// list rather than an error.
#[must_use]
pub fn list_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    if !dir.is_dir() {
        debug!("No such directory: {}", dir.display());
        return Vec::new();
    }

    let mut walker = WalkDir::new(dir).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Set the executable bits on a file, keeping its other permissions.
///
/// # Errors
/// Returns an error if the file's permissions cannot be read or written.
pub fn make_executable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| FsError::PermissionsFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions).map_err(|e| FsError::PermissionsFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Turn a path into an absolute, normalized form.
///
/// Canonicalization is preferred so that symlink aliasing cannot skew
/// relative-path computations; paths that do not exist yet are cleaned
/// lexically instead.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute.clean()
}

/// Compute `target` relative to the directory `base`.
///
/// Both paths are absolutized first; the result walks up from `base` with
/// `..` components until the common prefix, then down to `target`.
#[must_use]
pub fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target = absolutize(target);
    let base = absolutize(base);

    let target_parts: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Locates distribution copyright files for deployed host files.
//!
//! Uses the host package manager's query tool (currently `dpkg-query`) to
//! map a file back to its owning package. Absence of copyright data is never
//! an error; deployment proceeds without it.

use log::{debug, warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::runner::CommandRunner;

/// Find copyright files covering `src`.
///
/// Files inside the bundle root were deployed by us and carry no package
/// metadata, so they resolve to nothing. Returns an empty list when no
/// package query tool is available or the lookup misses.
pub(crate) fn find_copyright_files(
    runner: &dyn CommandRunner,
    src: &Path,
    bundle_root: &Path,
) -> Vec<PathBuf> {
    if fsutil::absolutize(src).starts_with(fsutil::absolutize(bundle_root)) {
        debug!(
            "Cannot deploy copyright files for files in the bundle: {}",
            src.display()
        );
        return Vec::new();
    }

    if which::which("dpkg-query").is_err() {
        debug!(
            "No supported package query tool found, skipping copyright lookup for {}",
            src.display()
        );
        return Vec::new();
    }
    debug!("Using dpkg-query to search for copyright files");

    let output = match runner.run(
        &[OsStr::new("dpkg-query"), OsStr::new("-S"), src.as_os_str()],
        &[],
    ) {
        Ok(output) => output,
        Err(e) => {
            warn!("dpkg-query failed for {}: {}", src.display(), e);
            return Vec::new();
        }
    };

    if !output.success() {
        warn!(
            "Could not find copyright files for file {} using dpkg-query",
            src.display()
        );
        return Vec::new();
    }

    let Some(package) = package_name_from_query_output(&output.stdout_text()) else {
        warn!(
            "Could not find copyright files for file {} using dpkg-query",
            src.display()
        );
        return Vec::new();
    };

    let copyright_file = Path::new("/usr/share/doc").join(package).join("copyright");
    if copyright_file.is_file() {
        vec![copyright_file]
    } else {
        Vec::new()
    }
}

/// Extract the package name from `dpkg-query -S` output.
///
/// The first line looks like `libssl3:amd64: /usr/lib/...`; everything
/// before the first `:` names the package.
fn package_name_from_query_output(stdout: &str) -> Option<String> {
    let package = stdout.lines().next()?.split(':').next()?.trim();
    if package.is_empty() {
        None
    } else {
        Some(package.to_string())
    }
}

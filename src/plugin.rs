// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Discovers deployment plugins on the search path.
//!
//! Plugins are standalone executables named `appdir-plugin-<name>`, found
//! next to an AppImage we are shipped in, next to our own binary, or on
//! `$PATH` — in that order, first registration wins. This module only
//! discovers them; launching is left to the caller.

use log::debug;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const PLUGIN_PREFIX: &str = "appdir-plugin-";

/// Find plugin executables, keyed by plugin name.
#[must_use]
pub fn find_plugins() -> BTreeMap<String, PathBuf> {
    let mut search_dirs: Vec<PathBuf> = Vec::new();

    // Plugins placed next to an AppImage take precedence over bundled ones.
    if let Some(appimage) = env::var_os("APPIMAGE") {
        if let Some(directory) = Path::new(&appimage).parent() {
            search_dirs.push(directory.to_path_buf());
        }
    }
    if let Ok(own_exe) = env::current_exe() {
        if let Some(directory) = own_exe.parent() {
            search_dirs.push(directory.to_path_buf());
        }
    }
    if let Some(path) = env::var_os("PATH") {
        search_dirs.extend(env::split_paths(&path));
    }

    let mut found = BTreeMap::new();
    for directory in search_dirs {
        scan_directory(&directory, &mut found);
    }
    found
}

fn scan_directory(directory: &Path, found: &mut BTreeMap<String, PathBuf>) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    debug!("Searching for plugins in directory {}", directory.display());

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = plugin_name(&path) else {
            continue;
        };
        if !is_executable(&path) {
            continue;
        }
        if let Some(existing) = found.get(&name) {
            debug!(
                "Already found {} plugin in {}",
                name,
                existing.display()
            );
            continue;
        }
        debug!("Found plugin '{}': {}", name, path.display());
        found.insert(name, path);
    }
}

/// Extract the plugin name from a file named `appdir-plugin-<name>[.<ext>]`.
fn plugin_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let rest = file_name.strip_prefix(PLUGIN_PREFIX)?;
    let name = rest.split('.').next().unwrap_or(rest);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| {
        metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
    })
}

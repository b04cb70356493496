// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! A tool for assembling self-contained AppDir bundles on Linux.
//!
//! This crate provides functionality to:
//! - Deploy executables and shared libraries into an AppDir tree
//! - Trace transitive ELF dependencies and rewrite rpaths to `$ORIGIN` form
//! - Filter host-provided libraries via an embedded exclude list
//! - Deploy icons and desktop files into their conventional locations
//! - Link the desktop file, icon, and `AppRun` entry point in the bundle root

pub mod bundle;
pub mod copyright;
pub mod desktop;
pub mod elf;
pub mod excludelist;
pub mod fsutil;
pub mod plugin;
pub mod runner;

// Re-export key types for convenience
pub use bundle::{select_desktop_file, Bundle, DeployError};
pub use desktop::DesktopFile;
pub use elf::{ElfOracle, HostElfOracle};
pub use excludelist::ExcludeList;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

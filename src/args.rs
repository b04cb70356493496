// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "appdir_builder")]
#[command(version)]
#[command(about = "Assembles self-contained AppDir bundles from executables, libraries, icons, and desktop files")]
pub(crate) struct Args {
    /// Path to the target AppDir.
    #[arg(long, required_unless_present = "list_plugins")]
    pub appdir: Option<PathBuf>,

    /// Create the basic AppDir directory structure.
    #[arg(long)]
    pub init_appdir: bool,

    /// Application name (used to rename icons and pick the desktop file).
    #[arg(short = 'n', long)]
    pub app_name: Option<String>,

    /// Shared library to deploy. Repeatable.
    #[arg(short = 'l', long = "library", alias = "lib")]
    pub libraries: Vec<PathBuf>,

    /// Executable to deploy. Repeatable.
    #[arg(short = 'e', long = "executable")]
    pub executables: Vec<PathBuf>,

    /// Desktop file to deploy. Repeatable.
    #[arg(short = 'd', long = "desktop-file")]
    pub desktop_files: Vec<PathBuf>,

    /// Create a basic desktop file that is good enough for some tests.
    #[arg(long)]
    pub create_desktop_file: bool,

    /// Icon to deploy. Repeatable.
    #[arg(short = 'i', long = "icon-file")]
    pub icon_files: Vec<PathBuf>,

    /// Path to a custom AppRun script (copied into the bundle root instead
    /// of symlinking the main executable).
    #[arg(long)]
    pub custom_apprun: Option<PathBuf>,

    /// Verbosity of log output (0 = debug, 1 = info, 2 = warning, 3 = error).
    #[arg(short = 'v', long, default_value_t = 1)]
    pub verbosity: u8,

    /// Search for plugins, print them to stdout and exit.
    #[arg(long)]
    pub list_plugins: bool,
}

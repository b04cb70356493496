// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Build script that embeds the library exclude list.
//!
//! `data/excludelist` holds the canonical set of library-basename patterns
//! that must never be bundled because the matching libraries have to come
//! from the host system. This script renders the list into a static table
//! that is compiled into the exclude matcher.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=data/excludelist");

    let list = fs::read_to_string("data/excludelist").expect("data/excludelist must be readable");
    let patterns: Vec<&str> = list
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .collect();

    let mut generated = String::new();
    writeln!(
        generated,
        "/// Library-basename patterns that must never be bundled."
    )
    .unwrap();
    writeln!(
        generated,
        "pub(crate) const EXCLUDED_LIBRARY_PATTERNS: &[&str] = &["
    )
    .unwrap();
    for pattern in &patterns {
        writeln!(generated, "    {pattern:?},").unwrap();
    }
    writeln!(generated, "];").unwrap();

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::write(out_dir.join("excludelist.rs"), generated)
        .expect("failed to write generated exclude list");
}

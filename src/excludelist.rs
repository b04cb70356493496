// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Matches library basenames against the embedded exclude-pattern table.

use glob::{MatchOptions, Pattern, PatternError};
use thiserror::Error;

include!(concat!(env!("OUT_DIR"), "/excludelist.rs"));

type Result<T> = std::result::Result<T, ExcludeError>;

/// Errors from the exclude matcher itself; a non-match is not an error.
#[derive(Debug, Error)]
pub enum ExcludeError {
    #[error("Invalid exclude pattern {pattern:?}")]
    BadPattern {
        pattern: String,
        #[source]
        source: PatternError,
    },
}

/// Glob matcher over the library basenames that must never be bundled.
pub struct ExcludeList {
    patterns: Vec<(&'static str, Pattern)>,
}

impl ExcludeList {
    /// Compile the embedded pattern table.
    ///
    /// # Errors
    /// Returns an error if a pattern does not compile; the table is
    /// validated here once so matching itself cannot fail.
    pub fn new() -> Result<Self> {
        Self::from_patterns(EXCLUDED_LIBRARY_PATTERNS)
    }

    fn from_patterns(raw_patterns: &[&'static str]) -> Result<Self> {
        let patterns = raw_patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw)
                    .map(|compiled| (*raw, compiled))
                    .map_err(|e| ExcludeError::BadPattern {
                        pattern: (*raw).to_string(),
                        source: e,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether a library basename matches the exclude list. Returns true on
    /// the first match.
    #[must_use]
    pub fn is_excluded(&self, basename: &str) -> bool {
        // Patterns are basenames, so a path separator must never match a
        // wildcard (fnmatch's FNM_PATHNAME behavior).
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };
        self.patterns.iter().any(|(raw, pattern)| {
            // Plain string comparison is cheaper than glob matching.
            *raw == basename || pattern.matches_with(basename, options)
        })
    }
}

// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed error leaves raised by the configuration engine.
//!
//! Everything else in the crate returns `anyhow::Result` and annotates
//! failures with `.context(..)`; these are the handful of conditions a
//! caller needs to match on rather than just report.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// A single setting that failed `update`/`validate`, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Raised when a requested batch of setting updates fails validation.
/// Carries every failure, not just the first, so a caller can report all
/// of them at once (spec.md §7: "surface all setting-level errors
/// together").
#[derive(Debug, Error)]
#[error("invalid configuration: {}", format_errors(.errors))]
pub struct InvalidConfiguration {
    pub errors: BTreeMap<String, String>,
}

fn format_errors(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(name, reason)| format!("{}: {}", name, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One setting whose desired value did not survive the rewrite: expected
/// vs. actual, plus the file/line of whatever overrode it when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub name: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub overridden_at: Option<(String, usize)>,
}

/// Raised by `MutableConfiguration::update` phase 9 (verification
/// re-parse) when a requested value did not stick. The live files have
/// already been rewritten by this point; the caller may retry with a
/// narrower mutable-file set or a different context.
#[derive(Debug, Error)]
#[error("ineffective configuration: {} setting(s) did not take effect", .diff.len())]
pub struct IneffectiveConfiguration {
    pub diff: Vec<Override>,
}

/// A snapshot name that does not exist in the store.
#[derive(Debug, Error)]
#[error("snapshot {0:?} not found")]
pub struct NotFound(pub String);

/// A snapshot name that already exists and was not written with `force`.
#[derive(Debug, Error)]
#[error("snapshot {0:?} already exists")]
pub struct AlreadyExists(pub String);

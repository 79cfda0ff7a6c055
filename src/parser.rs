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

//! Lexer and parser for the boot-file dialect: a flat ordered sequence
//! of typed line records, a content hash, a latest mtime, and a
//! filename-to-bytes map, rooted at a nominated file and transparently
//! following `include` directives.
//!
//! Grounded on the teacher's `src/io/bls.rs` (line-oriented directive
//! parsing of a similarly irregular dialect) for overall shape; the
//! lexing rules themselves are specific to this format (spec.md §4.2).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use openssl::sha::Sha1;

use crate::conditions::BootConditions;
use crate::timestamp;

/// Where the parser reads raw file bytes from: a directory on disk, an
/// in-memory map (used by `MutableConfiguration`'s working copy and by
/// tests), or (see `store.rs`) a snapshot archive.
pub trait FileSource {
    /// Returns the file's bytes and mtime (unix seconds), or `None` if
    /// the file does not exist.
    fn read(&self, filename: &str) -> Option<(Vec<u8>, i64)>;
}

pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for DirSource {
    fn read(&self, filename: &str) -> Option<(Vec<u8>, i64)> {
        let path = self.root.join(filename);
        let content = fs::read(&path).ok()?;
        let mtime = fs::metadata(&path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Some((content, mtime))
    }
}

/// An in-memory file map, the form `MutableConfiguration` edits in place
/// and the form tests construct fixtures with.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    pub files: HashMap<String, (Vec<u8>, i64)>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, content: impl Into<Vec<u8>>, mtime: i64) {
        self.files.insert(filename.into(), (content.into(), mtime));
    }
}

impl FileSource for MapSource {
    fn read(&self, filename: &str) -> Option<(Vec<u8>, i64)> {
        self.files.get(filename).cloned()
    }
}

/// A file that contributed (or would have contributed, had it existed)
/// bytes to a parsed configuration.
#[derive(Debug, Clone)]
pub struct BootFile {
    pub filename: String,
    pub timestamp: i64,
    pub content: Vec<u8>,
}

impl BootFile {
    pub fn empty(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            timestamp: timestamp::truncate(315_532_800),
            content: Vec::new(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// One positional parameter of an `initramfs` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAddr {
    pub filename: String,
    pub address: String,
}

/// The value carried by a `Command` record: either a plain string, or
/// (for `initramfs`) a (filename, address) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParam {
    Str(String),
    FileAddr(FileAddr),
}

impl fmt::Display for CommandParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParam::Str(s) => write!(f, "{}", s),
            CommandParam::FileAddr(fa) => write!(f, "{} {}", fa.filename, fa.address),
        }
    }
}

/// The variant-specific payload of a line record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootLineKind {
    Comment,
    Section { section: String },
    Command { command: String, hdmi: Option<u8>, param: CommandParam },
    Include { filename: String },
    Overlay { overlay: String },
    Param { overlay: String, param: String, value: String },
}

/// One line of the parsed configuration: origin, conditions in effect,
/// an optional trailing comment, and the variant-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLine {
    pub filename: String,
    pub linenum: usize,
    pub conditions: BootConditions,
    pub comment: Option<String>,
    pub kind: BootLineKind,
}

/// Which aspects of two line records agree; powers uncomment-search and
/// diff reporting (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareField {
    Location,
    Conditions,
    Comment,
    Key,
    Value,
}

impl BootLine {
    /// The directive-identity key this line would contribute under
    /// (`None` for lines with no such identity: Comment, Section,
    /// Include).
    pub fn key(&self) -> Option<String> {
        match &self.kind {
            BootLineKind::Command { command, hdmi, .. } => {
                Some(format!("{}:{}", command, hdmi.unwrap_or(0)))
            }
            BootLineKind::Overlay { overlay } => Some(format!("overlay:{}", overlay)),
            BootLineKind::Param { overlay, param, .. } => Some(format!("{}:{}", overlay, param)),
            _ => None,
        }
    }

    /// The value text this line would contribute, if any.
    pub fn value(&self) -> Option<String> {
        match &self.kind {
            BootLineKind::Command { param, .. } => Some(param.to_string()),
            BootLineKind::Param { value, .. } => Some(value.clone()),
            _ => None,
        }
    }

    /// The literal text this line renders as (used by the rewrite
    /// engine's uncomment search, which matches a `Comment`'s text
    /// against a candidate new line verbatim).
    pub fn text(&self) -> String {
        match &self.kind {
            BootLineKind::Comment => String::new(),
            BootLineKind::Section { section } => format!("[{}]", section),
            BootLineKind::Command { command, hdmi, param } => match hdmi {
                Some(n) => format!("{}:{}={}", command, n, param),
                None => format!("{}={}", command, param),
            },
            BootLineKind::Include { filename } => format!("include {}", filename),
            BootLineKind::Overlay { overlay } => format!("dtoverlay={}", overlay),
            BootLineKind::Param { overlay, param, value } => {
                if overlay == "base" {
                    format!("dtparam={}={}", param, value)
                } else {
                    format!("dtoverlay={}:{}={}", overlay, param, value)
                }
            }
        }
    }

    pub fn compare(&self, other: &BootLine) -> HashSet<CompareField> {
        let mut out = HashSet::new();
        if self.filename == other.filename && self.linenum == other.linenum {
            out.insert(CompareField::Location);
        }
        if self.conditions == other.conditions {
            out.insert(CompareField::Conditions);
        }
        if self.comment == other.comment {
            out.insert(CompareField::Comment);
        }
        if self.key() == other.key() {
            out.insert(CompareField::Key);
        }
        if self.value() == other.value() {
            out.insert(CompareField::Value);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub filename: String,
    pub linenum: usize,
    pub message: String,
}

/// Base-overlay parameter canonicalization (spec.md §4.2): a handful of
/// aliases the firmware treats as the same `dtparam`.
fn canonical_base_param(name: &str) -> &str {
    match name {
        "i2c" | "i2c_arm" | "i2c1" => "i2c_arm",
        "i2c_vc" | "i2c0" => "i2c_vc",
        "spi" | "spi0" => "spi",
        other => other,
    }
}

/// Lexes one raw line per spec.md §4.2 steps 1-4. Returns `None` if the
/// line should be skipped entirely.
fn lex_line(raw: &str) -> Option<(String, Option<String>)> {
    let (content, comment) = match raw.find('#') {
        Some(idx) => (&raw[..idx], Some(raw[idx + 1..].trim_end().to_string())),
        None => (raw, None),
    };
    let content: String = content.chars().take(80).collect();
    let content = content.trim_end().trim_start().to_string();
    let comment = comment.filter(|c| !c.is_empty());
    if content.is_empty() && comment.is_none() {
        return None;
    }
    Some((content, comment))
}

pub struct BootParser<'a> {
    source: &'a dyn FileSource,
    overlay: String,
    pub lines: Vec<BootLine>,
    pub files: IndexMap<String, BootFile>,
    pub warnings: Vec<Warning>,
    hasher: Option<Sha1>,
    timestamp: i64,
    visited: HashSet<(String, u32)>,
}

impl<'a> BootParser<'a> {
    pub fn new(source: &'a dyn FileSource) -> Self {
        Self {
            source,
            overlay: "base".to_string(),
            lines: Vec::new(),
            files: IndexMap::new(),
            warnings: Vec::new(),
            hasher: Some(Sha1::new()),
            timestamp: 0,
            visited: HashSet::new(),
        }
    }

    /// Parses starting at `filename` (typically the root configuration
    /// file), following `include`s transitively.
    pub fn parse(&mut self, filename: &str) {
        self.parse_file(filename, BootConditions::new());
    }

    /// Registers an auxiliary (non-directive) file as part of the
    /// configuration's hash and file map, without parsing it for
    /// directives — used for files a `CommandIncludedFile` setting
    /// references (e.g. `cmdline.txt`, `edid.dat`).
    pub fn add(&mut self, filename: &str) {
        self.open(filename);
    }

    /// Finalizes the running hash; call once after all `parse`/`add`
    /// calls have completed.
    pub fn finish_hash(&mut self) -> String {
        let digest = self.hasher.take().unwrap_or_else(Sha1::new).finish();
        hex::encode(digest)
    }

    pub fn latest_timestamp(&self) -> i64 {
        self.timestamp
    }

    fn open(&mut self, filename: &str) -> Option<BootFile> {
        if let Some(existing) = self.files.get(filename) {
            return Some(existing.clone());
        }
        match self.source.read(filename) {
            Some((content, mtime)) => {
                let ts = timestamp::truncate(mtime);
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(&content);
                }
                self.timestamp = self.timestamp.max(ts);
                let file = BootFile {
                    filename: filename.to_string(),
                    timestamp: ts,
                    content,
                };
                self.files.insert(filename.to_string(), file.clone());
                Some(file)
            }
            None => None,
        }
    }

    fn warn(&mut self, filename: &str, linenum: usize, message: impl Into<String>) {
        self.warnings.push(Warning {
            filename: filename.to_string(),
            linenum,
            message: message.into(),
        });
    }

    fn parse_file(&mut self, filename: &str, mut conditions: BootConditions) {
        // Recursion guard: a cycle of includes must not loop forever.
        let key = (filename.to_string(), conditions.suppress_count);
        if self.visited.contains(&key) {
            return;
        }
        self.visited.insert(key);

        let file = match self.open(filename) {
            Some(f) => f,
            None => {
                return;
            }
        };
        let text = file.text();
        for (idx, raw) in text.split('\n').enumerate() {
            let linenum = idx + 1;
            let (content, comment) = match lex_line(raw) {
                Some(v) => v,
                None => continue,
            };
            if content.is_empty() {
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment,
                    kind: BootLineKind::Comment,
                });
                continue;
            }
            if content.starts_with('[') && content.ends_with(']') {
                let section = content[1..content.len() - 1].to_string();
                let new_conditions = conditions.evaluate(&section);
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment,
                    kind: BootLineKind::Section { section },
                });
                conditions = new_conditions;
                continue;
            }
            if let Some(rest) = strip_keyword(&content, "include") {
                let included = rest.trim().to_string();
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment,
                    kind: BootLineKind::Include { filename: included.clone() },
                });
                let child_conditions = if conditions.none {
                    conditions.suppress()
                } else {
                    conditions.clone()
                };
                self.parse_file(&included, child_conditions);
                continue;
            }
            if let Some(rest) = strip_keyword(&content, "initramfs") {
                let mut parts = rest.split_whitespace();
                let fname = parts.next().unwrap_or("").to_string();
                let addr = parts.next().unwrap_or("").to_string();
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment,
                    kind: BootLineKind::Command {
                        command: "initramfs".to_string(),
                        hdmi: None,
                        param: CommandParam::FileAddr(FileAddr {
                            filename: fname,
                            address: addr,
                        }),
                    },
                });
                continue;
            }
            if let Some(eq) = content.find('=') {
                let key = &content[..eq];
                let value = &content[eq + 1..];
                self.parse_assignment(filename, linenum, &conditions, comment, key, value);
                continue;
            }
            self.warn(filename, linenum, format!("unrecognized directive: {}", content));
        }
    }

    fn parse_assignment(
        &mut self,
        filename: &str,
        linenum: usize,
        conditions: &BootConditions,
        comment: Option<String>,
        key: &str,
        value: &str,
    ) {
        match key {
            "dtoverlay" | "device_tree_overlay" => {
                let (overlay_name, params) = match value.split_once(':') {
                    Some((name, rest)) => (name, rest),
                    None => (value, ""),
                };
                let overlay_name = if overlay_name.is_empty() { "base" } else { overlay_name };
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment: comment.clone(),
                    kind: BootLineKind::Overlay { overlay: overlay_name.to_string() },
                });
                self.overlay = overlay_name.to_string();
                for param in params.split(',').filter(|p| !p.is_empty()) {
                    let (pname, pvalue) = match param.split_once('=') {
                        Some((n, v)) => (n, v.to_string()),
                        None => (param, "on".to_string()),
                    };
                    let pname = if overlay_name == "base" {
                        canonical_base_param(pname)
                    } else {
                        pname
                    };
                    self.lines.push(BootLine {
                        filename: filename.to_string(),
                        linenum,
                        conditions: conditions.clone(),
                        comment: None,
                        kind: BootLineKind::Param {
                            overlay: overlay_name.to_string(),
                            param: pname.to_string(),
                            value: pvalue,
                        },
                    });
                }
            }
            "dtparam" | "device_tree_param" => {
                for param in value.split(',').filter(|p| !p.is_empty()) {
                    let (pname, pvalue) = match param.split_once('=') {
                        Some((n, v)) => (n, v.to_string()),
                        None => (param, "on".to_string()),
                    };
                    let pname = if self.overlay == "base" {
                        canonical_base_param(pname)
                    } else {
                        pname
                    };
                    self.lines.push(BootLine {
                        filename: filename.to_string(),
                        linenum,
                        conditions: conditions.clone(),
                        comment: comment.clone(),
                        kind: BootLineKind::Param {
                            overlay: self.overlay.clone(),
                            param: pname.to_string(),
                            value: pvalue,
                        },
                    });
                }
            }
            _ => {
                let (command, hdmi) = match key.split_once(':') {
                    Some((base, suffix)) => (base, suffix.parse::<u8>().ok()),
                    None => (key, conditions.hdmi),
                };
                self.lines.push(BootLine {
                    filename: filename.to_string(),
                    linenum,
                    conditions: conditions.clone(),
                    comment,
                    kind: BootLineKind::Command {
                        command: command.to_string(),
                        hdmi,
                        param: CommandParam::Str(value.to_string()),
                    },
                });
            }
        }
    }
}

/// Strips `keyword` followed by required whitespace, returning the
/// remainder. `None` if `content` doesn't start with `keyword` as a
/// whitespace-separated token.
fn strip_keyword<'a>(content: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = content.strip_prefix(keyword)?;
    if rest.is_empty() {
        return None;
    }
    let first = rest.chars().next()?;
    if !first.is_whitespace() {
        return None;
    }
    Some(rest.trim_start())
}

pub fn sha1_empty() -> String {
    hex::encode(Sha1::new().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(files: &[(&str, &str)]) -> MapSource {
        let mut src = MapSource::new();
        for (name, content) in files {
            src.insert(*name, content.as_bytes(), 1_700_000_000);
        }
        src
    }

    #[test]
    fn parses_simple_command() {
        let src = source(&[("config.txt", "gpu_mem=128\n")]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        assert_eq!(parser.lines.len(), 1);
        match &parser.lines[0].kind {
            BootLineKind::Command { command, param, .. } => {
                assert_eq!(command, "gpu_mem");
                assert_eq!(param.to_string(), "128");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn missing_file_parses_as_empty_and_is_not_in_file_map() {
        let src = source(&[]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        assert!(parser.lines.is_empty());
        assert!(parser.files.is_empty());
    }

    #[test]
    fn dtoverlay_with_params_canonicalizes_base_name() {
        let src = source(&[("config.txt", "dtparam=i2c=on\n")]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        match &parser.lines[0].kind {
            BootLineKind::Param { overlay, param, value } => {
                assert_eq!(overlay, "base");
                assert_eq!(param, "i2c_arm");
                assert_eq!(value, "on");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn include_is_followed() {
        let src = source(&[
            ("config.txt", "include extra.txt\n"),
            ("extra.txt", "gpu_mem=64\n"),
        ]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        let commands: Vec<_> = parser
            .lines
            .iter()
            .filter(|l| matches!(l.kind, BootLineKind::Command { .. }))
            .collect();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].filename, "extra.txt");
    }

    #[test]
    fn hash_depends_only_on_concatenated_bytes() {
        let src = source(&[("config.txt", "gpu_mem=128\n")]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        let hash = parser.finish_hash();
        assert_eq!(hash.len(), 40);
        assert_ne!(hash, sha1_empty());
    }

    #[test]
    fn column_80_and_whitespace_rules() {
        let long_value = "a".repeat(100);
        let line = format!("gpu_mem={}   # trailing\n", long_value);
        let src = source(&[("config.txt", &line)]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        match &parser.lines[0].kind {
            BootLineKind::Command { param, .. } => {
                // content truncated to 80 chars total ("gpu_mem=" + 72 a's)
                assert_eq!(param.to_string().len(), 72);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn hdmi_index_suffix_parses_numeric_only() {
        let src = source(&[("config.txt", "hdmi_group:1=2\nhdmi_group:x=3\n")]);
        let mut parser = BootParser::new(&src);
        parser.parse("config.txt");
        match &parser.lines[0].kind {
            BootLineKind::Command { command, hdmi, .. } => {
                assert_eq!(command, "hdmi_group");
                assert_eq!(*hdmi, Some(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
        match &parser.lines[1].kind {
            BootLineKind::Command { command, hdmi, .. } => {
                assert_eq!(command, "hdmi_group");
                assert_eq!(*hdmi, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

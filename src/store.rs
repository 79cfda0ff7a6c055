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

//! `Store`: named, hash-tagged snapshots of a `BootConfiguration`,
//! persisted as PKZIP-compatible archives, plus the two sentinel keys
//! `Current` (the live boot partition) and `Default` (a synthetic empty
//! configuration). Grounded on the teacher's `src/live/util.rs` (staging
//! writes through `atomic::replace`) for `Current` and on `zip` usage
//! patterns from the other example repos for the archive format.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::atomic;
use crate::config::BootConfiguration;
use crate::error::{AlreadyExists, NotFound};
use crate::parser::{BootFile, DirSource, MapSource};
use crate::platform::Platform;
use crate::timestamp;

const HEADER_PREFIX: &str = "pibootctl:0:";

/// A key into the store: one of the two sentinels, or a named snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Current,
    Default,
    Snapshot(String),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Current => write!(f, "Current"),
            Key::Default => write!(f, "Default"),
            Key::Snapshot(name) => write!(f, "{}", name),
        }
    }
}

pub struct Store<'p> {
    boot_dir: PathBuf,
    snapshot_dir: PathBuf,
    root: String,
    platform: &'p dyn Platform,
}

impl<'p> Store<'p> {
    pub fn new(
        boot_dir: impl Into<PathBuf>,
        snapshot_dir: impl Into<PathBuf>,
        root: impl Into<String>,
        platform: &'p dyn Platform,
    ) -> Self {
        Self {
            boot_dir: boot_dir.into(),
            snapshot_dir: snapshot_dir.into(),
            root: root.into(),
            platform,
        }
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{}.zip", name))
    }

    /// Every snapshot name whose archive begins with the required
    /// header, sorted for stable iteration. Archives that exist on disk
    /// but fail the header check are silently excluded, per the "treated
    /// as not present" failure mode.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries,
            Err(_) => return names,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("zip") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if open_archive(&path).is_ok() {
                names.push(stem);
            }
        }
        names.sort();
        names
    }

    /// Every key the store iterates over: `Default`, then `Current`,
    /// then every valid snapshot name.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = vec![Key::Default, Key::Current];
        keys.extend(self.names().into_iter().map(Key::Snapshot));
        keys
    }

    pub fn get(&self, key: &Key) -> Result<BootConfiguration> {
        match key {
            Key::Default => Ok(BootConfiguration::load(&MapSource::new(), &self.root, self.platform)),
            Key::Current => {
                let source = DirSource::new(self.boot_dir.clone());
                Ok(BootConfiguration::load(&source, &self.root, self.platform))
            }
            Key::Snapshot(name) => {
                let path = self.archive_path(name);
                if !path.exists() {
                    return Err(NotFound(name.clone()).into());
                }
                let (header_hash, archive_mtime, source) =
                    open_archive(&path).map_err(|_| NotFound(name.clone()))?;
                let mut cfg = BootConfiguration::load(&source, &self.root, self.platform);
                cfg.hash = header_hash;
                cfg.timestamp = archive_mtime;
                Ok(cfg)
            }
        }
    }

    /// Writes `cfg` to `key`. `warning` becomes the free-form text
    /// trailing a snapshot archive's header comment; ignored for
    /// `Current`. Writing to `Default` always fails.
    pub fn set(&mut self, key: &Key, cfg: &BootConfiguration, warning: &str, force: bool) -> Result<()> {
        match key {
            Key::Default => Err(anyhow!("the Default snapshot cannot be written to")),
            Key::Current => self.write_current(cfg),
            Key::Snapshot(name) => {
                let path = self.archive_path(name);
                if path.exists() && !force {
                    return Err(AlreadyExists(name.clone()).into());
                }
                let bytes = build_archive(cfg, warning)?;
                atomic::replace(&path, |f| f.write_all(&bytes).map_err(Into::into))
            }
        }
    }

    fn write_current(&self, cfg: &BootConfiguration) -> Result<()> {
        let before = self.get(&Key::Current)?;
        let root = self.root.clone();
        let mut names: Vec<&String> = cfg.files.keys().collect();
        names.sort_by_key(|name| (**name == root) as u8);
        for name in names {
            let file = &cfg.files[name];
            let path = self.boot_dir.join(name);
            atomic::replace(&path, |f| f.write_all(&file.content).map_err(Into::into))?;
        }
        for stale in before.files.keys() {
            if !cfg.files.contains_key(stale) {
                let _ = fs::remove_file(self.boot_dir.join(stale));
            }
        }
        Ok(())
    }

    /// Attempting to delete `Current` or `Default` fails.
    pub fn delete(&mut self, key: &Key) -> Result<()> {
        match key {
            Key::Default | Key::Current => Err(anyhow!("{} cannot be deleted", key)),
            Key::Snapshot(name) => {
                let path = self.archive_path(name);
                fs::remove_file(&path).map_err(|_| NotFound(name.clone()).into())
            }
        }
    }

    /// The first snapshot (in `names()` order) whose hash equals the
    /// live configuration's hash, if any.
    pub fn active(&self) -> Option<Key> {
        let current_hash = self.get(&Key::Current).ok()?.hash;
        self.names().into_iter().find_map(|name| {
            let key = Key::Snapshot(name);
            match self.get(&key) {
                Ok(cfg) if cfg.hash == current_hash => Some(key),
                _ => None,
            }
        })
    }
}

/// Opens a pibootctl snapshot archive: validates the header comment and
/// eagerly decompresses every member into an in-memory `MapSource`.
/// Decompressing eagerly (rather than lazily, per-file, as the parser
/// asks for each one) trades the header/hash lookup's "no decompression
/// needed" property for a much simpler `FileSource` implementation; see
/// DESIGN.md.
fn open_archive(path: &Path) -> Result<(String, i64, MapSource)> {
    let file = fs::File::open(path)?;
    let archive_mtime = file
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mut archive = zip::ZipArchive::new(file)?;
    let comment = String::from_utf8_lossy(archive.comment()).into_owned();
    let hash = parse_header(&comment).ok_or_else(|| anyhow!("missing or malformed pibootctl header"))?;

    let mut map = MapSource::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        map.insert(name, buf, archive_mtime);
    }
    Ok((hash, archive_mtime, map))
}

fn parse_header(comment: &str) -> Option<String> {
    let rest = comment.strip_prefix(HEADER_PREFIX)?;
    let hash = rest.get(0..40)?;
    if !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    if !rest.get(40..)?.starts_with("\n\n") {
        return None;
    }
    Some(hash.to_string())
}

fn build_archive(cfg: &BootConfiguration, warning: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, file) in &cfg.files {
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .last_modified_time(zip_datetime(file)?);
            writer.start_file(name, options)?;
            writer.write_all(&file.content)?;
        }
        let comment = format!("{}{}\n\n{}", HEADER_PREFIX, cfg.hash, warning);
        writer.set_comment(comment);
        writer.finish()?;
    }
    Ok(buf)
}

fn zip_datetime(file: &BootFile) -> Result<zip::DateTime> {
    let (y, m, d, h, mi, s) = timestamp::to_ymdhms(file.timestamp);
    zip::DateTime::from_date_and_time(y as u16, m as u8, d as u8, h as u8, mi as u8, s as u8)
        .map_err(|_| anyhow!("timestamp {} is not representable in a PKZIP archive", file.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;

    fn platform() -> FixedPlatform {
        FixedPlatform::pi4(1024)
    }

    fn sample_config(root: &str) -> BootConfiguration {
        let mut source = MapSource::new();
        source.insert(root, b"gpu_mem=128\n".to_vec(), 1_700_000_000);
        let plat = platform();
        BootConfiguration::load(&source, root, &plat)
    }

    #[test]
    fn default_snapshot_hash_is_sha1_of_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let store = Store::new(dir.path(), dir.path(), "config.txt", &plat);
        let default = store.get(&Key::Default).unwrap();
        assert_eq!(default.hash, crate::parser::sha1_empty());
        assert!(default.files.is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_a_zip_archive() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let mut store = Store::new(dir.path(), dir.path(), "config.txt", &plat);
        let cfg = sample_config("config.txt");
        store.set(&Key::Snapshot("saved".to_string()), &cfg, "test snapshot", false).unwrap();
        let back = store.get(&Key::Snapshot("saved".to_string())).unwrap();
        assert_eq!(back.hash, cfg.hash);
        assert_eq!(back.files["config.txt"].text(), cfg.files["config.txt"].text());
    }

    #[test]
    fn writing_an_existing_snapshot_without_force_fails() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let mut store = Store::new(dir.path(), dir.path(), "config.txt", &plat);
        let cfg = sample_config("config.txt");
        store.set(&Key::Snapshot("saved".to_string()), &cfg, "", false).unwrap();
        let result = store.set(&Key::Snapshot("saved".to_string()), &cfg, "", false);
        assert!(result.is_err());
        store.set(&Key::Snapshot("saved".to_string()), &cfg, "", true).unwrap();
    }

    #[test]
    fn archive_without_header_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let store = Store::new(dir.path(), dir.path(), "config.txt", &plat);
        let path = dir.path().join("rogue.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        writer.start_file("config.txt", zip::write::FileOptions::default()).unwrap();
        writer.write_all(b"gpu_mem=1\n").unwrap();
        writer.finish().unwrap();
        assert!(store.names().is_empty());
        assert!(store.get(&Key::Snapshot("rogue".to_string())).is_err());
    }

    #[test]
    fn default_and_current_cannot_be_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let mut store = Store::new(dir.path(), dir.path(), "config.txt", &plat);
        assert!(store.delete(&Key::Default).is_err());
        assert!(store.delete(&Key::Current).is_err());
    }

    #[test]
    fn active_finds_the_matching_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let plat = platform();
        let boot_dir = dir.path().join("boot");
        fs::create_dir_all(&boot_dir).unwrap();
        fs::write(boot_dir.join("config.txt"), b"gpu_mem=128\n").unwrap();
        let mut store = Store::new(&boot_dir, dir.path(), "config.txt", &plat);
        let current = store.get(&Key::Current).unwrap();
        store.set(&Key::Snapshot("saved".to_string()), &current, "", false).unwrap();
        let snap = store.get(&Key::Snapshot("saved".to_string())).unwrap();
        assert_eq!(store.get(&Key::Current).unwrap().hash, snap.hash);
        assert_eq!(store.active(), Some(Key::Snapshot("saved".to_string())));
    }
}

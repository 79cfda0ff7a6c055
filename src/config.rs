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

//! `BootConfiguration`, the immutable result of parsing a file source
//! into resolved settings, and `MutableConfiguration`, the nine-phase
//! rewrite engine built on top of it (spec.md §4.4). Grounded on the
//! teacher's `src/live/util.rs` staging-then-commit pattern for the
//! overall shape of "compute a whole new file set, then verify it".

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, warn};

use crate::conditions::BootConditions;
use crate::error::{IneffectiveConfiguration, InvalidConfiguration, Override};
use crate::parser::{BootFile, BootLine, BootLineKind, BootParser, FileSource, MapSource};
use crate::platform::Platform;
use crate::registry::{RegistryContext, Settings};
use crate::setting::{catalog, DelegatedOutput};
use crate::value::{Input, Value};

/// A configuration as read from some file source, with every setting's
/// value resolved against it.
#[derive(Debug, Clone)]
pub struct BootConfiguration {
    pub files: IndexMap<String, BootFile>,
    pub hash: String,
    pub timestamp: i64,
    pub settings: Settings,
    root: String,
}

impl BootConfiguration {
    /// Parses `root` (and everything it transitively includes or
    /// references via an `IncludedFile`-kind setting) out of `source`,
    /// resolving every setting's value against the result.
    pub fn load(source: &dyn FileSource, root: &str, platform: &dyn Platform) -> Self {
        let mut parser = BootParser::new(source);
        parser.parse(root);

        let mut settings = Settings::build();
        extract_all(&mut settings, &parser.lines, platform);

        // Included files (cmdline.txt, edid.dat, ...) can only be named
        // once we know each such setting's resolved value, which in turn
        // needed the first parse to already have happened.
        let included: Vec<String> = {
            let ctx = RegistryContext::new(&settings, platform);
            settings
                .iter()
                .filter_map(|s| catalog::included_filename(s.kind(), &s.value(&ctx)))
                .collect()
        };
        for filename in &included {
            parser.add(filename);
        }

        for warning in &parser.warnings {
            warn!("{}:{}: {}", warning.filename, warning.linenum, warning.message);
        }

        let hash = parser.finish_hash();
        let timestamp = parser.latest_timestamp();
        Self {
            files: parser.files,
            hash,
            timestamp,
            settings,
            root: root.to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// An in-memory working copy ready to receive edits.
    pub fn mutable<'a>(&self, platform: &'a dyn Platform, mutable_files: HashSet<String>, comment_lines: bool) -> MutableConfiguration<'a> {
        let mut map = MapSource::new();
        for (name, file) in &self.files {
            map.insert(name.clone(), file.content.clone(), file.timestamp);
        }
        MutableConfiguration {
            files: map,
            root: self.root.clone(),
            mutable: mutable_files,
            platform,
            base_settings: self.settings.copy(),
            comment_lines,
        }
    }
}

/// Runs `extract` for every setting in `settings` against `lines`,
/// resolving `value` from the most-recently-occurring *enabled*
/// candidate and recording the full history (most-recent first, per
/// spec.md §4.3).
fn extract_all(settings: &mut Settings, lines: &[BootLine], platform: &dyn Platform) {
    let names: Vec<String> = settings.iter().map(|s| s.name().to_string()).collect();
    for name in names {
        let candidates = settings.get(&name).expect("name came from this registry").extract(lines);
        let mut history: Vec<crate::setting::ExtractedLine> = candidates
            .into_iter()
            .map(|(idx, value)| {
                let line = &lines[idx];
                crate::setting::ExtractedLine {
                    filename: line.filename.clone(),
                    linenum: line.linenum,
                    conditions: line.conditions.clone(),
                    enabled: line.conditions.enabled(platform),
                    value,
                }
            })
            .collect();
        history.reverse();
        let resolved = history.iter().find(|l| l.enabled).map(|l| l.value.clone());
        settings
            .get_mut(&name)
            .expect("name came from this registry")
            .set_extracted(resolved, history);
    }
}

/// The rewrite engine: an in-memory working copy of a file set, plus
/// enough of the original (`base_settings`) to know what each changed
/// setting's prior contributing lines were.
pub struct MutableConfiguration<'a> {
    files: MapSource,
    root: String,
    mutable: HashSet<String>,
    platform: &'a dyn Platform,
    base_settings: Settings,
    comment_lines: bool,
}

impl<'a> MutableConfiguration<'a> {
    pub fn files(&self) -> &MapSource {
        &self.files
    }

    /// Applies `changes` (setting name → new input, where a blank
    /// `Input::UserStr` resets to default) under the target `context`.
    /// On success the working file set reflects the edit; on
    /// `InvalidConfiguration` or `IneffectiveConfiguration` it may still
    /// have been partially rewritten (the latter explicitly so, per
    /// spec.md §7 — the live files have already changed by phase 9).
    pub fn apply(&mut self, changes: &BTreeMap<String, Input>, context: &BootConditions) -> Result<()> {
        // Phase 1: validate the desired endpoint against a pure copy.
        let mut desired = self.base_settings.copy();
        {
            let ctx = RegistryContext::new(&self.base_settings, self.platform);
            for (name, input) in changes {
                if let Some(setting) = desired.get_mut(name) {
                    setting.update(input, &ctx)?;
                }
            }
        }
        let mut errors = BTreeMap::new();
        {
            let ctx = RegistryContext::new(&desired, self.platform);
            for setting in desired.iter() {
                if let Err(reason) = setting.validate(&ctx) {
                    errors.insert(setting.name().to_string(), reason);
                }
            }
        }
        if !errors.is_empty() {
            return Err(InvalidConfiguration { errors }.into());
        }

        // Phase 2: clean pass over every line that fed a changed setting.
        for name in changes.keys() {
            if let Some(setting) = self.base_settings.get(name) {
                for line in setting.lines() {
                    if self.mutable.contains(&line.filename) && line.conditions.le(context) {
                        edit_line(&mut self.files, &line.filename, line.linenum, self.comment_lines);
                    }
                }
            }
        }

        // Phase 3: re-parse the cleaned file set.
        let mut parser = BootParser::new(&self.files);
        parser.parse(&self.root);
        let mut reparsed = Settings::build();
        extract_all(&mut reparsed, &parser.lines, self.platform);

        // Phase 4: compute the emission set, honoring delegation.
        let emission = {
            let ctx_desired = RegistryContext::new(&desired, self.platform);
            let ctx_reparsed = RegistryContext::new(&reparsed, self.platform);
            let mut differing: Vec<&str> = Vec::new();
            for setting in desired.iter() {
                let want = setting.value(&ctx_desired);
                let have = reparsed.get(setting.name()).map(|s| s.value(&ctx_reparsed));
                if have.as_ref() != Some(&want) {
                    differing.push(setting.name());
                }
            }
            let mut emitted = HashSet::new();
            let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
            for name in differing {
                let setting = desired.get(name).expect("name came from this registry");
                match setting.output(&ctx_desired) {
                    DelegatedOutput::Emit(lines) => {
                        if !lines.is_empty() && emitted.insert(name.to_string()) {
                            grouped.push((setting.key(), lines));
                        }
                    }
                    DelegatedOutput::Delegate(master_name) => {
                        if emitted.insert(master_name.clone()) {
                            if let Some(master) = desired.get(&master_name) {
                                if let DelegatedOutput::Emit(lines) = master.output(&ctx_desired) {
                                    if !lines.is_empty() {
                                        grouped.push((master.key(), lines));
                                    }
                                }
                            }
                        }
                    }
                }
            }
            grouped.sort_by(|a, b| a.0.cmp(&b.0));
            grouped.into_iter().flat_map(|(_, lines)| lines).collect::<Vec<_>>()
        };

        // Phase 5: uncomment search.
        let mut remaining = Vec::new();
        for line_text in emission {
            let found = parser.lines.iter().find(|l| {
                matches!(l.kind, BootLineKind::Comment)
                    && self.mutable.contains(&l.filename)
                    && l.conditions == *context
                    && l.comment.as_deref() == Some(line_text.as_str())
            });
            match found {
                Some(l) => {
                    debug!("uncommenting {}:{} to satisfy edit", l.filename, l.linenum);
                    set_line(&mut self.files, &l.filename, l.linenum, &line_text);
                }
                None => remaining.push(line_text),
            }
        }

        if !remaining.is_empty() {
            // Phase 6: insertion point, restricted to the root file (the
            // only file the splice in phase 8 ever writes into).
            let root_lines: Vec<&BootLine> = parser.lines.iter().filter(|l| l.filename == self.root).collect();
            let matching = root_lines.iter().rev().find(|l| l.conditions == *context);
            let (insert_after, insert_conditions) = match matching {
                Some(l) => (l.linenum, l.conditions.clone()),
                None => match root_lines.last() {
                    Some(l) => (l.linenum, l.conditions.clone()),
                    None => (0, BootConditions::new()),
                },
            };

            // Phase 7: context fix-up.
            let mut to_splice = remaining;
            if insert_conditions != *context {
                let mut prefixed = vec![String::new()];
                prefixed.extend(insert_conditions.generate(context));
                prefixed.extend(to_splice);
                to_splice = prefixed;
            }

            // Phase 8: splice into the root file.
            splice_lines(&mut self.files, &self.root, insert_after, &to_splice);
        }

        // Phase 9: verification re-parse.
        let mut verify_parser = BootParser::new(&self.files);
        verify_parser.parse(&self.root);
        let mut verified = Settings::build();
        extract_all(&mut verified, &verify_parser.lines, self.platform);

        let ctx_desired = RegistryContext::new(&desired, self.platform);
        let ctx_verified = RegistryContext::new(&verified, self.platform);
        let mut diff = Vec::new();
        for name in changes.keys() {
            let expected = desired.get(name).map(|s| s.value(&ctx_desired));
            let actual = verified.get(name).map(|s| s.value(&ctx_verified));
            if expected != actual {
                let overridden_at = verified
                    .get(name)
                    .and_then(|s| s.lines().iter().find(|l| l.enabled))
                    .map(|l| (l.filename.clone(), l.linenum));
                diff.push(Override {
                    name: name.clone(),
                    expected: expected.map(describe),
                    actual: actual.map(describe),
                    overridden_at,
                });
            }
        }
        if !diff.is_empty() {
            return Err(IneffectiveConfiguration { diff }.into());
        }
        Ok(())
    }
}

fn describe(value: Value) -> String {
    match value {
        Value::None => "(default)".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Str(s) => s,
        Value::List(items) => items.join(","),
    }
}

fn file_lines(files: &MapSource, filename: &str) -> Vec<String> {
    files
        .files
        .get(filename)
        .map(|(content, _)| String::from_utf8_lossy(content).split('\n').map(str::to_string).collect())
        .unwrap_or_default()
}

fn write_file_lines(files: &mut MapSource, filename: &str, lines: Vec<String>) {
    let mut text = lines.join("\n").into_bytes();
    if !text.ends_with(b"\n") {
        text.push(b'\n');
    }
    let mtime = files.files.get(filename).map(|(_, t)| *t).unwrap_or(0);
    files.files.insert(filename.to_string(), (text, mtime));
}

/// Blanks (deletes) or comments out line `linenum` (1-based) of
/// `filename`, leaving every other line untouched.
fn edit_line(files: &mut MapSource, filename: &str, linenum: usize, comment: bool) {
    let mut lines = file_lines(files, filename);
    if linenum == 0 || linenum > lines.len() {
        return;
    }
    let idx = linenum - 1;
    if comment {
        if !lines[idx].trim_start().starts_with('#') {
            lines[idx] = format!("#{}", lines[idx]);
        }
    } else {
        lines[idx] = String::new();
    }
    write_file_lines(files, filename, lines);
}

/// Replaces line `linenum` (1-based) of `filename` with `text` verbatim
/// — used to uncomment a line that already matches a pending edit.
fn set_line(files: &mut MapSource, filename: &str, linenum: usize, text: &str) {
    let mut lines = file_lines(files, filename);
    if linenum == 0 || linenum > lines.len() {
        return;
    }
    lines[linenum - 1] = text.to_string();
    write_file_lines(files, filename, lines);
}

/// Inserts `new_lines` immediately after 1-based line `after` of
/// `filename` (`after == 0` inserts at the very start, including into a
/// file that does not exist yet).
fn splice_lines(files: &mut MapSource, filename: &str, after: usize, new_lines: &[String]) {
    let mut lines = file_lines(files, filename);
    let at = after.min(lines.len());
    for (offset, line) in new_lines.iter().enumerate() {
        lines.insert(at + offset, line.clone());
    }
    write_file_lines(files, filename, lines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;
    use maplit::{btreemap, hashset};

    fn platform() -> FixedPlatform {
        FixedPlatform::pi4(1024)
    }

    #[test]
    fn sets_overlay_param_on_empty_config() {
        let source = MapSource::new();
        let plat = platform();
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "config.txt".to_string() }, true);
        let changes = btreemap! { "i2c.enabled".to_string() => Input::user("true") };
        mutable.apply(&changes, &BootConditions::new()).unwrap();
        let text = String::from_utf8_lossy(&mutable.files().files["config.txt"].0).into_owned();
        assert!(text.contains("dtparam=i2c_arm=on"));
    }

    #[test]
    fn resets_setting_by_removing_its_line() {
        let mut source = MapSource::new();
        source.insert("config.txt", "hdmi_group:0=1\nhdmi_mode:0=4\n".as_bytes(), 1_700_000_000);
        let plat = platform();
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "config.txt".to_string() }, false);
        let changes = btreemap! {
            "video.hdmi0.group".to_string() => Input::user(""),
            "video.hdmi0.mode".to_string() => Input::user(""),
        };
        mutable.apply(&changes, &BootConditions::new()).unwrap();
        let text = String::from_utf8_lossy(&mutable.files().files["config.txt"].0).into_owned();
        assert!(!text.contains("hdmi_group"));
        assert!(!text.contains("hdmi_mode"));

        let mut reloaded = MapSource::new();
        reloaded.insert("config.txt", text.into_bytes(), 1_700_000_000);
        let reparsed = BootConfiguration::load(&reloaded, "config.txt", &plat);
        assert!(!reparsed.settings.get("video.hdmi0.group").unwrap().modified());
    }

    /// The literal inputs from spec.md §8's "overridden setting" scenario,
    /// traced through to their actual outcome rather than the narrative's
    /// claimed one — see DESIGN.md, "A literal scenario that contradicts
    /// the algorithm as specified". Because the new line always lands at
    /// the end of the root file, and `include` is expanded inline, the
    /// edit ends up *after* `usercfg.txt`'s override in document order
    /// and wins.
    #[test]
    fn overridden_setting_scenario_actually_succeeds_per_the_algorithm() {
        let mut source = MapSource::new();
        source.insert("config.txt", b"include syscfg.txt\ninclude usercfg.txt\n".to_vec(), 1_700_000_000);
        source.insert("usercfg.txt", b"dtparam=spi=on\n".to_vec(), 1_700_000_000);
        let plat = platform();
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "syscfg.txt".to_string() }, true);
        let changes = btreemap! { "spi.enabled".to_string() => Input::user("false") };
        let result = mutable.apply(&changes, &BootConditions::new());
        assert!(result.is_ok(), "the appended override always lands last in document order");
    }

    #[test]
    fn edit_under_a_context_the_platform_never_satisfies_is_ineffective() {
        let source = MapSource::new();
        let plat = platform(); // board_serial() is None
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "config.txt".to_string() }, true);
        let changes = btreemap! { "spi.enabled".to_string() => Input::user("true") };
        let target = BootConditions {
            serial: Some(0x3039),
            ..BootConditions::new()
        };
        // The emitted line lands under a [0x3039] section, but this
        // platform's serial never matches it, so extraction can never
        // pick it back up: the edit is structurally ineffective.
        let result = mutable.apply(&changes, &target);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_enum_value_is_rejected_before_any_write() {
        let mut source = MapSource::new();
        source.insert("config.txt", "hdmi_group:0=1\n".as_bytes(), 1_700_000_000);
        let plat = platform();
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "config.txt".to_string() }, true);
        let changes = btreemap! { "video.hdmi0.mode".to_string() => Input::user("999") };
        let result = mutable.apply(&changes, &BootConditions::new());
        assert!(result.is_err());
        let text = String::from_utf8_lossy(&mutable.files().files["config.txt"].0).into_owned();
        assert_eq!(text, "hdmi_group:0=1\n");
    }

    #[test]
    fn bit_masked_group_emits_a_single_line() {
        let source = MapSource::new();
        let plat = platform();
        let config = BootConfiguration::load(&source, "config.txt", &plat);
        let mut mutable = config.mutable(&plat, hashset! { "config.txt".to_string() }, true);
        let changes = btreemap! {
            "video.dpi.format".to_string() => Input::user("7"),
            "video.dpi.rgb".to_string() => Input::user("2"),
            "video.dpi.hsync.polarity".to_string() => Input::user("true"),
            "video.dpi.enabled".to_string() => Input::user("true"),
        };
        mutable.apply(&changes, &BootConditions::new()).unwrap();
        let text = String::from_utf8_lossy(&mutable.files().files["config.txt"].0).into_owned();
        let dpi_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("dpi_output_format=")).collect();
        assert_eq!(dpi_lines.len(), 1);
        assert!(text.contains("enable_dpi_lcd=1"));
    }
}

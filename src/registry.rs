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

//! `Settings`: the ordered collection of every known setting, keyed by
//! name and iterated in catalog order. Grounded on the teacher's use of
//! `indexmap::IndexMap` wherever insertion order needs to survive a
//! lookup-by-key (`src/io/boot.rs`'s entry maps).

use std::collections::BTreeMap;

use glob::Pattern;
use indexmap::IndexMap;

use crate::platform::Platform;
use crate::setting::{catalog, Context, Setting};
use crate::value::Value;

/// The full catalog of settings, after extraction from a parsed
/// configuration (or freshly built with nothing extracted yet).
#[derive(Debug, Clone)]
pub struct Settings {
    by_name: IndexMap<String, Setting>,
}

impl Settings {
    /// Builds the catalog with no values extracted (every setting reads
    /// as its default until `BootConfiguration` populates it from a
    /// parse).
    pub fn build() -> Self {
        let mut by_name = IndexMap::new();
        for setting in catalog::build() {
            by_name.insert(setting.name().to_string(), setting);
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.by_name.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Setting> {
        self.by_name.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// A deep copy, independent of `self`: `MutableConfiguration` takes
    /// one of these as its working set so edits can be discarded
    /// wholesale by dropping it.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The subset of settings a user has actually changed from their
    /// default (i.e. extraction found at least one contributing line).
    pub fn modified(&self) -> Vec<&Setting> {
        self.by_name.values().filter(|s| s.modified()).collect()
    }

    /// The subset of settings whose name matches the glob *pattern*
    /// (e.g. `video.*`).
    pub fn filter(&self, pattern: &str) -> anyhow::Result<Vec<&Setting>> {
        let glob = Pattern::new(pattern)?;
        Ok(self.by_name.values().filter(|s| glob.matches(s.name())).collect())
    }

    /// Pairs of settings differing in resolved value between `self` and
    /// `other`, keyed by name; a side missing a name it names is `None`
    /// on that side (reported rather than silently skipped, since a
    /// snapshot taken under an older catalog can be missing settings a
    /// newer one added).
    pub fn diff<'a>(
        &'a self,
        other: &'a Settings,
        platform: &dyn Platform,
    ) -> BTreeMap<String, (Option<Value>, Option<Value>)> {
        let mut out = BTreeMap::new();
        let self_ctx = RegistryContext::new(self, platform);
        let other_ctx = RegistryContext::new(other, platform);
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        for name in other.by_name.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
        for name in names {
            let lhs = self.get(name).map(|s| s.value(&self_ctx));
            let rhs = other.get(name).map(|s| s.value(&other_ctx));
            if lhs != rhs {
                out.insert(name.to_string(), (lhs, rhs));
            }
        }
        out
    }
}

/// The `Context` every setting operation runs under once it's part of a
/// registry: sibling lookups go straight to the sibling's own resolved
/// value (default or extracted), bypassing any visibility filtering a
/// caller might apply on top (spec.md §9's "context threading, not a
/// weak back-reference" note).
pub struct RegistryContext<'a> {
    settings: &'a Settings,
    platform: &'a dyn Platform,
}

impl<'a> RegistryContext<'a> {
    pub fn new(settings: &'a Settings, platform: &'a dyn Platform) -> Self {
        Self { settings, platform }
    }
}

impl<'a> Context for RegistryContext<'a> {
    fn get(&self, name: &str) -> Option<Value> {
        // Assumes the default-dependency graph between settings is
        // acyclic; nothing in the catalog above introduces a cycle.
        self.settings.get(name).map(|s| s.value(self))
    }

    fn platform(&self) -> &dyn Platform {
        self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;

    fn platform() -> FixedPlatform {
        FixedPlatform::pi4(1024)
    }

    #[test]
    fn build_populates_every_catalog_setting() {
        let settings = Settings::build();
        assert!(!settings.is_empty());
        assert!(settings.get("gpu.mem").is_some());
    }

    #[test]
    fn nothing_is_modified_before_extraction() {
        let settings = Settings::build();
        assert!(settings.modified().is_empty());
    }

    #[test]
    fn filter_matches_glob() {
        let settings = Settings::build();
        let matched = settings.filter("video.dpi.*").unwrap();
        assert!(matched.iter().all(|s| s.name().starts_with("video.dpi.")));
        assert!(!matched.is_empty());
    }

    #[test]
    fn sibling_lookup_resolves_through_context() {
        let settings = Settings::build();
        let plat = platform();
        let ctx = RegistryContext::new(&settings, &plat);
        // boot.prefix defaults to "", so boot.cmdline's default should
        // be exactly "cmdline.txt" with no prefix applied.
        let cmdline = settings.get("boot.cmdline").unwrap();
        assert_eq!(cmdline.value(&ctx), Value::Str("cmdline.txt".to_string()));
    }

    #[test]
    fn diff_reports_only_changed_settings() {
        let a = Settings::build();
        let mut b = Settings::build();
        let plat = platform();
        b.get_mut("gpu.mem").unwrap().set_value(Some(Value::Int(128)));
        let diff = a.diff(&b, &plat);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("gpu.mem"));
    }
}

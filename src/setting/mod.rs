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

//! The setting model: a closed algebraic family of setting kinds over a
//! shared `Setting` envelope (name, doc, current value, contributing
//! lines), per the "tagged variants over a shared interface" design
//! note. Each setting knows how to extract its value out of a line
//! sequence, accept an update, validate itself against its siblings,
//! and emit canonical lines, without holding a back-reference to the
//! registry: a `Context` is passed into every call that needs siblings
//! or platform facts instead (the alternative the design notes
//! sanction over a weak back-reference).

pub mod catalog;

use std::fmt;

use anyhow::Result;

use crate::conditions::BootConditions;
use crate::parser::{BootLine, BootLineKind};
use crate::platform::Platform;
use crate::value::{to_bool, to_int, to_str, Input, Value};

/// One line that influenced (or would influence) a setting's value,
/// kept regardless of whether its conditions are currently enabled, in
/// most-recent-enabled-first order.
#[derive(Debug, Clone)]
pub struct ExtractedLine {
    pub filename: String,
    pub linenum: usize,
    pub conditions: BootConditions,
    pub enabled: bool,
    pub value: Value,
}

/// Non-owning access to sibling settings and platform facts, threaded
/// through every `Setting` operation that needs them.
pub trait Context {
    fn get(&self, name: &str) -> Option<Value>;
    fn platform(&self) -> &dyn Platform;
}

/// `Setting::output`'s result: either the canonical lines for this
/// setting, or a signal that another (master) setting already covers
/// this one's output (bit-masked groups, rotate/flip, bluetooth/uart).
/// Modeled as data, not as an exception (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegatedOutput {
    Emit(Vec<String>),
    Delegate(String),
}

impl DelegatedOutput {
    pub fn lines(self) -> Vec<String> {
        match self {
            DelegatedOutput::Emit(lines) => lines,
            DelegatedOutput::Delegate(_) => Vec::new(),
        }
    }
}

/// One member of a bit-masked command group: a sibling setting's name,
/// its bit offset and width within the shared command value, and
/// whether it is boolean (width 1, rendered as presence) or numeric.
#[derive(Debug, Clone)]
pub struct MaskMember {
    pub name: String,
    pub shift: u32,
    pub width: u32,
}

impl MaskMember {
    fn mask(&self) -> i64 {
        ((1i64 << self.width) - 1) << self.shift
    }
}

/// The variant-specific behavior of a setting. A closed family: new
/// hardware quirks are new variants here, not new trait impls.
#[derive(Debug, Clone)]
pub enum Kind {
    /// On iff the named overlay has been loaded at all.
    OverlayLoaded { overlay: String },
    OverlayParamBool { overlay: String, param: String, default: bool },
    OverlayParamInt { overlay: String, param: String, default: i64, valid: Option<(i64, i64)> },
    OverlayParamStr { overlay: String, param: String, default: String },
    /// One or more command aliases, optional HDMI index, boolean value.
    CommandBool { commands: Vec<String>, hdmi: Option<u8>, default: bool, invert: bool },
    CommandInt {
        commands: Vec<String>,
        hdmi: Option<u8>,
        default: i64,
        valid: Option<(i64, i64)>,
        hex: bool,
    },
    CommandStr { commands: Vec<String>, hdmi: Option<u8>, default: String },
    /// Tri-state realized by two complementary boolean commands; the
    /// last one enabled (in document order) wins.
    CommandForceIgnore { force_command: String, ignore_command: String },
    /// The master of a bit-masked command group: combines its own
    /// field with every other member's current value.
    MaskMaster { command: String, member: MaskMember, others: Vec<MaskMember> },
    /// A non-master member of a bit-masked group: delegates output to
    /// `master`.
    MaskDummy { command: String, master: String, member: MaskMember },
    /// A filename implicitly prefixed by the `boot.prefix` sibling.
    Filename { command: String, prefix_setting: String, default: String },
    /// As `Filename`, but the referenced file is also registered with
    /// the parser so it contributes to the configuration hash.
    IncludedFile { command: String, prefix_setting: String, default: String },
    GpuMem,
    /// As `Filename`, prefixed by `boot.prefix` the same way.
    FirmwareFilename { prefix_setting: String },
    FirmwareFixup { prefix_setting: String },
    KernelAddress,
    KernelFilename { prefix_setting: String },
    SerialEnabled,
    SerialUart,
    BluetoothEnabled,
    CpuFreqMax,
    CpuFreqMin,
    DisplayRotate { command: String, flip_setting: String },
    DisplayFlip { command: String, rotate_setting: String },
    BootDelay2,
    EdidIgnore { command: String },
    InitramfsFilename,
    InitramfsAddress,
}

/// A named, strongly-typed setting: its identity and documentation are
/// fixed at catalog-construction time; `value`/`lines` accumulate as
/// the owning registry is populated from a parse and mutated by edits.
#[derive(Debug, Clone)]
pub struct Setting {
    name: String,
    doc: String,
    kind: Kind,
    value: Option<Value>,
    lines: Vec<ExtractedLine>,
}

impl Setting {
    pub fn new(name: impl Into<String>, doc: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            kind,
            value: None,
            lines: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn modified(&self) -> bool {
        self.value.is_some()
    }

    pub fn lines(&self) -> &[ExtractedLine] {
        &self.lines
    }

    /// Sort key used to order emitted output: base-overlay parameters
    /// first, then other overlay output, then plain commands.
    pub fn key(&self) -> String {
        match &self.kind {
            Kind::OverlayParamBool { overlay, param, .. }
            | Kind::OverlayParamInt { overlay, param, .. }
            | Kind::OverlayParamStr { overlay, param, .. } => {
                if overlay == "base" {
                    format!("0:{}", param)
                } else {
                    format!("1:{}:1:{}", overlay, param)
                }
            }
            Kind::OverlayLoaded { overlay } => format!("1:{}:0", overlay),
            _ => format!("2:{}", self.name),
        }
    }

    pub fn default(&self, ctx: &dyn Context) -> Value {
        catalog::default(&self.kind, &self.name, ctx)
    }

    pub fn value(&self, ctx: &dyn Context) -> Value {
        match &self.value {
            Some(v) => v.clone(),
            None => self.default(ctx),
        }
    }

    pub fn hint(&self, ctx: &dyn Context) -> Option<String> {
        catalog::hint(&self.kind, &self.name, &self.value(ctx), ctx)
    }

    /// Scans `lines` for every line that would influence this setting,
    /// regardless of whether its conditions are currently enabled.
    pub fn extract(&self, lines: &[BootLine]) -> Vec<(usize, Value)> {
        catalog::extract(&self.kind, lines)
    }

    /// Records the outcome of extraction: the value taken from the
    /// last enabled candidate (if any) and the full candidate history,
    /// most-recent first.
    pub fn set_extracted(&mut self, value: Option<Value>, lines: Vec<ExtractedLine>) {
        self.value = value;
        self.lines = lines;
    }

    /// Directly assigns the resolved value, bypassing extraction. Used
    /// by `MutableConfiguration`'s pre-validation copy.
    pub fn set_value(&mut self, value: Option<Value>) {
        self.value = value;
    }

    pub fn update(&mut self, input: &Input, ctx: &dyn Context) -> Result<()> {
        let new_value = catalog::update(&self.kind, input, ctx)?;
        self.value = new_value;
        Ok(())
    }

    pub fn validate(&self, ctx: &dyn Context) -> Result<(), String> {
        catalog::validate(&self.kind, &self.name, &self.value(ctx), ctx)
    }

    pub fn output(&self, ctx: &dyn Context) -> DelegatedOutput {
        catalog::output(&self.kind, &self.name, &self.value(ctx), ctx)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Helper shared by `catalog`'s `extract` implementations: lines whose
/// `Command` payload matches one of `commands` and `hdmi`.
pub(crate) fn command_lines<'a>(
    lines: &'a [BootLine],
    commands: &[&str],
    hdmi: Option<u8>,
) -> Vec<(usize, &'a BootLine, String)> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| match &l.kind {
            BootLineKind::Command { command, hdmi: h, param } if commands.contains(&command.as_str()) && *h == hdmi => {
                Some((i, l, param.to_string()))
            }
            _ => None,
        })
        .collect()
}

pub(crate) fn param_lines<'a>(
    lines: &'a [BootLine],
    overlay: &str,
    param: &str,
) -> Vec<(usize, &'a BootLine, String)> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| match &l.kind {
            BootLineKind::Param { overlay: o, param: p, value } if o == overlay && p == param => {
                Some((i, l, value.clone()))
            }
            _ => None,
        })
        .collect()
}

pub(crate) fn overlay_lines<'a>(lines: &'a [BootLine], overlay: &str) -> Vec<(usize, &'a BootLine)> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| match &l.kind {
            BootLineKind::Overlay { overlay: o } if o == overlay => Some((i, l)),
            _ => None,
        })
        .collect()
}

pub(crate) fn coerce_bool(input: &Input) -> Result<Option<bool>> {
    to_bool(input)
}
pub(crate) fn coerce_int(input: &Input) -> Result<Option<i64>> {
    to_int(input)
}
pub(crate) fn coerce_str(input: &Input) -> Result<Option<String>> {
    to_str(input)
}

/// Whether a raw command parameter string reads as "on": the usual
/// boolean spellings, case-insensitively. `None` if it isn't one of
/// those (the caller falls back to the setting's own default).
pub(crate) fn command_param_is_truthy(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

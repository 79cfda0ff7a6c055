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

//! `BootConditions`: the filter context threaded through a parse, and
//! the `[section]` headers that narrow or widen it.

use std::fmt;

use crate::platform::Platform;

/// A model family tag, as it appears in a `[pi...]` section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Pi0,
    Pi0W,
    Pi1,
    Pi2,
    Pi3,
    Pi3Plus,
    Pi4,
}

impl Model {
    pub fn tag(self) -> &'static str {
        match self {
            Model::Pi0 => "pi0",
            Model::Pi0W => "pi0w",
            Model::Pi1 => "pi1",
            Model::Pi2 => "pi2",
            Model::Pi3 => "pi3",
            Model::Pi3Plus => "pi3+",
            Model::Pi4 => "pi4",
        }
    }

    fn from_tag(tag: &str) -> Option<Model> {
        Some(match tag {
            "pi0" => Model::Pi0,
            "pi0w" => Model::Pi0W,
            "pi1" => Model::Pi1,
            "pi2" => Model::Pi2,
            "pi3" => Model::Pi3,
            "pi3+" => Model::Pi3Plus,
            "pi4" => Model::Pi4,
            _ => return None,
        })
    }

    /// Whether a section naming `self` is satisfied by a board of model
    /// *actual*. `pi3+` sections match `pi3+` boards only, but a `pi3`
    /// section also matches a `pi3+` board (it's a pi3 after all); the
    /// mirror case holds for `pi0`/`pi0w`.
    fn matches(self, actual: Model) -> bool {
        if self == actual {
            return true;
        }
        matches!(
            (self, actual),
            (Model::Pi3, Model::Pi3Plus) | (Model::Pi0, Model::Pi0W)
        )
    }
}

/// The immutable conjunction of filters active at a point in the parse.
/// Equality (for uncomment-search and diffing) ignores `suppress_count`.
#[derive(Debug, Clone, Default)]
pub struct BootConditions {
    pub model: Option<Model>,
    pub hdmi: Option<u8>,
    pub edid: Option<String>,
    pub serial: Option<u64>,
    pub gpio: Option<(u32, bool)>,
    pub none: bool,
    pub suppress_count: u32,
}

impl PartialEq for BootConditions {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.hdmi == other.hdmi
            && self.edid == other.edid
            && self.serial == other.serial
            && self.gpio == other.gpio
            && self.none == other.none
    }
}
impl Eq for BootConditions {}

impl BootConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `a.le(b)`: `a` is at least as specific as `b` — every filter `b`
    /// constrains, `a` constrains to an equal (or, for model, a
    /// narrower) value. Fields `b` leaves unconstrained impose no
    /// requirement on `a`.
    pub fn le(&self, other: &BootConditions) -> bool {
        if let Some(m) = other.model {
            match self.model {
                Some(my) => {
                    if !(my == m || m.matches(my)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if other.hdmi.is_some() && self.hdmi != other.hdmi {
            return false;
        }
        if other.edid.is_some() && self.edid != other.edid {
            return false;
        }
        if other.serial.is_some() && self.serial != other.serial {
            return false;
        }
        if other.gpio.is_some() && self.gpio != other.gpio {
            return false;
        }
        if other.none && !self.none {
            return false;
        }
        true
    }

    /// Returns the conditions that apply after parsing section header
    /// *section* while these conditions were in effect. Unknown section
    /// tags leave the conditions unchanged (the caller should warn).
    pub fn evaluate(&self, section: &str) -> BootConditions {
        let section = section.trim();
        if section.eq_ignore_ascii_case("all") {
            return BootConditions {
                suppress_count: self.suppress_count,
                ..BootConditions::default()
            };
        }
        if section.eq_ignore_ascii_case("none") {
            let mut c = self.clone();
            c.none = true;
            return c;
        }
        if let Some(rest) = section.strip_prefix("HDMI:").or_else(|| section.strip_prefix("hdmi:")) {
            if let Ok(n) = rest.parse::<u8>() {
                if n == 0 || n == 1 {
                    let mut c = self.clone();
                    c.hdmi = Some(n);
                    return c;
                }
            }
            return self.clone();
        }
        if let Some(rest) = section.strip_prefix("EDID=").or_else(|| section.strip_prefix("edid=")) {
            let mut c = self.clone();
            c.edid = Some(rest.to_string());
            return c;
        }
        if let Some(rest) = section.strip_prefix("gpio").or_else(|| section.strip_prefix("GPIO")) {
            if let Some((num, val)) = rest.split_once('=') {
                if let (Ok(num), Ok(val)) = (num.parse::<u32>(), val.parse::<u8>()) {
                    if val == 0 || val == 1 {
                        let mut c = self.clone();
                        c.gpio = Some((num, val == 1));
                        return c;
                    }
                }
            }
            return self.clone();
        }
        if let Some(rest) = section.strip_prefix("0x").or_else(|| section.strip_prefix("0X")) {
            if let Ok(serial) = u64::from_str_radix(rest, 16) {
                let mut c = self.clone();
                c.serial = Some(serial);
                return c;
            }
            return self.clone();
        }
        if let Some(model) = Model::from_tag(&section.to_lowercase()) {
            let mut c = self.clone();
            c.model = Some(model);
            return c;
        }
        self.clone()
    }

    /// Yields the section headers needed to move from `context` (self)
    /// to `target`, emitting `[all]` first whenever a filter must be
    /// widened (dropped or changed) rather than merely narrowed further.
    pub fn generate(&self, target: &BootConditions) -> Vec<String> {
        if self == target {
            return Vec::new();
        }
        let needs_widen = (self.model.is_some() && self.model != target.model)
            || (self.hdmi.is_some() && self.hdmi != target.hdmi)
            || (self.edid.is_some() && self.edid != target.edid)
            || (self.serial.is_some() && self.serial != target.serial)
            || (self.gpio.is_some() && self.gpio != target.gpio)
            || (self.none && !target.none);
        let mut out = Vec::new();
        let mut cur = self.clone();
        if needs_widen {
            out.push("[all]".to_string());
            cur = BootConditions::default();
        }
        if target.none && !cur.none {
            out.push("[none]".to_string());
        }
        if let Some(model) = target.model {
            if cur.model != Some(model) {
                out.push(format!("[{}]", model.tag()));
            }
        }
        if let Some(hdmi) = target.hdmi {
            if cur.hdmi != Some(hdmi) {
                out.push(format!("[HDMI:{}]", hdmi));
            }
        }
        if let Some(edid) = &target.edid {
            if cur.edid.as_deref() != Some(edid.as_str()) {
                out.push(format!("[EDID={}]", edid));
            }
        }
        if let Some(serial) = target.serial {
            if cur.serial != Some(serial) {
                out.push(format!("[0x{:x}]", serial));
            }
        }
        if let Some((num, val)) = target.gpio {
            if cur.gpio != Some((num, val)) {
                out.push(format!("[gpio{}={}]", num, val as u8));
            }
        }
        out
    }

    /// Returns a copy with `suppress_count` incremented by one, used
    /// when recursing into an `include` whose containing conditions are
    /// currently disabled.
    pub fn suppress(&self) -> BootConditions {
        let mut c = self.clone();
        c.suppress_count += 1;
        c
    }

    /// True when these conditions match the given platform (GPIO and
    /// EDID are not evaluable at rewrite time and are ignored) and the
    /// suppress count is zero.
    pub fn enabled(&self, platform: &dyn Platform) -> bool {
        if self.suppress_count != 0 || self.none {
            return false;
        }
        if let Some(model) = self.model {
            if !platform.board_types().contains(&model) {
                return false;
            }
        }
        if let Some(hdmi) = self.hdmi {
            let _ = hdmi; // not evaluable without a hotplug probe; treated as always satisfied
        }
        if let Some(serial) = self.serial {
            if platform.board_serial() != Some(serial) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for BootConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootConditions(")?;
        let mut first = true;
        macro_rules! field {
            ($name:expr, $val:expr) => {
                if let Some(v) = $val {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={:?}", $name, v)?;
                    first = false;
                }
            };
        }
        field!("model", self.model.map(|m| m.tag()));
        field!("hdmi", self.hdmi);
        field!("edid", self.edid.as_ref());
        field!("serial", self.serial);
        field!("gpio", self.gpio);
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive_and_antisymmetric() {
        let a = BootConditions {
            model: Some(Model::Pi3),
            ..Default::default()
        };
        assert!(a.le(&a));
        let b = a.clone();
        assert!(a.le(&b) && b.le(&a));
    }

    #[test]
    fn pi3_plus_narrower_than_pi3() {
        let plus = BootConditions {
            model: Some(Model::Pi3Plus),
            ..Default::default()
        };
        let pi3 = BootConditions {
            model: Some(Model::Pi3),
            ..Default::default()
        };
        assert!(plus.le(&pi3));
        assert!(!pi3.le(&plus));
    }

    #[test]
    fn evaluate_all_drops_filters() {
        let c = BootConditions {
            model: Some(Model::Pi4),
            hdmi: Some(1),
            ..Default::default()
        };
        let reset = c.evaluate("all");
        assert_eq!(reset, BootConditions::default());
    }

    #[test]
    fn generate_self_is_empty() {
        let c = BootConditions {
            model: Some(Model::Pi4),
            ..Default::default()
        };
        assert!(c.generate(&c).is_empty());
    }

    #[test]
    fn generate_widens_with_all_then_narrows() {
        let from = BootConditions {
            model: Some(Model::Pi3),
            ..Default::default()
        };
        let to = BootConditions {
            hdmi: Some(0),
            ..Default::default()
        };
        let headers = from.generate(&to);
        assert_eq!(headers[0], "[all]");
        assert_eq!(headers[1], "[HDMI:0]");
    }
}

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

//! Native setting values, and the `Input` wrapper that distinguishes
//! unparsed operator strings from values that already arrived typed
//! (from a JSON/YAML document).

use anyhow::{anyhow, Result};

/// A value a setting can hold once coerced to its native type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

/// Input to `Setting::update`. A `UserStr` is a string typed by a human
/// on the command line (or read from a plain-text edit) and therefore
/// needs coercion and blank-means-reset handling; a `Value` already
/// carries a native type from a structured source and is taken as-is
/// (modulo the same blank/None passthrough rules).
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    UserStr(String),
    Value(Value),
}

impl Input {
    pub fn user(s: impl Into<String>) -> Self {
        Input::UserStr(s.into())
    }
}

/// Converts *s* to a bool. Accepts the usual "typical" string forms,
/// case-insensitively; blank or `auto` means "reset to default" (`None`).
pub fn to_bool(s: &Input) -> Result<Option<bool>> {
    match s {
        Input::UserStr(s) => {
            let trimmed = s.trim().to_lowercase();
            match trimmed.as_str() {
                "" | "auto" => Ok(None),
                "true" | "yes" | "on" | "1" | "y" => Ok(Some(true)),
                "false" | "no" | "off" | "0" | "n" => Ok(Some(false)),
                _ => Err(anyhow!("{:?} is not a valid bool", s)),
            }
        }
        Input::Value(Value::None) => Ok(None),
        Input::Value(Value::Bool(b)) => Ok(Some(*b)),
        Input::Value(other) => Err(anyhow!("{:?} is not a valid bool", other)),
    }
}

/// Converts *s* to an int. Accepts decimal and `0x`-prefixed hex.
pub fn to_int(s: &Input) -> Result<Option<i64>> {
    match s {
        Input::UserStr(s) => {
            if s.is_empty() {
                return Ok(None);
            }
            let trimmed = s.trim().to_lowercase();
            if let Some(hex) = trimmed.strip_prefix("0x") {
                i64::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|e| anyhow!("{:?} is not a valid int: {}", s, e))
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|e| anyhow!("{:?} is not a valid int: {}", s, e))
            }
        }
        Input::Value(Value::None) => Ok(None),
        Input::Value(Value::Int(n)) => Ok(Some(*n)),
        Input::Value(other) => Err(anyhow!("{:?} is not a valid int", other)),
    }
}

/// Converts *s* to a float.
pub fn to_float(s: &Input) -> Result<Option<f64>> {
    match s {
        Input::UserStr(s) => {
            if s.is_empty() {
                return Ok(None);
            }
            s.trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| anyhow!("{:?} is not a valid number: {}", s, e))
        }
        Input::Value(Value::None) => Ok(None),
        Input::Value(Value::Float(n)) => Ok(Some(*n)),
        Input::Value(Value::Int(n)) => Ok(Some(*n as f64)),
        Input::Value(other) => Err(anyhow!("{:?} is not a valid number", other)),
    }
}

/// Converts *s* to a string. A blank `UserStr` means "reset to default".
pub fn to_str(s: &Input) -> Result<Option<String>> {
    match s {
        Input::UserStr(s) => {
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.trim().to_string()))
            }
        }
        Input::Value(Value::None) => Ok(None),
        Input::Value(Value::Str(s)) => Ok(Some(s.clone())),
        Input::Value(other) => Err(anyhow!("{:?} is not a valid string", other)),
    }
}

/// Converts *s* to a list, split on *sep* (defaults to `,`).
pub fn to_list(s: &Input, sep: char) -> Result<Option<Vec<String>>> {
    match s {
        Input::UserStr(s) => {
            if s.is_empty() {
                return Ok(None);
            }
            let trimmed = s.trim();
            if trimmed.contains(sep) {
                Ok(Some(trimmed.split(sep).map(|e| e.trim().to_string()).collect()))
            } else {
                Ok(Some(vec![trimmed.to_string()]))
            }
        }
        Input::Value(Value::None) => Ok(None),
        Input::Value(Value::List(items)) => Ok(Some(items.clone())),
        Input::Value(other) => Err(anyhow!("{:?} is not a valid list", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_accepts_typical_forms() {
        assert_eq!(to_bool(&Input::user("YES")).unwrap(), Some(true));
        assert_eq!(to_bool(&Input::user("off")).unwrap(), Some(false));
        assert_eq!(to_bool(&Input::user("")).unwrap(), None);
        assert!(to_bool(&Input::user("maybe")).is_err());
    }

    #[test]
    fn int_accepts_hex() {
        assert_eq!(to_int(&Input::user("0x10")).unwrap(), Some(16));
        assert_eq!(to_int(&Input::user("16")).unwrap(), Some(16));
        assert_eq!(to_int(&Input::user("")).unwrap(), None);
    }

    #[test]
    fn list_splits_on_separator() {
        assert_eq!(
            to_list(&Input::user("a, b,c"), ',').unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(
            to_list(&Input::user("solo"), ',').unwrap(),
            Some(vec!["solo".to_string()])
        );
    }
}

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

//! The `Platform` capability the engine consumes. Injected rather than
//! read from globals (spec.md §9: "Platform probing should be
//! injected... so tests can simulate any board"), grounded on the
//! teacher's pattern of trait-based host-capability seams
//! (`src/blockdev.rs`'s `SavedPartitions`, `src/s390x/mod.rs`'s
//! per-arch dispatch).

use std::collections::HashSet;

use crate::conditions::Model;

/// Board facts the engine needs but cannot probe for itself: model,
/// serial, and memory. Hardware probing proper (reading
/// `/proc/device-tree` et al.) is an external collaborator's job; this
/// crate only defines the contract.
pub trait Platform {
    /// The board's own exact model tag, if recognized.
    fn board_type(&self) -> Option<Model>;

    /// Every model tag this board satisfies a `[pi...]` section for
    /// (e.g. a pi3+ board satisfies both `pi3+` and `pi3`).
    fn board_types(&self) -> HashSet<Model>;

    /// The board's serial number, if known.
    fn board_serial(&self) -> Option<u64>;

    /// Total RAM in megabytes.
    fn board_memory(&self) -> u32;
}

/// A fixed-fact `Platform` for tests and for callers that already know
/// the board facts (e.g. read once at process start by the CLI).
#[derive(Debug, Clone)]
pub struct FixedPlatform {
    pub model: Option<Model>,
    pub serial: Option<u64>,
    pub memory: u32,
}

impl FixedPlatform {
    pub fn new(model: Option<Model>, serial: Option<u64>, memory: u32) -> Self {
        Self { model, serial, memory }
    }

    pub fn pi4(memory: u32) -> Self {
        Self::new(Some(Model::Pi4), None, memory)
    }
}

impl Platform for FixedPlatform {
    fn board_type(&self) -> Option<Model> {
        self.model
    }

    fn board_types(&self) -> HashSet<Model> {
        let mut set = HashSet::new();
        match self.model {
            Some(Model::Pi3Plus) => {
                set.insert(Model::Pi3Plus);
                set.insert(Model::Pi3);
            }
            Some(Model::Pi0W) => {
                set.insert(Model::Pi0W);
                set.insert(Model::Pi0);
            }
            Some(m) => {
                set.insert(m);
            }
            None => {}
        }
        set
    }

    fn board_serial(&self) -> Option<u64> {
        self.serial
    }

    fn board_memory(&self) -> u32 {
        self.memory
    }
}

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

//! `pibootctl`: the boot-time configuration engine for Raspberry Pi
//! firmware config files — parser, typed setting model, mutation
//! algorithm, snapshot store, and the atomic file-replacement primitive
//! that underpins safe rewrites.

pub mod atomic;
pub mod conditions;
pub mod config;
pub mod error;
pub mod parser;
pub mod platform;
pub mod registry;
pub mod setting;
pub mod store;
pub mod timestamp;
pub mod value;

pub use config::{BootConfiguration, MutableConfiguration};
pub use conditions::{BootConditions, Model};
pub use error::{AlreadyExists, IneffectiveConfiguration, InvalidConfiguration, NotFound, Override, ValueError};
pub use platform::{FixedPlatform, Platform};
pub use registry::{RegistryContext, Settings};
pub use setting::{Context, DelegatedOutput, Kind, Setting};
pub use store::{Key, Store};
pub use value::{Input, Value};

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

//! Per-`Kind` behavior (`extract`/`default`/`update`/`validate`/`output`/
//! `hint`) and the catalog of concrete settings built from it.
//!
//! The catalog below is illustrative rather than exhaustive (spec.md
//! §4.3: "Subtypes that exist in the catalog (illustrative, not
//! exhaustive)"): one or two representatives of each family named in
//! the spec, enough to exercise every cross-dependency pattern
//! (bit-masked groups, delegated output, prefix-derived filenames,
//! firmware/kernel cross-references, mutually constraining pairs).
//! `registry::build()` is where they're assembled into the initial
//! `Settings`.

use anyhow::Result;

use crate::conditions::Model;
use crate::parser::{BootLine, BootLineKind};
use crate::setting::{
    coerce_bool, coerce_int, coerce_str, command_lines, command_param_is_truthy, overlay_lines,
    param_lines, Context, DelegatedOutput, Kind,
};
use crate::value::{to_float, Input, Value};

pub fn default(kind: &Kind, _name: &str, ctx: &dyn Context) -> Value {
    match kind {
        Kind::OverlayLoaded { .. } => Value::Bool(false),
        Kind::OverlayParamBool { default, .. } => Value::Bool(*default),
        Kind::OverlayParamInt { default, .. } => Value::Int(*default),
        Kind::OverlayParamStr { default, .. } => Value::Str(default.clone()),
        Kind::CommandBool { default, .. } => Value::Bool(*default),
        Kind::CommandInt { default, .. } => Value::Int(*default),
        Kind::CommandStr { default, .. } => Value::Str(default.clone()),
        Kind::CommandForceIgnore { .. } => Value::None,
        Kind::MaskMaster { .. } | Kind::MaskDummy { .. } => Value::Int(0),
        Kind::Filename { prefix_setting, default, .. }
        | Kind::IncludedFile { prefix_setting, default, .. } => {
            Value::Str(format!("{}{}", prefix_of(ctx, prefix_setting), default))
        }
        Kind::GpuMem => Value::Int(64),
        Kind::FirmwareFilename { prefix_setting } => {
            Value::Str(format!("{}{}", prefix_of(ctx, prefix_setting), firmware_name(ctx, "start", ".elf")))
        }
        Kind::FirmwareFixup { prefix_setting } => {
            Value::Str(format!("{}{}", prefix_of(ctx, prefix_setting), firmware_name(ctx, "fixup", ".dat")))
        }
        Kind::KernelAddress => {
            let is64 = ctx.get("boot.kernel.64bit").and_then(|v| v.as_bool()).unwrap_or(false);
            Value::Int(if is64 { 0x80000 } else { 0x8000 })
        }
        Kind::KernelFilename { prefix_setting } => {
            let is64 = ctx.get("boot.kernel.64bit").and_then(|v| v.as_bool()).unwrap_or(false);
            let name = if is64 {
                "kernel8.img"
            } else {
                match ctx.platform().board_type() {
                    Some(Model::Pi4) => "kernel7l.img",
                    Some(Model::Pi2) | Some(Model::Pi3) | Some(Model::Pi3Plus) => "kernel7.img",
                    _ => "kernel.img",
                }
            };
            Value::Str(format!("{}{}", prefix_of(ctx, prefix_setting), name))
        }
        Kind::SerialEnabled => {
            let model = ctx.platform().board_type();
            let constrained = matches!(
                model,
                Some(Model::Pi0W) | Some(Model::Pi3) | Some(Model::Pi3Plus) | Some(Model::Pi4)
            );
            if constrained {
                let bt = ctx.get("bluetooth.enabled").and_then(|v| v.as_bool()).unwrap_or(true);
                Value::Bool(!bt)
            } else {
                Value::Bool(true)
            }
        }
        Kind::SerialUart => Value::Int(0),
        Kind::BluetoothEnabled => {
            let model = ctx.platform().board_type();
            Value::Bool(matches!(
                model,
                Some(Model::Pi0W) | Some(Model::Pi3) | Some(Model::Pi3Plus) | Some(Model::Pi4)
            ))
        }
        Kind::CpuFreqMax => Value::Int(cpu_freq_max_default(ctx)),
        Kind::CpuFreqMin => {
            let force_turbo = ctx.get("cpu.turbo.force").and_then(|v| v.as_bool()).unwrap_or(false);
            if force_turbo {
                Value::Int(cpu_freq_max_default(ctx))
            } else {
                Value::Int(600)
            }
        }
        Kind::DisplayRotate { .. } => Value::Int(0),
        Kind::DisplayFlip { .. } => Value::Int(0),
        Kind::BootDelay2 => Value::Float(0.0),
        Kind::EdidIgnore { .. } => Value::Bool(false),
        Kind::InitramfsFilename => Value::Str("followkernel".to_string()),
        Kind::InitramfsAddress => Value::Str("followkernel".to_string()),
    }
}

fn cpu_freq_max_default(ctx: &dyn Context) -> i64 {
    match ctx.platform().board_type() {
        Some(Model::Pi4) => 1500,
        Some(Model::Pi3Plus) => 1400,
        Some(Model::Pi3) => 1200,
        Some(Model::Pi2) => 900,
        _ => 1000,
    }
}

/// The current value of a sibling `boot.prefix`-shaped setting, or ""
/// if unset. Shared by every `Kind` whose filename is concatenated with
/// `boot.prefix` (`Filename`, `IncludedFile`, `FirmwareFilename`,
/// `FirmwareFixup`, `KernelFilename`).
fn prefix_of(ctx: &dyn Context, prefix_setting: &str) -> String {
    ctx.get(prefix_setting).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

fn firmware_name(ctx: &dyn Context, stem: &str, ext: &str) -> String {
    let pi4 = ctx.platform().board_type() == Some(Model::Pi4);
    let camera = ctx.get("boot.firmware.camera").and_then(|v| v.as_bool()).unwrap_or(false);
    let debug = ctx.get("boot.firmware.debug").and_then(|v| v.as_bool()).unwrap_or(false);
    if pi4 {
        format!("{}4{}", stem, ext)
    } else if debug {
        format!("{}_db{}", stem, ext)
    } else if camera {
        format!("{}_x{}", stem, ext)
    } else {
        format!("{}{}", stem, ext)
    }
}

pub fn hint(kind: &Kind, name: &str, value: &Value, ctx: &dyn Context) -> Option<String> {
    match kind {
        Kind::GpuMem => Some("Mb".to_string()),
        Kind::CpuFreqMax | Kind::CpuFreqMin => Some("MHz".to_string()),
        Kind::DisplayRotate { .. } => value.as_int().map(|d| format!("{} degrees clockwise", d)),
        Kind::Filename { prefix_setting, .. }
        | Kind::IncludedFile { prefix_setting, .. }
        | Kind::FirmwareFilename { prefix_setting }
        | Kind::FirmwareFixup { prefix_setting }
        | Kind::KernelFilename { prefix_setting } => {
            let prefix = prefix_of(ctx, prefix_setting);
            if prefix.is_empty() {
                None
            } else {
                value.as_str().map(|v| format!("{:?} (boot.prefix-expanded)", v))
            }
        }
        _ if name == "video.hdmi0.group" => value.as_int().and_then(|v| {
            Some(
                match v {
                    0 => "auto, from EDID",
                    1 => "CEA",
                    2 => "DMT",
                    _ => return None,
                }
                .to_string(),
            )
        }),
        _ => None,
    }
}

fn parse_int_lenient(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<i64>().ok()
    }
}

pub fn extract(kind: &Kind, lines: &[BootLine]) -> Vec<(usize, Value)> {
    match kind {
        Kind::OverlayLoaded { overlay } => overlay_lines(lines, overlay)
            .into_iter()
            .map(|(i, _)| (i, Value::Bool(true)))
            .collect(),
        Kind::OverlayParamBool { overlay, param, default } => param_lines(lines, overlay, param)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Bool(command_param_is_truthy(&v).unwrap_or(*default))))
            .collect(),
        Kind::OverlayParamInt { overlay, param, default, .. } => param_lines(lines, overlay, param)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(*default))))
            .collect(),
        Kind::OverlayParamStr { overlay, param, .. } => param_lines(lines, overlay, param)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Str(v)))
            .collect(),
        Kind::CommandBool { commands, hdmi, default, invert } => {
            let names: Vec<&str> = commands.iter().map(String::as_str).collect();
            command_lines(lines, &names, *hdmi)
                .into_iter()
                .map(|(i, _, v)| {
                    let mut b = command_param_is_truthy(&v).unwrap_or(*default);
                    if *invert {
                        b = !b;
                    }
                    (i, Value::Bool(b))
                })
                .collect()
        }
        Kind::CommandInt { commands, hdmi, default, .. } => {
            let names: Vec<&str> = commands.iter().map(String::as_str).collect();
            command_lines(lines, &names, *hdmi)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(*default))))
                .collect()
        }
        Kind::CommandStr { commands, hdmi, .. } => {
            let names: Vec<&str> = commands.iter().map(String::as_str).collect();
            command_lines(lines, &names, *hdmi)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Str(v)))
                .collect()
        }
        Kind::CommandForceIgnore { force_command, ignore_command } => {
            let mut out = command_lines(lines, &[force_command.as_str()], None)
                .into_iter()
                .filter(|(_, _, v)| command_param_is_truthy(v).unwrap_or(false))
                .map(|(i, _, _)| (i, Value::Bool(true)))
                .collect::<Vec<_>>();
            out.extend(
                command_lines(lines, &[ignore_command.as_str()], None)
                    .into_iter()
                    .filter(|(_, _, v)| command_param_is_truthy(v).unwrap_or(false))
                    .map(|(i, _, _)| (i, Value::Bool(false))),
            );
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::MaskMaster { command, member, .. } => command_lines(lines, &[command.as_str()], None)
            .into_iter()
            .map(|(i, _, v)| {
                let raw = parse_int_lenient(&v).unwrap_or(0);
                (i, Value::Int((raw >> member.shift) & ((1i64 << member.width) - 1)))
            })
            .collect(),
        Kind::MaskDummy { command, member, .. } => command_lines(lines, &[command.as_str()], None)
            .into_iter()
            .map(|(i, _, v)| {
                let raw = parse_int_lenient(&v).unwrap_or(0);
                (i, Value::Int((raw >> member.shift) & ((1i64 << member.width) - 1)))
            })
            .collect(),
        Kind::Filename { command, .. } | Kind::IncludedFile { command, .. } => {
            command_lines(lines, &[command.as_str()], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Str(v)))
                .collect()
        }
        Kind::GpuMem => {
            let mut out = command_lines(lines, &["gpu_mem"], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(64))))
                .collect::<Vec<_>>();
            for cmd in ["gpu_mem_256", "gpu_mem_512", "gpu_mem_1024"] {
                out.extend(
                    command_lines(lines, &[cmd], None)
                        .into_iter()
                        .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(64)))),
                );
            }
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::FirmwareFilename { .. } => command_lines(lines, &["start_file"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Str(v)))
            .collect(),
        Kind::FirmwareFixup { .. } => command_lines(lines, &["fixup_file"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Str(v)))
            .collect(),
        Kind::KernelAddress => {
            let mut out = command_lines(lines, &["kernel_address"], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(0))))
                .collect::<Vec<_>>();
            // Open question preserved verbatim from the original source:
            // "kernel_old=0" has unclear intent; extraction still yields 0.
            out.extend(
                command_lines(lines, &["kernel_old"], None)
                    .into_iter()
                    .map(|(i, _, _)| (i, Value::Int(0))),
            );
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::KernelFilename { .. } => command_lines(lines, &["kernel"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Str(v)))
            .collect(),
        Kind::SerialEnabled => command_lines(lines, &["enable_uart"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Bool(command_param_is_truthy(&v).unwrap_or(true))))
            .collect(),
        Kind::SerialUart => {
            let mut out = overlay_lines(lines, "miniuart-bt")
                .into_iter()
                .map(|(i, _)| (i, Value::Int(1)))
                .collect::<Vec<_>>();
            out.extend(
                overlay_lines(lines, "pi3-miniuart-bt")
                    .into_iter()
                    .map(|(i, _)| (i, Value::Int(1))),
            );
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::BluetoothEnabled => {
            // Two conflicting overlays in the same file is an
            // explicitly preserved ambiguity: whichever appears last
            // in document order wins (the generic last-enabled-wins
            // fold in config.rs handles that; here we just surface
            // both candidates).
            let mut out = overlay_lines(lines, "disable-bt")
                .into_iter()
                .map(|(i, _)| (i, Value::Bool(false)))
                .collect::<Vec<_>>();
            for ov in ["miniuart-bt", "pi3-miniuart-bt"] {
                out.extend(overlay_lines(lines, ov).into_iter().map(|(i, _)| (i, Value::Bool(true))));
            }
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::CpuFreqMax => command_lines(lines, &["arm_freq"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(1000))))
            .collect(),
        Kind::CpuFreqMin => command_lines(lines, &["arm_freq_min"], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Int(parse_int_lenient(&v).unwrap_or(600))))
            .collect(),
        Kind::DisplayRotate { command, .. } => command_lines(lines, &[command.as_str()], None)
            .into_iter()
            .map(|(i, _, v)| {
                let raw = parse_int_lenient(&v).unwrap_or(0);
                (i, Value::Int((raw & 0x3) * 90))
            })
            .collect(),
        Kind::DisplayFlip { command, .. } => command_lines(lines, &[command.as_str()], None)
            .into_iter()
            .map(|(i, _, v)| {
                let raw = parse_int_lenient(&v).unwrap_or(0);
                (i, Value::Int((raw >> 16) & 0x3))
            })
            .collect(),
        Kind::BootDelay2 => {
            let mut out = command_lines(lines, &["boot_delay"], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Float(parse_int_lenient(&v).unwrap_or(0) as f64)))
                .collect::<Vec<_>>();
            out.extend(command_lines(lines, &["boot_delay_ms"], None).into_iter().map(|(i, _, v)| {
                (i, Value::Float(parse_int_lenient(&v).unwrap_or(0) as f64 / 1000.0))
            }));
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::EdidIgnore { command } => command_lines(lines, &[command.as_str()], None)
            .into_iter()
            .map(|(i, _, v)| (i, Value::Bool(parse_int_lenient(&v).unwrap_or(0) == 0xa5000080)))
            .collect(),
        Kind::InitramfsFilename => {
            let mut out = command_lines(lines, &["ramfsfile"], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Str(v)))
                .collect::<Vec<_>>();
            out.extend(lines.iter().enumerate().filter_map(|(i, l)| match &l.kind {
                BootLineKind::Command {
                    command,
                    param: crate::parser::CommandParam::FileAddr(fa),
                    ..
                } if command == "initramfs" => Some((i, Value::Str(fa.filename.clone()))),
                _ => None,
            }));
            out.sort_by_key(|(i, _)| *i);
            out
        }
        Kind::InitramfsAddress => {
            let mut out = command_lines(lines, &["ramfsaddr"], None)
                .into_iter()
                .map(|(i, _, v)| (i, Value::Str(v)))
                .collect::<Vec<_>>();
            out.extend(lines.iter().enumerate().filter_map(|(i, l)| match &l.kind {
                BootLineKind::Command {
                    command,
                    param: crate::parser::CommandParam::FileAddr(fa),
                    ..
                } if command == "initramfs" => Some((i, Value::Str(fa.address.clone()))),
                _ => None,
            }));
            out.sort_by_key(|(i, _)| *i);
            out
        }
    }
}

pub fn update(kind: &Kind, input: &Input, _ctx: &dyn Context) -> Result<Option<Value>> {
    Ok(match kind {
        Kind::OverlayLoaded { .. }
        | Kind::OverlayParamBool { .. }
        | Kind::CommandBool { .. }
        | Kind::CommandForceIgnore { .. }
        | Kind::SerialEnabled
        | Kind::BluetoothEnabled
        | Kind::EdidIgnore { .. } => coerce_bool(input)?.map(Value::Bool),
        Kind::OverlayParamInt { .. }
        | Kind::CommandInt { .. }
        | Kind::GpuMem
        | Kind::KernelAddress
        | Kind::SerialUart
        | Kind::CpuFreqMax
        | Kind::CpuFreqMin
        | Kind::DisplayRotate { .. }
        | Kind::DisplayFlip { .. } => coerce_int(input)?.map(Value::Int),
        // Width-1 mask members carry boolean semantics (e.g.
        // video.dpi.hsync.polarity), so accept "true"/"false"-shaped
        // input rather than forcing numeric strings.
        Kind::MaskMaster { member, .. } | Kind::MaskDummy { member, .. } => {
            if member.width == 1 {
                coerce_bool(input)?.map(|b| Value::Int(b as i64))
            } else {
                coerce_int(input)?.map(Value::Int)
            }
        }
        Kind::OverlayParamStr { .. }
        | Kind::CommandStr { .. }
        | Kind::Filename { .. }
        | Kind::IncludedFile { .. }
        | Kind::FirmwareFilename { .. }
        | Kind::FirmwareFixup { .. }
        | Kind::KernelFilename { .. }
        | Kind::InitramfsFilename
        | Kind::InitramfsAddress => coerce_str(input)?.map(Value::Str),
        Kind::BootDelay2 => to_float(input)?.map(Value::Float),
    })
}

pub fn validate(kind: &Kind, name: &str, value: &Value, ctx: &dyn Context) -> Result<(), String> {
    match kind {
        Kind::OverlayParamInt { valid, .. } | Kind::CommandInt { valid, .. } => {
            if let (Some((lo, hi)), Some(v)) = (valid, value.as_int()) {
                if v < *lo || v > *hi {
                    return Err(format!("must be between {} and {}", lo, hi));
                }
            }
            Ok(())
        }
        Kind::MaskMaster { member, .. } | Kind::MaskDummy { member, .. } => {
            if let Some(v) = value.as_int() {
                let max = (1i64 << member.width) - 1;
                if !(0..=max).contains(&v) {
                    return Err(format!("must be between 0 and {}", max));
                }
            }
            Ok(())
        }
        Kind::GpuMem => {
            let mem = ctx.platform().board_memory();
            let max = if mem <= 256 {
                192
            } else if mem <= 512 {
                448
            } else {
                944
            };
            if let Some(v) = value.as_int() {
                if v < 16 || v > max {
                    return Err(format!("must be between 16 and {}Mb for a {}Mb board", max, mem));
                }
            }
            Ok(())
        }
        Kind::SerialUart => {
            if value.as_int() == Some(1) {
                let bt = ctx.get("bluetooth.enabled").and_then(|v| v.as_bool()).unwrap_or(true);
                if !bt {
                    return Err("serial.uart cannot select the mini-UART while bluetooth.enabled is false".to_string());
                }
            }
            Ok(())
        }
        Kind::CpuFreqMin => {
            let max = ctx.get("cpu.freq.max").and_then(|v| v.as_int());
            if let (Some(min), Some(max)) = (value.as_int(), max) {
                if min > max {
                    return Err(format!("cpu.freq.min ({}) cannot exceed cpu.freq.max ({})", min, max));
                }
            }
            Ok(())
        }
        Kind::DisplayRotate { .. } => {
            if let Some(v) = value.as_int() {
                if ![0, 90, 180, 270].contains(&v) {
                    return Err("rotation must be one of 0, 90, 180, 270".to_string());
                }
            }
            Ok(())
        }
        _ if name == "video.hdmi.4kp60" => {
            if value.as_bool() == Some(true) {
                let tv = ctx.get("video.tv.enabled").and_then(|v| v.as_bool()).unwrap_or(false);
                if tv {
                    return Err("video.hdmi.4kp60 and video.tv.enabled cannot both be on".to_string());
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn output(kind: &Kind, _name: &str, value: &Value, ctx: &dyn Context) -> DelegatedOutput {
    match kind {
        Kind::OverlayLoaded { overlay } => {
            if value.as_bool() == Some(true) {
                DelegatedOutput::Emit(vec![format!("dtoverlay={}", overlay)])
            } else {
                DelegatedOutput::Emit(vec![])
            }
        }
        Kind::OverlayParamBool { overlay, param, .. } => {
            let v = if value.as_bool().unwrap_or(false) { "on" } else { "off" };
            DelegatedOutput::Emit(vec![render_param(overlay, param, v)])
        }
        Kind::OverlayParamInt { overlay, param, .. } => {
            DelegatedOutput::Emit(vec![render_param(overlay, param, &value.as_int().unwrap_or(0).to_string())])
        }
        Kind::OverlayParamStr { overlay, param, .. } => {
            DelegatedOutput::Emit(vec![render_param(overlay, param, value.as_str().unwrap_or(""))])
        }
        Kind::CommandBool { commands, invert, .. } => {
            let mut v = value.as_bool().unwrap_or(false);
            if *invert {
                v = !v;
            }
            DelegatedOutput::Emit(vec![format!("{}={}", commands[0], if v { 1 } else { 0 })])
        }
        Kind::CommandInt { commands, hex, .. } => {
            let v = value.as_int().unwrap_or(0);
            let text = if *hex { format!("0x{:x}", v) } else { v.to_string() };
            DelegatedOutput::Emit(vec![format!("{}={}", commands[0], text)])
        }
        Kind::CommandStr { commands, .. } => {
            DelegatedOutput::Emit(vec![format!("{}={}", commands[0], value.as_str().unwrap_or(""))])
        }
        Kind::CommandForceIgnore { force_command, ignore_command } => match value {
            Value::Bool(true) => DelegatedOutput::Emit(vec![format!("{}=1", force_command)]),
            Value::Bool(false) => DelegatedOutput::Emit(vec![format!("{}=1", ignore_command)]),
            _ => DelegatedOutput::Emit(vec![]),
        },
        Kind::MaskMaster { command, member, others } => {
            let mut combined = (value.as_int().unwrap_or(0) & ((1 << member.width) - 1)) << member.shift;
            for other in others {
                let v = ctx.get(&other.name).and_then(|v| v.as_int()).unwrap_or(0);
                combined |= (v & ((1 << other.width) - 1)) << other.shift;
            }
            DelegatedOutput::Emit(vec![format!("{}=0x{:x}", command, combined)])
        }
        Kind::MaskDummy { master, .. } => DelegatedOutput::Delegate(master.clone()),
        Kind::Filename { command, .. } | Kind::IncludedFile { command, .. } => {
            DelegatedOutput::Emit(vec![format!("{}={}", command, value.as_str().unwrap_or(""))])
        }
        Kind::GpuMem => DelegatedOutput::Emit(vec![format!("gpu_mem={}", value.as_int().unwrap_or(64))]),
        Kind::FirmwareFilename { .. } => {
            DelegatedOutput::Emit(vec![format!("start_file={}", value.as_str().unwrap_or(""))])
        }
        Kind::FirmwareFixup { .. } => {
            DelegatedOutput::Emit(vec![format!("fixup_file={}", value.as_str().unwrap_or(""))])
        }
        Kind::KernelAddress => {
            DelegatedOutput::Emit(vec![format!("kernel_address=0x{:x}", value.as_int().unwrap_or(0))])
        }
        Kind::KernelFilename { .. } => DelegatedOutput::Emit(vec![format!("kernel={}", value.as_str().unwrap_or(""))]),
        Kind::SerialEnabled => {
            DelegatedOutput::Emit(vec![format!("enable_uart={}", if value.as_bool().unwrap_or(true) { 1 } else { 0 })])
        }
        Kind::SerialUart => DelegatedOutput::Delegate("bluetooth.enabled".to_string()),
        Kind::BluetoothEnabled => {
            let uart = ctx.get("serial.uart").and_then(|v| v.as_int()).unwrap_or(0);
            if uart == 1 {
                DelegatedOutput::Emit(vec!["dtoverlay=miniuart-bt".to_string()])
            } else if value.as_bool() == Some(false) {
                DelegatedOutput::Emit(vec!["dtoverlay=disable-bt".to_string()])
            } else {
                DelegatedOutput::Emit(vec![])
            }
        }
        Kind::CpuFreqMax => DelegatedOutput::Emit(vec![format!("arm_freq={}", value.as_int().unwrap_or(0))]),
        Kind::CpuFreqMin => DelegatedOutput::Emit(vec![format!("arm_freq_min={}", value.as_int().unwrap_or(0))]),
        Kind::DisplayRotate { command, flip_setting } => {
            let code = value.as_int().unwrap_or(0) / 90;
            let flip = ctx.get(flip_setting).and_then(|v| v.as_int()).unwrap_or(0);
            let combined = (code & 0x3) | ((flip & 0x3) << 16);
            DelegatedOutput::Emit(vec![format!("{}=0x{:x}", command, combined)])
        }
        Kind::DisplayFlip { rotate_setting, .. } => DelegatedOutput::Delegate(rotate_setting.clone()),
        Kind::BootDelay2 => {
            let total = value.as_float().unwrap_or(0.0);
            let secs = total.trunc() as i64;
            let ms = ((total - total.trunc()) * 1000.0).round() as i64;
            DelegatedOutput::Emit(vec![format!("boot_delay={}", secs), format!("boot_delay_ms={}", ms)])
        }
        Kind::EdidIgnore { command } => {
            let code: u32 = if value.as_bool().unwrap_or(false) { 0xa5000080 } else { 0 };
            DelegatedOutput::Emit(vec![format!("{}=0x{:x}", command, code)])
        }
        Kind::InitramfsFilename => DelegatedOutput::Emit(vec![format!("ramfsfile={}", value.as_str().unwrap_or(""))]),
        Kind::InitramfsAddress => DelegatedOutput::Emit(vec![format!("ramfsaddr={}", value.as_str().unwrap_or(""))]),
    }
}

fn render_param(overlay: &str, param: &str, value: &str) -> String {
    if overlay == "base" {
        format!("dtparam={}={}", param, value)
    } else {
        format!("dtoverlay={}:{}={}", overlay, param, value)
    }
}

/// The name of the file an `IncludedFile`-kind setting's current value
/// refers to, if any -- used by `BootConfiguration` to register the
/// file with the parser so it contributes to the configuration hash.
pub fn included_filename(kind: &Kind, value: &Value) -> Option<String> {
    match kind {
        Kind::IncludedFile { .. } => value.as_str().map(str::to_string),
        _ => None,
    }
}

/// Builds the illustrative catalog: one or two settings per family,
/// enough to exercise every cross-dependency pattern the engine
/// supports. Order matters only for `key()`-based output sorting, not
/// for correctness, since lookups always go through `Context::get`.
pub fn build() -> Vec<crate::setting::Setting> {
    use crate::setting::{MaskMember, Setting};

    vec![
        Setting::new(
            "i2c.enabled",
            "Enables the ARM I2C bus.",
            Kind::OverlayParamBool { overlay: "base".into(), param: "i2c_arm".into(), default: false },
        ),
        Setting::new(
            "spi.enabled",
            "Enables the SPI bus.",
            Kind::OverlayParamBool { overlay: "base".into(), param: "spi".into(), default: false },
        ),
        Setting::new(
            "audio.enabled",
            "Enables the onboard audio output.",
            Kind::OverlayParamBool { overlay: "base".into(), param: "audio".into(), default: true },
        ),
        Setting::new(
            "watchdog.enabled",
            "Enables the hardware watchdog overlay.",
            Kind::OverlayLoaded { overlay: "watchdog".into() },
        ),
        Setting::new(
            "video.hdmi0.group",
            "The CEA/DMT group for HDMI output 0.",
            Kind::CommandInt {
                commands: vec!["hdmi_group".into()],
                hdmi: Some(0),
                default: 0,
                valid: Some((0, 2)),
                hex: false,
            },
        ),
        Setting::new(
            "video.hdmi0.mode",
            "The CEA/DMT mode for HDMI output 0.",
            Kind::CommandInt {
                commands: vec!["hdmi_mode".into()],
                hdmi: Some(0),
                default: 0,
                valid: Some((0, 86)),
                hex: false,
            },
        ),
        Setting::new(
            "video.dpi.enabled",
            "Enables the DPI (parallel RGB) display output.",
            Kind::CommandBool { commands: vec!["enable_dpi_lcd".into()], hdmi: None, default: false, invert: false },
        ),
        Setting::new(
            "video.dpi.format",
            "DPI output format, packed with rgb/hsync/vsync polarity.",
            Kind::MaskMaster {
                command: "dpi_output_format".into(),
                member: MaskMember { name: "video.dpi.format".into(), shift: 0, width: 8 },
                others: vec![
                    MaskMember { name: "video.dpi.rgb".into(), shift: 8, width: 4 },
                    MaskMember { name: "video.dpi.hsync.polarity".into(), shift: 12, width: 1 },
                ],
            },
        ),
        Setting::new(
            "video.dpi.rgb",
            "DPI RGB channel ordering, packed into dpi_output_format.",
            Kind::MaskDummy {
                command: "dpi_output_format".into(),
                master: "video.dpi.format".into(),
                member: MaskMember { name: "video.dpi.rgb".into(), shift: 8, width: 4 },
            },
        ),
        Setting::new(
            "video.dpi.hsync.polarity",
            "DPI horizontal sync polarity, packed into dpi_output_format.",
            Kind::MaskDummy {
                command: "dpi_output_format".into(),
                master: "video.dpi.format".into(),
                member: MaskMember { name: "video.dpi.hsync.polarity".into(), shift: 12, width: 1 },
            },
        ),
        Setting::new(
            "boot.prefix",
            "Directory prefix prepended to filename settings below.",
            Kind::CommandStr { commands: vec!["os_prefix".into()], hdmi: None, default: String::new() },
        ),
        Setting::new(
            "boot.kernel.64bit",
            "Boots the 64-bit kernel and firmware stage.",
            Kind::CommandBool { commands: vec!["arm_64bit".into()], hdmi: None, default: false, invert: false },
        ),
        Setting::new(
            "boot.kernel.filename",
            "The kernel image filename.",
            Kind::KernelFilename { prefix_setting: "boot.prefix".into() },
        ),
        Setting::new("boot.kernel.address", "The load address for the kernel image.", Kind::KernelAddress),
        Setting::new(
            "boot.cmdline",
            "The filename of the kernel command line file.",
            Kind::Filename { command: "cmdline".into(), prefix_setting: "boot.prefix".into(), default: "cmdline.txt".into() },
        ),
        Setting::new("boot.initramfs.filename", "The initramfs image filename.", Kind::InitramfsFilename),
        Setting::new("boot.initramfs.address", "The load address for the initramfs image.", Kind::InitramfsAddress),
        Setting::new(
            "boot.firmware.camera",
            "Reserves extra GPU memory for the camera stack.",
            Kind::CommandBool { commands: vec!["start_x".into()], hdmi: None, default: false, invert: false },
        ),
        Setting::new(
            "boot.firmware.debug",
            "Boots the debug build of the GPU firmware.",
            Kind::CommandBool { commands: vec!["avoid_warnings".into()], hdmi: None, default: false, invert: true },
        ),
        Setting::new(
            "boot.firmware.filename",
            "The GPU firmware image filename.",
            Kind::FirmwareFilename { prefix_setting: "boot.prefix".into() },
        ),
        Setting::new(
            "boot.firmware.fixup",
            "The GPU firmware fixup filename.",
            Kind::FirmwareFixup { prefix_setting: "boot.prefix".into() },
        ),
        Setting::new(
            "gpu.mem",
            "Memory (Mb) reserved for the GPU.",
            Kind::GpuMem,
        ),
        Setting::new("serial.enabled", "Enables the primary UART.", Kind::SerialEnabled),
        Setting::new("serial.uart", "Which UART serves as the primary UART (0=PL011, 1=mini-UART).", Kind::SerialUart),
        Setting::new("bluetooth.enabled", "Enables the onboard Bluetooth module.", Kind::BluetoothEnabled),
        Setting::new(
            "cpu.turbo.force",
            "Forces turbo frequencies at all times, ignoring thermal/load throttling.",
            Kind::CommandBool { commands: vec!["force_turbo".into()], hdmi: None, default: false, invert: false },
        ),
        Setting::new("cpu.freq.max", "Maximum ARM core frequency (MHz).", Kind::CpuFreqMax),
        Setting::new("cpu.freq.min", "Minimum ARM core frequency (MHz).", Kind::CpuFreqMin),
        Setting::new(
            "video.tv.enabled",
            "Enables composite TV output.",
            Kind::CommandForceIgnore { force_command: "enable_tvout".into(), ignore_command: "disable_tvout".into() },
        ),
        Setting::new(
            "video.hdmi.4kp60",
            "Enables 4Kp60 output on HDMI 0 (pi4 only); incompatible with TV output.",
            Kind::CommandBool { commands: vec!["hdmi_enable_4kp60".into()], hdmi: None, default: false, invert: false },
        ),
        Setting::new(
            "display.hdmi0.rotate",
            "Clockwise rotation (degrees) applied to HDMI output 0.",
            Kind::DisplayRotate { command: "display_hdmi_rotate".into(), flip_setting: "display.hdmi0.flip".into() },
        ),
        Setting::new(
            "display.hdmi0.flip",
            "Flip applied to HDMI output 0 (0=none, 1=horizontal, 2=vertical, 3=both).",
            Kind::DisplayFlip { command: "display_hdmi_rotate".into(), rotate_setting: "display.hdmi0.rotate".into() },
        ),
        Setting::new(
            "boot.delay",
            "Extra delay (seconds, fractional) before booting.",
            Kind::BootDelay2,
        ),
        Setting::new(
            "video.edid.ignore",
            "Ignores the attached display's EDID and uses the configured mode unconditionally.",
            Kind::EdidIgnore { command: "hdmi_ignore_edid".into() },
        ),
    ]
}

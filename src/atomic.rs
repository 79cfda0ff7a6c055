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

//! Atomic file replacement: write to a uniquely-named temporary sibling
//! of the target, then rename over it on success. Grounded on the
//! teacher's `src/live/util.rs` (`tempfile::Builder::tempfile_in` +
//! `persist`), generalized from a one-shot copy helper into the scoped
//! primitive every on-disk write in this crate goes through.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;

lazy_static! {
    static ref UMASK: Mutex<Option<u32>> = Mutex::new(None);
}

/// Returns the process umask, probing it exactly once. Reading the
/// umask on Unix requires briefly setting a new one and looking at what
/// comes back, which is racy against other threads changing it
/// concurrently; spec.md §5 restricts the probe to the main thread and
/// mandates caching the result for the process lifetime.
pub fn umask() -> Result<u32> {
    let mut guard = UMASK.lock().expect("umask mutex poisoned");
    if let Some(mask) = *guard {
        return Ok(mask);
    }
    if std::thread::current().name() != Some("main") {
        return Err(anyhow!(
            "umask probe must happen on the main thread before any other thread reads it"
        ));
    }
    let probe = nix::sys::stat::Mode::from_bits_truncate(0o022);
    let old = nix::sys::stat::umask(probe);
    nix::sys::stat::umask(old);
    let mask = old.bits() as u32;
    *guard = Some(mask);
    Ok(mask)
}

/// Writes `target` atomically: `write` receives a handle to a fresh
/// temporary file co-located with `target` (so the final rename stays
/// on the same filesystem); if it returns `Ok`, the temporary is
/// chmod'd to `0o666 & ~umask` and renamed over `target`. If it returns
/// `Err`, the temporary is discarded (unlinked on drop) and the target
/// is left untouched.
pub fn replace<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> Result<()>,
{
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".pibootctl-tmp-")
        .tempfile_in(dir)
        .with_context(|| format!("creating temporary file next to {}", target.display()))?;
    write(tmp.as_file_mut())
        .with_context(|| format!("writing temporary file for {}", target.display()))?;
    let mask = umask()?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o666 & !mask))
        .with_context(|| format!("setting permissions for {}", target.display()))?;
    tmp.persist(target)
        .map_err(|e| e.error)
        .with_context(|| format!("persisting {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn run_on_named_main_thread<F: FnOnce() + Send + 'static>(f: F) {
        // Tests don't run on a thread named "main"; spawn one that is,
        // so the umask probe's main-thread check is satisfied.
        std::thread::Builder::new()
            .name("main".to_string())
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn replace_writes_new_content_on_success() {
        run_on_named_main_thread(|| {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("config.txt");
            fs::write(&target, b"old").unwrap();
            replace(&target, |f| {
                f.write_all(b"new").map_err(Into::into)
            })
            .unwrap();
            assert_eq!(fs::read(&target).unwrap(), b"new");
        });
    }

    #[test]
    fn replace_leaves_target_untouched_on_error() {
        run_on_named_main_thread(|| {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("config.txt");
            fs::write(&target, b"old").unwrap();
            let result = replace(&target, |_f| Err(anyhow!("boom")));
            assert!(result.is_err());
            assert_eq!(fs::read(&target).unwrap(), b"old");
        });
    }

    #[test]
    fn umask_is_cached_after_first_probe() {
        run_on_named_main_thread(|| {
            let first = umask().unwrap();
            let second = umask().unwrap();
            assert_eq!(first, second);
        });
    }
}

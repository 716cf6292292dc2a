//! Library relocation into the bundle directory.

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::paths::PrefixFilter;

/// Link-path template used when none is given: resolve next to the loading binary.
pub const DEFAULT_LINK_PATH: &str = "@loader_path";

/// A library copied into the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    /// Absolute path the library was referenced by.
    pub original: PathBuf,
    /// Reference that replaces `original`, e.g. `@loader_path/libfoo.dylib`.
    pub link: PathBuf,
    /// Where the copy now lives.
    pub copied_to: PathBuf,
}

impl Move {
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.copied_to
            .file_name()
            .unwrap_or(self.copied_to.as_os_str())
    }
}

/// Add the owner write bit so the copy can be patched afterwards.
///
/// Package managers often install libraries as 0444.
pub fn make_writable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

/// Copy every library whose folder lies under one of `prefixes` into `dest`.
///
/// Existing files in `dest` are overwritten. Each library produces at most one
/// move, for the first matching prefix. Libraries are visited in the set's
/// order, so the returned moves are sorted by original path.
pub fn consolidate_libraries<'a, I>(
    libs: I,
    prefixes: &PrefixFilter,
    dest: &Path,
    link_path: &Path,
) -> Result<Vec<Move>>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    if !dest.is_dir() {
        bail!(
            "Destination directory does not exist: {}",
            dest.display()
        );
    }

    let mut moved = Vec::new();

    for lib in libs {
        let (Some(folder), Some(name)) = (lib.parent(), lib.file_name()) else {
            continue;
        };
        if !prefixes.matches(folder) {
            continue;
        }

        let target = dest.join(name);
        if is_same_file(lib, &target) {
            info!("{} is already in {}", lib.display(), dest.display());
        } else {
            info!("Copying {} to {}", lib.display(), target.display());
            fs::copy(lib, &target).with_context(|| {
                format!("Failed to copy {} to {}", lib.display(), target.display())
            })?;
        }
        make_writable(&target)?;

        moved.push(Move {
            original: lib.clone(),
            link: link_path.join(name),
            copied_to: target,
        });
    }

    info!("Moved: {:?}", moved.iter().map(|m| &m.original).collect::<Vec<_>>());
    Ok(moved)
}

/// Copying a file onto itself truncates it.
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

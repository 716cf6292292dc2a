//! Mach-O dependency discovery using otool.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::paths::PrefixFilter;

/// Lists the direct shared-library dependencies of a binary.
pub trait DependencyLister {
    fn dependencies(&self, binary_path: &Path) -> Result<Vec<PathBuf>>;

    /// Whether a dependency reference names something `dependencies` can open.
    ///
    /// Loader-relative references (`@rpath/...`) are resolved by dyld at load
    /// time, and system libraries on macOS 11+ exist only in the dyld shared
    /// cache, so neither is on disk.
    fn can_inspect(&self, lib: &Path) -> bool {
        lib.is_absolute() && lib.exists()
    }
}

/// `otool -L` wrapper.
#[derive(Debug, Clone)]
pub struct Otool {
    program: PathBuf,
}

impl Otool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Otool {
    fn default() -> Self {
        Self::new("otool")
    }
}

impl DependencyLister for Otool {
    fn dependencies(&self, binary_path: &Path) -> Result<Vec<PathBuf>> {
        get_library_dependencies(&self.program, binary_path)
    }
}

/// Extract the load commands of a Mach-O binary using `otool -L`.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist
/// - `otool` cannot be started (install the Xcode command line tools)
/// - `otool` exits unsuccessfully for reasons other than "not an object file"
///
/// Returns `Ok(Vec::new())` if the file is not a Mach-O object.
#[must_use = "library dependencies should be processed"]
pub fn get_library_dependencies(otool: &Path, binary_path: &Path) -> Result<Vec<PathBuf>> {
    if !binary_path.exists() {
        bail!("File does not exist: {}", binary_path.display());
    }

    let output = Command::new(otool)
        .arg("-L")
        .arg(binary_path)
        .output()
        .with_context(|| {
            format!(
                "{} could not be started - install the Xcode command line tools",
                otool.display()
            )
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_object_file(&stdout) || is_not_object_file(&stderr) {
            return Ok(Vec::new());
        }
        bail!(
            "{} failed on {}: {}",
            otool.display(),
            binary_path.display(),
            stderr.trim()
        );
    }

    // otool prints the complaint on stdout and still exits 0 on some releases
    if is_not_object_file(&stdout) {
        return Ok(Vec::new());
    }

    Ok(parse_otool_output(&stdout).collect())
}

fn is_not_object_file(text: &str) -> bool {
    text.contains("is not an object file")
}

/// Parse `otool -L` output into dependency paths.
///
/// Example otool output:
/// ```text
/// /Applications/App.app/Contents/MacOS/App:
/// 	/opt/local/lib/libfoo.dylib (compatibility version 1.0.0, current version 1.2.0)
/// 	/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1311.0.0)
/// ```
///
/// Every tab-indented line names one dependency: the text after the tab, up
/// to the first space.
pub fn parse_otool_output(output: &str) -> impl Iterator<Item = PathBuf> + '_ {
    output.lines().filter_map(|line| {
        let entry = line.strip_prefix('\t')?;
        let path = entry.split(' ').next()?;
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    })
}

/// How far the dependency walk goes from the root binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Follow dependencies until the set is closed.
    Recursive,
    /// Inspect only the root; its direct dependencies are collected but not expanded.
    #[default]
    DirectOnly,
}

impl Traversal {
    pub fn from_recurse_flag(recurse: bool) -> Self {
        if recurse {
            Self::Recursive
        } else {
            Self::DirectOnly
        }
    }
}

/// Collect the dependency set of `root`, including `root` itself.
///
/// When a `cleaner` is given, only dependencies it accepts enter the set (and
/// are therefore walked). References the lister cannot open, such as
/// `@rpath/libfoo.dylib` or libraries living in the dyld shared cache, are
/// collected but never inspected. A missing `root` is still an error.
pub fn get_all_dependencies(
    lister: &dyn DependencyLister,
    root: &Path,
    traversal: Traversal,
    cleaner: Option<&PrefixFilter>,
) -> Result<BTreeSet<PathBuf>> {
    let mut done = BTreeSet::new();
    let mut left = BTreeSet::from([root.to_path_buf()]);

    while let Some(lib) = left.pop_first() {
        let is_root = lib.as_path() == root;
        done.insert(lib.clone());

        if !is_root && (traversal == Traversal::DirectOnly || !lister.can_inspect(&lib)) {
            debug!("Not inspecting {}", lib.display());
            continue;
        }

        info!("Inspecting {}", lib.display());
        let mut deps: BTreeSet<PathBuf> = lister
            .dependencies(&lib)
            .with_context(|| format!("Failed to list dependencies of {}", lib.display()))?
            .into_iter()
            .collect();
        if let Some(cleaner) = cleaner {
            deps = cleaner.clean(&deps);
        }
        debug!("     Got: {:?}", deps);

        left.extend(deps.into_iter().filter(|d| !done.contains(d)));
    }

    Ok(done)
}

//! Install-name rewriting using install_name_tool.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::copy::Move;

/// Edits the install names embedded in a Mach-O file.
pub trait InstallNamePatcher {
    /// Replace the load reference `old` with `new` inside `target`.
    fn change(&self, old: &Path, new: &Path, target: &Path) -> Result<()>;

    /// Set the install name `target` reports for itself.
    fn set_id(&self, id: &OsStr, target: &Path) -> Result<()>;
}

/// `install_name_tool` wrapper.
///
/// `-change` leaves the target untouched when it has no `old` reference, so
/// patching every target for every move is safe.
#[derive(Debug, Clone)]
pub struct InstallNameTool {
    program: PathBuf,
}

impl InstallNameTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&OsStr]) -> Result<()> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .with_context(|| {
                format!(
                    "{} could not be started - install the Xcode command line tools",
                    self.program.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl Default for InstallNameTool {
    fn default() -> Self {
        Self::new("install_name_tool")
    }
}

impl InstallNamePatcher for InstallNameTool {
    fn change(&self, old: &Path, new: &Path, target: &Path) -> Result<()> {
        self.run(&[
            OsStr::new("-change"),
            old.as_os_str(),
            new.as_os_str(),
            target.as_os_str(),
        ])
    }

    fn set_id(&self, id: &OsStr, target: &Path) -> Result<()> {
        self.run(&[OsStr::new("-id"), id, target.as_os_str()])
    }
}

/// Which patch a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    Change { old: PathBuf, new: PathBuf },
    SetId { id: PathBuf },
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Change { old, new } => {
                write!(f, "change {} -> {}", old.display(), new.display())
            }
            Self::SetId { id } => write!(f, "set id {}", id.display()),
        }
    }
}

/// One patch that did not apply.
#[derive(Debug, Clone)]
pub struct PatchFailure {
    pub target: PathBuf,
    pub operation: PatchOperation,
    pub message: String,
}

impl fmt::Display for PatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.target.display(), self.operation, self.message)
    }
}

/// Outcome of a batch of patches.
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    pub applied: usize,
    pub failures: Vec<PatchFailure>,
}

impl RewriteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: RewriteReport) {
        self.applied += other.applied;
        self.failures.extend(other.failures);
    }

    fn record(&mut self, target: &Path, operation: PatchOperation, result: Result<()>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(e) => {
                let failure = PatchFailure {
                    target: target.to_path_buf(),
                    operation,
                    message: format!("{e:#}"),
                };
                warn!("Patch failed: {}", failure);
                self.failures.push(failure);
            }
        }
    }
}

/// Point every target at the relocated copies.
///
/// Issues one `change` per (move, target) pair. A failed patch is recorded
/// and the batch continues.
pub fn rewrite_references<'a, I>(
    patcher: &dyn InstallNamePatcher,
    targets: I,
    moves: &[Move],
) -> RewriteReport
where
    I: IntoIterator<Item = &'a PathBuf> + Clone,
{
    let mut report = RewriteReport::default();
    for mv in moves {
        for target in targets.clone() {
            info!(
                "Updating {} to reflect move of {}",
                target.display(),
                mv.link.display()
            );
            let result = patcher.change(&mv.original, &mv.link, target);
            report.record(
                target,
                PatchOperation::Change {
                    old: mv.original.clone(),
                    new: mv.link.clone(),
                },
                result,
            );
        }
    }
    report
}

/// Give each relocated copy its own file name as install name.
pub fn rewrite_ids(patcher: &dyn InstallNamePatcher, moves: &[Move]) -> RewriteReport {
    let mut report = RewriteReport::default();
    for mv in moves {
        let id = mv.file_name();
        info!(
            "Updating {} with name {}",
            mv.original.display(),
            id.to_string_lossy()
        );
        let result = patcher.set_id(id, &mv.copied_to);
        report.record(
            &mv.copied_to,
            PatchOperation::SetId {
                id: PathBuf::from(id),
            },
            result,
        );
    }
    report
}

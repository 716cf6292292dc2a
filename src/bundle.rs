//! The discover → filter → copy → rewrite pipeline.

use anyhow::{Context, Result};
use log::info;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::analyze::{get_all_dependencies, DependencyLister, Otool, Traversal};
use crate::copy::{consolidate_libraries, Move, DEFAULT_LINK_PATH};
use crate::paths::{default_prefixes, PrefixFilter};
use crate::rewrite::{
    rewrite_ids, rewrite_references, InstallNamePatcher, InstallNameTool, RewriteReport,
};

/// Everything one bundling run needs.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Binary whose dependencies are bundled.
    pub root: PathBuf,
    /// Install prefixes whose libraries get relocated.
    pub prefixes: Vec<PathBuf>,
    /// Directory receiving the copies.
    pub dest: PathBuf,
    /// Prefix of the rewritten references.
    pub link_path: PathBuf,
    pub traversal: Traversal,
    /// Also set each copy's own install name.
    pub update_ids: bool,
    pub otool: PathBuf,
    pub install_name_tool: PathBuf,
}

impl BundleConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefixes: default_prefixes(),
            dest: PathBuf::from("."),
            link_path: PathBuf::from(DEFAULT_LINK_PATH),
            traversal: Traversal::default(),
            update_ids: false,
            otool: PathBuf::from("otool"),
            install_name_tool: PathBuf::from("install_name_tool"),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct BundleSummary {
    /// Closed dependency set, root included.
    pub libraries: BTreeSet<PathBuf>,
    pub moves: Vec<Move>,
    pub references: RewriteReport,
    /// `None` when id rewriting was not requested.
    pub ids: Option<RewriteReport>,
}

impl BundleSummary {
    pub fn is_success(&self) -> bool {
        self.references.is_success() && self.ids.as_ref().map_or(true, RewriteReport::is_success)
    }

    pub fn failure_count(&self) -> usize {
        self.references.failures.len() + self.ids.as_ref().map_or(0, |r| r.failures.len())
    }
}

/// Run the pipeline with the real `otool` and `install_name_tool`.
pub fn bundle(config: &BundleConfig) -> Result<BundleSummary> {
    let lister = Otool::new(&config.otool);
    let patcher = InstallNameTool::new(&config.install_name_tool);
    bundle_with(config, &lister, &patcher)
}

/// Run the pipeline with the given collaborators.
///
/// Discovery and copying abort on the first error. Patch failures are
/// collected in the summary instead.
pub fn bundle_with(
    config: &BundleConfig,
    lister: &dyn DependencyLister,
    patcher: &dyn InstallNamePatcher,
) -> Result<BundleSummary> {
    let filter = PrefixFilter::new(config.prefixes.iter().cloned());
    info!(
        "Bundling {} (prefixes: {:?})",
        config.root.display(),
        filter.prefixes()
    );

    let libraries = get_all_dependencies(lister, &config.root, config.traversal, Some(&filter))
        .with_context(|| format!("Failed to walk dependencies of {}", config.root.display()))?;

    let moves = consolidate_libraries(&libraries, &filter, &config.dest, &config.link_path)?;

    let targets = rewrite_targets(&config.root, &moves);
    let references = rewrite_references(patcher, &targets, &moves);

    let ids = config.update_ids.then(|| rewrite_ids(patcher, &moves));

    Ok(BundleSummary {
        libraries,
        moves,
        references,
        ids,
    })
}

/// The root binary plus every relocated copy. Originals are never patched,
/// so a root that was itself relocated is only patched through its copy.
fn rewrite_targets(root: &Path, moves: &[Move]) -> BTreeSet<PathBuf> {
    let mut targets: BTreeSet<PathBuf> = moves.iter().map(|m| m.copied_to.clone()).collect();
    if !moves.iter().any(|m| m.original == root) {
        targets.insert(root.to_path_buf());
    }
    targets
}

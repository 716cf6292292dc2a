//! Mach-O dependency bundling.
//!
//! Walks a binary's dynamic-library graph with `otool -L`, copies the
//! libraries that live under chosen install prefixes next to it, and rewrites
//! install names with `install_name_tool` so the bundle loads its copies via
//! `@loader_path`.

mod analyze;
mod bundle;
mod copy;
mod paths;
mod rewrite;

pub use analyze::{
    get_all_dependencies, get_library_dependencies, parse_otool_output, DependencyLister, Otool,
    Traversal,
};
pub use bundle::{bundle, bundle_with, BundleConfig, BundleSummary};
pub use copy::{consolidate_libraries, make_writable, Move, DEFAULT_LINK_PATH};
pub use paths::{default_prefixes, PrefixFilter, DEFAULT_LIBRARY_PREFIX};
pub use rewrite::{
    rewrite_ids, rewrite_references, InstallNamePatcher, InstallNameTool, PatchFailure,
    PatchOperation, RewriteReport,
};

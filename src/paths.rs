//! Install-prefix matching.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Prefix used when the caller names no library directories (MacPorts).
pub const DEFAULT_LIBRARY_PREFIX: &str = "/opt/local/lib";

/// Fresh default prefix list for one invocation.
#[must_use]
pub fn default_prefixes() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_LIBRARY_PREFIX)]
}

/// Keeps only library references that live under one of a set of prefixes.
///
/// Matching is done on path components, so `/opt/local/lib` accepts
/// `/opt/local/lib/libz.dylib` but not `/opt/local/lib2/libz.dylib`.
/// An empty filter accepts nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixFilter {
    prefixes: Vec<PathBuf>,
}

impl PrefixFilter {
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Returns the first prefix that `path` lives under.
    #[must_use]
    pub fn matching_prefix(&self, path: &Path) -> Option<&Path> {
        self.prefixes
            .iter()
            .map(PathBuf::as_path)
            .find(|prefix| path.starts_with(prefix))
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.matching_prefix(path).is_some()
    }

    /// Subset of `paths` accepted by this filter.
    #[must_use = "cleaned set should be used"]
    pub fn clean<'a, I>(&self, paths: I) -> BTreeSet<PathBuf>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        paths
            .into_iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect()
    }
}

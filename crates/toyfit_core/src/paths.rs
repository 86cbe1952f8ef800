//! Location of persisted fit results and toy stores under a data directory.

use std::path::{Path, PathBuf};

const FIT_RESULTS_DIR: &str = "fit-results";
const TOYS_DIR: &str = "toys";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/fit-results/<name>.yaml`
    pub fn fit_result(&self, name: &str) -> PathBuf {
        self.root.join(FIT_RESULTS_DIR).join(format!("{name}.yaml"))
    }

    /// `<root>/toys/<name>`
    pub fn toy_store(&self, name: &str) -> PathBuf {
        self.root.join(TOYS_DIR).join(name)
    }

    /// Same layout rooted at `link_from`, where data is written when linking
    pub fn linked_toy_store(link_from: &Path, name: &str) -> PathBuf {
        link_from.join(TOYS_DIR).join(name)
    }
}

//! Which version groups may be deleted
//!
//! Two protections apply, in order:
//!
//! 1. Scope. `remove-old` drops the newest version from the candidate set
//!    before anything else looks at it. Force does not change this.
//! 2. Enabled image. A candidate group that holds the enabled image is
//!    skipped as a whole unless force is set. One matching image protects
//!    every image in its group; groups are never partially torn down.

use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::catalog::{ImageCatalog, VersionGroup};

/// Which installed versions a removal considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalScope {
    /// Every version except the newest
    Old,
    /// Every version
    All,
}

impl RemovalScope {
    pub fn candidates(self, catalog: &ImageCatalog) -> Vec<VersionGroup> {
        match self {
            RemovalScope::Old => remove_old_candidates(catalog),
            RemovalScope::All => remove_all_candidates(catalog),
        }
    }
}

impl fmt::Display for RemovalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalScope::Old => f.write_str("old versions"),
            RemovalScope::All => f.write_str("all versions"),
        }
    }
}

/// Every group except the single highest version
pub fn remove_old_candidates(catalog: &ImageCatalog) -> Vec<VersionGroup> {
    let newest = catalog.latest_version();
    catalog
        .groups()
        .filter(|group| Some(group.version) != newest)
        .cloned()
        .collect()
}

/// Every group
pub fn remove_all_candidates(catalog: &ImageCatalog) -> Vec<VersionGroup> {
    catalog.groups().cloned().collect()
}

/// A group left in place because it holds the enabled image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalWarning {
    pub version: u64,
    pub enabled_image_id: String,
    pub skipped_image_ids: Vec<String>,
}

impl fmt::Display for RemovalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skipping version {} ({}): it contains the enabled image {}; use --force to remove it anyway",
            self.version,
            self.skipped_image_ids.join(", "),
            self.enabled_image_id
        )
    }
}

/// Groups cleared for deletion plus the groups skipped on the way
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalSelection {
    pub eligible: Vec<VersionGroup>,
    pub warnings: Vec<RemovalWarning>,
}

impl RemovalSelection {
    /// Image ids in the order they would be removed
    pub fn image_ids(&self) -> Vec<String> {
        self.eligible
            .iter()
            .flat_map(|group| group.image_ids())
            .collect()
    }
}

/// Decide group by group whether deletion is allowed
pub fn select_for_removal(
    groups: Vec<VersionGroup>,
    enabled_id: Option<&str>,
    force: bool,
) -> RemovalSelection {
    let mut selection = RemovalSelection::default();

    for group in groups {
        let protected_by = enabled_id.filter(|id| !force && group.contains(id));

        match protected_by {
            Some(enabled) => {
                let warning = RemovalWarning {
                    version: group.version,
                    enabled_image_id: enabled.to_string(),
                    skipped_image_ids: group.image_ids(),
                };
                warn!("{}", warning);
                selection.warnings.push(warning);
            }
            None => selection.eligible.push(group),
        }
    }

    selection
}

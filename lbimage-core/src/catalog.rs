//! Installed images indexed by version
//!
//! The catalog is a snapshot: it is built from a single registry listing when
//! the tool starts and is never refreshed. Every operation in a run reads
//! the same snapshot.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ApplianceSettings;
use crate::error::{LifecycleError, Result};
use crate::image::{Image, ImageRecord};
use crate::registry::RegistryClient;
use crate::version::VersionPattern;

/// All images sharing one derived version number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionGroup {
    pub version: u64,
    pub images: Vec<Image>,
}

impl VersionGroup {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            images: Vec::new(),
        }
    }

    /// Whether any image in the group has this id
    pub fn contains(&self, image_id: &str) -> bool {
        self.images.iter().any(|image| image.id == image_id)
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.images.iter().map(|image| image.id.clone()).collect()
    }
}

/// Version groups keyed by version
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    groups: BTreeMap<u64, VersionGroup>,
}

impl ImageCatalog {
    /// Query the registry once and index this appliance's images
    pub async fn load<C>(client: &C, settings: &ApplianceSettings) -> Result<Self>
    where
        C: RegistryClient + ?Sized,
    {
        let pattern = VersionPattern::new(&settings.bucket_prefix)?;
        let records = client
            .list_images(&settings.location_filter)
            .await
            .map_err(|source| LifecycleError::query("installed images", source))?;

        let catalog = Self::from_records(records, &pattern);
        debug!(
            "Catalog built from {}: {} image(s) across {} version(s)",
            client.name(),
            catalog.image_count(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Group records by the version parsed from their location
    pub fn from_records(records: Vec<ImageRecord>, pattern: &VersionPattern) -> Self {
        let mut groups: BTreeMap<u64, VersionGroup> = BTreeMap::new();

        for record in records {
            let image = Image::from_record(record, pattern);
            groups
                .entry(image.version)
                .or_insert_with(|| VersionGroup::new(image.version))
                .images
                .push(image);
        }

        Self { groups }
    }

    /// Highest installed version
    pub fn latest_version(&self) -> Option<u64> {
        self.groups.keys().next_back().copied()
    }

    pub fn get(&self, version: u64) -> Option<&VersionGroup> {
        self.groups.get(&version)
    }

    /// Groups in ascending version order
    pub fn groups(&self) -> impl Iterator<Item = &VersionGroup> {
        self.groups.values()
    }

    /// Version of the image with this id, if it is installed
    pub fn version_of(&self, image_id: &str) -> Option<u64> {
        self.groups
            .values()
            .find(|group| group.contains(image_id))
            .map(|group| group.version)
    }

    pub fn contains_image(&self, image_id: &str) -> bool {
        self.version_of(image_id).is_some()
    }

    /// Number of versions
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.groups.values().map(|group| group.images.len()).sum()
    }
}

//! Registry client - the boundary to the cloud image registry
//!
//! Everything the lifecycle does to the outside world goes through
//! [`RegistryClient`]. Each method is one blocking operation against the
//! registry or the local filesystem, attempted exactly once.
//!
//! Implementations:
//! - [`Euca2oolsClient`]: drives the euca2ools command line tools
//! - test fakes (see `tests/common`)

mod archive;
mod euca2ools;
pub mod output;
mod runner;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::image::{BundleLocation, ImageRecord};

pub use archive::{extract_image, remove_extracted};
pub use euca2ools::{Euca2oolsClient, REQUIRED_TOOLS};
pub use runner::{ToolOutput, ToolRunner};

/// Upload a local image file into a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    pub bucket: String,
    pub image_path: PathBuf,
}

/// Register an uploaded manifest as an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub manifest_path: String,
    pub name: String,
    pub description: String,
    pub virtualization_type: String,
}

/// Operations the lifecycle needs from the image registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Images whose manifest location matches `location_filter`
    async fn list_images(&self, location_filter: &str) -> Result<Vec<ImageRecord>, RegistryError>;

    /// Raw textual value of a registry property
    async fn get_property(&self, name: &str) -> Result<String, RegistryError>;

    async fn set_property(&self, name: &str, value: &str) -> Result<(), RegistryError>;

    /// Unpack a tarball and return the path of the image file inside it
    async fn decompress(&self, tarball: &Path) -> Result<PathBuf, RegistryError>;

    /// Bundle and upload an image; returns the manifest path
    async fn bundle_and_upload(&self, request: &BundleRequest) -> Result<String, RegistryError>;

    /// Register a manifest; returns the new image id
    async fn register(&self, request: &RegisterRequest) -> Result<String, RegistryError>;

    async fn deregister(&self, image_id: &str) -> Result<(), RegistryError>;

    async fn delete_bundle(&self, location: &BundleLocation) -> Result<(), RegistryError>;

    async fn delete_local_file(&self, path: &Path) -> Result<(), RegistryError>;

    /// Command an operator can run by hand to set a property
    fn manual_set_property_command(&self, name: &str, value: &str) -> String;

    /// Client identifier for logging
    fn name(&self) -> &'static str;
}

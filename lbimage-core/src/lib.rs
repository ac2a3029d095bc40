//! Load balancer image lifecycle
//!
//! Tracks the versioned load balancer image bundles installed in a cloud
//! image registry: discovers what is installed, allocates the next version,
//! installs and enables new bundles, and removes old ones without deleting
//! the enabled image by accident.
//!
//! # Architecture
//!
//! ```text
//! RegistryClient (euca2ools)
//!     │ list images (once)
//!     ▼
//! ImageCatalog ──► next_version
//!     │
//!     ▼
//! RemovalScope ──► select_for_removal ◄── enabled image id
//!     │
//!     ▼
//! LifecycleManager ──► deregister / delete bundle / register / set property
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod policy;
pub mod registry;
pub mod version;

pub use catalog::{ImageCatalog, VersionGroup};
pub use config::{ApplianceSettings, LbImageConfig, RegistryConfig, ToolSettings};
pub use error::{InstallStep, LifecycleError, ParseError, RegistryError, Result};
pub use image::{BundleLocation, Image, ImageRecord};
pub use lifecycle::{
    InstallOutcome, Inventory, LifecycleManager, RemovalFailure, RemovalOptions, RemovalReport,
    RemovalStep,
};
pub use policy::{RemovalScope, RemovalSelection, RemovalWarning};
pub use registry::{BundleRequest, Euca2oolsClient, RegisterRequest, RegistryClient};
pub use version::{next_version, BucketVersion, VersionPattern};

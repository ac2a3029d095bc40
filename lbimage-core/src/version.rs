//! Version numbers derived from bucket names
//!
//! Bundles are uploaded into buckets named `<prefix>-v<N>`. Older installs
//! used `_` as the separator, and some predate versioning altogether. A
//! bucket that does not carry a version is not an error: it sorts as
//! version 0 so it is always the oldest group and never blocks allocation.

use regex::Regex;

use crate::catalog::ImageCatalog;
use crate::error::{LifecycleError, Result};

/// Version read from a bucket name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketVersion {
    Versioned(u64),
    /// Legacy bucket without a `-v<N>` suffix
    Unversioned,
}

impl BucketVersion {
    /// Numeric version; unversioned buckets are version 0
    pub fn number(self) -> u64 {
        match self {
            BucketVersion::Versioned(n) => n,
            BucketVersion::Unversioned => 0,
        }
    }
}

/// Matches `<prefix>[-_]v<digits>` at the start of a bucket name
#[derive(Debug, Clone)]
pub struct VersionPattern {
    regex: Regex,
}

impl VersionPattern {
    pub fn new(bucket_prefix: &str) -> std::result::Result<Self, regex::Error> {
        let regex = Regex::new(&format!(r"^{}[-_]v(\d+)", regex::escape(bucket_prefix)))?;
        Ok(Self { regex })
    }

    /// Read the version from the bucket part of an image location
    pub fn parse(&self, location: &str) -> BucketVersion {
        let bucket = location.split('/').next().unwrap_or(location);

        self.regex
            .captures(bucket)
            .and_then(|captures| captures[1].parse::<u64>().ok())
            .map_or(BucketVersion::Unversioned, BucketVersion::Versioned)
    }
}

/// Next version to allocate: one past the highest installed, or 1
///
/// Versions are never reused, so gaps left by removals stay gaps.
pub fn next_version(catalog: &ImageCatalog) -> Result<u64> {
    match catalog.latest_version() {
        None => Ok(1),
        Some(latest) => latest
            .checked_add(1)
            .ok_or(LifecycleError::VersionExhausted { latest }),
    }
}

/// Bucket name for a version, e.g. `loadbalancer-v4`
pub fn bucket_name(bucket_prefix: &str, version: u64) -> String {
    format!("{bucket_prefix}-v{version}")
}

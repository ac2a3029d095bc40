//! Image records and bundle locations

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ParseError;
use crate::version::VersionPattern;

/// `<bucket>/<prefix>.manifest.xml`
static LOCATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)/(.+)\.manifest\.xml$").expect("location pattern is valid"));

/// An image as reported by the registry, before its version is derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub location: String,
    pub description: Option<String>,
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A registered bundle with its version derived once from the bucket name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: String,
    pub location: String,
    pub description: Option<String>,
    pub version: u64,
}

impl Image {
    pub fn from_record(record: ImageRecord, pattern: &VersionPattern) -> Self {
        let version = pattern.parse(&record.location).number();
        Self {
            id: record.id,
            location: record.location,
            description: record.description,
            version,
        }
    }

    /// Bucket and prefix of this image's bundle
    pub fn bundle_location(&self) -> Result<BundleLocation, ParseError> {
        BundleLocation::parse(&self.location)
    }
}

/// Bucket and prefix identifying an uploaded bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleLocation {
    pub bucket: String,
    pub prefix: String,
}

impl BundleLocation {
    /// Split `bucket/prefix.manifest.xml` into its parts
    pub fn parse(location: &str) -> Result<Self, ParseError> {
        let captures = LOCATION_PATTERN
            .captures(location)
            .ok_or_else(|| ParseError::Location {
                location: location.to_string(),
            })?;

        Ok(Self {
            bucket: captures[1].to_string(),
            prefix: captures[2].to_string(),
        })
    }
}

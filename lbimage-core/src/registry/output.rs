//! Parsers for euca2ools output
//!
//! Pure functions over captured stdout so each format can be tested without
//! the tools installed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;
use crate::image::ImageRecord;

static MANIFEST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S+\.manifest\.xml)").expect("manifest pattern is valid"));

static IMAGE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([ea]mi-[0-9a-fA-F]+)\b").expect("image id pattern is valid"));

/// Column of the description in an `IMAGE` record printed with
/// `--show-empty-fields` (after the hypervisor column)
pub const DESCRIPTION_FIELD: usize = 15;

/// Image records from `euca-describe-images --show-empty-fields`
///
/// Only `IMAGE` lines are read; block device mappings and tags are skipped.
pub fn parse_image_records(stdout: &str) -> Result<Vec<ImageRecord>, ParseError> {
    let mut records = Vec::new();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.first() != Some(&"IMAGE") {
            continue;
        }

        let (id, location) = match (fields.get(1), fields.get(2)) {
            (Some(id), Some(location)) if !id.is_empty() && !location.is_empty() => {
                (*id, *location)
            }
            _ => {
                return Err(ParseError::ImageRecord {
                    line: line.to_string(),
                })
            }
        };

        let description = fields
            .get(DESCRIPTION_FIELD)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string());

        records.push(ImageRecord {
            id: id.to_string(),
            location: location.to_string(),
            description,
        });
    }

    Ok(records)
}

/// Manifest path from `euca-bundle-and-upload-image`; the last one printed
/// is the uploaded manifest
pub fn parse_manifest_path(stdout: &str) -> Result<String, ParseError> {
    MANIFEST_PATH
        .captures_iter(stdout)
        .last()
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| ParseError::ManifestPath {
            output: stdout.trim().to_string(),
        })
}

/// Image id from `euca-register`
pub fn parse_image_id(stdout: &str) -> Result<String, ParseError> {
    IMAGE_ID
        .captures(stdout)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| ParseError::ImageId {
            output: stdout.trim().to_string(),
        })
}

/// Value of `name` from `euca-describe-properties`
///
/// Returns the raw token, including the `NULL` sentinel; interpreting it is
/// the caller's business.
pub fn parse_property_value(stdout: &str, name: &str) -> Result<String, ParseError> {
    stdout
        .lines()
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("PROPERTY"), Some(key)) if key == name => {
                    Some(fields.collect::<Vec<_>>().join(" "))
                }
                _ => None,
            }
        })
        .ok_or_else(|| ParseError::Property {
            name: name.to_string(),
            output: stdout.trim().to_string(),
        })
}

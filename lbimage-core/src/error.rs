//! Error types for image lifecycle operations
//!
//! Three layers, innermost first:
//! - [`ParseError`]: a location or a tool's textual output did not have the
//!   expected shape.
//! - [`RegistryError`]: one call to the registry toolchain failed.
//! - [`LifecycleError`]: the operator-facing failure of a whole operation.
//!
//! Non-fatal outcomes (skipped version groups, per-image removal failures)
//! are values in [`crate::policy`] and [`crate::lifecycle`], not errors.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Textual shape mismatches
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("image location '{location}' is not of the form <bucket>/<prefix>.manifest.xml")]
    Location { location: String },

    #[error("no manifest path found in bundle output: {output}")]
    ManifestPath { output: String },

    #[error("no image id found in register output: {output}")]
    ImageId { output: String },

    #[error("property '{name}' not found in output: {output}")]
    Property { name: String, output: String },

    #[error("malformed image record: {line}")]
    ImageRecord { line: String },
}

/// Failure of a single registry operation
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to start '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("'{program}' exited with status {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Install step that failed to produce its artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Decompress,
    Bundle,
    Register,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStep::Decompress => "decompress",
            InstallStep::Bundle => "bundle and upload",
            InstallStep::Register => "register",
        };
        f.write_str(name)
    }
}

/// Fatal failure of a lifecycle operation
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Missing endpoint configuration or toolchain binary
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid bucket prefix pattern")]
    Pattern(#[from] regex::Error),

    #[error("no version number left after {latest}; remove the bucket that carries it")]
    VersionExhausted { latest: u64 },

    #[error("installation failed during {step}")]
    Installation {
        step: InstallStep,
        #[source]
        source: RegistryError,
    },

    #[error("failed to enable image {image_id}.\n\nTo enable it manually, run:\n  {command}")]
    Enable {
        image_id: String,
        command: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to query {what}")]
    Query {
        what: String,
        #[source]
        source: RegistryError,
    },
}

impl LifecycleError {
    pub(crate) fn installation(step: InstallStep, source: RegistryError) -> Self {
        Self::Installation { step, source }
    }

    pub(crate) fn query(what: impl Into<String>, source: RegistryError) -> Self {
        Self::Query {
            what: what.into(),
            source,
        }
    }
}

/// Render an error and its sources as one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

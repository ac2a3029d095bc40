//! Configuration
//!
//! ## Sources
//!
//! - [`RegistryConfig`]: endpoint and credential context, taken from an
//!   environment snapshot once at startup. `EC2_URL` is required.
//! - [`LbImageConfig`]: appliance naming and tool settings, loaded from
//!   `--config <path>`, else `lbimage.yaml` in the platform config dir, else
//!   built-in defaults.
//!
//! ```yaml
//! appliance:
//!   bucket_prefix: loadbalancer
//!   image_name: eucalyptus-load-balancer-image
//!   enabled_property: loadbalancing.loadbalancer_emi
//! tools:
//!   bin_dir: /usr/bin
//!   timeout_seconds: 300
//!   upload_timeout_seconds: 3600
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{LifecycleError, Result};

/// Environment variable naming the registry endpoint
pub const ENDPOINT_VAR: &str = "EC2_URL";

/// Credential and service variables forwarded to every tool invocation
const FORWARDED_VARS: &[&str] = &[
    "S3_URL",
    "EUARE_URL",
    "TOKEN_URL",
    "EC2_ACCESS_KEY",
    "EC2_SECRET_KEY",
    "AWS_ACCESS_KEY",
    "AWS_SECRET_KEY",
    "EC2_CERT",
    "EC2_PRIVATE_KEY",
    "EC2_USER_ID",
    "EUCALYPTUS_CERT",
    "AWS_CREDENTIAL_FILE",
];

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "lbimage.yaml";

/// Endpoint and credential context for the registry toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub endpoint: String,
    /// Other variables the tools need, e.g. storage endpoint and keys
    pub credentials: Vec<(String, String)>,
    /// Directories searched for tool binaries when no `bin_dir` is set
    pub search_path: Option<String>,
}

impl RegistryConfig {
    /// Snapshot the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build from an explicit set of variables
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let endpoint = vars
            .get(ENDPOINT_VAR)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                LifecycleError::Precondition(format!(
                    "{ENDPOINT_VAR} is not set.\n\nSource the cloud credentials (eucarc) before running this tool."
                ))
            })?
            .to_string();

        let credentials = FORWARDED_VARS
            .iter()
            .filter_map(|name| {
                vars.get(*name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect();

        Ok(Self {
            endpoint,
            credentials,
            search_path: vars.get("PATH").cloned(),
        })
    }

    /// Variables set on every child process
    pub fn tool_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::with_capacity(self.credentials.len() + 1);
        env.push((ENDPOINT_VAR.to_string(), self.endpoint.clone()));
        env.extend(self.credentials.iter().cloned());
        env
    }
}

/// Naming and registry keys for the appliance's bundles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceSettings {
    /// Bucket names are `<bucket_prefix>-v<N>`
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Registered names are `<image_name>-v<N>`
    #[serde(default = "default_image_name")]
    pub image_name: String,

    /// Manifest-location filter selecting this appliance's images
    #[serde(default = "default_location_filter")]
    pub location_filter: String,

    /// Registry property holding the enabled image id
    #[serde(default = "default_enabled_property")]
    pub enabled_property: String,

    /// Tarball used by `--install-default`
    #[serde(default = "default_tarball")]
    pub default_tarball: PathBuf,

    #[serde(default = "default_virtualization_type")]
    pub virtualization_type: String,
}

impl Default for ApplianceSettings {
    fn default() -> Self {
        Self {
            bucket_prefix: default_bucket_prefix(),
            image_name: default_image_name(),
            location_filter: default_location_filter(),
            enabled_property: default_enabled_property(),
            default_tarball: default_tarball(),
            virtualization_type: default_virtualization_type(),
        }
    }
}

fn default_bucket_prefix() -> String {
    "loadbalancer".to_string()
}

fn default_image_name() -> String {
    "eucalyptus-load-balancer-image".to_string()
}

fn default_location_filter() -> String {
    "*loadbalancer*".to_string()
}

fn default_enabled_property() -> String {
    "loadbalancing.loadbalancer_emi".to_string()
}

fn default_tarball() -> PathBuf {
    PathBuf::from(
        "/usr/share/eucalyptus-load-balancer-image/eucalyptus-load-balancer-image.tgz",
    )
}

fn default_virtualization_type() -> String {
    "hvm".to_string()
}

/// How the registry toolchain is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Directory holding the tool binaries; PATH is searched when unset
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,

    /// Limit for every call except bundle-and-upload
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Limit for bundle-and-upload, which moves the whole image
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,

    /// Where tarballs are extracted
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl ToolSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            bin_dir: None,
            timeout_seconds: default_timeout(),
            upload_timeout_seconds: default_upload_timeout(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_upload_timeout() -> u64 {
    3600
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("lbimage")
}

/// File-backed settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbImageConfig {
    #[serde(default)]
    pub appliance: ApplianceSettings,

    #[serde(default)]
    pub tools: ToolSettings,
}

impl LbImageConfig {
    /// Load from `path`, or from the platform config dir when `path` is None
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_config_path().filter(|path| path.exists()) {
                Some(path) => Self::load_from_path(&path),
                None => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Precondition(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config = Self::from_yaml(&content).map_err(|e| {
            LifecycleError::Precondition(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml_ng::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content)
    }

    /// `lbimage.yaml` in the platform config directory
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "eucalyptus", "lbimage")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

//! Test helpers shared by the integration tests
//!
//! `FakeRegistry` is an in-memory `RegistryClient` that records every call
//! in order and can be told to fail specific operations.

#![allow(dead_code)]

use async_trait::async_trait;
use lbimage_core::{
    ApplianceSettings, BundleLocation, BundleRequest, ImageRecord, ParseError, RegisterRequest,
    RegistryClient, RegistryError,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// One recorded registry call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListImages(String),
    GetProperty(String),
    SetProperty(String, String),
    Decompress(PathBuf),
    BundleAndUpload(BundleRequest),
    Register(RegisterRequest),
    Deregister(String),
    DeleteBundle(BundleLocation),
    DeleteLocalFile(PathBuf),
}

pub struct FakeRegistry {
    images: Vec<ImageRecord>,
    enabled: Mutex<String>,
    calls: Mutex<Vec<Call>>,
    image_id: String,
    fail_deregister: HashSet<String>,
    fail_delete_bucket: HashSet<String>,
    fail_get_property: bool,
    fail_set_property: bool,
    fail_decompress: bool,
    fail_bundle_parse: bool,
    fail_register_parse: bool,
    fail_cleanup: bool,
}

impl FakeRegistry {
    pub fn new(images: Vec<ImageRecord>) -> Self {
        Self {
            images,
            enabled: Mutex::new("NULL".to_string()),
            calls: Mutex::new(Vec::new()),
            image_id: "emi-0000abcd".to_string(),
            fail_deregister: HashSet::new(),
            fail_delete_bucket: HashSet::new(),
            fail_get_property: false,
            fail_set_property: false,
            fail_decompress: false,
            fail_bundle_parse: false,
            fail_register_parse: false,
            fail_cleanup: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Raw value returned for the enabled property
    pub fn with_enabled(self, raw: &str) -> Self {
        *self.enabled.lock().unwrap() = raw.to_string();
        self
    }

    pub fn with_registered_id(mut self, image_id: &str) -> Self {
        self.image_id = image_id.to_string();
        self
    }

    pub fn failing_deregister(mut self, image_id: &str) -> Self {
        self.fail_deregister.insert(image_id.to_string());
        self
    }

    pub fn failing_delete_bundle(mut self, bucket: &str) -> Self {
        self.fail_delete_bucket.insert(bucket.to_string());
        self
    }

    pub fn failing_get_property(mut self) -> Self {
        self.fail_get_property = true;
        self
    }

    pub fn failing_set_property(mut self) -> Self {
        self.fail_set_property = true;
        self
    }

    pub fn failing_decompress(mut self) -> Self {
        self.fail_decompress = true;
        self
    }

    pub fn unparsable_bundle_output(mut self) -> Self {
        self.fail_bundle_parse = true;
        self
    }

    pub fn unparsable_register_output(mut self) -> Self {
        self.fail_register_parse = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Enabled property value after the run
    pub fn enabled(&self) -> String {
        self.enabled.lock().unwrap().clone()
    }

    pub fn deregistered(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Deregister(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_bundles(&self) -> Vec<BundleLocation> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DeleteBundle(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn tool_failed(program: &str) -> RegistryError {
    RegistryError::ToolFailed {
        program: program.to_string(),
        status: 1,
        stderr: "simulated failure".to_string(),
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn list_images(&self, location_filter: &str) -> Result<Vec<ImageRecord>, RegistryError> {
        self.record(Call::ListImages(location_filter.to_string()));
        Ok(self.images.clone())
    }

    async fn get_property(&self, name: &str) -> Result<String, RegistryError> {
        self.record(Call::GetProperty(name.to_string()));
        if self.fail_get_property {
            return Err(tool_failed("euca-describe-properties"));
        }
        Ok(self.enabled())
    }

    async fn set_property(&self, name: &str, value: &str) -> Result<(), RegistryError> {
        self.record(Call::SetProperty(name.to_string(), value.to_string()));
        if self.fail_set_property {
            return Err(tool_failed("euca-modify-property"));
        }
        *self.enabled.lock().unwrap() = value.to_string();
        Ok(())
    }

    async fn decompress(&self, tarball: &Path) -> Result<PathBuf, RegistryError> {
        self.record(Call::Decompress(tarball.to_path_buf()));
        if self.fail_decompress {
            return Err(RegistryError::Archive {
                path: tarball.to_path_buf(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(PathBuf::from("/work/extract-1/lb.img"))
    }

    async fn bundle_and_upload(&self, request: &BundleRequest) -> Result<String, RegistryError> {
        self.record(Call::BundleAndUpload(request.clone()));
        if self.fail_bundle_parse {
            return Err(ParseError::ManifestPath {
                output: "garbage".to_string(),
            }
            .into());
        }
        Ok(format!("{}/lb.img.manifest.xml", request.bucket))
    }

    async fn register(&self, request: &RegisterRequest) -> Result<String, RegistryError> {
        self.record(Call::Register(request.clone()));
        if self.fail_register_parse {
            return Err(ParseError::ImageId {
                output: "garbage".to_string(),
            }
            .into());
        }
        Ok(self.image_id.clone())
    }

    async fn deregister(&self, image_id: &str) -> Result<(), RegistryError> {
        self.record(Call::Deregister(image_id.to_string()));
        if self.fail_deregister.contains(image_id) {
            return Err(tool_failed("euca-deregister"));
        }
        Ok(())
    }

    async fn delete_bundle(&self, location: &BundleLocation) -> Result<(), RegistryError> {
        self.record(Call::DeleteBundle(location.clone()));
        if self.fail_delete_bucket.contains(&location.bucket) {
            return Err(tool_failed("euca-delete-bundle"));
        }
        Ok(())
    }

    async fn delete_local_file(&self, path: &Path) -> Result<(), RegistryError> {
        self.record(Call::DeleteLocalFile(path.to_path_buf()));
        if self.fail_cleanup {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        Ok(())
    }

    fn manual_set_property_command(&self, name: &str, value: &str) -> String {
        format!("euca-modify-property -p {name}={value}")
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Record for an image uploaded as `version`
pub fn image(id: &str, version: u64) -> ImageRecord {
    ImageRecord::new(id, format!("loadbalancer-v{version}/lb.img.manifest.xml"))
}

pub fn settings() -> ApplianceSettings {
    ApplianceSettings::default()
}

//! [`RegistryClient`] backed by the euca2ools command line tools

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::output::{parse_image_id, parse_image_records, parse_manifest_path, parse_property_value};
use super::runner::ToolRunner;
use super::{archive, BundleRequest, RegisterRequest, RegistryClient};
use crate::config::{RegistryConfig, ToolSettings};
use crate::error::{LifecycleError, RegistryError};
use crate::image::{BundleLocation, ImageRecord};

const DESCRIBE_IMAGES: &str = "euca-describe-images";
const DESCRIBE_PROPERTIES: &str = "euca-describe-properties";
const MODIFY_PROPERTY: &str = "euca-modify-property";
const BUNDLE_AND_UPLOAD: &str = "euca-bundle-and-upload-image";
const REGISTER: &str = "euca-register";
const DEREGISTER: &str = "euca-deregister";
const DELETE_BUNDLE: &str = "euca-delete-bundle";

/// Binaries that must be installed before the client can be used
pub const REQUIRED_TOOLS: &[&str] = &[
    DESCRIBE_IMAGES,
    DESCRIBE_PROPERTIES,
    MODIFY_PROPERTY,
    BUNDLE_AND_UPLOAD,
    REGISTER,
    DEREGISTER,
    DELETE_BUNDLE,
];

/// Registry client that shells out to euca2ools, one process per call
pub struct Euca2oolsClient {
    runner: ToolRunner,
    timeout: Duration,
    upload_timeout: Duration,
    work_dir: PathBuf,
}

impl Euca2oolsClient {
    /// Create a client, checking that every required tool is installed
    pub fn new(config: &RegistryConfig, tools: &ToolSettings) -> Result<Self, LifecycleError> {
        let runner = ToolRunner::new(
            tools.bin_dir.clone(),
            config.search_path.clone(),
            config.tool_env(),
        );

        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|tool| runner.locate(tool).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(LifecycleError::Precondition(format!(
                "Required euca2ools commands not found: {}\n\nInstall euca2ools or set tools.bin_dir in the config file.",
                missing.join(", ")
            )));
        }

        Ok(Self::with_runner(runner, tools))
    }

    /// Create a client without checking for the tools
    pub fn with_runner(runner: ToolRunner, tools: &ToolSettings) -> Self {
        Self {
            runner,
            timeout: tools.timeout(),
            upload_timeout: tools.upload_timeout(),
            work_dir: tools.work_dir.clone(),
        }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<String, RegistryError> {
        let output = self.runner.run(program, &args, self.timeout).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl RegistryClient for Euca2oolsClient {
    async fn list_images(&self, location_filter: &str) -> Result<Vec<ImageRecord>, RegistryError> {
        let stdout = self
            .run(
                DESCRIBE_IMAGES,
                vec![
                    "--show-empty-fields".to_string(),
                    "--filter".to_string(),
                    format!("manifest-location={location_filter}"),
                ],
            )
            .await?;

        Ok(parse_image_records(&stdout)?)
    }

    async fn get_property(&self, name: &str) -> Result<String, RegistryError> {
        let stdout = self
            .run(DESCRIBE_PROPERTIES, vec![name.to_string()])
            .await?;

        Ok(parse_property_value(&stdout, name)?)
    }

    async fn set_property(&self, name: &str, value: &str) -> Result<(), RegistryError> {
        self.run(
            MODIFY_PROPERTY,
            vec!["-p".to_string(), format!("{name}={value}")],
        )
        .await?;
        info!("Set {} to {}", name, value);
        Ok(())
    }

    async fn decompress(&self, tarball: &Path) -> Result<PathBuf, RegistryError> {
        let dest = archive::extraction_dir(&self.work_dir);
        let program = format!("extract {}", tarball.display());

        // Set by whichever of the extraction and the timeout finishes first;
        // the one that finds it already set discards the directory.
        let settled = Arc::new(AtomicBool::new(false));

        let task = {
            let tarball = tarball.to_path_buf();
            let dest = dest.clone();
            let settled = Arc::clone(&settled);
            tokio::task::spawn_blocking(move || {
                let result = archive::extract_image(&tarball, &dest);
                if settled.swap(true, Ordering::SeqCst) && result.is_ok() {
                    archive::discard_extraction(&dest);
                }
                result
            })
        };

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.map_err(|e| RegistryError::Archive {
                path: dest.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                if settled.swap(true, Ordering::SeqCst) {
                    archive::discard_extraction(&dest);
                }
                warn!("Extraction into {} abandoned after timeout", dest.display());
                Err(RegistryError::Timeout {
                    program,
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn bundle_and_upload(&self, request: &BundleRequest) -> Result<String, RegistryError> {
        let args = vec![
            "-i".to_string(),
            request.image_path.display().to_string(),
            "-b".to_string(),
            request.bucket.clone(),
        ];
        let output = self
            .runner
            .run(BUNDLE_AND_UPLOAD, &args, self.upload_timeout)
            .await?;

        Ok(parse_manifest_path(&output.stdout)?)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<String, RegistryError> {
        let stdout = self
            .run(
                REGISTER,
                vec![
                    request.manifest_path.clone(),
                    "-n".to_string(),
                    request.name.clone(),
                    "-d".to_string(),
                    request.description.clone(),
                    "--virtualization-type".to_string(),
                    request.virtualization_type.clone(),
                ],
            )
            .await?;

        Ok(parse_image_id(&stdout)?)
    }

    async fn deregister(&self, image_id: &str) -> Result<(), RegistryError> {
        self.run(DEREGISTER, vec![image_id.to_string()]).await?;
        debug!("Deregistered {}", image_id);
        Ok(())
    }

    async fn delete_bundle(&self, location: &BundleLocation) -> Result<(), RegistryError> {
        self.run(
            DELETE_BUNDLE,
            vec![
                "-b".to_string(),
                location.bucket.clone(),
                "-p".to_string(),
                location.prefix.clone(),
            ],
        )
        .await?;
        debug!("Deleted bundle {}/{}", location.bucket, location.prefix);
        Ok(())
    }

    async fn delete_local_file(&self, path: &Path) -> Result<(), RegistryError> {
        archive::remove_extracted(path, &self.work_dir)
    }

    fn manual_set_property_command(&self, name: &str, value: &str) -> String {
        format!("{MODIFY_PROPERTY} -p {name}={value}")
    }

    fn name(&self) -> &'static str {
        "euca2ools"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Install a fake tool that prints `stdout` and exits with `status`
    fn fake_tool(dir: &Path, name: &str, stdout: &str, status: i32) {
        let path = dir.join(name);
        let script = format!("#!/bin/sh\ncat <<'EOF'\n{stdout}\nEOF\nexit {status}\n");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Fake tool that records its arguments to `<name>.args`
    fn recording_tool(dir: &Path, name: &str, stdout: &str) {
        let path = dir.join(name);
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" > \"$0.args\"\ncat <<'EOF'\n{stdout}\nEOF\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn client(bin_dir: &Path) -> Euca2oolsClient {
        let tools = ToolSettings {
            bin_dir: Some(bin_dir.to_path_buf()),
            timeout_seconds: 10,
            upload_timeout_seconds: 10,
            work_dir: bin_dir.join("work"),
        };
        let runner = ToolRunner::new(
            tools.bin_dir.clone(),
            Some("/usr/bin:/bin".to_string()),
            Vec::new(),
        );
        Euca2oolsClient::with_runner(runner, &tools)
    }

    fn registry_config() -> RegistryConfig {
        RegistryConfig {
            endpoint: "http://ec2.example:8773/services/compute".to_string(),
            credentials: Vec::new(),
            search_path: Some("/usr/bin:/bin".to_string()),
        }
    }

    #[test]
    fn test_new_reports_missing_tools() {
        let bin = TempDir::new().unwrap();
        fake_tool(bin.path(), DESCRIBE_IMAGES, "", 0);

        let tools = ToolSettings {
            bin_dir: Some(bin.path().to_path_buf()),
            ..ToolSettings::default()
        };
        let err = match Euca2oolsClient::new(&registry_config(), &tools) {
            Err(err) => err,
            Ok(_) => panic!("expected missing tools"),
        };

        let message = err.to_string();
        assert!(matches!(err, LifecycleError::Precondition(_)));
        assert!(message.contains(REGISTER));
        assert!(!message.contains(DESCRIBE_IMAGES));
    }

    #[test]
    fn test_new_succeeds_with_all_tools() {
        let bin = TempDir::new().unwrap();
        for tool in REQUIRED_TOOLS {
            fake_tool(bin.path(), tool, "", 0);
        }

        let tools = ToolSettings {
            bin_dir: Some(bin.path().to_path_buf()),
            ..ToolSettings::default()
        };
        assert!(Euca2oolsClient::new(&registry_config(), &tools).is_ok());
    }

    #[tokio::test]
    async fn test_get_property() {
        let bin = TempDir::new().unwrap();
        fake_tool(
            bin.path(),
            DESCRIBE_PROPERTIES,
            "PROPERTY\tloadbalancing.loadbalancer_emi\temi-0a1b2c3d",
            0,
        );

        let value = client(bin.path())
            .get_property("loadbalancing.loadbalancer_emi")
            .await
            .unwrap();

        assert_eq!(value, "emi-0a1b2c3d");
    }

    #[tokio::test]
    async fn test_register_passes_arguments() {
        let bin = TempDir::new().unwrap();
        recording_tool(bin.path(), REGISTER, "IMAGE\temi-0a1b2c3d");

        let image_id = client(bin.path())
            .register(&RegisterRequest {
                manifest_path: "loadbalancer-v1/lb.img.manifest.xml".to_string(),
                name: "eucalyptus-load-balancer-image-v1".to_string(),
                description: "installed".to_string(),
                virtualization_type: "hvm".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(image_id, "emi-0a1b2c3d");
        let args = std::fs::read_to_string(bin.path().join(format!("{REGISTER}.args"))).unwrap();
        assert_eq!(
            args.trim(),
            "loadbalancer-v1/lb.img.manifest.xml -n eucalyptus-load-balancer-image-v1 -d installed --virtualization-type hvm"
        );
    }

    #[tokio::test]
    async fn test_delete_bundle_passes_bucket_and_prefix() {
        let bin = TempDir::new().unwrap();
        recording_tool(bin.path(), DELETE_BUNDLE, "");

        client(bin.path())
            .delete_bundle(&BundleLocation {
                bucket: "loadbalancer-v1".to_string(),
                prefix: "lb.img".to_string(),
            })
            .await
            .unwrap();

        let args =
            std::fs::read_to_string(bin.path().join(format!("{DELETE_BUNDLE}.args"))).unwrap();
        assert_eq!(args.trim(), "-b loadbalancer-v1 -p lb.img");
    }

    #[tokio::test]
    async fn test_failed_tool_surfaces_status() {
        let bin = TempDir::new().unwrap();
        fake_tool(bin.path(), DEREGISTER, "", 1);

        let err = client(bin.path()).deregister("emi-0a1b2c3d").await.unwrap_err();

        assert!(matches!(err, RegistryError::ToolFailed { status: 1, .. }));
    }

    #[tokio::test]
    async fn test_bundle_output_without_manifest_is_parse_error() {
        let bin = TempDir::new().unwrap();
        fake_tool(bin.path(), BUNDLE_AND_UPLOAD, "nothing useful", 0);

        let err = client(bin.path())
            .bundle_and_upload(&BundleRequest {
                bucket: "loadbalancer-v1".to_string(),
                image_path: PathBuf::from("/tmp/lb.img"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Parse(_)));
    }

    #[test]
    fn test_manual_command() {
        let bin = TempDir::new().unwrap();

        let command = client(bin.path())
            .manual_set_property_command("loadbalancing.loadbalancer_emi", "emi-1");

        assert_eq!(
            command,
            "euca-modify-property -p loadbalancing.loadbalancer_emi=emi-1"
        );
    }

    #[tokio::test]
    async fn test_failed_decompress_leaves_work_dir_empty() {
        let bin = TempDir::new().unwrap();
        let bogus = bin.path().join("bogus.tgz");
        std::fs::write(&bogus, "not a tarball").unwrap();
        let client = client(bin.path());

        let err = client.decompress(&bogus).await.unwrap_err();

        assert!(matches!(err, RegistryError::Archive { .. }));
        let work = bin.path().join("work");
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_decompress_then_delete_cleans_work_dir() {
        let bin = TempDir::new().unwrap();
        let tarball = bin.path().join("lb.tgz");
        {
            let file = std::fs::File::create(&tarball).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"disk";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "lb.img", &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let client = client(bin.path());

        let image = client.decompress(&tarball).await.unwrap();
        assert_eq!(std::fs::read_to_string(&image).unwrap(), "disk");

        client.delete_local_file(&image).await.unwrap();
        let work = bin.path().join("work");
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }
}

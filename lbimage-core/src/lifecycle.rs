//! Install, enable and remove flows
//!
//! [`LifecycleManager`] owns the catalog snapshot taken at construction and
//! a registry client. Every operation reads that snapshot; the only registry
//! read issued mid-operation is the enabled-image lookup.
//!
//! Nothing is rolled back. If an operation stops partway (error, timeout,
//! interrupt), the registry keeps whatever the last completed call produced.
//! Running two instances against one registry at the same time is not
//! supported: both would allocate the same next version.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::catalog::{ImageCatalog, VersionGroup};
use crate::config::ApplianceSettings;
use crate::error::{error_chain, InstallStep, LifecycleError, Result};
use crate::image::Image;
use crate::policy::{select_for_removal, RemovalScope, RemovalSelection, RemovalWarning};
use crate::registry::{BundleRequest, RegisterRequest, RegistryClient};
use crate::version::{bucket_name, next_version};

/// Sentinel the registry prints for an unset property
pub const NULL_PROPERTY: &str = "NULL";

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub image_id: String,
    pub version: u64,
    pub bucket: String,
    pub manifest_path: String,
    /// Set when the extracted image could not be deleted
    pub cleanup_warning: Option<String>,
}

/// Removal sub-step that failed for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalStep {
    Deregister,
    SplitLocation,
    DeleteBundle,
}

impl fmt::Display for RemovalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalStep::Deregister => "deregister",
            RemovalStep::SplitLocation => "split location",
            RemovalStep::DeleteBundle => "delete bundle",
        };
        f.write_str(name)
    }
}

/// One image that could not be fully removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalFailure {
    pub image_id: String,
    pub version: u64,
    pub step: RemovalStep,
    pub reason: String,
}

impl fmt::Display for RemovalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (version {}): {} failed: {}",
            self.image_id, self.version, self.step, self.reason
        )
    }
}

/// Per-image outcome of a removal run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    /// Fully removed, in processing order
    pub removed: Vec<String>,
    pub failures: Vec<RemovalFailure>,
    /// Groups skipped because they hold the enabled image
    pub warnings: Vec<RemovalWarning>,
    /// Selected but left untouched because of a dry run
    pub planned: Vec<String>,
}

impl RemovalReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How a removal run behaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalOptions {
    /// Override the enabled-image protection
    pub force: bool,
    /// Select but do not deregister or delete
    pub dry_run: bool,
}

/// Installed images plus the enabled pointer, for listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub versions: Vec<VersionGroup>,
    pub enabled: Option<String>,
}

impl Inventory {
    /// Enabled id points at an image missing from the catalog
    pub fn enabled_is_dangling(&self) -> bool {
        self.enabled
            .as_deref()
            .is_some_and(|id| !self.versions.iter().any(|group| group.contains(id)))
    }
}

/// Orchestrates install, enable and removal against one catalog snapshot
pub struct LifecycleManager<C> {
    client: C,
    catalog: ImageCatalog,
    settings: ApplianceSettings,
}

impl<C: RegistryClient> LifecycleManager<C> {
    /// Build the catalog from the registry and wrap it
    pub async fn new(client: C, settings: ApplianceSettings) -> Result<Self> {
        let catalog = ImageCatalog::load(&client, &settings).await?;
        Ok(Self::with_catalog(client, settings, catalog))
    }

    pub fn with_catalog(client: C, settings: ApplianceSettings, catalog: ImageCatalog) -> Self {
        Self {
            client,
            catalog,
            settings,
        }
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &ApplianceSettings {
        &self.settings
    }

    /// Version the next install will use
    pub fn next_version(&self) -> Result<u64> {
        next_version(&self.catalog)
    }

    /// Decompress, bundle, upload and register a tarball as the next version
    pub async fn install(&self, tarball: &Path) -> Result<InstallOutcome> {
        let version = self.next_version()?;
        let bucket = bucket_name(&self.settings.bucket_prefix, version);
        info!(
            "Installing {} as version {} into bucket {}",
            tarball.display(),
            version,
            bucket
        );

        let image_path = self
            .client
            .decompress(tarball)
            .await
            .map_err(|source| LifecycleError::installation(InstallStep::Decompress, source))?;

        let registered = self.bundle_and_register(&image_path, version, &bucket).await;

        // Cleanup runs whether or not the upload worked
        let cleanup_warning = match self.client.delete_local_file(&image_path).await {
            Ok(()) => None,
            Err(err) => {
                let message = format!(
                    "failed to remove extracted image {}: {}",
                    image_path.display(),
                    error_chain(&err)
                );
                warn!("{}", message);
                Some(message)
            }
        };

        let (manifest_path, image_id) = registered?;
        info!("Registered {} as version {}", image_id, version);

        Ok(InstallOutcome {
            image_id,
            version,
            bucket,
            manifest_path,
            cleanup_warning,
        })
    }

    async fn bundle_and_register(
        &self,
        image_path: &Path,
        version: u64,
        bucket: &str,
    ) -> Result<(String, String)> {
        let manifest_path = self
            .client
            .bundle_and_upload(&BundleRequest {
                bucket: bucket.to_string(),
                image_path: image_path.to_path_buf(),
            })
            .await
            .map_err(|source| LifecycleError::installation(InstallStep::Bundle, source))?;
        debug!("Uploaded manifest {}", manifest_path);

        let image_id = self
            .client
            .register(&RegisterRequest {
                manifest_path: manifest_path.clone(),
                name: format!("{}-v{}", self.settings.image_name, version),
                description: install_description(version),
                virtualization_type: self.settings.virtualization_type.clone(),
            })
            .await
            .map_err(|source| LifecycleError::installation(InstallStep::Register, source))?;

        Ok((manifest_path, image_id))
    }

    /// Point the enabled property at `image_id`
    pub async fn enable(&self, image_id: &str) -> Result<()> {
        let property = &self.settings.enabled_property;

        match self.client.set_property(property, image_id).await {
            Ok(()) => {
                info!("Enabled load balancer image {}", image_id);
                Ok(())
            }
            Err(source) => Err(LifecycleError::Enable {
                image_id: image_id.to_string(),
                command: self.client.manual_set_property_command(property, image_id),
                source,
            }),
        }
    }

    /// Install, then enable the new image
    pub async fn install_and_enable(&self, tarball: &Path) -> Result<InstallOutcome> {
        let outcome = self.install(tarball).await?;
        self.enable(&outcome.image_id).await?;
        Ok(outcome)
    }

    /// Currently enabled image id; `NULL` and empty mean none
    pub async fn get_enabled(&self) -> Result<Option<String>> {
        let property = &self.settings.enabled_property;
        let raw = self
            .client
            .get_property(property)
            .await
            .map_err(|source| LifecycleError::query(format!("property {property}"), source))?;

        Ok(interpret_enabled(&raw))
    }

    /// Installed versions with the enabled pointer
    pub async fn inventory(&self) -> Result<Inventory> {
        let enabled = self.get_enabled().await?;
        Ok(Inventory {
            versions: self.catalog.groups().cloned().collect(),
            enabled,
        })
    }

    /// Decide what a removal would delete
    pub async fn plan_removal(&self, scope: RemovalScope, force: bool) -> Result<RemovalSelection> {
        let candidates = scope.candidates(&self.catalog);
        let enabled = self.get_enabled().await?;

        if let Some(id) = enabled.as_deref() {
            if !self.catalog.contains_image(id) {
                warn!("Enabled image {} is not among the installed images", id);
            }
        }

        Ok(select_for_removal(candidates, enabled.as_deref(), force))
    }

    /// Remove every version except the newest
    pub async fn remove_old(&self, force: bool) -> Result<RemovalReport> {
        self.remove(
            RemovalScope::Old,
            RemovalOptions {
                force,
                dry_run: false,
            },
        )
        .await
    }

    /// Remove every version
    pub async fn remove_all(&self, force: bool) -> Result<RemovalReport> {
        self.remove(
            RemovalScope::All,
            RemovalOptions {
                force,
                dry_run: false,
            },
        )
        .await
    }

    /// Deregister and delete every image of every eligible group
    ///
    /// A failing image does not stop the batch; it is recorded in the report
    /// and the next image is processed.
    pub async fn remove(
        &self,
        scope: RemovalScope,
        options: RemovalOptions,
    ) -> Result<RemovalReport> {
        let selection = self.plan_removal(scope, options.force).await?;
        let mut report = RemovalReport {
            warnings: selection.warnings.clone(),
            ..RemovalReport::default()
        };

        if options.dry_run {
            report.planned = selection.image_ids();
            info!(
                "Dry run: {} image(s) would be removed from {}",
                report.planned.len(),
                scope
            );
            return Ok(report);
        }

        for group in &selection.eligible {
            for image in &group.images {
                match self.remove_image(image).await {
                    Ok(()) => report.removed.push(image.id.clone()),
                    Err(failure) => {
                        warn!("Could not remove {}", failure);
                        report.failures.push(failure);
                    }
                }
            }
        }

        info!(
            "Removed {} image(s), {} failure(s), {} version(s) skipped",
            report.removed.len(),
            report.failures.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    async fn remove_image(&self, image: &Image) -> std::result::Result<(), RemovalFailure> {
        let failure = |step: RemovalStep, reason: String| RemovalFailure {
            image_id: image.id.clone(),
            version: image.version,
            step,
            reason,
        };

        self.client
            .deregister(&image.id)
            .await
            .map_err(|err| failure(RemovalStep::Deregister, error_chain(&err)))?;

        let location = image
            .bundle_location()
            .map_err(|err| failure(RemovalStep::SplitLocation, err.to_string()))?;

        self.client
            .delete_bundle(&location)
            .await
            .map_err(|err| failure(RemovalStep::DeleteBundle, error_chain(&err)))?;

        info!("Removed {} ({})", image.id, image.location);
        Ok(())
    }
}

/// Map the raw property value to an image id
pub fn interpret_enabled(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == NULL_PROPERTY {
        None
    } else {
        Some(value.to_string())
    }
}

fn install_description(version: u64) -> String {
    format!(
        "Load balancer image v{} installed on {}",
        version,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z")
    )
}

//! Image acquisition.
//!
//! Ensures named images are locally present according to the configured
//! pull policy, and imports the embedded helper image the cache and
//! readiness machinery runs on.

use crate::auth;
use crate::client::{ImageInspect, ImagePullOptions};
use crate::constants::{PREBUILT_IMAGE_NAME, PREBUILT_IMAGE_REVISION};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::config::PullPolicy;
use crate::reference;
use tracing::debug;

/// Embedded helper-image archive for an architecture, when one was
/// compiled in.
fn prebuilt_archive(architecture: &str) -> Option<&'static [u8]> {
    match architecture {
        "x86_64" => Some(include_bytes!("../assets/prebuilt/prebuilt-x86_64.tar")),
        "arm" => Some(include_bytes!("../assets/prebuilt/prebuilt-arm.tar")),
        _ => None,
    }
}

impl Executor {
    /// Ensures `name` resolves to a local image, honoring the pull policy.
    ///
    /// - `never`: whatever inspect says, error and all.
    /// - `if-not-present`: pull only on inspect miss.
    /// - `always`: pull unconditionally, unless `name` is already the
    ///   inspected image's id (the caller passed an id, never re-pull).
    pub(crate) async fn ensure_image(&self, name: &str) -> Result<ImageInspect> {
        let auth = auth::resolve_auth_for_image(name, &self.job, Some(&self.shell_config.user));

        debug!(image = name, "looking for image");
        let inspected = self.client.image_inspect(name).await;

        if self.docker.pull_policy == PullPolicy::Never {
            // No pull will ever happen, so a missing image is the user's
            // problem, not the infrastructure's.
            return inspected.map_err(|err| {
                if err.is_not_found() {
                    Error::ImageNotFound {
                        reference: name.to_string(),
                    }
                } else {
                    err
                }
            });
        }

        if let Ok(image) = &inspected {
            if image.id == name {
                return Ok(image.clone());
            }

            if self.docker.pull_policy == PullPolicy::IfNotPresent {
                self.trace.println(
                    "Using locally found image version due to if-not-present pull policy",
                );
                return Ok(image.clone());
            }
        }

        self.pull_image(name, auth).await
    }

    /// Pulls `name` and re-inspects it for the canonical descriptor.
    async fn pull_image(
        &self,
        name: &str,
        auth: Option<crate::client::RegistryAuth>,
    ) -> Result<ImageInspect> {
        self.trace
            .println(&format!("Pulling docker image {name} ..."));

        // An untagged reference would fetch every tag.
        let pull_reference = reference::with_default_tag(name);

        match self
            .client
            .image_pull(&pull_reference, ImagePullOptions { auth })
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() || err.to_string().contains("not found") => {
                return Err(Error::ImageNotFound {
                    reference: name.to_string(),
                });
            }
            Err(err) => return Err(err),
        }

        self.client.image_inspect(name).await
    }

    /// Ensures the embedded helper image is present, importing it from the
    /// compiled-in archive when the daemon does not have it yet.
    pub(crate) async fn ensure_prebuilt_image(&self) -> Result<ImageInspect> {
        let architecture = self.architecture();
        if architecture.is_empty() {
            return Err(Error::UnsupportedArchitecture {
                architecture: "unknown".to_string(),
            });
        }

        let tag = format!("{architecture}-{PREBUILT_IMAGE_REVISION}");
        let image_name = format!("{PREBUILT_IMAGE_NAME}:{tag}");
        debug!(image = %image_name, "looking for prebuilt image");
        if let Ok(image) = self.client.image_inspect(&image_name).await {
            return Ok(image);
        }

        let data = prebuilt_archive(&architecture).ok_or_else(|| {
            Error::UnsupportedArchitecture {
                architecture: architecture.clone(),
            }
        })?;

        debug!("loading prebuilt image");
        self.client
            .image_import(data, PREBUILT_IMAGE_NAME, &tag)
            .await?;

        self.client.image_inspect(&image_name).await
    }

    /// Normalizes the daemon's architecture string, falling back to the
    /// compile-time architecture when the daemon reports none.
    pub(crate) fn architecture(&self) -> String {
        let architecture = match self.info.architecture.as_str() {
            "armv6l" | "armv7l" | "aarch64" => "arm",
            "amd64" => "x86_64",
            other => other,
        };

        if !architecture.is_empty() {
            return architecture.to_string();
        }

        std::env::consts::ARCH.to_string()
    }
}

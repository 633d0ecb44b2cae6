/*
 * Copyright (C) 2024 The Appforge Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use super::metadata::{BuildMetadata, BUILD_METADATA_LABEL};
use super::reference::{parse_image_reference, ImageReference};
use crate::appforge::api::types::ImageResourceReference;
use crate::appforge::k8s::store::normalize_namespace;
use crate::appforge::logger::log_debug;
use crate::appforge::util::{new_error, BoxError, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// The subset of an OCI image config file the operator reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfigFile {
    #[serde(default)]
    pub config: ImageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfig {
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(rename = "Labels", default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug)]
pub enum RegistryError {
    InvalidReference { image: String, source: BoxError },
    Unavailable { image: String, source: BoxError },
    InvalidMetadata { image: String, source: serde_json::Error },
}

impl RegistryError {
    /// Unavailable registries heal on their own; reference and metadata
    /// problems need the application or image to change.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Unavailable { .. })
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidReference { image, source } => {
                write!(f, "invalid image reference '{image}': {source}")
            }
            RegistryError::Unavailable { image, source } => {
                write!(f, "failed to get image {image} from registry: {source}")
            }
            RegistryError::InvalidMetadata { image, source } => {
                write!(f, "failed to parse build metadata from image {image}: {source}")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegistryError::InvalidReference { source, .. }
            | RegistryError::Unavailable { source, .. } => Some(source.as_ref()),
            RegistryError::InvalidMetadata { source, .. } => Some(source),
        }
    }
}

/// Registry access owned by the surrounding runtime (auth, transport, caching).
pub trait ImageRegistry: Send + Sync {
    fn image_config(&self, reference: &ImageReference) -> Result<ImageConfigFile, BoxError>;
}

/// Resolves the latest image produced by an external build resource.
/// `Ok(None)` means the build has not produced an image yet.
pub trait ImageResolver: Send + Sync {
    fn latest_image(
        &self,
        namespace: Option<&str>,
        reference: &ImageResourceReference,
    ) -> Result<Option<String>, BoxError>;
}

/// Loads and decodes the buildpacks metadata label of `image`. Images built
/// without buildpacks have no label and yield empty metadata.
pub fn load_build_metadata(
    registry: &dyn ImageRegistry,
    image: &str,
) -> Result<BuildMetadata, RegistryError> {
    let reference =
        parse_image_reference(image).map_err(|source| RegistryError::InvalidReference {
            image: image.to_string(),
            source,
        })?;
    let config = registry
        .image_config(&reference)
        .map_err(|source| RegistryError::Unavailable {
            image: image.to_string(),
            source,
        })?;

    let Some(label) = config.config.labels.get(BUILD_METADATA_LABEL) else {
        log_debug(
            "cnb",
            "image carries no build metadata label",
            &[("image", image)],
        );
        return Ok(BuildMetadata::default());
    };

    serde_json::from_str(label).map_err(|source| RegistryError::InvalidMetadata {
        image: image.to_string(),
        source,
    })
}

/// Registry double keyed by canonical image reference.
#[derive(Default)]
pub struct InMemoryRegistry {
    images: RwLock<HashMap<String, Result<ImageConfigFile, String>>>,
    fetches: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_config(&self, image: &str, config: ImageConfigFile) -> Result<(), BoxError> {
        let key = parse_image_reference(image)?.to_string();
        self.images
            .write()
            .map_err(|_| new_error("registry lock poisoned"))?
            .insert(key, Ok(config));
        Ok(())
    }

    /// Publishes `metadata` as the buildpacks label of `image`.
    pub fn insert_build_metadata(
        &self,
        image: &str,
        metadata: &BuildMetadata,
    ) -> Result<(), BoxError> {
        let mut config = ImageConfigFile::default();
        config.config.labels.insert(
            BUILD_METADATA_LABEL.to_string(),
            serde_json::to_string(metadata)
                .with_context(|| format!("failed to encode build metadata for {image}"))?,
        );
        self.insert_config(image, config)
    }

    /// Makes every fetch of `image` fail with `message`.
    pub fn fail(&self, image: &str, message: &str) -> Result<(), BoxError> {
        let key = parse_image_reference(image)?.to_string();
        self.images
            .write()
            .map_err(|_| new_error("registry lock poisoned"))?
            .insert(key, Err(message.to_string()));
        Ok(())
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ImageRegistry for InMemoryRegistry {
    fn image_config(&self, reference: &ImageReference) -> Result<ImageConfigFile, BoxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let images = self
            .images
            .read()
            .map_err(|_| new_error("registry lock poisoned"))?;
        match images.get(&reference.to_string()) {
            Some(Ok(config)) => Ok(config.clone()),
            Some(Err(message)) => Err(new_error(message.clone())),
            None => Err(new_error(format!("manifest unknown: {reference}"))),
        }
    }
}

/// Resolver double; unknown references are reported as pending.
#[derive(Default)]
pub struct InMemoryImageResolver {
    latest: RwLock<HashMap<String, String>>,
}

impl InMemoryImageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        namespace: Option<&str>,
        name: &str,
        image: &str,
    ) -> Result<(), BoxError> {
        self.latest
            .write()
            .map_err(|_| new_error("resolver lock poisoned"))?
            .insert(resolver_key(namespace, name), image.to_string());
        Ok(())
    }
}

impl ImageResolver for InMemoryImageResolver {
    fn latest_image(
        &self,
        namespace: Option<&str>,
        reference: &ImageResourceReference,
    ) -> Result<Option<String>, BoxError> {
        let namespace = reference.namespace.as_deref().or(namespace);
        let latest = self
            .latest
            .read()
            .map_err(|_| new_error("resolver lock poisoned"))?;
        Ok(latest.get(&resolver_key(namespace, &reference.name)).cloned())
    }
}

fn resolver_key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", normalize_namespace(namespace), name)
}

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

use crate::appforge::util::{new_error, BoxError};
use std::fmt::{Display, Formatter};

const DEFAULT_REGISTRY: &str = "index.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = self.tag.as_deref() {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = self.digest.as_deref() {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Parses `[registry/]repository[:tag][@sha256:<hex>]`. The first path
/// segment is a registry only when it looks like a host (`.`, `:` or
/// `localhost`).
pub fn parse_image_reference(image: &str) -> Result<ImageReference, BoxError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(new_error("Image reference is empty"));
    }

    let (without_digest, digest) = match image.split_once('@') {
        Some((reference, digest)) => {
            validate_digest(digest, image)?;
            (reference, Some(digest.to_string()))
        }
        None => (image, None),
    };

    let (reference_without_tag, tag) = match without_digest.rsplit_once(':') {
        Some((reference, candidate)) if !candidate.contains('/') => {
            validate_tag(candidate)?;
            (reference, Some(candidate.to_string()))
        }
        _ => (without_digest, None),
    };

    let (registry, repository) = match reference_without_tag.split_once('/') {
        Some((host, remainder)) if looks_like_host(host) => {
            if remainder.is_empty() {
                return Err(new_error(format!(
                    "Image reference missing repository: {image}"
                )));
            }
            validate_registry(host)?;
            (host.to_string(), remainder.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), reference_without_tag.to_string()),
    };
    validate_repository(&repository)?;

    let tag = match (&tag, &digest) {
        (None, None) => Some("latest".to_string()),
        _ => tag,
    };

    Ok(ImageReference {
        registry,
        repository,
        tag,
        digest,
    })
}

fn looks_like_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

fn validate_registry(registry: &str) -> Result<(), BoxError> {
    if registry.is_empty()
        || !registry
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err(new_error(format!(
            "Invalid registry component in image reference: {registry}"
        )));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), BoxError> {
    if repository.is_empty() {
        return Err(new_error("Image reference missing repository"));
    }

    for segment in repository.split('/') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
        {
            return Err(new_error(format!(
                "Invalid repository component in image reference: {repository}"
            )));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), BoxError> {
    if tag.is_empty()
        || tag.len() > 128
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(new_error(format!("Invalid image tag: {tag}")));
    }
    Ok(())
}

fn validate_digest(digest: &str, original: &str) -> Result<(), BoxError> {
    const PREFIX: &str = "sha256:";
    let Some(hex) = digest.strip_prefix(PREFIX) else {
        return Err(new_error(format!("Invalid image reference: {original}")));
    };
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(new_error(format!("Invalid image reference: {original}")));
    }
    Ok(())
}

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

//! Cloud Native Buildpacks image metadata.

pub mod metadata;
pub mod reference;
pub mod registry;

pub use metadata::{BomEntry, BuildMetadata, Buildpack, Process, SpringBootBomMetadata};
pub use reference::{parse_image_reference, ImageReference};
pub use registry::{
    load_build_metadata, ImageConfigFile, ImageRegistry, ImageResolver, InMemoryImageResolver,
    InMemoryRegistry, RegistryError,
};

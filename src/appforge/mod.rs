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

//! Reconciliation core for opinionated application resources.
//!
//! An [`api::types::Application`] declares a partial pod template. The
//! controller loads build metadata for the application image, runs the
//! opinion pipeline over the template, and keeps the generated Deployment and
//! ConfigMap children converged with the result.

pub mod api;
pub mod cnb;
pub mod config;
pub mod controller;
pub mod k8s;
pub mod logger;
pub mod observability;
pub mod opinions;
#[cfg(test)]
pub(crate) mod test_support;
pub mod util;

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

//! Reconcile scopes.
//!
//! A scope opens a `tracing` span for one reconcile pass and publishes a
//! task-local [`TraceContext`] naming the reconciled object. The logger reads
//! it to stamp `object`, `trace_id` and `span_id` on each line of the pass.

use rand::{rngs::OsRng, RngCore};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::task_local;
use tracing_subscriber::registry::Registry;

const TRACE_ID_BYTES: usize = 16;
const SPAN_ID_BYTES: usize = 8;

#[derive(Clone, Debug)]
pub struct TraceContext {
    component: &'static str,
    object: Arc<str>,
    trace_id: Arc<str>,
    span_id: Arc<str>,
}

impl TraceContext {
    /// Component that opened the scope.
    pub fn component(&self) -> &'static str {
        self.component
    }

    /// `namespace/name` of the reconciled object.
    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }
}

task_local! {
    static SCOPE: TraceContext;
}

/// Installs a bare subscriber registry unless the embedding process already
/// installed one.
pub fn init() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = tracing::subscriber::set_global_default(Registry::default());
    });
}

pub fn current_context() -> Option<TraceContext> {
    SCOPE.try_with(TraceContext::clone).ok()
}

/// Runs `fut` as the reconcile of `object`. A nested scope joins the
/// enclosing trace with a fresh span id.
pub async fn with_span<T>(
    component: &'static str,
    object: impl Into<String>,
    fut: impl Future<Output = T>,
) -> T {
    let object: String = object.into();
    let context = TraceContext {
        component,
        object: Arc::from(object),
        trace_id: current_context()
            .map(|outer| outer.trace_id)
            .unwrap_or_else(|| random_id(TRACE_ID_BYTES)),
        span_id: random_id(SPAN_ID_BYTES),
    };
    let span = tracing::info_span!(
        "reconcile",
        component = context.component,
        object = context.object(),
        trace_id = context.trace_id(),
        span_id = context.span_id(),
    );

    SCOPE
        .scope(context, async move {
            let _entered = span.enter();
            fut.await
        })
        .await
}

fn random_id(bytes: usize) -> Arc<str> {
    let mut raw = vec![0u8; bytes];
    OsRng.fill_bytes(&mut raw);
    Arc::from(hex::encode(raw))
}

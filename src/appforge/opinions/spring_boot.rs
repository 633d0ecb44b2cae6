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

//! Opinions for Spring Boot applications built with Cloud Native Buildpacks.

use super::resource::{
    add_port_if_absent, define_probe, port_property, set_annotation, set_label, LIVENESS_TIMING,
    READINESS_TIMING,
};
use super::{AppliedOpinions, Opinion, OpinionContext, OpinionError, Opinions};
use crate::appforge::cnb::BuildMetadata;
use crate::appforge::k8s::pod::{ContainerPort, PodTemplateSpec, ProbeHttpGet, ProbeTcpSocket};

pub const SPRING_BOOT: &str = "spring-boot";
pub const GRACEFUL_SHUTDOWN: &str = "spring-boot-graceful-shutdown";
pub const WEB_PORT: &str = "spring-web-port";
pub const ACTUATOR: &str = "spring-boot-actuator";
pub const ACTUATOR_PROBES: &str = "spring-boot-actuator-probes";
pub const WEB_PROBES: &str = "spring-web-probes";

pub const VERSION_LABEL: &str = "boot.spring.io/version";
pub const ACTUATOR_ANNOTATION: &str = "boot.spring.io/actuator";
pub const SERVICE_LABEL_PREFIX: &str = "services.appforge.io";

const DEFAULT_TERMINATION_GRACE_PERIOD: i64 = 30;
const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_MANAGEMENT_PORT: u16 = 9001;

const SHUTDOWN_GRACE_PERIOD: &str = "server.shutdown.grace-period";
const SERVER_PORT: &str = "server.port";
const MANAGEMENT_PORT: &str = "management.server.port";
const MANAGEMENT_BASE_PATH: &str = "management.endpoints.web.base-path";

const WEB_SERVER_STARTERS: &[&str] = &[
    "spring-boot-starter-tomcat",
    "spring-boot-starter-jetty",
    "spring-boot-starter-reactor-netty",
    "spring-boot-starter-undertow",
];

/// Backing services recognised from client libraries on the classpath.
const SERVICE_INTENTS: &[(&str, &[&str])] = &[
    ("mysql", &["mysql-connector-java", "r2dbc-mysql"]),
    ("postgres", &["postgresql", "r2dbc-postgresql"]),
    ("mongodb", &["mongodb-driver-core"]),
    ("rabbitmq", &["amqp-client"]),
    ("redis", &["jedis"]),
];

/// The ordered Spring Boot opinion set.
pub fn opinions() -> Opinions {
    Opinions::new(vec![
        Opinion {
            id: SPRING_BOOT,
            applicable: Some(has_spring_boot),
            apply: apply_version_label,
        },
        Opinion {
            id: GRACEFUL_SHUTDOWN,
            applicable: Some(has_web_server),
            apply: apply_graceful_shutdown,
        },
        Opinion {
            id: WEB_PORT,
            applicable: Some(has_spring_web),
            apply: apply_web_port,
        },
        Opinion {
            id: ACTUATOR,
            applicable: Some(has_actuator),
            apply: apply_actuator,
        },
        Opinion {
            id: ACTUATOR_PROBES,
            applicable: Some(actuator_applied),
            apply: apply_actuator_probes,
        },
        Opinion {
            id: WEB_PROBES,
            applicable: Some(web_port_without_actuator_probes),
            apply: apply_web_probes,
        },
        Opinion {
            id: "service-intent-mysql",
            applicable: Some(|_, md| has_service("mysql", md)),
            apply: |ctx, template, md| apply_service_intent("mysql", ctx, template, md),
        },
        Opinion {
            id: "service-intent-postgres",
            applicable: Some(|_, md| has_service("postgres", md)),
            apply: |ctx, template, md| apply_service_intent("postgres", ctx, template, md),
        },
        Opinion {
            id: "service-intent-mongodb",
            applicable: Some(|_, md| has_service("mongodb", md)),
            apply: |ctx, template, md| apply_service_intent("mongodb", ctx, template, md),
        },
        Opinion {
            id: "service-intent-rabbitmq",
            applicable: Some(|_, md| has_service("rabbitmq", md)),
            apply: |ctx, template, md| apply_service_intent("rabbitmq", ctx, template, md),
        },
        Opinion {
            id: "service-intent-redis",
            applicable: Some(|_, md| has_service("redis", md)),
            apply: |ctx, template, md| apply_service_intent("redis", ctx, template, md),
        },
    ])
}

fn has_spring_boot(_: &AppliedOpinions, metadata: &BuildMetadata) -> bool {
    metadata.spring_boot().has_dependency(&["spring-boot"])
}

fn has_web_server(_: &AppliedOpinions, metadata: &BuildMetadata) -> bool {
    metadata.spring_boot().has_dependency(WEB_SERVER_STARTERS)
}

fn has_spring_web(_: &AppliedOpinions, metadata: &BuildMetadata) -> bool {
    metadata.spring_boot().has_dependency(&["spring-web"])
}

fn has_actuator(_: &AppliedOpinions, metadata: &BuildMetadata) -> bool {
    metadata.spring_boot().has_dependency(&["spring-boot-actuator"])
}

fn actuator_applied(applied: &AppliedOpinions, _: &BuildMetadata) -> bool {
    applied.has(ACTUATOR)
}

fn web_port_without_actuator_probes(applied: &AppliedOpinions, _: &BuildMetadata) -> bool {
    applied.has(WEB_PORT) && !applied.has(ACTUATOR_PROBES)
}

fn apply_version_label(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    metadata: &BuildMetadata,
) -> Result<(), OpinionError> {
    let boot = metadata.spring_boot();
    if let Some(dependency) = boot.find_dependency(&["spring-boot"]) {
        set_label(ctx, template, VERSION_LABEL, &dependency.version);
    }
    Ok(())
}

fn apply_graceful_shutdown(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    _: &BuildMetadata,
) -> Result<(), OpinionError> {
    if ctx.properties.contains_key(SHUTDOWN_GRACE_PERIOD) {
        return Ok(());
    }
    let grace_period = *template
        .spec
        .termination_grace_period_seconds
        .get_or_insert(DEFAULT_TERMINATION_GRACE_PERIOD);
    let boot_budget = shutdown_budget(grace_period);
    ctx.properties
        .insert(SHUTDOWN_GRACE_PERIOD, format!("{boot_budget}s"));
    Ok(())
}

/// floor(0.8 * grace period), clamped at zero and exact for every `i64`.
fn shutdown_budget(grace_period: i64) -> i64 {
    let grace_period = grace_period.max(0);
    grace_period / 5 * 4 + grace_period % 5 * 4 / 5
}

fn apply_web_port(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    _: &BuildMetadata,
) -> Result<(), OpinionError> {
    ctx.properties
        .set_default(SERVER_PORT, DEFAULT_SERVER_PORT.to_string());
    let port = port_property(ctx, SERVER_PORT)?.unwrap_or(DEFAULT_SERVER_PORT);
    let container = ctx.container.resolve_mut(template)?;
    add_port_if_absent(
        container,
        ContainerPort {
            container_port: port,
            name: None,
            protocol: Some("TCP".to_string()),
        },
    );
    Ok(())
}

fn apply_actuator(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    _: &BuildMetadata,
) -> Result<(), OpinionError> {
    let properties = &mut *ctx.properties;
    properties.set_default(MANAGEMENT_PORT, DEFAULT_MANAGEMENT_PORT.to_string());
    properties.set_default("management.server.ssl.enabled", "false");
    properties.set_default("management.endpoint.health.enabled", "true");
    properties.set_default("management.endpoint.info.enabled", "true");
    properties.set_default(MANAGEMENT_BASE_PATH, "/actuator");

    let endpoint = format!(
        "http://:{}{}",
        properties.get(MANAGEMENT_PORT).unwrap_or_default(),
        properties.get(MANAGEMENT_BASE_PATH).unwrap_or_default()
    );
    set_annotation(ctx, template, ACTUATOR_ANNOTATION, &endpoint);
    Ok(())
}

fn apply_actuator_probes(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    _: &BuildMetadata,
) -> Result<(), OpinionError> {
    let port = match port_property(ctx, MANAGEMENT_PORT)? {
        Some(port) => port,
        None => port_property(ctx, SERVER_PORT)?.unwrap_or(DEFAULT_SERVER_PORT),
    };
    let base_path = ctx
        .properties
        .get(MANAGEMENT_BASE_PATH)
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();

    let container = ctx.container.resolve_mut(template)?;
    define_probe(&mut container.liveness_probe, LIVENESS_TIMING, |probe| {
        probe.http_get = Some(ProbeHttpGet {
            path: format!("{base_path}/info"),
            port,
            scheme: None,
        });
    });
    define_probe(&mut container.readiness_probe, READINESS_TIMING, |probe| {
        probe.http_get = Some(ProbeHttpGet {
            path: format!("{base_path}/health"),
            port,
            scheme: None,
        });
    });
    Ok(())
}

fn apply_web_probes(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    _: &BuildMetadata,
) -> Result<(), OpinionError> {
    let Some(port) = port_property(ctx, SERVER_PORT)? else {
        return Ok(());
    };
    let container = ctx.container.resolve_mut(template)?;
    define_probe(&mut container.liveness_probe, LIVENESS_TIMING, |probe| {
        probe.tcp_socket = Some(ProbeTcpSocket { port });
    });
    define_probe(&mut container.readiness_probe, READINESS_TIMING, |probe| {
        probe.tcp_socket = Some(ProbeTcpSocket { port });
    });
    Ok(())
}

fn service_dependencies(service: &str) -> &'static [&'static str] {
    SERVICE_INTENTS
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, dependencies)| *dependencies)
        .unwrap_or_default()
}

fn has_service(service: &str, metadata: &BuildMetadata) -> bool {
    metadata
        .spring_boot()
        .has_dependency(service_dependencies(service))
}

fn apply_service_intent(
    service: &str,
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    metadata: &BuildMetadata,
) -> Result<(), OpinionError> {
    let boot = metadata.spring_boot();
    if let Some(dependency) = boot.find_dependency(service_dependencies(service)) {
        let label = format!("{SERVICE_LABEL_PREFIX}/{service}");
        set_label(ctx, template, &label, &dependency.name);
        set_label(ctx, template, &format!("{label}-version"), &dependency.version);
    }
    Ok(())
}

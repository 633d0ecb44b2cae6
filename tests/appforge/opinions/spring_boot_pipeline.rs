use appforge::appforge::cnb::BuildMetadata;
use appforge::appforge::k8s::pod::{
    ContainerProbe, ContainerSpec, ObjectMeta, PodTemplateSpec, ProbeHttpGet, ProbeTcpSocket,
};
use appforge::appforge::opinions::{
    spring_boot, ApplicationProperties, ContainerTarget, OpinionContext,
};
use serde_json::json;
use std::collections::HashMap;

fn spring_boot_image(dependencies: &[&str]) -> BuildMetadata {
    let dependencies: Vec<_> = dependencies
        .iter()
        .map(|name| json!({"name": name, "version": "2.3.0.RELEASE", "sha256": "ab12"}))
        .collect();
    serde_json::from_value(json!({
        "buildpacks": [{"id": "paketo-buildpacks/spring-boot", "version": "2.4.1"}],
        "processes": [{"type": "web", "command": "java", "args": ["org.springframework.boot.loader.JarLauncher"], "direct": false}],
        "bom": [{
            "name": "spring-boot",
            "version": "2.3.0.RELEASE",
            "metadata": {
                "classes": "BOOT-INF/classes/",
                "classpath": ["BOOT-INF/lib"],
                "dependencies": dependencies,
                "layers": {"application": "ignored"}
            }
        }]
    }))
    .expect("build metadata")
}

fn declared_template() -> PodTemplateSpec {
    let mut template = PodTemplateSpec::default();
    template.spec.containers.push(ContainerSpec {
        name: "workload".into(),
        image: Some("registry.example.com/orders:1.0".into()),
        ..Default::default()
    });
    template
}

struct Run {
    applied: Vec<String>,
    template: PodTemplateSpec,
    properties: ApplicationProperties,
    resource: ObjectMeta,
}

fn run(
    declared: &HashMap<String, String>,
    template: PodTemplateSpec,
    metadata: &BuildMetadata,
) -> Run {
    let mut template = template;
    let mut properties = ApplicationProperties::from_declared(declared);
    let mut resource = ObjectMeta::named(Some("default"), "orders");
    let applied = {
        let mut ctx = OpinionContext::new(&mut properties)
            .with_resource(&mut resource)
            .with_container(ContainerTarget::Name("workload".into()));
        spring_boot::opinions()
            .apply(&mut ctx, &mut template, metadata)
            .expect("pipeline")
    };
    Run {
        applied: applied.into_vec(),
        template,
        properties,
        resource,
    }
}

#[test]
fn web_actuator_tomcat_image_is_fully_opinionated() {
    let metadata = spring_boot_image(&[
        "spring-boot",
        "spring-web",
        "spring-boot-actuator",
        "spring-boot-starter-tomcat",
    ]);

    let run = run(&HashMap::new(), declared_template(), &metadata);

    assert_eq!(
        run.applied,
        vec![
            "spring-boot",
            "spring-boot-graceful-shutdown",
            "spring-web-port",
            "spring-boot-actuator",
            "spring-boot-actuator-probes",
        ]
    );
    assert_eq!(
        run.properties.to_properties_file(),
        "# Generated by appforge. DO NOT EDIT.\n\
         management.endpoint.health.enabled = true\n\
         management.endpoint.info.enabled = true\n\
         management.endpoints.web.base-path = /actuator\n\
         management.server.port = 9001\n\
         management.server.ssl.enabled = false\n\
         server.port = 8080\n\
         server.shutdown.grace-period = 24s\n"
    );

    let container = &run.template.spec.containers[0];
    assert_eq!(container.ports.len(), 1);
    assert_eq!(container.ports[0].container_port, 8080);
    assert_eq!(container.ports[0].protocol.as_deref(), Some("TCP"));
    assert_eq!(
        container.liveness_probe,
        Some(ContainerProbe {
            http_get: Some(ProbeHttpGet {
                path: "/actuator/info".into(),
                port: 9001,
                scheme: None,
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(5),
            timeout_seconds: Some(5),
            ..Default::default()
        })
    );
    assert_eq!(
        container
            .readiness_probe
            .as_ref()
            .and_then(|probe| probe.http_get.as_ref())
            .map(|get| get.path.as_str()),
        Some("/actuator/health")
    );
    assert_eq!(run.template.spec.termination_grace_period_seconds, Some(30));
    assert_eq!(
        run.template
            .metadata
            .labels
            .get("boot.spring.io/version")
            .map(String::as_str),
        Some("2.3.0.RELEASE")
    );
    assert_eq!(
        run.resource
            .annotations
            .get("boot.spring.io/actuator")
            .map(String::as_str),
        Some("http://:9001/actuator")
    );
}

#[test]
fn pipeline_is_idempotent_over_its_own_output() {
    let metadata = spring_boot_image(&[
        "spring-boot",
        "spring-web",
        "spring-boot-actuator",
        "spring-boot-starter-undertow",
        "mysql-connector-java",
    ]);

    let first = run(&HashMap::new(), declared_template(), &metadata);
    let second = run(&first.properties.to_map(), first.template.clone(), &metadata);

    assert_eq!(second.applied, first.applied);
    assert_eq!(second.template, first.template);
    assert_eq!(second.properties, first.properties);
    assert_eq!(second.resource, first.resource);
}

#[test]
fn property_file_is_deterministic() {
    let declared = HashMap::from([
        ("foo.bar".to_string(), "1".to_string()),
        ("alpha".to_string(), "2".to_string()),
    ]);
    let rendered: Vec<String> = (0..5)
        .map(|_| ApplicationProperties::from_declared(&declared).to_properties_file())
        .collect();

    assert!(rendered.iter().all(|file| file == &rendered[0]));
    assert_eq!(
        rendered[0],
        "# Generated by appforge. DO NOT EDIT.\nalpha = 2\nfoo.bar = 1\n"
    );
}

#[test]
fn web_probes_apply_only_without_actuator() {
    let web_only = run(
        &HashMap::new(),
        declared_template(),
        &spring_boot_image(&["spring-web"]),
    );
    assert_eq!(web_only.applied, vec!["spring-web-port", "spring-web-probes"]);
    let container = &web_only.template.spec.containers[0];
    assert_eq!(
        container
            .liveness_probe
            .as_ref()
            .and_then(|probe| probe.tcp_socket.clone()),
        Some(ProbeTcpSocket { port: 8080 })
    );

    let with_actuator = run(
        &HashMap::new(),
        declared_template(),
        &spring_boot_image(&["spring-web", "spring-boot-actuator"]),
    );
    assert!(!with_actuator
        .applied
        .iter()
        .any(|id| id == "spring-web-probes"));
    let container = &with_actuator.template.spec.containers[0];
    assert!(container
        .liveness_probe
        .as_ref()
        .is_some_and(|probe| probe.tcp_socket.is_none() && probe.http_get.is_some()));
}

#[test]
fn declared_values_win_over_opinions() {
    let metadata = spring_boot_image(&[
        "spring-web",
        "spring-boot-actuator",
        "spring-boot-starter-reactor-netty",
    ]);
    let declared = HashMap::from([
        ("server.shutdown.grace-period".to_string(), "10s".to_string()),
        ("management.server.port".to_string(), "9100".to_string()),
    ]);
    let mut template = declared_template();
    template.spec.containers[0].readiness_probe = Some(ContainerProbe {
        exec: Some(appforge::appforge::k8s::pod::ProbeExec {
            command: vec!["/bin/ready".into()],
        }),
        ..Default::default()
    });

    let run = run(&declared, template, &metadata);

    assert_eq!(
        run.properties.get("server.shutdown.grace-period"),
        Some("10s")
    );
    assert_eq!(run.template.spec.termination_grace_period_seconds, None);
    let container = &run.template.spec.containers[0];
    assert_eq!(
        container
            .liveness_probe
            .as_ref()
            .and_then(|probe| probe.http_get.as_ref())
            .map(|get| get.port),
        Some(9100)
    );
    let readiness = container.readiness_probe.as_ref().expect("readiness");
    assert!(readiness.http_get.is_none());
    assert!(readiness.exec.is_some());
}

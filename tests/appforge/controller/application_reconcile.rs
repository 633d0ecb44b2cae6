use appforge::appforge::api::conditions::{ConditionStatus, ConditionType};
use appforge::appforge::api::{Application, ApplicationSpec};
use appforge::appforge::cnb::{BuildMetadata, InMemoryRegistry};
use appforge::appforge::config::OperatorSettings;
use appforge::appforge::controller::child::{ChildAction, ChildReconciler};
use appforge::appforge::controller::deployment::{DeploymentChild, DeploymentInput};
use appforge::appforge::controller::ApplicationReconciler;
use appforge::appforge::k8s::configmap::ConfigMap;
use appforge::appforge::k8s::deployment::{
    Deployment, DeploymentCondition, DeploymentSpec, DeploymentStatus,
};
use appforge::appforge::k8s::pod::{
    ContainerEnvVar, ContainerSpec, LabelSelector, ObjectMeta, PodTemplateSpec,
};
use appforge::appforge::k8s::store::{InMemoryObjectStore, ObjectStore, StoreError};
use appforge::appforge::observability::tracing as trace;
use serde_json::json;
use std::sync::Arc;

const IMAGE: &str = "registry.example.com/shop/orders:1.4.2";

struct Cluster {
    registry: Arc<InMemoryRegistry>,
    deployments: Arc<InMemoryObjectStore<Deployment>>,
    config_maps: Arc<InMemoryObjectStore<ConfigMap>>,
}

impl Cluster {
    fn new() -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .insert_build_metadata(IMAGE, &spring_boot_metadata())
            .expect("publish image");
        Self {
            registry,
            deployments: Arc::new(InMemoryObjectStore::new()),
            config_maps: Arc::new(InMemoryObjectStore::new()),
        }
    }

    fn reconciler(&self) -> ApplicationReconciler {
        ApplicationReconciler::new(
            OperatorSettings::default(),
            self.registry.clone(),
            self.deployments.clone(),
            self.config_maps.clone(),
        )
    }

    fn deployment(&self) -> Option<Deployment> {
        self.deployments
            .get(Some("shop"), "orders")
            .expect("get deployment")
    }

    fn writes(&self) -> u64 {
        self.deployments.write_count() + self.config_maps.write_count()
    }
}

/// Deployment store where another writer bumps the object between our read
/// and our update.
struct RacingDeployments {
    inner: Arc<InMemoryObjectStore<Deployment>>,
}

impl ObjectStore<Deployment> for RacingDeployments {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<Deployment>, StoreError> {
        self.inner.get(namespace, name)
    }

    fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Deployment>, StoreError> {
        self.inner.list(namespace, selector)
    }

    fn create(&self, object: Deployment) -> Result<Deployment, StoreError> {
        self.inner.create(object)
    }

    fn update(&self, object: Deployment) -> Result<Deployment, StoreError> {
        let namespace = object.metadata.namespace.clone();
        let name = object.metadata.name.clone().unwrap_or_default();
        if let Some(current) = self.inner.get(namespace.as_deref(), &name)? {
            self.inner.replace(current)?;
        }
        self.inner.update(object)
    }
}

fn spring_boot_metadata() -> BuildMetadata {
    serde_json::from_value(json!({
        "bom": [{
            "name": "spring-boot",
            "version": "2.3.1.RELEASE",
            "metadata": {
                "classes": "BOOT-INF/classes/",
                "dependencies": [
                    {"name": "spring-boot", "version": "2.3.1.RELEASE"},
                    {"name": "spring-web", "version": "5.2.7.RELEASE"},
                    {"name": "spring-boot-actuator", "version": "2.3.1.RELEASE"},
                    {"name": "spring-boot-starter-tomcat", "version": "2.3.1.RELEASE"}
                ]
            }
        }]
    }))
    .expect("build metadata")
}

fn application() -> Application {
    let mut template = PodTemplateSpec::default();
    template.spec.containers.push(ContainerSpec {
        name: "orders".into(),
        image: Some(IMAGE.into()),
        ..Default::default()
    });
    let mut app = Application::new(
        Some("shop"),
        "orders",
        ApplicationSpec {
            template,
            ..Default::default()
        },
    );
    app.metadata.generation = Some(3);
    app.metadata
        .labels
        .insert("team".into(), "payments".into());
    app
}

fn deployment_condition(condition_type: &str, status: &str, reason: &str) -> DeploymentCondition {
    DeploymentCondition {
        condition_type: condition_type.into(),
        status: status.into(),
        reason: Some(reason.into()),
        message: Some(format!("{condition_type} {status}")),
    }
}

#[test]
fn spring_boot_application_gets_opinionated_children() {
    let cluster = Cluster::new();
    let mut app = application();

    cluster.reconciler().reconcile(&mut app).expect("reconcile");

    assert_eq!(app.status.observed_generation, Some(3));
    assert_eq!(
        app.status.applied_opinions,
        vec![
            "spring-boot",
            "spring-boot-graceful-shutdown",
            "spring-web-port",
            "spring-boot-actuator",
            "spring-boot-actuator-probes",
        ]
    );
    assert_eq!(
        app.status.generated_config_ref.as_deref(),
        Some("orders-application-properties")
    );

    let config_map = cluster
        .config_maps
        .get(Some("shop"), "orders-application-properties")
        .expect("get config map")
        .expect("config map");
    let rendered = config_map
        .data
        .get("application.properties")
        .expect("properties file");
    assert!(rendered.starts_with("# Generated by appforge. DO NOT EDIT.\n"));
    assert!(rendered.contains("server.shutdown.grace-period = 24s\n"));

    let deployment = cluster.deployment().expect("deployment");
    assert_eq!(
        deployment
            .metadata
            .labels
            .get("apps.appforge.io/application")
            .map(String::as_str),
        Some("orders")
    );
    assert_eq!(
        deployment.metadata.labels.get("team").map(String::as_str),
        Some("payments")
    );
    assert_eq!(
        deployment
            .metadata
            .labels
            .get("boot.spring.io/version")
            .map(String::as_str),
        Some("2.3.1.RELEASE")
    );

    let template = &deployment.spec.template;
    assert!(deployment.spec.selector.matches(&template.metadata.labels));
    assert!(template
        .metadata
        .annotations
        .contains_key("apps.appforge.io/config-checksum"));
    let container = &template.spec.containers[0];
    assert_eq!(container.ports[0].container_port, 8080);
    assert!(container.liveness_probe.is_some());
    let java_opts = container
        .env
        .iter()
        .find(|var| var.name == "JAVA_OPTS")
        .and_then(|var| var.value.as_deref())
        .expect("JAVA_OPTS");
    assert!(java_opts.starts_with("-Dmanagement.endpoint.health.enabled=true "));
    assert!(java_opts.ends_with("-Dserver.shutdown.grace-period=24s"));
    assert_eq!(
        container.volume_mounts[0].mount_path,
        "/workspace/config"
    );

    let ready = app
        .status
        .condition(ConditionType::DeploymentReady)
        .expect("condition");
    assert_eq!(ready.status, ConditionStatus::Unknown);
}

#[test]
fn second_reconcile_writes_nothing() {
    let cluster = Cluster::new();
    let reconciler = cluster.reconciler();
    let mut app = application();

    reconciler.reconcile(&mut app).expect("first reconcile");
    let writes = cluster.writes();
    let status = app.status.clone();
    let deployment = cluster.deployment();

    reconciler.reconcile(&mut app).expect("second reconcile");

    assert_eq!(cluster.writes(), writes);
    assert_eq!(app.status, status);
    assert_eq!(cluster.deployment(), deployment);
}

#[test]
fn scaled_replicas_survive_convergence() {
    let cluster = Cluster::new();
    let reconciler = cluster.reconciler();
    let mut app = application();
    reconciler.reconcile(&mut app).expect("first reconcile");

    let mut scaled = cluster.deployment().expect("deployment");
    scaled.spec.replicas = Some(5);
    cluster.deployments.update(scaled).expect("autoscaler update");
    let writes = cluster.writes();

    reconciler.reconcile(&mut app).expect("second reconcile");

    assert_eq!(cluster.writes(), writes);
    assert_eq!(
        cluster.deployment().and_then(|deployment| deployment.spec.replicas),
        Some(5)
    );
}

#[test]
fn harmonized_child_diffs_to_noop() {
    let settings = OperatorSettings::default();
    let store = Arc::new(InMemoryObjectStore::<Deployment>::new());
    let store_handle: Arc<dyn ObjectStore<Deployment>> = store.clone();
    let reconciler = ChildReconciler::new(
        DeploymentChild::new(settings.clone()),
        store_handle,
        settings.owner_label(),
    );
    let mut app = application();
    let input = DeploymentInput {
        template: app.spec.template.clone(),
        ..Default::default()
    };
    reconciler.reconcile(&mut app, &input).expect("create");

    let mut scaled = store
        .get(Some("shop"), "orders")
        .expect("get")
        .expect("deployment");
    scaled.spec.replicas = Some(5);
    store.update(scaled).expect("scale");

    let data = reconciler.fetch(&app, &input).expect("fetch");
    let plan = reconciler.diff(&app, data);
    assert_eq!(plan.action, ChildAction::NoOp);
    assert_eq!(
        plan.current.and_then(|current| current.spec.replicas),
        Some(5)
    );
}

#[test]
fn foreign_deployment_is_reported_not_owned() {
    let cluster = Cluster::new();
    let foreign = Deployment::new(
        ObjectMeta::named(Some("shop"), "orders"),
        DeploymentSpec {
            replicas: Some(2),
            ..Default::default()
        },
    );
    let foreign = cluster.deployments.create(foreign).expect("seed foreign");
    let writes = cluster.deployments.write_count();
    let mut app = application();

    cluster.reconciler().reconcile(&mut app).expect("reconcile");

    let condition = app
        .status
        .condition(ConditionType::DeploymentReady)
        .expect("condition");
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason.as_deref(), Some("NotOwned"));
    assert!(condition
        .message
        .as_deref()
        .is_some_and(|message| message.contains("\"orders\"")));
    assert!(!app.status.is_ready());
    assert_eq!(cluster.deployments.write_count(), writes);
    assert_eq!(cluster.deployment(), Some(foreign));
}

#[test]
fn deployment_availability_drives_ready() {
    let cluster = Cluster::new();
    let reconciler = cluster.reconciler();
    let mut app = application();
    reconciler.reconcile(&mut app).expect("first reconcile");

    let mut rolling = cluster.deployment().expect("deployment");
    rolling.status = Some(DeploymentStatus {
        conditions: vec![
            deployment_condition("Available", "False", "MinimumReplicasUnavailable"),
            deployment_condition("Progressing", "True", "ReplicaSetUpdated"),
        ],
        ..Default::default()
    });
    cluster.deployments.replace(rolling).expect("status write");
    reconciler.reconcile(&mut app).expect("rolling reconcile");
    let ready = app.status.condition(ConditionType::Ready).expect("ready");
    assert_eq!(ready.status, ConditionStatus::Unknown);
    assert_eq!(ready.reason.as_deref(), Some("ReplicaSetUpdated"));

    let mut available = cluster.deployment().expect("deployment");
    available.status = Some(DeploymentStatus {
        conditions: vec![
            deployment_condition("Available", "True", "MinimumReplicasAvailable"),
            deployment_condition("Progressing", "True", "NewReplicaSetAvailable"),
        ],
        ..Default::default()
    });
    cluster.deployments.replace(available).expect("status write");
    reconciler.reconcile(&mut app).expect("available reconcile");
    assert!(app.status.is_ready());
}

#[tokio::test]
async fn traced_reconcile_converges() {
    trace::init();
    let cluster = Cluster::new();
    let reconciler = cluster.reconciler();
    let mut app = application();

    reconciler
        .reconcile_traced(&mut app)
        .await
        .expect("reconcile");

    assert!(cluster.deployment().is_some());
    assert!(trace::current_context().is_none());
}

#[test]
fn stale_deployment_update_is_transient() {
    let cluster = Cluster::new();
    let mut app = application();
    cluster.reconciler().reconcile(&mut app).expect("first reconcile");
    let before = cluster.deployment().expect("deployment");
    let writes = cluster.writes();

    app.spec.template.spec.containers[0].env.push(ContainerEnvVar {
        name: "TZ".into(),
        value: Some("UTC".into()),
        value_from: None,
    });
    let racing = ApplicationReconciler::new(
        OperatorSettings::default(),
        cluster.registry.clone(),
        Arc::new(RacingDeployments {
            inner: cluster.deployments.clone(),
        }),
        cluster.config_maps.clone(),
    );

    let err = racing.reconcile(&mut app).expect_err("stale update");

    assert!(err.is_transient(), "unexpected classification: {err}");
    assert!(err.is_retryable());
    assert_eq!(cluster.writes(), writes);
    let after = cluster.deployment().expect("deployment");
    assert_eq!(after.spec, before.spec);
}

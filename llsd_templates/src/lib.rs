#![cfg_attr(debug_assertions, warn(missing_docs))]
#![cfg_attr(debug_assertions, warn(rustdoc::broken_intra_doc_links))]
#![cfg_attr(not(debug_assertions), deny(missing_docs))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::broken_intra_doc_links))]

//! Llsd_templates holds the templating logic for the controller.
//!
//! Builders are pure: they turn a `llamastack.io/v1alpha2` object (plus the
//! reconciler's resolved rollout state) into fully-formed Kubernetes objects
//! with labels, selectors, and owner references set.
//!
//! ```
//! # use api::v1alpha2::*;
//! # use serde_json::{from_value, json};
//! use llsd_templates::{Build, ServiceBuilder};
//!
//! // Get this from the k8s API in a real use.
//! let d: LlamaStackDistribution = from_value(json!({
//!     "metadata": {
//!         "name": "example",
//!         "namespace": "default",
//!         "uid": "6060",
//!     },
//!     "spec": {
//!         "distribution": { "name": "starter" },
//!     },
//! })).unwrap();
//!
//! ServiceBuilder::try_from(&d).unwrap().build();
//! ```

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{apps::v1::*, autoscaling::v2::*, core::v1::*, networking::v1 as networking, policy::v1 as policy},
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
use kube::{Resource, ResourceExt};

use api::v1alpha2::*;

/// CONFIG_KEY is the ConfigMap key holding the rendered configuration.
pub const CONFIG_KEY: &str = "config.yaml";
/// CONFIG_MOUNT_DIR is where the configuration volume is mounted.
pub const CONFIG_MOUNT_DIR: &str = "/etc/llama-stack";
/// CONFIG_FILENAME is the in-container path of the configuration.
pub const CONFIG_FILENAME: &str = "/etc/llama-stack/config.yaml";
/// ANNOTATION_CONFIG_HASH is the pod-template annotation driving rollouts.
pub const ANNOTATION_CONFIG_HASH: &str = "llamastack.io/config-hash";
/// INGRESS_POLICY_GROUP_LABEL marks ingress-controller namespaces admitted
/// by the generated NetworkPolicy.
pub const INGRESS_POLICY_GROUP_LABEL: &str = "policy-group.network.k8s.io/ingress";

const CONFIG_VOLUME_NAME: &str = "config";
const DATA_VOLUME_NAME: &str = "data";
const CA_VOLUME_NAME: &str = "ca-bundle";
const CA_FILENAME: &str = "/etc/llama-stack/tls/ca.crt";
const CONTAINER_NAME: &str = "llama-stack";

/// Error is the error domain for creating templates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unable to determine a namespace.
    #[error("unable to determine namespace")]
    Namespace,
    /// Unable to construct an owner reference.
    #[error("unable to construct owner reference")]
    OwnerReference,
    /// The spec section the builder needs is absent.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
    /// Error while parsing a value.
    #[error("parse error: {0}")]
    Parse(#[from] strum::ParseError),
}

// Some helpers:

/// S is a helper to return an `Option<String>`.
#[inline]
fn s<S: ToString>(v: S) -> Option<String> {
    v.to_string().into()
}

/// Standard_labels is the label set carried by every owned resource.
pub fn standard_labels<S: ToString>(instance: S) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".into(), "llama-stack".into()),
        ("app.kubernetes.io/instance".into(), instance.to_string()),
        ("app.kubernetes.io/part-of".into(), "llama-stack".into()),
        (
            "app.kubernetes.io/managed-by".into(),
            "llama-stack-operator".into(),
        ),
    ])
}

/// Selector_labels is the stable subset used for pod selection.
///
/// Selectors are immutable on Deployments, so this set must never grow.
pub fn selector_labels<S: ToString>(instance: S) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".into(), "llama-stack".into()),
        ("app.kubernetes.io/instance".into(), instance.to_string()),
    ])
}

/// Config_map_name is the hash-suffixed name of a generated ConfigMap.
pub fn config_map_name(instance: &str, hash: &str) -> String {
    format!("{instance}-config-{}", hash.get(..8).unwrap_or(hash))
}

/// Service_name is the name of the managed Service.
pub fn service_name(instance: &str) -> String {
    format!("{instance}-service")
}

/// Pvc_name is the name of the managed PersistentVolumeClaim.
pub fn pvc_name(instance: &str) -> String {
    format!("{instance}-pvc")
}

/// Service_url is the in-cluster URL of the managed Service.
pub fn service_url(instance: &str, namespace: &str, port: i32) -> String {
    format!(
        "http://{}.{namespace}.svc.cluster.local:{port}",
        service_name(instance)
    )
}

fn common(value: &LlamaStackDistribution) -> Result<(String, String, OwnerReference), Error> {
    let name = value.name_unchecked();
    let namespace = value.namespace().ok_or(Error::Namespace)?;
    let owner_ref = value
        .controller_owner_ref(&())
        .ok_or(Error::OwnerReference)?;
    Ok((name, namespace, owner_ref))
}

fn metadata(name: String, namespace: &str, instance: &str, owner_ref: OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: name.into(),
        namespace: s(namespace),
        labels: standard_labels(instance).into(),
        owner_references: vec![owner_ref].into(),
        ..Default::default()
    }
}

/// Build is a common trait for constructing an object from a builder.
pub trait Build {
    /// Output is the output type.
    type Output;

    /// Build constructs and returns the final object.
    ///
    /// This is infallible because values are checked when set on the builder.
    fn build(self) -> Self::Output;
}

/// Rollout is the reconciler-resolved state applied to the Deployment in a
/// single mutation: image, config volume, env, and the rollout annotation
/// always change together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rollout {
    /// Image is the resolved container image.
    pub image: String,
    /// Config_map_name is the ConfigMap mounted as `config.yaml`.
    pub config_map_name: String,
    /// Config_hash is the content hash stamped onto the pod template.
    pub config_hash: String,
    /// Env is the environment carrying resolved secret references.
    pub env: Vec<EnvVar>,
}

/// ConfigMapBuilder constructs the immutable, hash-named ConfigMap holding a
/// rendered configuration.
pub struct ConfigMapBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    rendered: String,
    hash: String,
}

impl ConfigMapBuilder {
    /// New prepares a builder for the rendered config text and its hash.
    pub fn new(
        value: &LlamaStackDistribution,
        rendered: impl ToString,
        hash: impl ToString,
    ) -> Result<Self, Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            rendered: rendered.to_string(),
            hash: hash.to_string(),
        })
    }
}

impl Build for ConfigMapBuilder {
    type Output = ConfigMap;

    fn build(self) -> Self::Output {
        ConfigMap {
            metadata: metadata(
                config_map_name(&self.instance, &self.hash),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            immutable: Some(true),
            data: Some(BTreeMap::from([(CONFIG_KEY.into(), self.rendered)])),
            ..Default::default()
        }
    }
}

/// DeploymentBuilder constructs the managed [`Deployment`].
pub struct DeploymentBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    rollout: Rollout,
    replicas: i32,
    port: i32,
    workers: Option<i32>,
    resources: Option<ResourceRequirements>,
    storage: Option<PvcSpec>,
    overrides: Option<PodOverrides>,
    topology_spread_constraints: Vec<TopologySpreadConstraint>,
    ca_bundle: Option<api::ConfigMapKeySelector>,
}

impl DeploymentBuilder {
    /// New prepares a builder with the resolved rollout state.
    pub fn new(value: &LlamaStackDistribution, rollout: Rollout) -> Result<Self, Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        let spec = &value.spec;
        let workload = spec.workload.clone().unwrap_or_default();
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            rollout,
            replicas: workload.replicas,
            port: spec.port(),
            workers: workload.workers,
            resources: workload.resources,
            storage: workload.storage,
            overrides: workload.overrides,
            topology_spread_constraints: workload.topology_spread_constraints,
            ca_bundle: spec
                .networking
                .as_ref()
                .and_then(|n| n.tls.as_ref())
                .and_then(|t| t.ca_bundle.clone()),
        })
    }

    fn container(&self) -> Container {
        let overrides = self.overrides.clone().unwrap_or_default();
        let mut env = Vec::new();
        if let Some(workers) = self.workers {
            env.push(EnvVar {
                name: "LLAMA_STACK_WORKERS".into(),
                value: s(workers),
                ..Default::default()
            });
        }
        if self.ca_bundle.is_some() {
            env.push(EnvVar {
                name: "SSL_CERT_FILE".into(),
                value: s(CA_FILENAME),
                ..Default::default()
            });
        }
        env.extend(self.rollout.env.iter().cloned());
        env.extend(overrides.env);

        let mut volume_mounts = vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.into(),
            mount_path: CONFIG_MOUNT_DIR.into(),
            read_only: Some(true),
            ..Default::default()
        }];
        if let Some(storage) = &self.storage {
            volume_mounts.push(VolumeMount {
                name: DATA_VOLUME_NAME.into(),
                mount_path: storage.mount_path.clone().unwrap_or_else(|| "/data".into()),
                ..Default::default()
            });
        }
        if self.ca_bundle.is_some() {
            volume_mounts.push(VolumeMount {
                name: CA_VOLUME_NAME.into(),
                mount_path: "/etc/llama-stack/tls".into(),
                read_only: Some(true),
                ..Default::default()
            });
        }

        Container {
            name: CONTAINER_NAME.into(),
            image: s(&self.rollout.image),
            command: if overrides.command.is_empty() {
                None
            } else {
                Some(overrides.command)
            },
            args: if overrides.args.is_empty() {
                vec!["--config".into(), CONFIG_FILENAME.into()].into()
            } else {
                Some(overrides.args)
            },
            env: env.into(),
            ports: vec![ContainerPort {
                name: s("http"),
                container_port: self.port,
                ..Default::default()
            }]
            .into(),
            volume_mounts: volume_mounts.into(),
            security_context: SecurityContext {
                allow_privilege_escalation: false.into(),
                ..Default::default()
            }
            .into(),
            resources: self.resources.clone(),
            startup_probe: Probe {
                tcp_socket: TCPSocketAction {
                    port: IntOrString::String("http".into()),
                    ..Default::default()
                }
                .into(),
                initial_delay_seconds: 5.into(),
                period_seconds: 1.into(),
                failure_threshold: 60.into(),
                ..Default::default()
            }
            .into(),
            liveness_probe: Probe {
                http_get: HTTPGetAction {
                    port: IntOrString::String("http".into()),
                    path: s("/v1/health"),
                    ..Default::default()
                }
                .into(),
                initial_delay_seconds: 15.into(),
                period_seconds: 20.into(),
                ..Default::default()
            }
            .into(),
            readiness_probe: Probe {
                http_get: HTTPGetAction {
                    port: IntOrString::String("http".into()),
                    path: s("/v1/health"),
                    ..Default::default()
                }
                .into(),
                initial_delay_seconds: 5.into(),
                period_seconds: 10.into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![Volume {
            name: CONFIG_VOLUME_NAME.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.rollout.config_map_name.clone(),
                items: Some(vec![KeyToPath {
                    key: CONFIG_KEY.into(),
                    path: CONFIG_KEY.into(),
                    mode: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }];
        if self.storage.is_some() {
            volumes.push(Volume {
                name: DATA_VOLUME_NAME.into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pvc_name(&self.instance),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        if let Some(ca) = &self.ca_bundle {
            volumes.push(Volume {
                name: CA_VOLUME_NAME.into(),
                config_map: Some(ConfigMapVolumeSource {
                    name: ca.name.clone(),
                    items: Some(vec![KeyToPath {
                        key: ca.key.clone(),
                        path: "ca.crt".into(),
                        mode: None,
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        volumes
    }
}

impl Build for DeploymentBuilder {
    type Output = Deployment;

    fn build(self) -> Self::Output {
        let labels = standard_labels(&self.instance);
        let selector = selector_labels(&self.instance);
        let container = self.container();
        let volumes = self.volumes();

        Deployment {
            metadata: metadata(
                self.instance.clone(),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: DeploymentSpec {
                replicas: self.replicas.into(),
                revision_history_limit: 3.into(),
                progress_deadline_seconds: 600.into(),
                selector: LabelSelector {
                    match_labels: selector.into(),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels: labels.into(),
                        annotations: BTreeMap::from([(
                            ANNOTATION_CONFIG_HASH.to_string(),
                            self.rollout.config_hash.clone(),
                        )])
                        .into(),
                        ..Default::default()
                    }
                    .into(),
                    spec: PodSpec {
                        termination_grace_period_seconds: 10.into(),
                        security_context: PodSecurityContext {
                            run_as_user: 65532.into(),
                            ..Default::default()
                        }
                        .into(),
                        topology_spread_constraints: if self.topology_spread_constraints.is_empty()
                        {
                            None
                        } else {
                            Some(self.topology_spread_constraints.clone())
                        },
                        containers: vec![container],
                        volumes: volumes.into(),
                        ..Default::default()
                    }
                    .into(),
                },
                ..Default::default()
            }
            .into(),
            status: None,
        }
    }
}

/// ServiceBuilder constructs the managed [`Service`].
pub struct ServiceBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    port: i32,
}

impl TryFrom<&LlamaStackDistribution> for ServiceBuilder {
    type Error = Error;

    fn try_from(value: &LlamaStackDistribution) -> Result<Self, Self::Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            port: value.spec.port(),
        })
    }
}

impl Build for ServiceBuilder {
    type Output = Service;

    fn build(self) -> Self::Output {
        Service {
            metadata: metadata(
                service_name(&self.instance),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: ServiceSpec {
                selector: selector_labels(&self.instance).into(),
                ports: vec![ServicePort {
                    name: s("http"),
                    port: self.port,
                    target_port: IntOrString::String("http".into()).into(),
                    ..Default::default()
                }]
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }
}

/// PvcBuilder constructs the managed [`PersistentVolumeClaim`].
///
/// The claim is created once; in-place resize is not attempted.
pub struct PvcBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    storage: PvcSpec,
}

impl TryFrom<&LlamaStackDistribution> for PvcBuilder {
    type Error = Error;

    fn try_from(value: &LlamaStackDistribution) -> Result<Self, Self::Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        let storage = value
            .spec
            .workload
            .as_ref()
            .and_then(|w| w.storage.clone())
            .ok_or(Error::NotConfigured("workload.storage"))?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            storage,
        })
    }
}

impl Build for PvcBuilder {
    type Output = PersistentVolumeClaim;

    fn build(self) -> Self::Output {
        PersistentVolumeClaim {
            metadata: metadata(
                pvc_name(&self.instance),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: PersistentVolumeClaimSpec {
                access_modes: vec!["ReadWriteOnce".into()].into(),
                storage_class_name: self.storage.storage_class_name.clone(),
                resources: VolumeResourceRequirements {
                    requests: BTreeMap::from([(
                        "storage".into(),
                        Quantity(self.storage.size.clone()),
                    )])
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }
}

/// IngressBuilder constructs the [`networking::Ingress`] when exposure is
/// requested.
pub struct IngressBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    port: i32,
    hostname: Option<String>,
    tls_secret: Option<String>,
}

impl TryFrom<&LlamaStackDistribution> for IngressBuilder {
    type Error = Error;

    fn try_from(value: &LlamaStackDistribution) -> Result<Self, Self::Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        let net = value.spec.networking.as_ref();
        let expose = net.and_then(|n| n.expose.as_ref());
        if !expose.is_some_and(Expose::enabled) {
            return Err(Error::NotConfigured("networking.expose"));
        }
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            port: value.spec.port(),
            hostname: expose.and_then(|e| e.hostname()).map(String::from),
            tls_secret: net
                .and_then(|n| n.tls.as_ref())
                .and_then(|t| t.secret_name.clone()),
        })
    }
}

impl Build for IngressBuilder {
    type Output = networking::Ingress;

    fn build(self) -> Self::Output {
        let backend = networking::IngressBackend {
            service: networking::IngressServiceBackend {
                name: service_name(&self.instance),
                port: networking::ServiceBackendPort {
                    number: self.port.into(),
                    ..Default::default()
                }
                .into(),
            }
            .into(),
            ..Default::default()
        };
        networking::Ingress {
            metadata: metadata(
                self.instance.clone(),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: networking::IngressSpec {
                rules: vec![networking::IngressRule {
                    host: self.hostname.clone(),
                    http: networking::HTTPIngressRuleValue {
                        paths: vec![networking::HTTPIngressPath {
                            path: s("/"),
                            path_type: "Prefix".into(),
                            backend,
                        }],
                    }
                    .into(),
                }]
                .into(),
                tls: self.tls_secret.map(|secret_name| {
                    vec![networking::IngressTLS {
                        hosts: self.hostname.map(|h| vec![h]),
                        secret_name: secret_name.into(),
                    }]
                }),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }
}

/// NetworkPolicyBuilder constructs the [`networking::NetworkPolicy`]
/// restricting ingress to the managed pods.
pub struct NetworkPolicyBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    port: i32,
    operator_namespace: String,
    allowed_from: Option<AllowedFrom>,
}

impl NetworkPolicyBuilder {
    /// New prepares a builder; `operator_namespace` is always admitted.
    pub fn new(
        value: &LlamaStackDistribution,
        operator_namespace: impl ToString,
    ) -> Result<Self, Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            port: value.spec.port(),
            operator_namespace: operator_namespace.to_string(),
            allowed_from: value
                .spec
                .networking
                .as_ref()
                .and_then(|n| n.allowed_from.clone()),
        })
    }

    fn peers(&self) -> Vec<networking::NetworkPolicyPeer> {
        let allowed = self.allowed_from.clone().unwrap_or_default();
        // The wildcard short-circuits every other peer.
        if allowed.namespaces.iter().any(|ns| ns == "*") {
            return vec![networking::NetworkPolicyPeer {
                namespace_selector: LabelSelector::default().into(),
                ..Default::default()
            }];
        }

        let mut peers = vec![
            // Sibling llama-stack pods in the same namespace.
            networking::NetworkPolicyPeer {
                pod_selector: LabelSelector {
                    match_labels: BTreeMap::from([(
                        "app.kubernetes.io/part-of".to_string(),
                        "llama-stack".to_string(),
                    )])
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            },
            // Everything in the operator's namespace.
            networking::NetworkPolicyPeer {
                namespace_selector: LabelSelector {
                    match_labels: BTreeMap::from([(
                        "kubernetes.io/metadata.name".to_string(),
                        self.operator_namespace.clone(),
                    )])
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            },
        ];
        for ns in &allowed.namespaces {
            peers.push(networking::NetworkPolicyPeer {
                namespace_selector: LabelSelector {
                    match_labels: BTreeMap::from([(
                        "kubernetes.io/metadata.name".to_string(),
                        ns.clone(),
                    )])
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            });
        }
        for key in &allowed.labels {
            peers.push(networking::NetworkPolicyPeer {
                namespace_selector: LabelSelector {
                    match_expressions: vec![LabelSelectorRequirement {
                        key: key.clone(),
                        operator: "Exists".into(),
                        values: None,
                    }]
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            });
        }
        // The platform's ingress controllers.
        peers.push(networking::NetworkPolicyPeer {
            namespace_selector: LabelSelector {
                match_labels: BTreeMap::from([(
                    INGRESS_POLICY_GROUP_LABEL.to_string(),
                    String::new(),
                )])
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        });
        peers
    }
}

impl Build for NetworkPolicyBuilder {
    type Output = networking::NetworkPolicy;

    fn build(self) -> Self::Output {
        let peers = self.peers();
        networking::NetworkPolicy {
            metadata: metadata(
                self.instance.clone(),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: networking::NetworkPolicySpec {
                pod_selector: Some(LabelSelector {
                    match_labels: selector_labels(&self.instance).into(),
                    ..Default::default()
                }),
                policy_types: vec!["Ingress".into()].into(),
                ingress: vec![networking::NetworkPolicyIngressRule {
                    from: peers.into(),
                    ports: vec![networking::NetworkPolicyPort {
                        protocol: s("TCP"),
                        port: IntOrString::Int(self.port).into(),
                        ..Default::default()
                    }]
                    .into(),
                }]
                .into(),
                ..Default::default()
            }
            .into(),
        }
    }
}

/// HpaBuilder constructs the [`HorizontalPodAutoscaler`] when autoscaling is
/// requested.
pub struct HpaBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    autoscaling: Autoscaling,
}

impl TryFrom<&LlamaStackDistribution> for HpaBuilder {
    type Error = Error;

    fn try_from(value: &LlamaStackDistribution) -> Result<Self, Self::Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        let autoscaling = value
            .spec
            .workload
            .as_ref()
            .and_then(|w| w.autoscaling.clone())
            .ok_or(Error::NotConfigured("workload.autoscaling"))?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            autoscaling,
        })
    }
}

impl Build for HpaBuilder {
    type Output = HorizontalPodAutoscaler;

    fn build(self) -> Self::Output {
        HorizontalPodAutoscaler {
            metadata: metadata(
                self.instance.clone(),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: HorizontalPodAutoscalerSpec {
                min_replicas: self.autoscaling.min_replicas.unwrap_or(1).into(),
                max_replicas: self.autoscaling.max_replicas,
                scale_target_ref: CrossVersionObjectReference {
                    api_version: s("apps/v1"),
                    kind: "Deployment".into(),
                    name: self.instance.clone(),
                },
                metrics: vec![MetricSpec {
                    type_: "Resource".into(),
                    resource: ResourceMetricSource {
                        name: "cpu".into(),
                        target: MetricTarget {
                            type_: "Utilization".into(),
                            average_utilization: self
                                .autoscaling
                                .target_cpu_utilization
                                .unwrap_or(80)
                                .into(),
                            ..Default::default()
                        },
                    }
                    .into(),
                    ..Default::default()
                }]
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }
}

/// PdbBuilder constructs the [`policy::PodDisruptionBudget`] when one is
/// requested.
pub struct PdbBuilder {
    namespace: String,
    instance: String,
    owner_ref: OwnerReference,
    pdb: PdbSpec,
}

impl TryFrom<&LlamaStackDistribution> for PdbBuilder {
    type Error = Error;

    fn try_from(value: &LlamaStackDistribution) -> Result<Self, Self::Error> {
        let (instance, namespace, owner_ref) = common(value)?;
        let pdb = value
            .spec
            .workload
            .as_ref()
            .and_then(|w| w.pod_disruption_budget.clone())
            .ok_or(Error::NotConfigured("workload.podDisruptionBudget"))?;
        Ok(Self {
            namespace,
            instance,
            owner_ref,
            pdb,
        })
    }
}

impl Build for PdbBuilder {
    type Output = policy::PodDisruptionBudget;

    fn build(self) -> Self::Output {
        policy::PodDisruptionBudget {
            metadata: metadata(
                self.instance.clone(),
                &self.namespace,
                &self.instance,
                self.owner_ref,
            ),
            spec: policy::PodDisruptionBudgetSpec {
                min_available: self.pdb.min_available.clone(),
                max_unavailable: self.pdb.max_unavailable.clone(),
                selector: LabelSelector {
                    match_labels: selector_labels(&self.instance).into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_json_diff::assert_json_eq;
    use serde_json::{from_value, json, to_value};

    fn llsd(spec: serde_json::Value) -> LlamaStackDistribution {
        from_value(json!({
            "apiVersion": "llamastack.io/v1alpha2",
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "test", "uid": "6060" },
            "spec": spec,
        }))
        .unwrap()
    }

    fn rollout() -> Rollout {
        Rollout {
            image: "docker.io/llamastack/distribution-starter:0.2.12".into(),
            config_map_name: "demo-config-0a1b2c3d".into(),
            config_hash: "0a1b2c3d".repeat(8),
            env: vec![EnvVar {
                name: "LLSD_VLLM_API_KEY".into(),
                value_from: EnvVarSource {
                    secret_key_ref: SecretKeySelector {
                        name: "vllm-creds".into(),
                        key: "token".into(),
                        ..Default::default()
                    }
                    .into(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn config_map_is_immutable_and_hash_named() {
        let d = llsd(json!({ "distribution": { "name": "starter" } }));
        let hash = "cafe0123deadbeef".to_string();
        let cm = ConfigMapBuilder::new(&d, "version: \"2\"\n", &hash)
            .unwrap()
            .build();
        assert_eq!(cm.name_unchecked(), "demo-config-cafe0123");
        assert_eq!(cm.immutable, Some(true));
        assert_eq!(cm.data.unwrap()[CONFIG_KEY], "version: \"2\"\n");
        let oref = &cm.metadata.owner_references.unwrap()[0];
        assert_eq!(oref.kind, "LlamaStackDistribution");
        assert_eq!(oref.controller, Some(true));
    }

    #[test]
    fn deployment_carries_rollout_atomically() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "workload": { "replicas": 2, "workers": 4 },
        }));
        let r = rollout();
        let dep = DeploymentBuilder::new(&d, r.clone()).unwrap().build();
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let tmpl = spec.template;
        let annotations = tmpl.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations[ANNOTATION_CONFIG_HASH], r.config_hash);

        let pod = tmpl.spec.unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some(r.image.as_str()));
        let env = c.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "LLSD_VLLM_API_KEY"));
        assert!(
            env.iter()
                .any(|e| e.name == "LLAMA_STACK_WORKERS" && e.value.as_deref() == Some("4"))
        );
        let vols = pod.volumes.unwrap();
        let cfg = vols.iter().find(|v| v.name == "config").unwrap();
        assert_eq!(
            cfg.config_map.as_ref().unwrap().name,
            r.config_map_name
        );
        // No secret VALUE anywhere in the pod spec, only references.
        let rendered = serde_json::to_string(&pod.containers).unwrap();
        assert!(!rendered.contains("token-value"));
    }

    #[test]
    fn deployment_selector_matches_template() {
        let d = llsd(json!({ "distribution": { "name": "starter" } }));
        let dep = DeploymentBuilder::new(&d, rollout()).unwrap().build();
        let spec = dep.spec.unwrap();
        let sel = spec.selector.match_labels.unwrap();
        let labels = spec.template.metadata.unwrap().labels.unwrap();
        for (k, v) in &sel {
            assert_eq!(labels.get(k), Some(v), "selector key {k} missing");
        }
    }

    #[test]
    fn deployment_mounts_pvc_when_storage_set() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "workload": { "storage": { "size": "10Gi", "mountPath": "/models" } },
        }));
        let dep = DeploymentBuilder::new(&d, rollout()).unwrap().build();
        let pod = dep.spec.unwrap().template.spec.unwrap();
        let mount = pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "data")
            .unwrap();
        assert_eq!(mount.mount_path, "/models");
        let vol = pod.volumes.unwrap().into_iter().find(|v| v.name == "data").unwrap();
        assert_eq!(
            vol.persistent_volume_claim.unwrap().claim_name,
            "demo-pvc"
        );
    }

    #[test]
    fn service() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": { "port": 8321 },
        }));
        let got = ServiceBuilder::try_from(&d).unwrap().build();
        let got = to_value(got).unwrap();
        let want = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "demo-service",
                "namespace": "test",
                "labels": {
                    "app": "llama-stack",
                    "app.kubernetes.io/instance": "demo",
                    "app.kubernetes.io/managed-by": "llama-stack-operator",
                    "app.kubernetes.io/part-of": "llama-stack",
                },
                "ownerReferences": [{
                    "apiVersion": "llamastack.io/v1alpha2",
                    "kind": "LlamaStackDistribution",
                    "blockOwnerDeletion": true,
                    "controller": true,
                    "name": "demo",
                    "uid": "6060",
                }],
            },
            "spec": {
                "selector": {
                    "app": "llama-stack",
                    "app.kubernetes.io/instance": "demo",
                },
                "ports": [
                    { "name": "http", "port": 8321, "targetPort": "http" },
                ],
            },
        });
        assert_json_eq!(got, want);
    }

    #[test]
    fn pvc_requests_size() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "workload": { "storage": { "size": "20Gi", "storageClassName": "fast" } },
        }));
        let pvc = PvcBuilder::try_from(&d).unwrap().build();
        assert_eq!(pvc.name_unchecked(), "demo-pvc");
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("20Gi".into())
        );
    }

    #[test]
    fn pvc_requires_storage() {
        let d = llsd(json!({ "distribution": { "name": "starter" } }));
        assert!(matches!(
            PvcBuilder::try_from(&d),
            Err(Error::NotConfigured("workload.storage"))
        ));
    }

    #[test]
    fn ingress_with_hostname_and_tls() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": {
                "expose": { "hostname": "llsd.example.com" },
                "tls": { "secretName": "llsd-tls" },
            },
        }));
        let ing = IngressBuilder::try_from(&d).unwrap().build();
        let spec = ing.spec.unwrap();
        let rule = &spec.rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("llsd.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "demo-service");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(8321));
        let tls = &spec.tls.unwrap()[0];
        assert_eq!(tls.secret_name.as_deref(), Some("llsd-tls"));
        assert_eq!(tls.hosts.as_ref().unwrap()[0], "llsd.example.com");
    }

    #[test]
    fn empty_expose_object_enables_ingress() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": { "expose": {} },
        }));
        let ing = IngressBuilder::try_from(&d).unwrap().build();
        assert!(ing.spec.unwrap().rules.unwrap()[0].host.is_none());
    }

    #[test]
    fn unexposed_instance_builds_no_ingress() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": { "expose": false },
        }));
        assert!(IngressBuilder::try_from(&d).is_err());
        let d = llsd(json!({ "distribution": { "name": "starter" } }));
        assert!(IngressBuilder::try_from(&d).is_err());
    }

    #[test]
    fn network_policy_default_peers() {
        let d = llsd(json!({ "distribution": { "name": "starter" } }));
        let np = NetworkPolicyBuilder::new(&d, "llsd-operator").unwrap().build();
        let spec = np.spec.unwrap();
        assert_eq!(
            spec.pod_selector.unwrap().match_labels.unwrap()["app.kubernetes.io/instance"],
            "demo"
        );
        let rule = &spec.ingress.unwrap()[0];
        assert_eq!(
            rule.ports.as_ref().unwrap()[0].port,
            Some(IntOrString::Int(8321))
        );
        let peers = rule.from.as_ref().unwrap();
        // part-of pods + operator namespace + ingress controllers.
        assert_eq!(peers.len(), 3);
        assert_eq!(
            peers[1]
                .namespace_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()["kubernetes.io/metadata.name"],
            "llsd-operator"
        );
        assert!(
            peers[2]
                .namespace_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()
                .contains_key(INGRESS_POLICY_GROUP_LABEL)
        );
    }

    #[test]
    fn network_policy_wildcard_short_circuits() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": {
                "allowedFrom": { "namespaces": ["monitoring", "*"], "labels": ["team"] },
            },
        }));
        let np = NetworkPolicyBuilder::new(&d, "llsd-operator").unwrap().build();
        let rule = &np.spec.unwrap().ingress.unwrap()[0];
        let peers = rule.from.as_ref().unwrap();
        assert_eq!(peers.len(), 1);
        // The all-namespaces selector is the empty selector.
        assert_eq!(
            peers[0].namespace_selector,
            Some(LabelSelector::default())
        );
    }

    #[test]
    fn network_policy_label_peers_use_exists() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "networking": {
                "allowedFrom": { "namespaces": ["monitoring"], "labels": ["team"] },
            },
        }));
        let np = NetworkPolicyBuilder::new(&d, "llsd-operator").unwrap().build();
        let rule = &np.spec.unwrap().ingress.unwrap()[0];
        let peers = rule.from.as_ref().unwrap();
        // defaults (2) + namespace + label + ingress controllers.
        assert_eq!(peers.len(), 5);
        let label_peer = peers
            .iter()
            .find_map(|p| {
                p.namespace_selector
                    .as_ref()
                    .and_then(|s| s.match_expressions.as_ref())
            })
            .unwrap();
        assert_eq!(label_peer[0].key, "team");
        assert_eq!(label_peer[0].operator, "Exists");
    }

    #[test]
    fn hpa_targets_deployment() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "workload": {
                "autoscaling": { "minReplicas": 2, "maxReplicas": 8, "targetCpuUtilization": 60 },
            },
        }));
        let hpa = HpaBuilder::try_from(&d).unwrap().build();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 8);
        assert_eq!(spec.scale_target_ref.name, "demo");
        let metric = &spec.metrics.unwrap()[0];
        assert_eq!(
            metric.resource.as_ref().unwrap().target.average_utilization,
            Some(60)
        );
    }

    #[test]
    fn pdb_uses_selector_labels() {
        let d = llsd(json!({
            "distribution": { "name": "starter" },
            "workload": { "podDisruptionBudget": { "maxUnavailable": 1 } },
        }));
        let pdb = PdbBuilder::try_from(&d).unwrap().build();
        let spec = pdb.spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
        assert_eq!(
            spec.selector.unwrap().match_labels.unwrap()["app"],
            "llama-stack"
        );
    }

    #[test]
    fn service_url_shape() {
        assert_eq!(
            service_url("demo", "test", 8321),
            "http://demo-service.test.svc.cluster.local:8321"
        );
    }
}

//! Module `v1alpha1` implements the original, server-centric shape of the
//! LlamaStackDistribution CRD API.
//!
//! This version is served for compatibility only; objects are converted to
//! [`crate::v1alpha2`] (the hub) for storage. See [`crate::convert`].

use k8s_openapi::{api::core, apimachinery::pkg::apis::meta};
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{ConfigMapKeySelector, DistributionSelector};
use crate::v1alpha2::{AllowedFrom, Autoscaling, PdbSpec, Phase, PodOverrides, PvcSpec};

/// VERSION is the kubernetes API group's version.
pub static VERSION: &str = "v1alpha1";

/// LlamaStackDistributionSpec describes the desired state of a LlamaStack
/// deployment, v1alpha1 shape.
#[derive(
    KubeSchema, Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize, Validate,
)]
#[kube(
    group = "llamastack.io",
    version = "v1alpha1",
    kind = "LlamaStackDistribution",
    namespaced,
    status = "LlamaStackDistributionStatus",
    shortname = "llsd",
    category = "apps",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct LlamaStackDistributionSpec {
    /// Replicas is the desired replica count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Server configures the LlamaStack server.
    pub server: ServerSpec,
    /// Network configures exposure and ingress peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

/// ServerSpec configures the LlamaStack server.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Distribution selects the LlamaStack distribution to run.
    pub distribution: DistributionSelector,
    /// ContainerSpec adjusts the generated server container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    /// UserConfig supplies a complete config.yaml via a ConfigMap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_config: Option<UserConfig>,
    /// TlsConfig configures trust for outbound provider connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
    /// Autoscaling requests an HPA.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Workers is the server's worker-process count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<i32>,
    /// PodOverrides adjusts the generated pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_overrides: Option<PodOverrides>,
    /// PodDisruptionBudget requests a PDB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PdbSpec>,
    /// TopologySpreadConstraints for the pod template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<core::v1::TopologySpreadConstraint>,
    /// Storage requests a PVC mounted into the server container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<PvcSpec>,
}

/// ContainerSpec adjusts the generated server container.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Name overrides the container name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port the server listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Resources are the container's compute resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<core::v1::ResourceRequirements>,
    /// Env is appended to the container environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<core::v1::EnvVar>,
    /// Command replaces the container entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args replaces the container arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// UserConfig supplies a complete config.yaml via a ConfigMap.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// ConfigMapName names a ConfigMap in the CR's namespace.
    pub config_map_name: String,
}

/// TlsConfig configures trust for outbound provider connections.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// CaBundle references a ConfigMap key holding a CA bundle to trust.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<ConfigMapKeySelector>,
}

/// NetworkSpec configures exposure and ingress peers.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// ExposeRoute requests external exposure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose_route: Option<bool>,
    /// AllowedFrom widens the NetworkPolicy's ingress peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_from: Option<AllowedFrom>,
}

/// LlamaStackDistributionStatus describes the observed state, v1alpha1 shape.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlamaStackDistributionStatus {
    /// Phase is a coarse lifecycle summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Conditions reports k8s-style conditions for parts of the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<meta::v1::Condition>>,
    /// AvailableReplicas observed on the managed Deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
    /// ServiceURL is the in-cluster URL of the managed Service.
    #[serde(rename = "serviceURL", skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

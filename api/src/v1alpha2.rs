//! Module `v1alpha2` implements the v1alpha2 LlamaStackDistribution CRD API.
//!
//! This is the storage version and the conversion hub.
use std::collections::BTreeMap;

use k8s_openapi::{
    api::core,
    apimachinery::pkg::{apis::meta, util::intstr::IntOrString},
};
use kube::{CustomResource, KubeSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::{ConfigMapKeySelector, DistributionSelector, SecretKeySelector};

/// VERSION is the kubernetes API group's version.
pub static VERSION: &str = "v1alpha2";

/// LlamaStackDistributionSpec describes the desired state of a LlamaStack deployment.
#[derive(
    KubeSchema, Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize, Validate,
)]
#[kube(
    group = "llamastack.io",
    version = "v1alpha2",
    kind = "LlamaStackDistribution",
    namespaced,
    status = "LlamaStackDistributionStatus",
    shortname = "llsd",
    category = "apps",
    derive = "Default",
    derive = "PartialEq",
    scale(
        spec_replicas_path = ".spec.workload.replicas",
        status_replicas_path = ".status.availableReplicas",
        label_selector_path = ".status.selector"
    ),
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Providers","type":"integer","jsonPath":".status.configGeneration.providerCount"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Image","type":"string","priority":1,"jsonPath":".status.resolvedDistribution.image"}"#,
    printcolumn = r#"{"name":"Config","type":"string","priority":1,"jsonPath":".status.configGeneration.configMapName"}"#
)]
#[serde(rename_all = "camelCase")]
#[x_kube(validation = (
    "!(has(self.overrideConfig) && (has(self.providers) || has(self.resources) || has(self.storage) || has(self.disabled)))",
    r#""overrideConfig" is mutually exclusive with "providers", "resources", "storage", and "disabled""#
))]
pub struct LlamaStackDistributionSpec {
    /// Distribution selects the LlamaStack distribution to run.
    pub distribution: DistributionSelector,

    /// Providers configures the stack's provider families.
    ///
    /// Each family accepts a single provider descriptor or an ordered list of
    /// descriptors. Entries in a list longer than one must carry an explicit
    /// `id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Providers>,

    /// Resources registers models, tool groups, and shields with the stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    /// Storage configures the stack's state backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StateStorage>,

    /// Disabled lists API families to subtract from the synthesized config.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<ProviderApi>,

    /// Networking configures the server port, TLS, and exposure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,

    /// Workload configures the managed Deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<Workload>,

    /// OverrideConfig supplies a complete config.yaml, bypassing synthesis.
    ///
    /// Mutually exclusive with `providers`, `resources`, `storage`, and
    /// `disabled`. The referenced ConfigMap must be in the same namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_config: Option<OverrideConfig>,

    /// ExternalProviders are provider entries merged after synthesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_providers: Vec<ExternalProvider>,
}

impl LlamaStackDistributionSpec {
    /// Reports whether any synthesis input is present.
    pub fn has_synthesis_inputs(&self) -> bool {
        self.providers.is_some()
            || self.resources.is_some()
            || self.storage.is_some()
            || !self.disabled.is_empty()
    }

    /// Port reports the configured server port, or the default.
    pub fn port(&self) -> i32 {
        self.networking.as_ref().map_or(DEFAULT_PORT, |n| n.port)
    }

    /// Replicas reports the configured replica count, or the default.
    pub fn replicas(&self) -> i32 {
        self.workload.as_ref().map_or(1, |w| w.replicas)
    }
}

/// DEFAULT_PORT is the port the LlamaStack server listens on if unconfigured.
pub const DEFAULT_PORT: i32 = 8321;

/// ProviderApi enumerates the stack's provider families.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ProviderApi {
    /// Model inference.
    Inference,
    /// Safety shields.
    Safety,
    /// Vector stores.
    VectorIo,
    /// Tool execution.
    ToolRuntime,
    /// Telemetry sinks.
    Telemetry,
}

impl ProviderApi {
    /// ALL is every family, in the canonical config-document order.
    pub const ALL: [ProviderApi; 5] = [
        ProviderApi::Inference,
        ProviderApi::Safety,
        ProviderApi::VectorIo,
        ProviderApi::ToolRuntime,
        ProviderApi::Telemetry,
    ];

    /// Config_key is this family's key in the rendered config document.
    pub fn config_key(&self) -> &'static str {
        match self {
            ProviderApi::Inference => "inference",
            ProviderApi::Safety => "safety",
            ProviderApi::VectorIo => "vector_io",
            ProviderApi::ToolRuntime => "tool_runtime",
            ProviderApi::Telemetry => "telemetry",
        }
    }

    /// Field_name is this family's field under `spec.providers`.
    pub fn field_name(&self) -> &'static str {
        match self {
            ProviderApi::Inference => "inference",
            ProviderApi::Safety => "safety",
            ProviderApi::VectorIo => "vectorIo",
            ProviderApi::ToolRuntime => "toolRuntime",
            ProviderApi::Telemetry => "telemetry",
        }
    }
}

impl std::fmt::Display for ProviderApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Providers maps each API family to its provider configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct Providers {
    /// Inference providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::provider_set")]
    pub inference: Option<ProviderSet>,
    /// Safety providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::provider_set")]
    pub safety: Option<ProviderSet>,
    /// Vector-IO providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::provider_set")]
    pub vector_io: Option<ProviderSet>,
    /// Tool-runtime providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::provider_set")]
    pub tool_runtime: Option<ProviderSet>,
    /// Telemetry providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::provider_set")]
    pub telemetry: Option<ProviderSet>,
}

impl Providers {
    /// Families iterates the populated families in canonical order.
    pub fn families(&self) -> impl Iterator<Item = (ProviderApi, &ProviderSet)> {
        [
            (ProviderApi::Inference, self.inference.as_ref()),
            (ProviderApi::Safety, self.safety.as_ref()),
            (ProviderApi::VectorIo, self.vector_io.as_ref()),
            (ProviderApi::ToolRuntime, self.tool_runtime.as_ref()),
            (ProviderApi::Telemetry, self.telemetry.as_ref()),
        ]
        .into_iter()
        .filter_map(|(api, set)| set.map(|s| (api, s)))
    }

    /// Get returns the set for a family, if configured.
    pub fn get(&self, api: ProviderApi) -> Option<&ProviderSet> {
        match api {
            ProviderApi::Inference => self.inference.as_ref(),
            ProviderApi::Safety => self.safety.as_ref(),
            ProviderApi::VectorIo => self.vector_io.as_ref(),
            ProviderApi::ToolRuntime => self.tool_runtime.as_ref(),
            ProviderApi::Telemetry => self.telemetry.as_ref(),
        }
    }
}

/// ProviderSet is a single provider descriptor or an ordered list of them.
///
/// The CRD schema advertises this union as an untyped object; the two
/// accepted shapes are documented on [`Providers`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderSet {
    /// A single descriptor; its `id` defaults to the provider name.
    One(ProviderSpec),
    /// An ordered list of descriptors.
    Many(Vec<ProviderSpec>),
}

impl ProviderSet {
    /// Entries returns the descriptors in declaration order.
    pub fn entries(&self) -> &[ProviderSpec] {
        match self {
            ProviderSet::One(p) => std::slice::from_ref(p),
            ProviderSet::Many(ps) => ps,
        }
    }

    /// Is_list reports whether the list form was used.
    pub fn is_list(&self) -> bool {
        matches!(self, ProviderSet::Many(_))
    }
}

/// ProviderSpec describes one provider within a family.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Id is the provider's identifier, unique across all families.
    ///
    /// Defaults to the provider name for single-descriptor families;
    /// required when the family is a list with more than one entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Provider is the upstream provider name, e.g. `vllm` or `ollama`.
    pub provider: String,
    /// Endpoint is the provider's URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// ApiKey references a Secret key holding the provider credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretSource>,
    /// Settings is free-form provider configuration, merged into the
    /// provider's `config` section.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::free_form")]
    pub settings: Option<BTreeMap<String, Value>>,
}

impl ProviderSpec {
    /// Effective_id is the explicit `id`, or the provider name.
    pub fn effective_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.provider)
    }
}

/// SecretSource wraps a Secret key reference.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    /// Selects a key of a Secret in the object's namespace.
    pub secret_key_ref: SecretKeySelector,
}

/// Resources registers models, tool groups, and shields.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Models to register. A bare string uses the first inference provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "schema::model_list")]
    pub models: Vec<ModelSpec>,
    /// Tool groups to register; requires a tool-runtime provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolGroupSpec>,
    /// Shields to register; requires a safety provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shields: Vec<ShieldSpec>,
}

impl Resources {
    /// Count is the total number of registered resources.
    pub fn count(&self) -> usize {
        self.models
            .len()
            .saturating_add(self.tools.len())
            .saturating_add(self.shields.len())
    }
}

/// ModelSpec is a bare model name or a detailed model registration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelSpec {
    /// A bare name; registered against the first inference provider.
    Name(String),
    /// A detailed registration.
    Detailed(ModelDetail),
}

impl ModelSpec {
    /// Name is the model identifier.
    pub fn name(&self) -> &str {
        match self {
            ModelSpec::Name(n) => n,
            ModelSpec::Detailed(d) => &d.name,
        }
    }

    /// Provider is the explicit provider id, if given.
    pub fn provider(&self) -> Option<&str> {
        match self {
            ModelSpec::Name(_) => None,
            ModelSpec::Detailed(d) => d.provider.as_deref(),
        }
    }
}

/// ModelDetail is the object form of a model registration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelDetail {
    /// Name is the model identifier.
    pub name: String,
    /// Provider is the id of the inference provider serving this model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// ContextLength is the model's context window, in tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<i64>,
    /// ModelType distinguishes LLMs from embedding models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,
    /// Quantization names the weight quantization, e.g. `fp8`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
}

/// ModelType distinguishes LLMs from embedding models.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// A text-generation model.
    #[default]
    Llm,
    /// An embedding model.
    Embedding,
}

/// ToolGroupSpec registers a tool group.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroupSpec {
    /// Name is the tool group identifier.
    pub name: String,
    /// Provider is the id of the tool-runtime provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// ShieldSpec registers a safety shield.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShieldSpec {
    /// Name is the shield identifier.
    pub name: String,
    /// Provider is the id of the safety provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// StateStorage configures the stack's state backends.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateStorage {
    /// Kv is the key-value metadata store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kv: Option<StoreBackend>,
    /// Sql is the relational inference store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<StoreBackend>,
}

/// StoreBackend describes one storage backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreBackend {
    /// Type is the backend type; defaults to the local embedded backend.
    #[serde(rename = "type", default = "StoreBackend::default_type")]
    pub type_: String,
    /// Settings is free-form backend configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::free_form")]
    pub settings: Option<BTreeMap<String, Value>>,
}

impl StoreBackend {
    fn default_type() -> String {
        "sqlite".into()
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend {
            type_: StoreBackend::default_type(),
            settings: None,
        }
    }
}

/// Networking configures the server port, TLS, and exposure.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    /// Port the server listens on.
    #[serde(default = "Networking::default_port")]
    pub port: i32,
    /// Tls configures serving certificates and trust.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Expose requests an Ingress. `true`, `{}`, and `{hostname: h}` all
    /// enable exposure; `{}` is equivalent to `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::expose")]
    pub expose: Option<Expose>,
    /// AllowedFrom widens the NetworkPolicy's ingress peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_from: Option<AllowedFrom>,
}

impl Networking {
    fn default_port() -> i32 {
        DEFAULT_PORT
    }
}

impl Default for Networking {
    fn default() -> Self {
        Networking {
            port: DEFAULT_PORT,
            tls: None,
            expose: None,
            allowed_from: None,
        }
    }
}

/// TlsConfig configures serving certificates and trust.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// CaBundle references a ConfigMap key holding a CA bundle to trust.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<ConfigMapKeySelector>,
    /// SecretName is a TLS Secret for the Ingress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Expose is a boolean switch or a hostname-bearing object.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expose {
    /// Plain on/off.
    Enabled(bool),
    /// Enabled, with an optional hostname. The empty object enables.
    Host(ExposeHost),
}

impl Expose {
    /// Enabled reports whether exposure was requested.
    pub fn enabled(&self) -> bool {
        match self {
            Expose::Enabled(b) => *b,
            Expose::Host(_) => true,
        }
    }

    /// Hostname is the requested hostname, if any.
    pub fn hostname(&self) -> Option<&str> {
        match self {
            Expose::Enabled(_) => None,
            Expose::Host(h) => h.hostname.as_deref(),
        }
    }
}

/// ExposeHost is the object form of [`Expose`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeHost {
    /// Hostname for the Ingress rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// AllowedFrom widens the NetworkPolicy's ingress peers.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedFrom {
    /// Namespaces admitted by name. The wildcard `"*"` admits all
    /// namespaces and short-circuits every other peer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Label keys; namespaces carrying the key (any value) are admitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Workload configures the managed Deployment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Replicas is the desired replica count.
    #[serde(default = "Workload::default_replicas")]
    pub replicas: i32,
    /// Workers is the server's worker-process count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<i32>,
    /// Resources are the container's compute resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<core::v1::ResourceRequirements>,
    /// Autoscaling requests an HPA.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Storage requests a PVC mounted into the server container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<PvcSpec>,
    /// PodDisruptionBudget requests a PDB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PdbSpec>,
    /// TopologySpreadConstraints for the pod template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<core::v1::TopologySpreadConstraint>,
    /// Overrides adjusts the generated container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<PodOverrides>,
}

impl Workload {
    fn default_replicas() -> i32 {
        1
    }
}

impl Default for Workload {
    fn default() -> Self {
        Workload {
            replicas: 1,
            workers: None,
            resources: None,
            autoscaling: None,
            storage: None,
            pod_disruption_budget: None,
            topology_spread_constraints: Vec::new(),
            overrides: None,
        }
    }
}

/// Autoscaling requests an HPA for the Deployment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct Autoscaling {
    /// MinReplicas is the HPA floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    /// MaxReplicas is the HPA ceiling.
    pub max_replicas: i32,
    /// TargetCpuUtilization is the average CPU target, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cpu_utilization: Option<i32>,
}

/// PvcSpec requests a PersistentVolumeClaim.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    /// Size is the requested capacity, e.g. `10Gi`.
    pub size: String,
    /// StorageClassName selects the storage class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// MountPath is where the volume is mounted in the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

/// PdbSpec requests a PodDisruptionBudget.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct PdbSpec {
    /// MinAvailable pods during a disruption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
    /// MaxUnavailable pods during a disruption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
}

/// PodOverrides adjusts the generated container.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodOverrides {
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

/// OverrideConfig supplies a complete config.yaml via a ConfigMap.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
#[x_kube(validation = ("self.configMapName != ''", r#""configMapName" must be populated"#))]
pub struct OverrideConfig {
    /// ConfigMapName names a ConfigMap in the CR's namespace whose
    /// `config.yaml` key is served as-is.
    pub config_map_name: String,
}

/// ExternalProvider is a provider entry merged after synthesis.
///
/// On id conflict with an inline provider, the external entry wins and a
/// warning is recorded.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProvider {
    /// Api is the family the entry belongs to.
    pub api: ProviderApi,
    /// Id is the provider identifier.
    pub id: String,
    /// Provider is the upstream provider name.
    pub provider: String,
    /// Settings is free-form provider configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::free_form")]
    pub settings: Option<BTreeMap<String, Value>>,
}

/// LlamaStackDistributionStatus describes the observed state.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlamaStackDistributionStatus {
    /// Phase is a coarse lifecycle summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Conditions reports k8s-style conditions for parts of the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "schema::conditions")]
    pub conditions: Option<Vec<meta::v1::Condition>>,

    /// ResolvedDistribution is the outcome of distribution resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_distribution: Option<ResolvedDistribution>,

    /// ConfigGeneration describes the last synthesized configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_generation: Option<ConfigGeneration>,

    /// AvailableReplicas observed on the managed Deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,

    /// Selector is the pod selector, for the scale subresource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// ServiceURL is the in-cluster URL of the managed Service.
    #[serde(rename = "serviceURL", skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    /// RouteURL is the external URL, when exposed.
    #[serde(rename = "routeURL", skip_serializing_if = "Option::is_none")]
    pub route_url: Option<String>,
}

/// Phase is a coarse lifecycle summary of an instance.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub enum Phase {
    /// Accepted, nothing applied yet.
    #[default]
    Pending,
    /// Resources applied, no replica ready on the current config.
    Initializing,
    /// At least one replica ready on the current config.
    Ready,
    /// The spec cannot be acted on until corrected.
    Failed,
    /// Deletion requested; owner-reference GC is reclaiming resources.
    Terminating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Initializing => write!(f, "Initializing"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Failed => write!(f, "Failed"),
            Phase::Terminating => write!(f, "Terminating"),
        }
    }
}

/// ResolvedDistribution is the outcome of distribution resolution.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDistribution {
    /// Image is the concrete image reference in use.
    pub image: String,
    /// ConfigSource is where the base config came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_source: Option<BaseConfigSource>,
    /// ConfigHash is the content hash of the rendered config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

/// BaseConfigSource is where a base configuration came from.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaseConfigSource {
    /// The default shipped with the operator binary.
    Embedded,
    /// Extracted from OCI labels on the resolved image.
    OciLabel,
}

impl std::fmt::Display for BaseConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaseConfigSource::Embedded => write!(f, "embedded"),
            BaseConfigSource::OciLabel => write!(f, "oci-label"),
        }
    }
}

/// ConfigGeneration describes the last synthesized configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGeneration {
    /// ConfigMapName is the generated, hash-suffixed ConfigMap.
    pub config_map_name: String,
    /// GeneratedAt is when the config was rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<meta::v1::Time>,
    /// ProviderCount is the number of providers in the rendered config.
    pub provider_count: i32,
    /// ResourceCount is the number of registered resources.
    pub resource_count: i32,
    /// ConfigVersion is the config document's schema version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
}

mod schema {
    use k8s_openapi::apimachinery::pkg::apis::meta;
    use schemars::{Schema, generate::SchemaGenerator};
    use serde_json::json;

    pub fn conditions(generator: &mut SchemaGenerator) -> Schema {
        let mut schema = generator.subschema_for::<Vec<meta::v1::Condition>>();

        schema
            .ensure_object()
            .entry("x-kubernetes-list-type")
            .or_insert_with(|| json!("map"));
        schema
            .ensure_object()
            .entry("x-kubernetes-list-map-keys")
            .or_insert_with(|| json!(["type"]));
        schema
            .ensure_object()
            .insert("items".into(), condition(generator).into());

        schema
    }

    pub fn condition(generator: &mut SchemaGenerator) -> Schema {
        let mut schema = generator.subschema_for::<meta::v1::Condition>();

        schema.ensure_object().entry("required").or_insert_with(|| {
            json!(["type", "status", "lastTransitionTime", "reason", "message"])
        });

        schema
            .ensure_object()
            .entry("properties")
            .or_insert_with(|| json!({
                "type": {
                    "type": "string",
                    "pattern": r#"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])$"#,
                    "max_length": 316,
                },
                "status": {
                    "enum": ["True", "False", "Unknown"],
                },
                "observedGeneration": {
                    "type": "number",
                    "minimum": 0,
                },
                "lastTransitionTime": { "format": "date-time" },
                "reason": {
                    "type": "string",
                    "pattern": r#"^[A-Za-z]([A-Za-z0-9_,:]*[A-Za-z0-9_])?$"#,
                    "min_length": 1,
                    "max_length": 1024,
                },
                "message": {
                    "type": "string",
                    "max_length": 32768,
                },
            }));

        schema
    }

    /// The single-or-list provider union; accepted shapes documented on the
    /// field's doc comment.
    pub fn provider_set(_generator: &mut SchemaGenerator) -> Schema {
        schemars::json_schema!({
            "x-kubernetes-preserve-unknown-fields": true,
        })
    }

    /// A free-form object.
    pub fn free_form(_generator: &mut SchemaGenerator) -> Schema {
        schemars::json_schema!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        })
    }

    /// A list whose entries are bare strings or model objects.
    pub fn model_list(_generator: &mut SchemaGenerator) -> Schema {
        schemars::json_schema!({
            "type": "array",
            "items": {
                "x-kubernetes-preserve-unknown-fields": true,
            },
        })
    }

    /// A boolean or a hostname-bearing object.
    pub fn expose(_generator: &mut SchemaGenerator) -> Schema {
        schemars::json_schema!({
            "x-kubernetes-preserve-unknown-fields": true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json};

    #[test]
    fn provider_set_single_form() {
        let set: ProviderSet = from_value(json!({
            "provider": "vllm",
            "endpoint": "http://vllm:8000",
        }))
        .unwrap();
        assert!(!set.is_list());
        let entries = set.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].effective_id(), "vllm");
    }

    #[test]
    fn provider_set_list_form() {
        let set: ProviderSet = from_value(json!([
            { "id": "vllm-a", "provider": "vllm", "endpoint": "http://a:8000" },
            { "id": "vllm-b", "provider": "vllm", "endpoint": "http://b:8000" },
        ]))
        .unwrap();
        assert!(set.is_list());
        assert_eq!(set.entries().len(), 2);
    }

    #[test]
    fn model_bare_string() {
        let m: ModelSpec = from_value(json!("llama-3.1-8b")).unwrap();
        assert_eq!(m.name(), "llama-3.1-8b");
        assert!(m.provider().is_none());
    }

    #[test]
    fn model_object_form() {
        let m: ModelSpec = from_value(json!({
            "name": "llama-3.1-70b",
            "provider": "vllm-b",
            "contextLength": 131072,
        }))
        .unwrap();
        assert_eq!(m.name(), "llama-3.1-70b");
        assert_eq!(m.provider(), Some("vllm-b"));
    }

    #[test]
    fn expose_empty_object_enables() {
        let e: Expose = from_value(json!({})).unwrap();
        assert!(e.enabled());
        assert!(e.hostname().is_none());
    }

    #[test]
    fn expose_bool_and_hostname() {
        let e: Expose = from_value(json!(false)).unwrap();
        assert!(!e.enabled());
        let e: Expose = from_value(json!({"hostname": "llsd.example.com"})).unwrap();
        assert!(e.enabled());
        assert_eq!(e.hostname(), Some("llsd.example.com"));
    }

    #[test]
    fn store_backend_defaults_to_sqlite() {
        let s: StoreBackend = from_value(json!({})).unwrap();
        assert_eq!(s.type_, "sqlite");
    }

    #[test]
    fn spec_defaults() {
        let spec = LlamaStackDistributionSpec::default();
        assert_eq!(spec.port(), 8321);
        assert_eq!(spec.replicas(), 1);
        assert!(!spec.has_synthesis_inputs());
    }
}

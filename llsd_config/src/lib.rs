//! Llsd_config synthesizes LlamaStack provider configuration.
//!
//! The pipeline is pure: given a CR spec and a base configuration document it
//! deterministically produces the rendered `config.yaml`, the environment
//! variables carrying secret references, and a SHA-256 content hash.
//! Identical inputs produce byte-identical output.
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult, Write},
};

use serde_json::{Error as JsonError, Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::trace;

use api::SecretKeySelector;
use api::v1alpha2::{
    LlamaStackDistributionSpec, ModelSpec, ProviderApi, Providers, StoreBackend,
};

pub mod base;
pub mod registry;

pub use base::{BaseConfig, BaseResolver, ImageInspector};
pub use registry::{Registry, Resolved};

/// SUPPORTED_VERSIONS is the accepted config-document schema versions.
pub static SUPPORTED_VERSIONS: &[&str] = &["2"];

/// CONFIG_KEY is the key holding the rendered config in a ConfigMap.
pub const CONFIG_KEY: &str = "config.yaml";

/// Error enumerates the errors reported by this module.
#[derive(Debug)]
pub enum Error {
    /// Configuration is invalid for some reason.
    Invalid(String),
    /// The distribution name is not in the registry.
    UnknownDistribution(String),
    /// No base config is available; an override config is needed.
    BaseConfigRequired(String),
    /// The base config declares a schema version this operator cannot handle.
    UnsupportedVersion(String),
    /// A multi-provider list entry is missing its `id`.
    MissingProviderId {
        /// Family the entry belongs to.
        family: ProviderApi,
        /// Index of the offending entry.
        index: usize,
    },
    /// Two provider entries share an id.
    DuplicateProviderId(String),
    /// A model has no inference provider to attach to.
    NoInferenceProvider(String),
    /// A model names an inference provider that is not configured.
    UnknownModelProvider {
        /// The model being registered.
        model: String,
        /// The id it referenced.
        provider: String,
    },
    /// A tool group or shield needs a provider family that is not configured.
    MissingProviderFamily {
        /// The required family.
        family: ProviderApi,
        /// The resource that needs it.
        resource: String,
    },
    /// JSON serialization or deserialization error.
    JSON(JsonError),
    /// YAML serialization or deserialization error.
    YAML(serde_yaml::Error),
    /// An image inspection or registry transport failure.
    Registry(String),
}

impl std::error::Error for Error {}

impl Error {
    fn invalid<S: AsRef<str>>(msg: S) -> Error {
        Self::Invalid(String::from(msg.as_ref()))
    }
}

impl From<JsonError> for Error {
    fn from(err: JsonError) -> Self {
        Self::JSON(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YAML(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        use Error::*;
        match self {
            Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            UnknownDistribution(name) => write!(
                f,
                "unknown distribution {name:?}: not present in the registry or image-overrides"
            ),
            BaseConfigRequired(image) => write!(
                f,
                "no base config available for {image:?}: supply spec.overrideConfig"
            ),
            UnsupportedVersion(found) => write!(
                f,
                "unsupported config version {found:?}: supported versions: {}",
                SUPPORTED_VERSIONS.join(", ")
            ),
            MissingProviderId { family, index } => write!(
                f,
                "spec.providers.{}[{index}]: entries in a multi-provider list must set \"id\"",
                family.field_name()
            ),
            DuplicateProviderId(id) => write!(
                f,
                "duplicate provider id {id:?}: ids must be unique across all provider families"
            ),
            NoInferenceProvider(model) => write!(
                f,
                "model {model:?}: no inference provider configured in the spec or the base config"
            ),
            UnknownModelProvider { model, provider } => {
                write!(f, "model {model:?}: no inference provider with id {provider:?}")
            }
            MissingProviderFamily { family, resource } => write!(
                f,
                "{resource:?} requires a {family} provider in the spec or the base config"
            ),
            JSON(err) => write!(f, "JSON error: {err}"),
            YAML(err) => write!(f, "YAML error: {err}"),
            Registry(msg) => write!(f, "registry error: {msg}"),
        }
    }
}

/// Result typedef for this module.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Check_version reports the document's schema version, or rejects it.
pub fn check_version(doc: &Value) -> Result<String> {
    let found = match doc.get("version") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(Error::UnsupportedVersion("<missing>".into())),
    };
    if SUPPORTED_VERSIONS.contains(&found.as_str()) {
        Ok(found)
    } else {
        Err(Error::UnsupportedVersion(found))
    }
}

/// NormalizedProvider is one provider entry after polymorphic normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedProvider {
    /// Family the entry belongs to.
    pub api: ProviderApi,
    /// Resolved id: the explicit `id`, or the provider name.
    pub id: String,
    /// Upstream provider name.
    pub provider: String,
    /// Provider endpoint URL.
    pub endpoint: Option<String>,
    /// Secret reference for the provider credential.
    pub api_key: Option<SecretKeySelector>,
    /// Free-form settings.
    pub settings: Option<std::collections::BTreeMap<String, Value>>,
}

/// Normalize_providers flattens the single-or-list forms into one ordered
/// list, generating ids for single entries and enforcing the id rules.
pub fn normalize_providers(providers: &Providers) -> Result<Vec<NormalizedProvider>> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    for (api, set) in providers.families() {
        let entries = set.entries();
        let multi = entries.len() > 1;
        for (index, p) in entries.iter().enumerate() {
            let id = match &p.id {
                Some(id) => id.clone(),
                None if multi => return Err(Error::MissingProviderId { family: api, index }),
                None => p.provider.clone(),
            };
            if !seen.insert(id.clone()) {
                return Err(Error::DuplicateProviderId(id));
            }
            out.push(NormalizedProvider {
                api,
                id,
                provider: p.provider.clone(),
                endpoint: p.endpoint.clone(),
                api_key: p.api_key.as_ref().map(|k| k.secret_key_ref.clone()),
                settings: p.settings.clone(),
            });
        }
    }
    Ok(out)
}

/// SecretEnv is one environment variable backed by a Secret key.
///
/// Only the Secret's name and key travel through the synthesizer; the value
/// stays in the kubelet's hands.
#[derive(Clone, Debug, PartialEq)]
pub struct SecretEnv {
    /// Name of the environment variable.
    pub name: String,
    /// The referenced Secret key.
    pub secret: SecretKeySelector,
}

/// Env_name derives the environment variable name for a provider field.
///
/// Hyphens (and any other non-alphanumerics) map to underscores, uppercased:
/// `("vllm-eu", "api_key")` → `LLSD_VLLM_EU_API_KEY`.
pub fn env_name(id: &str, field: &str) -> String {
    fn push_sanitized(out: &mut String, s: &str) {
        for c in s.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push('_');
            }
        }
    }
    let mut out = String::from("LLSD_");
    push_sanitized(&mut out, id);
    out.push('_');
    push_sanitized(&mut out, field);
    out
}

fn placeholder(name: &str) -> String {
    format!("${{env.{name}}}")
}

/// Synthesis is the output of [`synthesize`].
#[derive(Clone, Debug)]
pub struct Synthesis {
    /// Document is the merged configuration.
    pub document: Value,
    /// Rendered is the canonical YAML text.
    pub rendered: String,
    /// Hash is the SHA-256 of the rendered text, lowercase hex.
    pub hash: String,
    /// Env is the ordered environment variables carrying secret references.
    pub env: Vec<SecretEnv>,
    /// Warnings raised during synthesis.
    pub warnings: Vec<String>,
    /// Provider entries in the final document.
    pub provider_count: usize,
    /// Registered resources in the final document.
    pub resource_count: usize,
    /// Version is the config document's schema version.
    pub version: String,
}

/// Synthesize produces the configuration document for a CR spec over a base.
///
/// Pure and deterministic: no I/O, stable map and list ordering, so equal
/// inputs yield byte-identical [`Synthesis::rendered`] and equal hashes.
pub fn synthesize(spec: &LlamaStackDistributionSpec, base: &BaseConfig) -> Result<Synthesis> {
    let version = check_version(&base.document)?;
    let mut warnings = Vec::new();
    let mut env = Vec::new();

    let normalized = match &spec.providers {
        Some(p) => normalize_providers(p)?,
        None => Vec::new(),
    };
    let disabled: BTreeSet<ProviderApi> = spec.disabled.iter().copied().collect();

    // Build the overlay to merge over the base. Each configured family
    // replaces the base's family wholesale; storage subsections likewise.
    let mut providers_overlay = Map::new();
    for api in ProviderApi::ALL {
        let entries: Vec<&NormalizedProvider> =
            normalized.iter().filter(|p| p.api == api).collect();
        if entries.is_empty() {
            continue;
        }
        if disabled.contains(&api) {
            warnings.push(format!(
                "spec.providers.{}: family is listed in spec.disabled; the provider configuration is ignored",
                api.field_name()
            ));
            continue;
        }
        let arr = entries
            .iter()
            .map(|p| expand_provider(p, &mut env))
            .collect::<Result<Vec<_>>>()?;
        providers_overlay.insert(api.config_key().into(), Value::Array(arr));
    }

    let mut overlay = Map::new();
    if !providers_overlay.is_empty() {
        overlay.insert("providers".into(), Value::Object(providers_overlay));
    }
    if let Some(storage) = &spec.storage {
        if let Some(kv) = &storage.kv {
            overlay.insert("metadata_store".into(), store_value(kv));
        }
        if let Some(sql) = &storage.sql {
            overlay.insert("inference_store".into(), store_value(sql));
        }
    }
    if let Some(net) = &spec.networking {
        overlay.insert("server".into(), json!({ "port": net.port }));
    }

    let mut doc = base.document.clone();
    json_patch::merge(&mut doc, &Value::Object(overlay));

    // Disabled families are subtracted after the merge so base-provided
    // sections go too.
    for api in &disabled {
        if let Some(providers) = doc.get_mut("providers").and_then(Value::as_object_mut) {
            providers.remove(api.config_key());
        }
    }

    // Resources are additive. The merged document is the single source of
    // truth for provider lookups here: user families are already merged in
    // and disabled families are already gone.
    if let Some(resources) = &spec.resources {
        let models = expand_models(&resources.models, &doc)?;
        append(&mut doc, "models", models);
        let tools = expand_registrations(
            resources.tools.iter().map(|t| (t.name.as_str(), t.provider.as_deref())),
            ProviderApi::ToolRuntime,
            "toolgroup_id",
            &doc,
        )?;
        append(&mut doc, "tool_groups", tools);
        let shields = expand_registrations(
            resources.shields.iter().map(|s| (s.name.as_str(), s.provider.as_deref())),
            ProviderApi::Safety,
            "shield_id",
            &doc,
        )?;
        append(&mut doc, "shields", shields);
    }

    // External providers merge after synthesis; on id conflict the external
    // entry wins.
    for ext in &spec.external_providers {
        if disabled.contains(&ext.api) {
            warnings.push(format!(
                "spec.externalProviders: {:?} targets the disabled {} family; ignored",
                ext.id,
                ext.api.field_name()
            ));
            continue;
        }
        let entry = json!({
            "provider_id": ext.id,
            "provider_type": format!("remote::{}", ext.provider),
            "config": ext.settings.clone().unwrap_or_default(),
        });
        let providers = doc
            .as_object_mut()
            .ok_or_else(|| Error::invalid("base config is not a mapping"))?
            .entry("providers")
            .or_insert_with(|| Value::Object(Map::new()));
        let family = providers
            .as_object_mut()
            .ok_or_else(|| Error::invalid("\"providers\" is not a mapping"))?
            .entry(ext.api.config_key())
            .or_insert_with(|| Value::Array(Vec::new()));
        let family = family
            .as_array_mut()
            .ok_or_else(|| Error::invalid(format!("\"providers.{}\" is not a list", ext.api)))?;
        match family
            .iter_mut()
            .find(|e| e.get("provider_id").and_then(Value::as_str) == Some(ext.id.as_str()))
        {
            Some(slot) => {
                warnings.push(format!(
                    "spec.externalProviders: {:?} overrides an inline provider with the same id",
                    ext.id
                ));
                *slot = entry;
            }
            None => family.push(entry),
        }
    }

    // The apis list mirrors the families present in the final document.
    if let Some(providers) = doc.get("providers").and_then(Value::as_object) {
        let apis: Vec<Value> = ProviderApi::ALL
            .iter()
            .filter(|api| providers.contains_key(api.config_key()))
            .map(|api| Value::String(api.config_key().into()))
            .collect();
        doc.as_object_mut()
            .ok_or_else(|| Error::invalid("base config is not a mapping"))?
            .insert("apis".into(), Value::Array(apis));
    }

    let (rendered, hash) = render(&doc)?;
    trace!(hash, "config synthesized");
    Ok(Synthesis {
        provider_count: count_providers(&doc),
        resource_count: count_resources(&doc),
        document: doc,
        rendered,
        hash,
        env,
        warnings,
        version,
    })
}

fn expand_provider(p: &NormalizedProvider, env: &mut Vec<SecretEnv>) -> Result<Value> {
    let mut config = Map::new();
    if let Some(url) = &p.endpoint {
        config.insert("url".into(), Value::String(url.clone()));
    }
    if let Some(sel) = &p.api_key {
        let name = env_name(&p.id, "api_key");
        config.insert("api_key".into(), Value::String(placeholder(&name)));
        env.push(SecretEnv {
            name,
            secret: sel.clone(),
        });
    }
    if let Some(settings) = &p.settings {
        for (key, value) in settings {
            // Only a secretKeyRef at the top level of a settings value is
            // resolved; anything nested deeper is literal data.
            match secret_ref(value) {
                Some(sel) => {
                    let sel = sel?;
                    let name = env_name(&p.id, key);
                    config.insert(key.clone(), Value::String(placeholder(&name)));
                    env.push(SecretEnv { name, secret: sel });
                }
                None => {
                    config.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(json!({
        "provider_id": p.id,
        "provider_type": format!("remote::{}", p.provider),
        "config": config,
    }))
}

fn secret_ref(v: &Value) -> Option<Result<SecretKeySelector>> {
    let sel = v.as_object()?.get("secretKeyRef")?;
    Some(
        serde_json::from_value(sel.clone())
            .map_err(|err| Error::invalid(format!("bad secretKeyRef: {err}"))),
    )
}

fn store_value(backend: &StoreBackend) -> Value {
    let mut m = Map::new();
    m.insert("type".into(), Value::String(backend.type_.clone()));
    if let Some(settings) = &backend.settings {
        for (k, v) in settings {
            m.insert(k.clone(), v.clone());
        }
    }
    Value::Object(m)
}

fn first_provider_id(doc: &Value, key: &str) -> Option<String> {
    doc.get("providers")?
        .get(key)?
        .as_array()?
        .first()?
        .get("provider_id")?
        .as_str()
        .map(String::from)
}

fn provider_ids(doc: &Value, key: &str) -> Vec<String> {
    doc.get("providers")
        .and_then(|p| p.get(key))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|e| e.get("provider_id").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn expand_models(models: &[ModelSpec], doc: &Value) -> Result<Vec<Value>> {
    let default = first_provider_id(doc, "inference");
    let known = provider_ids(doc, "inference");

    models
        .iter()
        .map(|m| {
            let provider = match m.provider() {
                Some(p) => {
                    if !known.iter().any(|id| id == p) {
                        return Err(Error::UnknownModelProvider {
                            model: m.name().to_string(),
                            provider: p.to_string(),
                        });
                    }
                    p.to_string()
                }
                None => default
                    .clone()
                    .ok_or_else(|| Error::NoInferenceProvider(m.name().to_string()))?,
            };
            let mut entry = Map::new();
            entry.insert("model_id".into(), Value::String(m.name().into()));
            entry.insert("provider_id".into(), Value::String(provider));
            if let ModelSpec::Detailed(d) = m {
                if let Some(t) = d.model_type {
                    entry.insert("model_type".into(), serde_json::to_value(t)?);
                }
                let mut metadata = Map::new();
                if let Some(n) = d.context_length {
                    metadata.insert("context_length".into(), Value::from(n));
                }
                if let Some(q) = &d.quantization {
                    metadata.insert("quantization".into(), Value::String(q.clone()));
                }
                if !metadata.is_empty() {
                    entry.insert("metadata".into(), Value::Object(metadata));
                }
            }
            Ok(Value::Object(entry))
        })
        .collect()
}

fn expand_registrations<'a, I>(
    items: I,
    family: ProviderApi,
    id_key: &str,
    doc: &Value,
) -> Result<Vec<Value>>
where
    I: Iterator<Item = (&'a str, Option<&'a str>)>,
{
    let default = first_provider_id(doc, family.config_key());

    items
        .map(|(name, provider)| {
            let provider = provider
                .map(String::from)
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingProviderFamily {
                    family,
                    resource: name.to_string(),
                })?;
            Ok(json!({ id_key: name, "provider_id": provider }))
        })
        .collect()
}

fn append(doc: &mut Value, key: &str, items: Vec<Value>) {
    if items.is_empty() {
        return;
    }
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    let slot = obj.entry(key).or_insert_with(|| Value::Array(Vec::new()));
    if let Some(arr) = slot.as_array_mut() {
        arr.extend(items);
    }
}

/// Count_providers totals the provider entries under every family.
pub fn count_providers(doc: &Value) -> usize {
    doc.get("providers")
        .and_then(Value::as_object)
        .map(|families| {
            families
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .sum()
        })
        .unwrap_or(0)
}

/// Count_resources totals the registered models, shields, and tool groups.
pub fn count_resources(doc: &Value) -> usize {
    ["models", "shields", "tool_groups"]
        .iter()
        .filter_map(|k| doc.get(k).and_then(Value::as_array))
        .map(Vec::len)
        .sum()
}

/// Render serializes the document to canonical YAML and hashes it.
///
/// Key order is stable: `serde_json`'s maps are BTree-backed, so equal
/// documents render byte-identically.
pub fn render(doc: &Value) -> Result<(String, String)> {
    let rendered = serde_yaml::to_string(doc)?;
    let hash = content_hash(rendered.as_bytes());
    Ok((rendered, hash))
}

/// Content_hash is the lowercase-hex SHA-256 of `buf`.
pub fn content_hash(buf: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(buf);
    h.finalize().iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// OverrideDoc is a user-provided config loaded from a ConfigMap.
#[derive(Clone, Debug)]
pub struct OverrideDoc {
    /// Document is the parsed configuration.
    pub document: Value,
    /// Hash is the SHA-256 of the raw `config.yaml` bytes.
    pub hash: String,
    /// Version is the declared schema version.
    pub version: String,
    /// Provider entries in the document.
    pub provider_count: usize,
    /// Registered resources in the document.
    pub resource_count: usize,
}

/// Override_from loads an override config out of the referenced ConfigMap.
///
/// The ConfigMap is served as-is; this only checks that it parses and that
/// its schema version is supported, and computes the rollout hash.
#[cfg(feature = "k8s")]
pub fn override_from(cm: &k8s_openapi::api::core::v1::ConfigMap) -> Result<OverrideDoc> {
    let name = cm.metadata.name.as_deref().unwrap_or("<unnamed>");
    let buf = cm.value(CONFIG_KEY.to_string()).ok_or_else(|| {
        Error::invalid(format!("ConfigMap {name:?} missing key: {CONFIG_KEY}"))
    })?;
    let document: Value = serde_yaml::from_slice(&buf)?;
    let version = check_version(&document)?;
    Ok(OverrideDoc {
        hash: content_hash(&buf),
        version,
        provider_count: count_providers(&document),
        resource_count: count_resources(&document),
        document,
    })
}

mod private {
    pub trait Sealed {}
}
use private::Sealed;

/// K8sMap is a k8s map-type: a ConfigMap or a Secret.
pub trait K8sMap: Sealed {
    /// Value returns the value for the key.
    fn value(&self, key: String) -> Option<Vec<u8>>;
}

#[cfg(feature = "k8s")]
impl Sealed for k8s_openapi::api::core::v1::ConfigMap {}
#[cfg(feature = "k8s")]
impl K8sMap for k8s_openapi::api::core::v1::ConfigMap {
    fn value(&self, key: String) -> Option<Vec<u8>> {
        if let Some(data) = &self.data
            && let Some(buf) = data.get(&key)
        {
            return Some(buf.clone().into_bytes());
        };
        if let Some(data) = &self.binary_data
            && let Some(buf) = data.get(&key)
        {
            return Some(buf.0.clone());
        };
        None
    }
}

#[cfg(feature = "k8s")]
impl Sealed for k8s_openapi::api::core::v1::Secret {}
#[cfg(feature = "k8s")]
impl K8sMap for k8s_openapi::api::core::v1::Secret {
    fn value(&self, key: String) -> Option<Vec<u8>> {
        if let Some(data) = &self.data
            && let Some(buf) = data.get(&key)
        {
            return Some(buf.0.clone());
        };
        None
    }
}

impl Sealed for std::collections::BTreeMap<String, String> {}
impl K8sMap for std::collections::BTreeMap<String, String> {
    fn value(&self, key: String) -> Option<Vec<u8>> {
        self.get(&key).map(|v| v.clone().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::v1alpha2::BaseConfigSource;
    use serde_json::from_value;

    fn starter() -> BaseConfig {
        base::embedded("starter").expect("embedded starter config")
    }

    fn spec(v: Value) -> LlamaStackDistributionSpec {
        from_value(v).expect("spec fixture")
    }

    fn base_doc(v: Value) -> BaseConfig {
        BaseConfig {
            document: v,
            source: BaseConfigSource::Embedded,
            version: "2".into(),
        }
    }

    #[test]
    fn minimal_inference() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": { "provider": "vllm", "endpoint": "http://vllm:8000" },
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        let inf = &out.document["providers"]["inference"][0];
        assert_eq!(inf["provider_id"], "vllm");
        assert_eq!(inf["provider_type"], "remote::vllm");
        assert_eq!(inf["config"]["url"], "http://vllm:8000");
        assert_eq!(out.hash.len(), 64);
        assert!(out.warnings.is_empty());
        assert!(
            out.document["apis"]
                .as_array()
                .unwrap()
                .contains(&json!("inference"))
        );
    }

    #[test]
    fn secret_backed_api_key() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": {
                    "provider": "vllm",
                    "endpoint": "http://vllm:8000",
                    "apiKey": { "secretKeyRef": { "name": "vllm-creds", "key": "token" } },
                },
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        let cfg = &out.document["providers"]["inference"][0]["config"];
        assert_eq!(cfg["api_key"], "${env.LLSD_VLLM_API_KEY}");
        assert_eq!(
            out.env,
            vec![SecretEnv {
                name: "LLSD_VLLM_API_KEY".into(),
                secret: SecretKeySelector {
                    name: "vllm-creds".into(),
                    key: "token".into(),
                },
            }]
        );
        assert!(out.rendered.contains("${env.LLSD_VLLM_API_KEY}"));
    }

    #[test]
    fn settings_secret_resolution_and_hyphens() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": {
                    "id": "vllm-eu",
                    "provider": "vllm",
                    "settings": {
                        "org-token": { "secretKeyRef": { "name": "creds", "key": "org" } },
                    },
                },
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        let cfg = &out.document["providers"]["inference"][0]["config"];
        assert_eq!(cfg["org-token"], "${env.LLSD_VLLM_EU_ORG_TOKEN}");
        assert_eq!(out.env[0].name, "LLSD_VLLM_EU_ORG_TOKEN");
    }

    #[test]
    fn nested_secret_ref_is_literal() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": {
                    "provider": "vllm",
                    "settings": {
                        "auth": { "inner": { "secretKeyRef": { "name": "x", "key": "y" } } },
                    },
                },
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        let cfg = &out.document["providers"]["inference"][0]["config"];
        assert_eq!(cfg["auth"]["inner"]["secretKeyRef"]["name"], "x");
        assert!(out.env.is_empty());
    }

    #[test]
    fn multi_entry_list_requires_ids() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": [
                    { "provider": "vllm", "endpoint": "http://a:8000" },
                    { "provider": "vllm", "endpoint": "http://b:8000" },
                ],
            },
        }));
        let err = synthesize(&s, &starter()).unwrap_err();
        assert!(
            matches!(err, Error::MissingProviderId { family: ProviderApi::Inference, index: 0 }),
            "got: {err}"
        );
    }

    #[test]
    fn single_entry_list_autogenerates_id() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": [ { "provider": "vllm", "endpoint": "http://a:8000" } ],
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert_eq!(out.document["providers"]["inference"][0]["provider_id"], "vllm");
    }

    #[test]
    fn duplicate_id_across_families() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": { "id": "shared", "provider": "vllm" },
                "safety": { "id": "shared", "provider": "llama-guard" },
            },
        }));
        let err = synthesize(&s, &starter()).unwrap_err();
        assert!(matches!(err, Error::DuplicateProviderId(ref id) if id == "shared"));
    }

    #[test]
    fn byte_identical_output() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": { "provider": "vllm", "endpoint": "http://vllm:8000",
                               "settings": { "b": 1, "a": 2 } },
            },
            "resources": { "models": ["llama-3.1-8b"] },
        }));
        let a = synthesize(&s, &starter()).unwrap();
        let b = synthesize(&s, &starter()).unwrap();
        assert_eq!(a.rendered, b.rendered);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_stable_under_key_order() {
        // Equivalent specs that arrive with different member order parse to
        // the same value and therefore the same hash.
        let a = spec(json!({
            "providers": { "inference": { "endpoint": "http://v:1", "provider": "vllm" } },
            "distribution": { "name": "starter" },
        }));
        let b = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm", "endpoint": "http://v:1" } },
        }));
        assert_eq!(
            synthesize(&a, &starter()).unwrap().hash,
            synthesize(&b, &starter()).unwrap().hash,
        );
    }

    #[test]
    fn disabled_family_wins_over_providers() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm" } },
            "disabled": ["inference", "telemetry"],
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("spec.providers.inference")));
        assert!(out.document["providers"].get("inference").is_none());
        assert!(out.document["providers"].get("telemetry").is_none());
        let apis = out.document["apis"].as_array().unwrap();
        assert!(!apis.contains(&json!("inference")));
        assert!(!apis.contains(&json!("telemetry")));
    }

    #[test]
    fn bare_model_uses_first_inference_provider() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm" } },
            "resources": { "models": ["llama-3.1-8b"] },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert_eq!(out.document["models"][0]["model_id"], "llama-3.1-8b");
        assert_eq!(out.document["models"][0]["provider_id"], "vllm");
    }

    #[test]
    fn bare_model_without_inference_provider_fails() {
        // The starter base config declares an empty inference family.
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "resources": { "models": ["llama-3.1-8b"] },
        }));
        let err = synthesize(&s, &starter()).unwrap_err();
        assert!(matches!(err, Error::NoInferenceProvider(ref m) if m == "llama-3.1-8b"));
    }

    #[test]
    fn disabled_inference_cannot_carry_models() {
        let ollama = base::embedded("ollama").unwrap();
        let s = spec(json!({
            "distribution": { "name": "ollama" },
            "disabled": ["inference"],
            "resources": { "models": ["llama3.2:3b"] },
        }));
        let err = synthesize(&s, &ollama).unwrap_err();
        assert!(matches!(err, Error::NoInferenceProvider(_)), "got: {err}");
    }

    #[test]
    fn bare_model_uses_base_inference_provider() {
        let ollama = base::embedded("ollama").unwrap();
        let s = spec(json!({
            "distribution": { "name": "ollama" },
            "resources": { "models": ["llama3.2:3b"] },
        }));
        let out = synthesize(&s, &ollama).unwrap();
        assert_eq!(out.document["models"][0]["provider_id"], "ollama");
    }

    #[test]
    fn model_with_unknown_provider_fails() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm" } },
            "resources": { "models": [ { "name": "m", "provider": "nope" } ] },
        }));
        let err = synthesize(&s, &starter()).unwrap_err();
        assert!(matches!(err, Error::UnknownModelProvider { ref provider, .. } if provider == "nope"));
    }

    #[test]
    fn shield_without_safety_family_fails() {
        let base = base_doc(json!({
            "version": "2",
            "providers": { "inference": [], "tool_runtime": [] },
        }));
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "resources": { "shields": [ { "name": "llama-guard" } ] },
        }));
        let err = synthesize(&s, &base).unwrap_err();
        assert!(
            matches!(err, Error::MissingProviderFamily { family: ProviderApi::Safety, .. }),
            "got: {err}"
        );
    }

    #[test]
    fn tool_group_uses_base_runtime() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "resources": { "tools": [ { "name": "builtin::rag" } ] },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert_eq!(out.document["tool_groups"][0]["toolgroup_id"], "builtin::rag");
        assert_eq!(out.document["tool_groups"][0]["provider_id"], "rag-runtime");
    }

    #[test]
    fn storage_replaces_subsection() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "storage": {
                "kv": { "type": "redis", "settings": { "host": "redis", "port": 6379 } },
            },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert_eq!(
            out.document["metadata_store"],
            json!({ "type": "redis", "host": "redis", "port": 6379 })
        );
        // The untouched subsection keeps the base default.
        assert_eq!(out.document["inference_store"]["type"], "sqlite");
    }

    #[test]
    fn port_flows_into_server_section() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "networking": { "port": 9000 },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        assert_eq!(out.document["server"]["port"], 9000);
    }

    #[test]
    fn external_provider_appends_and_overrides() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "id": "vllm", "provider": "vllm" } },
            "externalProviders": [
                { "api": "inference", "id": "extra", "provider": "tgi" },
                { "api": "inference", "id": "vllm", "provider": "vllm-custom" },
            ],
        }));
        let out = synthesize(&s, &starter()).unwrap();
        let inf = out.document["providers"]["inference"].as_array().unwrap();
        assert_eq!(inf.len(), 2);
        assert_eq!(inf[0]["provider_type"], "remote::vllm-custom");
        assert_eq!(inf[1]["provider_id"], "extra");
        assert!(out.warnings.iter().any(|w| w.contains("overrides")));
    }

    #[test]
    fn unsupported_version_lists_supported() {
        let base = base_doc(json!({ "version": "3", "providers": {} }));
        let s = spec(json!({ "distribution": { "name": "starter" } }));
        let err = synthesize(&s, &base).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("supported versions: 2"), "got: {msg}");
    }

    #[test]
    fn merge_is_idempotent() {
        let base = starter().document;
        let user = json!({
            "providers": { "inference": [ { "provider_id": "vllm" } ] },
            "metadata_store": { "type": "redis" },
        });
        let mut once = base.clone();
        json_patch::merge(&mut once, &user);
        let mut twice = base.clone();
        json_patch::merge(&mut twice, &user);
        json_patch::merge(&mut twice, &user);
        assert_eq!(once, twice);
    }

    #[test]
    fn counts_reflect_final_document() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm" } },
            "resources": { "models": ["a", "b"] },
        }));
        let out = synthesize(&s, &starter()).unwrap();
        // starter ships vector_io, tool_runtime, and telemetry providers.
        assert_eq!(out.provider_count, 4);
        assert_eq!(out.resource_count, 2);
    }

    #[test]
    fn env_name_normalization() {
        assert_eq!(env_name("vllm-eu", "api_key"), "LLSD_VLLM_EU_API_KEY");
        assert_eq!(env_name("ollama", "org.token"), "LLSD_OLLAMA_ORG_TOKEN");
    }

    #[cfg(feature = "k8s")]
    #[test]
    fn override_from_config_map() {
        use k8s_openapi::api::core::v1::ConfigMap;
        let cm = ConfigMap {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("user-config".into()),
                ..Default::default()
            },
            data: Some(std::collections::BTreeMap::from([(
                CONFIG_KEY.to_string(),
                "version: \"2\"\nproviders:\n  inference:\n    - provider_id: vllm\n".to_string(),
            )])),
            ..Default::default()
        };
        let doc = override_from(&cm).unwrap();
        assert_eq!(doc.version, "2");
        assert_eq!(doc.provider_count, 1);
        assert_eq!(doc.hash.len(), 64);

        let missing = ConfigMap::default();
        assert!(override_from(&missing).is_err());
    }
}

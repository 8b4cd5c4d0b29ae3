//! Base-config resolution.
//!
//! The synthesizer merges user input over a base configuration document.
//! Resolution order: OCI labels on the resolved image (when an
//! [`ImageInspector`] is wired), then the embedded default for the
//! distribution name, otherwise the user must supply an override config.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use tracing::{debug, trace};

use api::v1alpha2::BaseConfigSource;

use crate::{Error, Result, check_version, registry::Resolved};

/// LABEL_CONFIG_BASE64 is the OCI label carrying an inline base64 config.
pub const LABEL_CONFIG_BASE64: &str = "io.llamastack.config.base64";
/// LABEL_CONFIG_LAYER is the OCI label naming the layer digest holding the config.
pub const LABEL_CONFIG_LAYER: &str = "io.llamastack.config.layer";
/// LABEL_CONFIG_PATH is the OCI label naming the in-layer config path.
pub const LABEL_CONFIG_PATH: &str = "io.llamastack.config.path";
/// LABEL_CONFIG_VERSION is the OCI label hinting the config schema version.
pub const LABEL_CONFIG_VERSION: &str = "io.llamastack.config.version";

static EMBEDDED: &[(&str, &str)] = &[
    ("meta-reference-gpu", include_str!("../configs/meta-reference-gpu.yaml")),
    ("ollama", include_str!("../configs/ollama.yaml")),
    ("remote-vllm", include_str!("../configs/remote-vllm.yaml")),
    ("starter", include_str!("../configs/starter.yaml")),
];

/// BaseConfig is a resolved base configuration document.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    /// Document is the parsed configuration.
    pub document: Value,
    /// Source is where the document came from.
    pub source: BaseConfigSource,
    /// Version is the document's declared schema version.
    pub version: String,
}

/// Embedded_names iterates the distributions with an embedded base config.
pub fn embedded_names() -> impl Iterator<Item = &'static str> {
    EMBEDDED.iter().map(|&(name, _)| name)
}

/// Embedded returns the embedded base config for a distribution name.
pub fn embedded(name: &str) -> Result<BaseConfig> {
    let buf = EMBEDDED
        .iter()
        .find(|&&(n, _)| n == name)
        .map(|&(_, buf)| buf)
        .ok_or_else(|| Error::BaseConfigRequired(name.to_string()))?;
    let document: Value = serde_yaml::from_str(buf)?;
    let version = check_version(&document)?;
    Ok(BaseConfig {
        document,
        source: BaseConfigSource::Embedded,
        version,
    })
}

/// ImageInspector reads image metadata from an OCI registry.
///
/// Calls should be considered blocking; implementations are expected to use
/// the same credential chain as the kubelet. The operator core ships no
/// implementation — tests wire fixtures.
pub trait ImageInspector: Send + Sync {
    /// Digest resolves the image reference to its manifest digest.
    fn digest(&self, image: &str) -> Result<String>;
    /// Labels returns the image's config labels.
    fn labels(&self, image: &str) -> Result<BTreeMap<String, String>>;
    /// Layer_blob reads `path` out of the layer with the given digest.
    fn layer_blob(&self, image: &str, layer_digest: &str, path: &str) -> Result<Vec<u8>>;
}

/// NoInspector is the uninhabited inspector used when OCI-label resolution
/// is not wired.
pub enum NoInspector {}

impl ImageInspector for NoInspector {
    fn digest(&self, _: &str) -> Result<String> {
        match *self {}
    }
    fn labels(&self, _: &str) -> Result<BTreeMap<String, String>> {
        match *self {}
    }
    fn layer_blob(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
        match *self {}
    }
}

/// BaseResolver resolves base configs with a per-digest cache.
///
/// Concurrent readers share cached entries; a miss populates under the lock
/// with a re-check so racing reconciles fetch at most once each.
pub struct BaseResolver<I = NoInspector> {
    inspector: Option<I>,
    cache: Mutex<HashMap<String, Arc<BaseConfig>>>,
}

impl BaseResolver<NoInspector> {
    /// Embedded_only resolves from the embedded defaults exclusively.
    pub fn embedded_only() -> Self {
        BaseResolver {
            inspector: None,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<I: ImageInspector> BaseResolver<I> {
    /// New creates a resolver that consults `inspector` first.
    pub fn new(inspector: I) -> Self {
        BaseResolver {
            inspector: Some(inspector),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve produces the base config for a resolved distribution.
    pub fn resolve(&self, resolved: &Resolved) -> Result<Arc<BaseConfig>> {
        if let Some(inspector) = &self.inspector {
            if let Some(cfg) = self.from_labels(inspector, &resolved.image)? {
                return Ok(cfg);
            }
            trace!(image = resolved.image, "no config labels on image");
        }
        match &resolved.name {
            Some(name) => embedded(name).map(Arc::new),
            None => Err(Error::BaseConfigRequired(resolved.image.clone())),
        }
    }

    fn from_labels(&self, inspector: &I, image: &str) -> Result<Option<Arc<BaseConfig>>> {
        let digest = inspector.digest(image)?;
        if let Some(hit) = self.cache.lock().expect("cache lock poisoned").get(&digest) {
            trace!(digest, "base config cache hit");
            return Ok(Some(hit.clone()));
        }

        let labels = inspector.labels(image)?;
        if let Some(hint) = labels.get(LABEL_CONFIG_VERSION) {
            // The hint allows rejecting without fetching a layer.
            check_version_str(hint)?;
        }
        let buf = if let Some(b64) = labels.get(LABEL_CONFIG_BASE64) {
            BASE64
                .decode(b64)
                .map_err(|err| Error::invalid(format!("label {LABEL_CONFIG_BASE64}: {err}")))?
        } else if let (Some(layer), Some(path)) =
            (labels.get(LABEL_CONFIG_LAYER), labels.get(LABEL_CONFIG_PATH))
        {
            inspector.layer_blob(image, layer, path)?
        } else {
            return Ok(None);
        };
        let document: Value = serde_yaml::from_slice(&buf)?;
        let version = check_version(&document)?;
        debug!(image, digest, version, "loaded base config from OCI labels");

        let cfg = Arc::new(BaseConfig {
            document,
            source: BaseConfigSource::OciLabel,
            version,
        });
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        Ok(Some(cache.entry(digest).or_insert(cfg).clone()))
    }
}

fn check_version_str(v: &str) -> Result<()> {
    if crate::SUPPORTED_VERSIONS.contains(&v) {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_embedded_name_parses() {
        for name in embedded_names() {
            let cfg = embedded(name).expect(name);
            assert_eq!(cfg.version, "2");
            assert_eq!(cfg.source, BaseConfigSource::Embedded);
            assert!(cfg.document.get("providers").is_some());
        }
    }

    #[test]
    fn registry_and_embedded_configs_agree() {
        let names: Vec<&str> = crate::registry::NAMES.to_vec();
        let configs: Vec<&str> = embedded_names().collect();
        assert_eq!(names, configs);
    }

    struct Fixture {
        labels: BTreeMap<String, String>,
        blob: Option<Vec<u8>>,
        fetches: AtomicUsize,
    }

    impl ImageInspector for &Fixture {
        fn digest(&self, _: &str) -> Result<String> {
            Ok("sha256:feed".into())
        }
        fn labels(&self, _: &str) -> Result<BTreeMap<String, String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.labels.clone())
        }
        fn layer_blob(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
            self.blob.clone().ok_or_else(|| Error::invalid("no blob"))
        }
    }

    fn resolved() -> Resolved {
        Resolved {
            image: "example.com/llsd:dev".into(),
            name: Some("starter".into()),
        }
    }

    #[test]
    fn inline_label_wins_over_embedded() {
        let doc = "version: \"2\"\nproviders:\n  inference: []\n";
        let fx = Fixture {
            labels: BTreeMap::from([(LABEL_CONFIG_BASE64.to_string(), BASE64.encode(doc))]),
            blob: None,
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        let cfg = r.resolve(&resolved()).unwrap();
        assert_eq!(cfg.source, BaseConfigSource::OciLabel);
        assert!(cfg.document.get("apis").is_none());
    }

    #[test]
    fn layer_label_reads_blob() {
        let fx = Fixture {
            labels: BTreeMap::from([
                (LABEL_CONFIG_LAYER.to_string(), "sha256:beef".to_string()),
                (LABEL_CONFIG_PATH.to_string(), "/etc/llama-stack/config.yaml".to_string()),
            ]),
            blob: Some(b"version: \"2\"\nproviders: {}\n".to_vec()),
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        let cfg = r.resolve(&resolved()).unwrap();
        assert_eq!(cfg.source, BaseConfigSource::OciLabel);
    }

    #[test]
    fn cache_prevents_refetch() {
        let doc = "version: \"2\"\nproviders: {}\n";
        let fx = Fixture {
            labels: BTreeMap::from([(LABEL_CONFIG_BASE64.to_string(), BASE64.encode(doc))]),
            blob: None,
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        r.resolve(&resolved()).unwrap();
        r.resolve(&resolved()).unwrap();
        assert_eq!(fx.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unlabeled_image_falls_back_to_embedded() {
        let fx = Fixture {
            labels: BTreeMap::new(),
            blob: None,
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        let cfg = r.resolve(&resolved()).unwrap();
        assert_eq!(cfg.source, BaseConfigSource::Embedded);
    }

    #[test]
    fn direct_image_without_labels_requires_override() {
        let fx = Fixture {
            labels: BTreeMap::new(),
            blob: None,
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        let err = r
            .resolve(&Resolved {
                image: "example.com/custom:1".into(),
                name: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::BaseConfigRequired(_)));
    }

    #[test]
    fn version_hint_rejects_early() {
        let fx = Fixture {
            labels: BTreeMap::from([(LABEL_CONFIG_VERSION.to_string(), "9".to_string())]),
            blob: None,
            fetches: AtomicUsize::new(0),
        };
        let r = BaseResolver::new(&fx);
        let err = r.resolve(&resolved()).unwrap_err();
        assert!(err.to_string().contains("supported"), "got: {err}");
    }
}

//! Image_overrides loads the cluster-level registry overlay.
//!
//! The `image-overrides` ConfigMap maps distribution names to image
//! references; entries replace the embedded registry's without a rebuild.
//! It is read once at startup.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use tracing::{debug, info};

use crate::Result;
use llsd_config::Registry;

/// DEFAULT_CONFIG_MAP is the ConfigMap consulted for overrides.
pub const DEFAULT_CONFIG_MAP: &str = "image-overrides";

/// Load builds the registry, overlaying overrides when the ConfigMap exists.
pub async fn load(client: &kube::Client, namespace: &str, name: &str) -> Result<Registry> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let registry = Registry::embedded();
    match api.get_opt(name).await? {
        Some(cm) => {
            let overrides = cm.data.unwrap_or_default();
            info!(name, count = overrides.len(), "loaded image overrides");
            Ok(registry.with_overrides(overrides))
        }
        None => {
            debug!(name, "no image-overrides ConfigMap, using embedded registry");
            Ok(registry)
        }
    }
}

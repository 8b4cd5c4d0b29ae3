//! The validating admission webhook for the v1alpha2 CRD.
//!
//! CEL rules on the schema catch what they can; this webhook covers the
//! cross-reference checks they cannot express: Secret and ConfigMap
//! existence, provider-id rules after polymorphic parsing, and model
//! provider references.

use super::prelude::*;
use api::v1alpha2::{LlamaStackDistribution, LlamaStackDistributionSpec};
use llsd_config::normalize_providers;

#[instrument(skip_all)]
pub(super) async fn handler(
    extract::State(srv): extract::State<Arc<State>>,
    extract::Json(rev): Json<AdmissionReview<LlamaStackDistribution>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, StatusCode> {
    debug!("start validate");
    let req: AdmissionRequest<LlamaStackDistribution> = match rev.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!(error = %err, "unable to deserialize AdmissionReview");
            return Ok(Json(AdmissionResponse::invalid(err).into_review()));
        }
    };
    let res = AdmissionResponse::from(&req);
    match req.operation {
        Operation::Create | Operation::Update => (),
        Operation::Delete | Operation::Connect => return Ok(Json(res.into_review())),
    };
    let cur = req.object.as_ref().expect("object present on create/update");
    let ns = req
        .namespace
        .clone()
        .or_else(|| cur.namespace())
        .unwrap_or_default();
    debug!(op = ?req.operation, "doing validation");

    // Structural rules after polymorphic parsing.
    if let Err(msg) = check_spec(&cur.spec) {
        trace!(op = ?req.operation, "spec misconfigured");
        return Ok(Json(res.deny(msg).into_review()));
    }
    trace!(op = ?req.operation, "spec OK");

    // A dry-run synthesis over the embedded base catches resource and
    // provider cross-references exactly as the reconciler would see them.
    if let Err(msg) = check_config(&cur.spec, &srv) {
        trace!(op = ?req.operation, "config misconfigured");
        return Ok(Json(res.deny(msg).into_review()));
    }
    trace!(op = ?req.operation, "config OK");

    // Referenced objects must exist in the CR's namespace.
    let secrets: Api<core::v1::Secret> = Api::namespaced(srv.client.clone(), &ns);
    for (path, name) in referenced_secrets(&cur.spec) {
        match secrets.get_opt(&name).await {
            Ok(Some(_)) => (),
            Ok(None) => {
                return Ok(Json(
                    res.deny(format!("{path}: Secret {name:?} not found in namespace {ns:?}"))
                        .into_review(),
                ));
            }
            Err(err) => return Ok(Json(AdmissionResponse::invalid(err).into_review())),
        }
    }
    let config_maps: Api<core::v1::ConfigMap> = Api::namespaced(srv.client.clone(), &ns);
    for (path, name) in referenced_config_maps(&cur.spec) {
        match config_maps.get_opt(&name).await {
            Ok(Some(_)) => (),
            Ok(None) => {
                return Ok(Json(
                    res.deny(format!(
                        "{path}: ConfigMap {name:?} not found in namespace {ns:?}"
                    ))
                    .into_review(),
                ));
            }
            Err(err) => return Ok(Json(AdmissionResponse::invalid(err).into_review())),
        }
    }

    info!("OK");
    Ok(Json(res.into_review()))
}

/// Check_spec enforces the rules CEL cannot express, after normalizing the
/// polymorphic provider forms.
pub(crate) fn check_spec(spec: &LlamaStackDistributionSpec) -> Result<(), String> {
    match (&spec.distribution.name, &spec.distribution.image) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(
                "\"/spec/distribution\": exactly one of \"name\" or \"image\" must be provided"
                    .into(),
            );
        }
        _ => (),
    }
    if spec.override_config.is_some() && spec.has_synthesis_inputs() {
        return Err(concat!(
            "\"/spec/overrideConfig\" is mutually exclusive with ",
            "\"/spec/providers\", \"/spec/resources\", \"/spec/storage\", and \"/spec/disabled\"",
        )
        .into());
    }
    if let Some(providers) = &spec.providers {
        normalize_providers(providers).map_err(|err| err.to_string())?;
    }
    Ok(())
}

/// Check_config dry-runs synthesis so resource cross-references (model
/// providers, tool and shield families) are rejected at admission.
///
/// Unresolvable distributions and absent base configs are reconcile-time
/// conditions, not admission failures, so they pass here.
fn check_config(spec: &LlamaStackDistributionSpec, srv: &State) -> Result<(), String> {
    if spec.override_config.is_some() {
        return Ok(());
    }
    let Ok(resolved) = srv.registry.resolve(&spec.distribution) else {
        return Ok(());
    };
    let Ok(base) = srv.base.resolve(&resolved) else {
        return Ok(());
    };
    match llsd_config::synthesize(spec, &base) {
        Ok(_) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

/// Referenced_secrets lists `(field path, secret name)` pairs from the spec.
fn referenced_secrets(spec: &LlamaStackDistributionSpec) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(providers) = &spec.providers else {
        return out;
    };
    let Ok(normalized) = normalize_providers(providers) else {
        // check_spec already rejected.
        return out;
    };
    for p in &normalized {
        let field = format!("/spec/providers/{}", p.api.field_name());
        if let Some(sel) = &p.api_key {
            out.push((format!("{field}/apiKey"), sel.name.clone()));
        }
        if let Some(settings) = &p.settings {
            for (key, value) in settings {
                if let Some(sel) = value
                    .as_object()
                    .and_then(|o| o.get("secretKeyRef"))
                    .and_then(|s| s.get("name"))
                    .and_then(|n| n.as_str())
                {
                    out.push((format!("{field}/settings/{key}"), sel.to_string()));
                }
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Referenced_config_maps lists `(field path, ConfigMap name)` pairs.
fn referenced_config_maps(spec: &LlamaStackDistributionSpec) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Some(oc) = &spec.override_config {
        out.push((
            "/spec/overrideConfig/configMapName".to_string(),
            oc.config_map_name.clone(),
        ));
    }
    if let Some(ca) = spec
        .networking
        .as_ref()
        .and_then(|n| n.tls.as_ref())
        .and_then(|t| t.ca_bundle.as_ref())
    {
        out.push((
            "/spec/networking/tls/caBundle".to_string(),
            ca.name.clone(),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json};

    fn spec(v: serde_json::Value) -> LlamaStackDistributionSpec {
        from_value(v).unwrap()
    }

    #[test]
    fn override_exclusivity_denied() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm" } },
            "overrideConfig": { "configMapName": "user-config" },
        }));
        let msg = check_spec(&s).unwrap_err();
        assert!(msg.contains("mutually exclusive"), "got: {msg}");
    }

    #[test]
    fn multi_entry_without_id_denied() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": [
                    { "provider": "vllm", "endpoint": "http://a:8000" },
                    { "provider": "vllm", "endpoint": "http://b:8000" },
                ],
            },
        }));
        let msg = check_spec(&s).unwrap_err();
        assert!(msg.contains("must set \"id\""), "got: {msg}");
        assert!(msg.contains("spec.providers.inference[0]"), "got: {msg}");
    }

    #[test]
    fn duplicate_id_across_families_denied() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": { "id": "dup", "provider": "vllm" },
                "telemetry": { "id": "dup", "provider": "otel" },
            },
        }));
        let msg = check_spec(&s).unwrap_err();
        assert!(msg.contains("duplicate provider id"), "got: {msg}");
    }

    #[test]
    fn both_distribution_forms_denied() {
        let s = spec(json!({
            "distribution": { "name": "starter", "image": "example.com/x:1" },
        }));
        assert!(check_spec(&s).is_err());
    }

    #[test]
    fn valid_spec_passes() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": { "inference": { "provider": "vllm", "endpoint": "http://v:1" } },
        }));
        assert!(check_spec(&s).is_ok());
    }

    #[test]
    fn secret_references_collected() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "providers": {
                "inference": {
                    "provider": "vllm",
                    "apiKey": { "secretKeyRef": { "name": "vllm-creds", "key": "token" } },
                    "settings": {
                        "org": { "secretKeyRef": { "name": "org-creds", "key": "id" } },
                    },
                },
            },
        }));
        let refs = referenced_secrets(&s);
        assert_eq!(
            refs,
            vec![
                (
                    "/spec/providers/inference/apiKey".to_string(),
                    "vllm-creds".to_string()
                ),
                (
                    "/spec/providers/inference/settings/org".to_string(),
                    "org-creds".to_string()
                ),
            ]
        );
    }

    #[test]
    fn config_map_references_collected() {
        let s = spec(json!({
            "distribution": { "name": "starter" },
            "overrideConfig": { "configMapName": "user-config" },
            "networking": { "tls": { "caBundle": { "name": "trust", "key": "ca.crt" } } },
        }));
        let refs = referenced_config_maps(&s);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].1, "user-config");
        assert_eq!(refs[1].1, "trust");
    }
}

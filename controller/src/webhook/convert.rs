//! The conversion webhook between the served CRD versions.
//!
//! v1alpha2 is the hub; the actual field mapping lives in [`api::convert`].
//! The handler speaks the `apiextensions.k8s.io/v1` ConversionReview
//! protocol directly over JSON.

use serde_json::{Value, json};

use super::prelude::*;
use api::{convert, v1alpha1, v1alpha2};

static V1ALPHA1: &str = "llamastack.io/v1alpha1";
static V1ALPHA2: &str = "llamastack.io/v1alpha2";

#[instrument(skip_all)]
pub(super) async fn handler(extract::Json(review): Json<Value>) -> Json<Value> {
    let request = &review["request"];
    let uid = request["uid"].clone();
    let desired = request["desiredAPIVersion"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let objects = request["objects"].as_array().cloned().unwrap_or_default();
    debug!(desired, count = objects.len(), "converting objects");

    let mut converted = Vec::with_capacity(objects.len());
    for obj in &objects {
        match convert_object(obj, &desired) {
            Ok(v) => converted.push(v),
            Err(message) => {
                error!(message, "conversion failed");
                return Json(respond(uid, json!({ "status": "Failed", "message": message }), None));
            }
        }
    }
    Json(respond(uid, json!({ "status": "Success" }), Some(converted)))
}

fn respond(uid: Value, result: Value, converted: Option<Vec<Value>>) -> Value {
    let mut response = json!({ "uid": uid, "result": result });
    if let Some(converted) = converted {
        response["convertedObjects"] = Value::Array(converted);
    }
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "response": response,
    })
}

/// Convert_object translates one object to the desired API version.
pub(crate) fn convert_object(obj: &Value, desired: &str) -> Result<Value, String> {
    let current = obj["apiVersion"].as_str().unwrap_or_default();
    if current == desired {
        return Ok(obj.clone());
    }
    let out = match (current, desired) {
        (v1, v2) if v1 == V1ALPHA1 && v2 == V1ALPHA2 => {
            let spoke: v1alpha1::LlamaStackDistribution =
                serde_json::from_value(obj.clone()).map_err(|err| err.to_string())?;
            let hub = convert::to_hub(&spoke).map_err(|err| err.to_string())?;
            serde_json::to_value(hub).map_err(|err| err.to_string())?
        }
        (v2, v1) if v2 == V1ALPHA2 && v1 == V1ALPHA1 => {
            let hub: v1alpha2::LlamaStackDistribution =
                serde_json::from_value(obj.clone()).map_err(|err| err.to_string())?;
            let spoke = convert::from_hub(&hub).map_err(|err| err.to_string())?;
            serde_json::to_value(spoke).map_err(|err| err.to_string())?
        }
        (from, to) => return Err(format!("unsupported conversion: {from:?} -> {to:?}")),
    };
    let mut out = out;
    out["apiVersion"] = Value::String(desired.to_string());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::from_value;

    fn v1alpha1_object() -> Value {
        json!({
            "apiVersion": V1ALPHA1,
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "default", "uid": "42" },
            "spec": {
                "replicas": 2,
                "server": { "distribution": { "name": "starter" } },
            },
        })
    }

    #[test]
    fn up_and_down() {
        let up = convert_object(&v1alpha1_object(), V1ALPHA2).unwrap();
        assert_eq!(up["apiVersion"], V1ALPHA2);
        assert_eq!(up["spec"]["distribution"]["name"], "starter");
        assert_eq!(up["spec"]["workload"]["replicas"], 2);

        let down = convert_object(&up, V1ALPHA1).unwrap();
        assert_eq!(down["apiVersion"], V1ALPHA1);
        assert_eq!(down["spec"]["replicas"], 2);
        assert_eq!(down["spec"]["server"]["distribution"]["name"], "starter");
    }

    #[test]
    fn same_version_is_identity() {
        let obj = v1alpha1_object();
        assert_eq!(convert_object(&obj, V1ALPHA1).unwrap(), obj);
    }

    #[test]
    fn unknown_version_fails() {
        let err = convert_object(&v1alpha1_object(), "llamastack.io/v9").unwrap_err();
        assert!(err.contains("unsupported conversion"));
    }

    #[test]
    fn round_trip_preserves_hub_only_fields() {
        let hub = json!({
            "apiVersion": V1ALPHA2,
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "default", "uid": "42" },
            "spec": {
                "distribution": { "name": "starter" },
                "providers": { "inference": { "provider": "vllm" } },
                "disabled": ["telemetry"],
            },
        });
        let down = convert_object(&hub, V1ALPHA1).unwrap();
        let ann = &down["metadata"]["annotations"][convert::V1ALPHA2_FIELDS_ANNOTATION];
        assert!(ann.is_string(), "expected stash annotation, got {down}");

        let up = convert_object(&down, V1ALPHA2).unwrap();
        let hub_obj: api::v1alpha2::LlamaStackDistribution = from_value(up).unwrap();
        assert!(hub_obj.spec.providers.is_some());
        assert_eq!(hub_obj.spec.disabled, vec![api::v1alpha2::ProviderApi::Telemetry]);
    }
}

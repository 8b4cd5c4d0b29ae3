//! Module `convert` translates between the served versions of the
//! LlamaStackDistribution CRD.
//!
//! v1alpha2 is the hub (and storage) version; v1alpha1 converts through it.
//! Fields only addressable in v1alpha2 survive a down-conversion by being
//! serialized into the [`V1ALPHA2_FIELDS_ANNOTATION`] annotation, which the
//! up-conversion restores.

use serde::{Deserialize, Serialize};

use crate::{v1alpha1, v1alpha2};

/// V1ALPHA2_FIELDS_ANNOTATION carries v1alpha2-only fields across a
/// down-conversion.
pub static V1ALPHA2_FIELDS_ANNOTATION: &str = "llamastack.io/v1alpha2-fields";

/// Stash is the v1alpha2-only state a v1alpha1 object cannot express.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
struct Stash {
    #[serde(skip_serializing_if = "Option::is_none")]
    providers: Option<v1alpha2::Providers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<v1alpha2::Resources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<v1alpha2::StateStorage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    disabled: Vec<v1alpha2::ProviderApi>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    external_providers: Vec<v1alpha2::ExternalProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_secret_name: Option<String>,
    /// Set on the hub object when the v1alpha1 spec left `replicas` unset
    /// but another workload field forced a `workload` section, whose
    /// `replicas` cannot express absence.
    #[serde(skip_serializing_if = "is_false")]
    replicas_unset: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl Stash {
    fn is_empty(&self) -> bool {
        self.providers.is_none()
            && self.resources.is_none()
            && self.storage.is_none()
            && self.disabled.is_empty()
            && self.external_providers.is_empty()
            && self.hostname.is_none()
            && self.tls_secret_name.is_none()
    }
}

/// To_hub converts a v1alpha1 object to the hub version.
///
/// The side-channel annotation, when present, is consumed: its fields are
/// restored onto the hub object and the annotation itself is dropped.
pub fn to_hub(
    obj: &v1alpha1::LlamaStackDistribution,
) -> Result<v1alpha2::LlamaStackDistribution, serde_json::Error> {
    let mut metadata = obj.metadata.clone();
    let stash: Stash = match metadata
        .annotations
        .as_mut()
        .and_then(|a| a.remove(V1ALPHA2_FIELDS_ANNOTATION))
    {
        Some(buf) => serde_json::from_str(&buf)?,
        None => Stash::default(),
    };
    if metadata.annotations.as_ref().is_some_and(|a| a.is_empty()) {
        metadata.annotations = None;
    }

    let spec = &obj.spec;
    let srv = &spec.server;

    let overrides = {
        let mut o = srv.pod_overrides.clone().unwrap_or_default();
        if let Some(c) = &srv.container_spec {
            if !c.env.is_empty() {
                o.env = c.env.clone();
            }
            if !c.command.is_empty() {
                o.command = c.command.clone();
            }
            if !c.args.is_empty() {
                o.args = c.args.clone();
            }
        }
        if o.env.is_empty() && o.command.is_empty() && o.args.is_empty() {
            None
        } else {
            Some(o)
        }
    };

    let resources = srv.container_spec.as_ref().and_then(|c| c.resources.clone());
    let workload = if spec.replicas.is_some()
        || srv.workers.is_some()
        || resources.is_some()
        || srv.autoscaling.is_some()
        || srv.storage.is_some()
        || srv.pod_disruption_budget.is_some()
        || !srv.topology_spread_constraints.is_empty()
        || overrides.is_some()
    {
        Some(v1alpha2::Workload {
            replicas: spec.replicas.unwrap_or(1),
            workers: srv.workers,
            resources,
            autoscaling: srv.autoscaling.clone(),
            storage: srv.storage.clone(),
            pod_disruption_budget: srv.pod_disruption_budget.clone(),
            topology_spread_constraints: srv.topology_spread_constraints.clone(),
            overrides,
        })
    } else {
        None
    };

    let port = srv.container_spec.as_ref().and_then(|c| c.port);
    let ca_bundle = srv.tls_config.as_ref().and_then(|t| t.ca_bundle.clone());
    let expose = spec
        .network
        .as_ref()
        .and_then(|n| n.expose_route)
        .map(|on| match (&stash.hostname, on) {
            (Some(h), true) => v1alpha2::Expose::Host(v1alpha2::ExposeHost {
                hostname: Some(h.clone()),
            }),
            _ => v1alpha2::Expose::Enabled(on),
        });
    let allowed_from = spec.network.as_ref().and_then(|n| n.allowed_from.clone());
    let tls = if ca_bundle.is_some() || stash.tls_secret_name.is_some() {
        Some(v1alpha2::TlsConfig {
            ca_bundle,
            secret_name: stash.tls_secret_name.clone(),
        })
    } else {
        None
    };
    let networking = if port.is_some() || tls.is_some() || expose.is_some() || allowed_from.is_some()
    {
        Some(v1alpha2::Networking {
            port: port.unwrap_or(v1alpha2::DEFAULT_PORT),
            tls,
            expose,
            allowed_from,
        })
    } else {
        None
    };

    let mut out = v1alpha2::LlamaStackDistribution::new(
        metadata.name.as_deref().unwrap_or_default(),
        v1alpha2::LlamaStackDistributionSpec {
            distribution: srv.distribution.clone(),
            providers: stash.providers,
            resources: stash.resources,
            storage: stash.storage,
            disabled: stash.disabled,
            networking,
            workload,
            override_config: srv.user_config.as_ref().map(|u| v1alpha2::OverrideConfig {
                config_map_name: u.config_map_name.clone(),
            }),
            external_providers: stash.external_providers,
        },
    );
    out.metadata = metadata;
    // A materialized `workload.replicas` default is indistinguishable from
    // an explicit 1, so record the absence for the down-conversion.
    if out.spec.workload.is_some() && spec.replicas.is_none() {
        out.metadata.annotations.get_or_insert_default().insert(
            V1ALPHA2_FIELDS_ANNOTATION.into(),
            serde_json::to_string(&Stash {
                replicas_unset: true,
                ..Default::default()
            })?,
        );
    }
    out.status = obj
        .status
        .as_ref()
        .map(|s| v1alpha2::LlamaStackDistributionStatus {
            phase: s.phase,
            conditions: s.conditions.clone(),
            available_replicas: s.available_replicas,
            service_url: s.service_url.clone(),
            ..Default::default()
        });
    Ok(out)
}

/// From_hub converts a hub object down to v1alpha1.
///
/// v1alpha2-only fields are serialized into the side-channel annotation so a
/// later up-conversion loses nothing.
pub fn from_hub(
    obj: &v1alpha2::LlamaStackDistribution,
) -> Result<v1alpha1::LlamaStackDistribution, serde_json::Error> {
    let spec = &obj.spec;
    let net = spec.networking.as_ref();

    // Consume the flag a prior up-conversion may have left on the hub
    // object; the spoke expresses an unset `replicas` natively.
    let prior: Stash = match obj
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(V1ALPHA2_FIELDS_ANNOTATION))
    {
        Some(buf) => serde_json::from_str(buf)?,
        None => Stash::default(),
    };

    let stash = Stash {
        providers: spec.providers.clone(),
        resources: spec.resources.clone(),
        storage: spec.storage.clone(),
        disabled: spec.disabled.clone(),
        external_providers: spec.external_providers.clone(),
        hostname: net
            .and_then(|n| n.expose.as_ref())
            .and_then(|e| e.hostname())
            .map(String::from),
        tls_secret_name: net
            .and_then(|n| n.tls.as_ref())
            .and_then(|t| t.secret_name.clone()),
        replicas_unset: false,
    };

    let mut metadata = obj.metadata.clone();
    {
        let annotations = metadata.annotations.get_or_insert_default();
        if stash.is_empty() {
            annotations.remove(V1ALPHA2_FIELDS_ANNOTATION);
        } else {
            annotations.insert(
                V1ALPHA2_FIELDS_ANNOTATION.into(),
                serde_json::to_string(&stash)?,
            );
        }
        if annotations.is_empty() {
            metadata.annotations = None;
        }
    }

    let w = spec.workload.as_ref();
    let overrides = w.and_then(|w| w.overrides.as_ref());
    let container_spec = {
        let port = net.map(|n| n.port);
        let resources = w.and_then(|w| w.resources.clone());
        let env = overrides.map(|o| o.env.clone()).unwrap_or_default();
        let command = overrides.map(|o| o.command.clone()).unwrap_or_default();
        let args = overrides.map(|o| o.args.clone()).unwrap_or_default();
        if port.is_some()
            || resources.is_some()
            || !env.is_empty()
            || !command.is_empty()
            || !args.is_empty()
        {
            Some(v1alpha1::ContainerSpec {
                name: None,
                port,
                resources,
                env,
                command,
                args,
            })
        } else {
            None
        }
    };

    let network = {
        let expose_route = net.and_then(|n| n.expose.as_ref()).map(|e| e.enabled());
        let allowed_from = net.and_then(|n| n.allowed_from.clone());
        if expose_route.is_some() || allowed_from.is_some() {
            Some(v1alpha1::NetworkSpec {
                expose_route,
                allowed_from,
            })
        } else {
            None
        }
    };

    let mut out = v1alpha1::LlamaStackDistribution::new(
        metadata.name.as_deref().unwrap_or_default(),
        v1alpha1::LlamaStackDistributionSpec {
            replicas: if prior.replicas_unset {
                None
            } else {
                w.map(|w| w.replicas)
            },
            server: v1alpha1::ServerSpec {
                distribution: spec.distribution.clone(),
                container_spec,
                user_config: spec.override_config.as_ref().map(|o| v1alpha1::UserConfig {
                    config_map_name: o.config_map_name.clone(),
                }),
                tls_config: net
                    .and_then(|n| n.tls.as_ref())
                    .and_then(|t| t.ca_bundle.clone())
                    .map(|ca_bundle| v1alpha1::TlsConfig {
                        ca_bundle: Some(ca_bundle),
                    }),
                autoscaling: w.and_then(|w| w.autoscaling.clone()),
                workers: w.and_then(|w| w.workers),
                pod_overrides: None,
                pod_disruption_budget: w.and_then(|w| w.pod_disruption_budget.clone()),
                topology_spread_constraints: w
                    .map(|w| w.topology_spread_constraints.clone())
                    .unwrap_or_default(),
                storage: w.and_then(|w| w.storage.clone()),
            },
            network,
        },
    );
    out.metadata = metadata;
    out.status = obj
        .status
        .as_ref()
        .map(|s| v1alpha1::LlamaStackDistributionStatus {
            phase: s.phase,
            conditions: s.conditions.clone(),
            available_replicas: s.available_replicas,
            service_url: s.service_url.clone(),
        });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;
    use serde_json::{from_value, json};

    fn v1alpha1_fixture() -> v1alpha1::LlamaStackDistribution {
        from_value(json!({
            "apiVersion": "llamastack.io/v1alpha1",
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "default", "uid": "1234" },
            "spec": {
                "replicas": 2,
                "server": {
                    "distribution": { "name": "starter" },
                    "containerSpec": {
                        "port": 8080,
                        "env": [ { "name": "LOG_LEVEL", "value": "debug" } ],
                    },
                    "workers": 4,
                    "storage": { "size": "10Gi" },
                },
                "network": { "exposeRoute": true },
            },
        }))
        .unwrap()
    }

    fn v1alpha2_fixture() -> v1alpha2::LlamaStackDistribution {
        from_value(json!({
            "apiVersion": "llamastack.io/v1alpha2",
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "default", "uid": "1234" },
            "spec": {
                "distribution": { "name": "starter" },
                "providers": {
                    "inference": { "provider": "vllm", "endpoint": "http://vllm:8000" },
                },
                "resources": { "models": ["llama-3.1-8b"] },
                "disabled": ["telemetry"],
                "networking": {
                    "port": 8321,
                    "expose": { "hostname": "llsd.example.com" },
                },
                "workload": { "replicas": 3 },
            },
        }))
        .unwrap()
    }

    #[test]
    fn up_conversion_maps_fields() {
        let hub = to_hub(&v1alpha1_fixture()).unwrap();
        assert_eq!(hub.spec.distribution.name.as_deref(), Some("starter"));
        assert_eq!(hub.spec.replicas(), 2);
        assert_eq!(hub.spec.port(), 8080);
        let w = hub.spec.workload.as_ref().unwrap();
        assert_eq!(w.workers, Some(4));
        assert_eq!(w.storage.as_ref().unwrap().size, "10Gi");
        assert_eq!(w.overrides.as_ref().unwrap().env[0].name, "LOG_LEVEL");
        assert!(
            hub.spec
                .networking
                .as_ref()
                .unwrap()
                .expose
                .as_ref()
                .unwrap()
                .enabled()
        );
    }

    #[test]
    fn spoke_round_trip_preserves_v1alpha1_fields() {
        let orig = v1alpha1_fixture();
        let back = from_hub(&to_hub(&orig).unwrap()).unwrap();
        assert_eq!(back.spec.replicas, orig.spec.replicas);
        assert_eq!(back.spec.server.distribution, orig.spec.server.distribution);
        assert_eq!(back.spec.server.workers, orig.spec.server.workers);
        assert_eq!(back.spec.server.storage, orig.spec.server.storage);
        assert_eq!(back.spec.network, orig.spec.network);
        let cs = back.spec.server.container_spec.as_ref().unwrap();
        assert_eq!(cs.port, Some(8080));
        assert_eq!(cs.env[0].name, "LOG_LEVEL");
        assert_eq!(back.uid(), orig.uid());
    }

    #[test]
    fn spoke_round_trip_preserves_unset_replicas() {
        let orig: v1alpha1::LlamaStackDistribution = from_value(json!({
            "apiVersion": "llamastack.io/v1alpha1",
            "kind": "LlamaStackDistribution",
            "metadata": { "name": "demo", "namespace": "default", "uid": "1234" },
            "spec": {
                "server": {
                    "distribution": { "name": "starter" },
                    "workers": 4,
                    "storage": { "size": "10Gi" },
                },
            },
        }))
        .unwrap();
        assert!(orig.spec.replicas.is_none());

        let hub = to_hub(&orig).unwrap();
        // The hub materializes the replica default; the side-channel records
        // that the spoke never set it.
        assert_eq!(hub.spec.replicas(), 1);
        assert!(hub.annotations().contains_key(V1ALPHA2_FIELDS_ANNOTATION));

        let back = from_hub(&hub).unwrap();
        assert!(back.spec.replicas.is_none());
        assert_eq!(back.spec.server.workers, Some(4));
        assert_eq!(back.spec.server.storage, orig.spec.server.storage);
        assert!(!back.annotations().contains_key(V1ALPHA2_FIELDS_ANNOTATION));
    }

    #[test]
    fn hub_round_trip_preserves_v1alpha2_fields() {
        let orig = v1alpha2_fixture();
        let down = from_hub(&orig).unwrap();
        // Down-converted objects carry the side-channel annotation.
        assert!(
            down.annotations().contains_key(V1ALPHA2_FIELDS_ANNOTATION),
            "expected stash annotation"
        );
        let back = to_hub(&down).unwrap();
        assert_eq!(back.spec.providers, orig.spec.providers);
        assert_eq!(back.spec.resources, orig.spec.resources);
        assert_eq!(back.spec.disabled, orig.spec.disabled);
        assert_eq!(
            back.spec
                .networking
                .as_ref()
                .unwrap()
                .expose
                .as_ref()
                .unwrap()
                .hostname(),
            Some("llsd.example.com")
        );
        // The consumed annotation does not linger on the hub object.
        assert!(!back.annotations().contains_key(V1ALPHA2_FIELDS_ANNOTATION));
    }

    #[test]
    fn empty_stash_adds_no_annotation() {
        let mut obj = v1alpha2_fixture();
        obj.spec.providers = None;
        obj.spec.resources = None;
        obj.spec.disabled = Vec::new();
        obj.spec.networking = None;
        let down = from_hub(&obj).unwrap();
        assert!(down.metadata.annotations.is_none());
    }
}

//! Distributions holds the controller for the LlamaStackDistribution CRD.

use std::sync::{Arc, LazyLock};

use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, EnvVar, EnvVarSource, PersistentVolumeClaim, Secret, Service},
    networking::v1::{Ingress, NetworkPolicy},
    policy::v1::PodDisruptionBudget,
};
use k8s_openapi::api::core::v1::SecretKeySelector as CoreSecretKeySelector;
use kube::{
    api::DeleteParams,
    core::GroupVersionKind,
    runtime::controller::Error as CtrlErr,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::{
    signal::unix::{SignalKind, signal},
    time::Duration,
};
use tokio_stream::wrappers::SignalStream;

use crate::prelude::*;
use api::v1alpha2::{
    BaseConfigSource, Expose, LlamaStackDistribution, LlamaStackDistributionStatus, Phase,
};
use llsd_config::Resolved;
use llsd_templates::{
    ANNOTATION_CONFIG_HASH, Build, ConfigMapBuilder, DeploymentBuilder, HpaBuilder,
    IngressBuilder, NetworkPolicyBuilder, PdbBuilder, PvcBuilder, Rollout, ServiceBuilder,
    config_map_name, pvc_name, service_url,
};

static SELF_GVK: LazyLock<GroupVersionKind> = LazyLock::new(|| GroupVersionKind {
    group: LlamaStackDistribution::group(&()).to_string(),
    version: LlamaStackDistribution::version(&()).to_string(),
    kind: LlamaStackDistribution::kind(&()).to_string(),
});

/// Controller is the LlamaStackDistribution controller.
///
/// An error is returned if any setup fails.
#[instrument(skip_all)]
pub fn controller(cancel: CancellationToken, ctx: Arc<Context>) -> Result<ControllerFuture> {
    let client = ctx.client.clone();
    let ctlcfg = watcher::Config::default();
    let root: Api<LlamaStackDistribution> = Api::all(client.clone());
    let sig = SignalStream::new(signal(SignalKind::user_defined1())?);

    Ok(async move {
        if let Err(e) = root.list(&ListParams::default().limit(1)).await {
            error!("CRD ({SELF_GVK:?}) is not queryable ({e:?}); is the CRD installed?");
            return Err(Error::BadName("no CRD".into()));
        }

        let ctl = Controller::new(root, ctlcfg.clone())
            .owns(Api::<Deployment>::all(client.clone()), ctlcfg.clone())
            .owns(Api::<ConfigMap>::all(client.clone()), ctlcfg.clone())
            .owns(Api::<Service>::all(client.clone()), ctlcfg.clone())
            .owns(
                Api::<PersistentVolumeClaim>::all(client.clone()),
                ctlcfg.clone(),
            )
            .owns(Api::<Ingress>::all(client.clone()), ctlcfg.clone())
            .owns(Api::<NetworkPolicy>::all(client.clone()), ctlcfg.clone())
            .owns(
                Api::<HorizontalPodAutoscaler>::all(client.clone()),
                ctlcfg.clone(),
            )
            .owns(
                Api::<PodDisruptionBudget>::all(client.clone()),
                ctlcfg.clone(),
            )
            .reconcile_all_on(sig)
            .graceful_shutdown_on(cancel.cancelled_owned());
        info!("starting llamastackdistribution controller");

        ctl.run(reconcile, error_policy, ctx)
            .for_each(|ret| {
                if let Err(err) = ret {
                    match err {
                        CtrlErr::ObjectNotFound(objref) => error!(%objref, "object not found"),
                        CtrlErr::ReconcilerFailed(error, objref) => {
                            error!(%objref, %error, "reconcile error")
                        }
                        CtrlErr::QueueError(error) => error!(%error, "queue error"),
                        CtrlErr::RunnerError(error) => error!(%error, "runner error"),
                    };
                }
                futures::future::ready(())
            })
            .await;
        debug!("llamastackdistribution controller finished");
        Ok(())
    }
    .boxed())
}

fn error_policy(obj: Arc<LlamaStackDistribution>, err: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.reconcile.failures.increment(1);
    error!(
        error = err.to_string(),
        obj.metadata.name, obj.metadata.uid, "reconcile error"
    );
    Action::requeue(Duration::from_secs(5))
}

#[instrument(skip(ctx, obj), fields(
    kind = LlamaStackDistribution::kind(&()).as_ref(),
    namespace = obj.namespace().unwrap_or_default(),
    name = obj.name_any(),
    generation = obj.metadata.generation,
    resource_version = obj.metadata.resource_version,
))]
async fn reconcile(obj: Arc<LlamaStackDistribution>, ctx: Arc<Context>) -> Result<Action> {
    ctx.metrics.reconcile.runs.increment(1);
    let ns = obj.namespace().ok_or(Error::MissingName("namespace"))?;
    let name = obj.name_any();
    info!(r#"reconciling LlamaStackDistribution "{name}" in {ns}"#);

    if obj.metadata.deletion_timestamp.is_some() {
        return terminate(&obj, &ctx).await;
    }

    reconcile_one(&obj, &ctx)
        .await
        .map_err(|err| Error::for_object(&ns, &name, err))
}

/// Degraded is a user-correctable failure: the current Deployment is left
/// untouched, the failure lands in a condition, and nothing requeues until
/// the CR changes.
struct Degraded {
    condition: &'static str,
    reason: String,
    message: String,
}

impl Degraded {
    fn config<R: ToString, M: ToString>(reason: R, message: M) -> Degraded {
        Degraded {
            condition: "ConfigGenerated",
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }

    fn secrets<M: ToString>(message: M) -> Degraded {
        Degraded {
            condition: "SecretsResolved",
            reason: "SecretNotFound".into(),
            message: message.to_string(),
        }
    }
}

/// ConfigPlan is the resolved configuration for this pass.
struct ConfigPlan {
    config_map_name: String,
    hash: String,
    env: Vec<EnvVar>,
    /// Rendered text for an operator-generated ConfigMap; `None` when the
    /// user's override ConfigMap is mounted directly.
    rendered: Option<String>,
    provider_count: i32,
    resource_count: i32,
    version: String,
    source: Option<BaseConfigSource>,
    warnings: Vec<String>,
}

#[instrument(skip_all)]
async fn reconcile_one(obj: &LlamaStackDistribution, ctx: &Context) -> Result<Action> {
    let ns = obj.namespace().expect("LlamaStackDistribution is namespaced");
    let name = obj.name_any();
    let oref = obj.object_ref(&());

    let resolved = match ctx.registry.resolve(&obj.spec.distribution) {
        Ok(r) => r,
        Err(err) => {
            return degrade(
                obj,
                ctx,
                Degraded::config("DistributionUnresolvable", err.to_string()),
            )
            .await;
        }
    };
    debug!(image = resolved.image, "distribution resolved");

    let plan = match config_plan(obj, ctx, &resolved, &ns).await? {
        Ok(plan) => plan,
        Err(d) => return degrade(obj, ctx, d).await,
    };
    for w in &plan.warnings {
        warn!(warning = w, "config synthesis warning");
        ctx.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: "ConfigWarning".into(),
                    note: Some(w.clone()),
                    action: "Synthesize".into(),
                    secondary: None,
                },
                &oref,
            )
            .await
            .map_err(Error::Kube)?;
    }

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    let current = deployments.get_opt(&name).await?;
    let changed = rollout_needed(current.as_ref(), &resolved.image, &plan.hash);

    // A new configuration is materialized as a fresh immutable ConfigMap
    // before the Deployment flips to it.
    if changed && let Some(rendered) = &plan.rendered {
        let cm = ConfigMapBuilder::new(obj, rendered, &plan.hash)?.build();
        let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ns);
        match api.create(&CREATE_PARAMS, &cm).await {
            Ok(_) => debug!(name = cm.name_any(), "created ConfigMap"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                trace!(name = cm.name_any(), "ConfigMap already present")
            }
            Err(err) => return Err(err.into()),
        }
    }

    // The Deployment is applied every pass: image, config volume, env, and
    // the rollout annotation land in a single mutation, and any drifted
    // field snaps back. An unchanged apply leaves the generation alone, so
    // no pods restart.
    let rollout = Rollout {
        image: resolved.image.clone(),
        config_map_name: plan.config_map_name.clone(),
        config_hash: plan.hash.clone(),
        env: plan.env.clone(),
    };
    let desired = DeploymentBuilder::new(obj, rollout)?.build();
    let applied = deployments
        .patch(&name, &PATCH_PARAMS, &Patch::Apply(&desired))
        .await?;
    if changed {
        ctx.recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "RolloutApplied".into(),
                    note: Some(format!(
                        "image {} with config {}",
                        resolved.image, plan.config_map_name
                    )),
                    action: "Rollout".into(),
                    secondary: applied.object_ref(&()).into(),
                },
                &oref,
            )
            .await
            .map_err(Error::Kube)?;
    }

    reconcile_auxiliary(obj, ctx, &ns, &name).await?;
    collect_config_maps(obj, ctx, &ns, &name, &plan.config_map_name).await?;

    let available = applied
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    let phase = next_phase(changed, available);
    publish_status(obj, ctx, &ns, &name, &resolved, &plan, phase, available).await?;

    Ok(Action::requeue(Duration::from_secs(3600)))
}

/// Config_plan resolves the configuration source: an override ConfigMap,
/// a synthesized document, or the distribution default (synthesis with no
/// inputs). The outer error is transient; the inner error is degradation.
async fn config_plan(
    obj: &LlamaStackDistribution,
    ctx: &Context,
    resolved: &Resolved,
    ns: &str,
) -> Result<std::result::Result<ConfigPlan, Degraded>> {
    let name = obj.name_any();
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);

    if let Some(oc) = &obj.spec.override_config {
        let cm = match config_maps.get_opt(&oc.config_map_name).await? {
            Some(cm) => cm,
            None => {
                return Ok(Err(Degraded::config(
                    "ConfigMapNotFound",
                    format!(
                        "spec.overrideConfig: ConfigMap {:?} not found in namespace {ns:?}",
                        oc.config_map_name
                    ),
                )));
            }
        };
        let doc = match llsd_config::override_from(&cm) {
            Ok(doc) => doc,
            Err(err) => {
                return Ok(Err(Degraded::config("OverrideConfigInvalid", err.to_string())));
            }
        };
        return Ok(Ok(ConfigPlan {
            config_map_name: oc.config_map_name.clone(),
            hash: doc.hash,
            env: Vec::new(),
            rendered: None,
            provider_count: int32(doc.provider_count),
            resource_count: int32(doc.resource_count),
            version: doc.version,
            source: None,
            warnings: Vec::new(),
        }));
    }

    let base = match ctx.base.resolve(resolved) {
        Ok(base) => base,
        Err(err) => return Ok(Err(Degraded::config(config_reason(&err), err.to_string()))),
    };
    let syn = match llsd_config::synthesize(&obj.spec, &base) {
        Ok(syn) => syn,
        Err(err) => return Ok(Err(Degraded::config(config_reason(&err), err.to_string()))),
    };

    // Every referenced Secret must exist before anything is applied.
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    for e in &syn.env {
        if secrets.get_opt(&e.secret.name).await?.is_none() {
            return Ok(Err(Degraded::secrets(format!(
                "Secret {:?} not found in namespace {ns:?}",
                e.secret.name
            ))));
        }
    }
    if let Some(ca) = obj
        .spec
        .networking
        .as_ref()
        .and_then(|n| n.tls.as_ref())
        .and_then(|t| t.ca_bundle.as_ref())
        && config_maps.get_opt(&ca.name).await?.is_none()
    {
        return Ok(Err(Degraded::config(
            "ConfigMapNotFound",
            format!(
                "spec.networking.tls.caBundle: ConfigMap {:?} not found in namespace {ns:?}",
                ca.name
            ),
        )));
    }

    let env = syn
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value_from: EnvVarSource {
                secret_key_ref: CoreSecretKeySelector {
                    name: e.secret.name.clone(),
                    key: e.secret.key.clone(),
                    ..Default::default()
                }
                .into(),
                ..Default::default()
            }
            .into(),
            ..Default::default()
        })
        .collect();

    Ok(Ok(ConfigPlan {
        config_map_name: config_map_name(&name, &syn.hash),
        hash: syn.hash,
        env,
        rendered: Some(syn.rendered),
        provider_count: int32(syn.provider_count),
        resource_count: int32(syn.resource_count),
        version: syn.version,
        source: Some(base.source),
        warnings: syn.warnings,
    }))
}

/// Reconcile_auxiliary converges the Service, PVC, Ingress, NetworkPolicy,
/// HPA, and PDB.
#[instrument(skip_all)]
async fn reconcile_auxiliary(
    obj: &LlamaStackDistribution,
    ctx: &Context,
    ns: &str,
    name: &str,
) -> Result<()> {
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), ns);
    let svc = ServiceBuilder::try_from(obj)?.build();
    services
        .patch(&svc.name_any(), &PATCH_PARAMS, &Patch::Apply(&svc))
        .await?;

    // The PVC is created once and never resized in place.
    let workload = obj.spec.workload.as_ref();
    if workload.is_some_and(|w| w.storage.is_some()) {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
        if pvcs.get_opt(&pvc_name(name)).await?.is_none() {
            let pvc = PvcBuilder::try_from(obj)?.build();
            pvcs.create(&CREATE_PARAMS, &pvc).await?;
            debug!(name = pvc.name_any(), "created PersistentVolumeClaim");
        }
    }

    let ingresses: Api<Ingress> = Api::namespaced(ctx.client.clone(), ns);
    if exposed(obj) {
        let ing = IngressBuilder::try_from(obj)?.build();
        ingresses
            .patch(&ing.name_any(), &PATCH_PARAMS, &Patch::Apply(&ing))
            .await?;
    } else {
        delete_if_exists(&ingresses, name).await?;
    }

    let netpols: Api<NetworkPolicy> = Api::namespaced(ctx.client.clone(), ns);
    let np = NetworkPolicyBuilder::new(obj, &ctx.namespace)?.build();
    netpols
        .patch(&np.name_any(), &PATCH_PARAMS, &Patch::Apply(&np))
        .await?;

    let hpas: Api<HorizontalPodAutoscaler> = Api::namespaced(ctx.client.clone(), ns);
    if workload.is_some_and(|w| w.autoscaling.is_some()) {
        let hpa = HpaBuilder::try_from(obj)?.build();
        hpas.patch(&hpa.name_any(), &PATCH_PARAMS, &Patch::Apply(&hpa))
            .await?;
    } else {
        delete_if_exists(&hpas, name).await?;
    }

    let pdbs: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), ns);
    if workload.is_some_and(|w| w.pod_disruption_budget.is_some()) {
        let pdb = PdbBuilder::try_from(obj)?.build();
        pdbs.patch(&pdb.name_any(), &PATCH_PARAMS, &Patch::Apply(&pdb))
            .await?;
    } else {
        delete_if_exists(&pdbs, name).await?;
    }

    Ok(())
}

/// Collect_config_maps deletes generated ConfigMaps past the retained pair
/// (current + previous).
#[instrument(skip_all)]
async fn collect_config_maps(
    obj: &LlamaStackDistribution,
    ctx: &Context,
    ns: &str,
    name: &str,
    current: &str,
) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    let lp = ListParams::default().labels(&format!(
        "app=llama-stack,app.kubernetes.io/instance={name}"
    ));
    let cms = api.list(&lp).await?;
    for stale in stale_config_maps(&cms.items, name, current) {
        debug!(name = stale, "deleting superseded ConfigMap");
        match api.delete(&stale, &DeleteParams::default()).await {
            Ok(_) => (),
            Err(kube::Error::Api(ae)) if ae.code == 404 => (),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn publish_status(
    obj: &LlamaStackDistribution,
    ctx: &Context,
    ns: &str,
    name: &str,
    resolved: &Resolved,
    plan: &ConfigPlan,
    phase: Phase,
    available: i32,
) -> Result<()> {
    let generation = obj.metadata.generation;
    let mut conditions = obj
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(
        &mut conditions,
        new_condition(
            llsd_condition("ConfigGenerated"),
            "True",
            if plan.rendered.is_some() {
                "ConfigSynthesized"
            } else {
                "OverrideConfig"
            },
            format!("configuration {} is current", plan.config_map_name),
            generation,
        ),
    );
    set_condition(
        &mut conditions,
        new_condition(
            llsd_condition("SecretsResolved"),
            "True",
            "SecretsResolved",
            "",
            generation,
        ),
    );
    set_condition(
        &mut conditions,
        new_condition(
            llsd_condition("DeploymentUpdated"),
            "True",
            "DeploymentApplied",
            "",
            generation,
        ),
    );
    set_condition(
        &mut conditions,
        new_condition(
            llsd_condition("Available"),
            if available > 0 { "True" } else { "False" },
            if available > 0 { "MinimumReplicasAvailable" } else { "AwaitingReplicas" },
            format!("{available} replica(s) available"),
            generation,
        ),
    );

    // Keep the stamped generation time when the configuration is unchanged.
    let generated_at = obj
        .status
        .as_ref()
        .and_then(|s| s.config_generation.as_ref())
        .filter(|g| g.config_map_name == plan.config_map_name)
        .and_then(|g| g.generated_at.clone())
        .or_else(|| Some(now()));

    let port = obj.spec.port();
    let route_url = route_url(obj);
    let status = LlamaStackDistributionStatus {
        phase: Some(phase),
        conditions: Some(conditions),
        resolved_distribution: Some(api::v1alpha2::ResolvedDistribution {
            image: resolved.image.clone(),
            config_source: plan.source,
            config_hash: Some(plan.hash.clone()),
        }),
        config_generation: Some(api::v1alpha2::ConfigGeneration {
            config_map_name: plan.config_map_name.clone(),
            generated_at,
            provider_count: plan.provider_count,
            resource_count: plan.resource_count,
            config_version: Some(plan.version.clone()),
        }),
        available_replicas: Some(available),
        selector: Some(format!(
            "app=llama-stack,app.kubernetes.io/instance={name}"
        )),
        service_url: Some(service_url(name, ns, port)),
        route_url,
    };

    let api: Api<LlamaStackDistribution> = Api::namespaced(ctx.client.clone(), ns);
    let patch = Patch::Apply(json!({
        "apiVersion": LlamaStackDistribution::api_version(&()),
        "kind": LlamaStackDistribution::kind(&()),
        "status": status,
    }));
    api.patch_status(name, &PATCH_PARAMS, &patch).await?;
    Ok(())
}

#[instrument(skip_all)]
async fn degrade(
    obj: &LlamaStackDistribution,
    ctx: &Context,
    d: Degraded,
) -> Result<Action> {
    let ns = obj.namespace().expect("LlamaStackDistribution is namespaced");
    let name = obj.name_any();
    let oref = obj.object_ref(&());
    warn!(reason = d.reason, message = d.message, "degraded");

    ctx.recorder
        .publish(
            &Event {
                type_: EventType::Warning,
                reason: d.reason.clone(),
                note: Some(d.message.clone()),
                action: "Reconcile".into(),
                secondary: None,
            },
            &oref,
        )
        .await
        .map_err(Error::Kube)?;

    let mut conditions = obj
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(
        &mut conditions,
        new_condition(
            llsd_condition(d.condition),
            "False",
            &d.reason,
            &d.message,
            obj.metadata.generation,
        ),
    );

    let api: Api<LlamaStackDistribution> = Api::namespaced(ctx.client.clone(), &ns);
    let patch = Patch::Apply(json!({
        "apiVersion": LlamaStackDistribution::api_version(&()),
        "kind": LlamaStackDistribution::kind(&()),
        "status": {
            "phase": Phase::Failed,
            "conditions": conditions,
        },
    }));
    api.patch_status(&name, &PATCH_PARAMS, &patch).await?;

    // The running Deployment, if any, is left alone; nothing to do until
    // the spec changes.
    Ok(Action::await_change())
}

#[instrument(skip(ctx, obj))]
async fn terminate(obj: &LlamaStackDistribution, ctx: &Context) -> Result<Action> {
    let ns = obj.namespace().expect("LlamaStackDistribution is namespaced");
    let name = obj.name_any();
    let oref = obj.object_ref(&());

    // Owned resources are reclaimed by owner-reference GC; just record the
    // phase while the object drains.
    ctx.recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{name}`")),
                action: "Deleting".into(),
                secondary: None,
            },
            &oref,
        )
        .await
        .map_err(Error::Kube)?;

    let api: Api<LlamaStackDistribution> = Api::namespaced(ctx.client.clone(), &ns);
    let patch = Patch::Apply(json!({
        "apiVersion": LlamaStackDistribution::api_version(&()),
        "kind": LlamaStackDistribution::kind(&()),
        "status": { "phase": Phase::Terminating },
    }));
    match api.patch_status(&name, &PATCH_PARAMS, &patch).await {
        Ok(_) => (),
        Err(kube::Error::Api(ae)) if ae.code == 404 => (),
        Err(err) => return Err(err.into()),
    }
    Ok(Action::await_change())
}

async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn exposed(obj: &LlamaStackDistribution) -> bool {
    obj.spec
        .networking
        .as_ref()
        .and_then(|n| n.expose.as_ref())
        .is_some_and(Expose::enabled)
}

fn route_url(obj: &LlamaStackDistribution) -> Option<String> {
    if !exposed(obj) {
        return None;
    }
    let net = obj.spec.networking.as_ref()?;
    let host = net.expose.as_ref()?.hostname()?;
    let scheme = if net.tls.as_ref().is_some_and(|t| t.secret_name.is_some()) {
        "https"
    } else {
        "http"
    };
    Some(format!("{scheme}://{host}"))
}

/// Rollout_needed reports whether the Deployment's image or mounted config
/// differs from the plan. Identical hash and image mean no pod restarts.
fn rollout_needed(current: Option<&Deployment>, image: &str, hash: &str) -> bool {
    let Some(current) = current else {
        return true;
    };
    deployed_hash(current).as_deref() != Some(hash)
        || deployed_image(current).as_deref() != Some(image)
}

fn deployed_hash(d: &Deployment) -> Option<String> {
    d.spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(ANNOTATION_CONFIG_HASH)
        .cloned()
}

fn deployed_image(d: &Deployment) -> Option<String> {
    d.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
}

fn next_phase(changed: bool, available: i32) -> Phase {
    if changed {
        Phase::Initializing
    } else if available > 0 {
        Phase::Ready
    } else {
        Phase::Initializing
    }
}

/// Stale_config_maps picks the generated ConfigMaps to delete, retaining the
/// current one and the most recent predecessor.
fn stale_config_maps(items: &[ConfigMap], instance: &str, current: &str) -> Vec<String> {
    let prefix = format!("{instance}-config-");
    let mut old: Vec<&ConfigMap> = items
        .iter()
        .filter(|cm| {
            let name = cm.metadata.name.as_deref().unwrap_or_default();
            name.starts_with(&prefix) && name != current
        })
        .collect();
    old.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
    });
    old.iter()
        .skip(1)
        .filter_map(|cm| cm.metadata.name.clone())
        .collect()
}

fn config_reason(err: &llsd_config::Error) -> &'static str {
    use llsd_config::Error::*;
    match err {
        BaseConfigRequired(_) => "BaseConfigRequired",
        UnsupportedVersion(_) => "UnsupportedConfigVersion",
        UnknownDistribution(_) => "DistributionUnresolvable",
        NoInferenceProvider(_) | UnknownModelProvider { .. } | MissingProviderFamily { .. } => {
            "ResourceConfigError"
        }
        _ => "SynthesisFailed",
    }
}

fn int32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::jiff::Timestamp;
    use serde_json::from_value;

    fn deployment(image: &str, hash: &str) -> Deployment {
        from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "demo" },
            "spec": {
                "selector": { "matchLabels": { "app": "llama-stack" } },
                "template": {
                    "metadata": {
                        "annotations": { ANNOTATION_CONFIG_HASH: hash },
                    },
                    "spec": {
                        "containers": [ { "name": "llama-stack", "image": image } ],
                    },
                },
            },
        }))
        .unwrap()
    }

    #[test]
    fn rollout_detection() {
        let d = deployment("img:1", "aaaa");
        assert!(!rollout_needed(Some(&d), "img:1", "aaaa"));
        assert!(rollout_needed(Some(&d), "img:2", "aaaa"));
        assert!(rollout_needed(Some(&d), "img:1", "bbbb"));
        assert!(rollout_needed(None, "img:1", "aaaa"));
    }

    #[test]
    fn phases() {
        assert_eq!(next_phase(true, 0), Phase::Initializing);
        assert_eq!(next_phase(true, 1), Phase::Initializing);
        assert_eq!(next_phase(false, 0), Phase::Initializing);
        assert_eq!(next_phase(false, 2), Phase::Ready);
    }

    fn cm(name: &str, secs: i64) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                creation_timestamp: Some(Time(Timestamp::constant(secs, 0))),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn config_map_collection_keeps_two() {
        let items = vec![
            cm("demo-config-aaaaaaaa", 100),
            cm("demo-config-bbbbbbbb", 200),
            cm("demo-config-cccccccc", 300),
            cm("demo-config-dddddddd", 400),
            // Not a generated config.
            cm("demo-other", 500),
            cm("other-config-ffffffff", 600),
        ];
        let stale = stale_config_maps(&items, "demo", "demo-config-dddddddd");
        // Current (dddd) and the newest predecessor (cccc) survive.
        assert_eq!(
            stale,
            vec!["demo-config-bbbbbbbb".to_string(), "demo-config-aaaaaaaa".to_string()]
        );
    }

    #[test]
    fn config_map_collection_noop_below_three() {
        let items = vec![
            cm("demo-config-aaaaaaaa", 100),
            cm("demo-config-bbbbbbbb", 200),
        ];
        assert!(stale_config_maps(&items, "demo", "demo-config-bbbbbbbb").is_empty());
    }

    #[test]
    fn config_error_reasons() {
        use llsd_config::Error;
        assert_eq!(
            config_reason(&Error::BaseConfigRequired("img".into())),
            "BaseConfigRequired"
        );
        assert_eq!(
            config_reason(&Error::UnsupportedVersion("9".into())),
            "UnsupportedConfigVersion"
        );
        assert_eq!(
            config_reason(&Error::NoInferenceProvider("m".into())),
            "ResourceConfigError"
        );
        assert_eq!(
            config_reason(&Error::DuplicateProviderId("x".into())),
            "SynthesisFailed"
        );
    }
}

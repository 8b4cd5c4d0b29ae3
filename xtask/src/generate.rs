//! Manifest generation.

use std::fs;

use k8s_openapi::{
    api::admissionregistration::v1 as admission,
    apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiext,
};
use kube::core::{CustomResourceExt, crd::merge_crds};

use super::{Result, workspace};
use api::{v1alpha1, v1alpha2};

const WEBHOOK_SERVICE: &str = "llama-stack-operator-webhook";
const WEBHOOK_NAMESPACE: &str = "llama-stack-operator";

/// Manifests writes the CRD and webhook manifests into `config/`.
pub fn manifests() -> Result<()> {
    let root = workspace();
    let crd_dir = root.join("config/crd");
    let webhook_dir = root.join("config/webhook");
    fs::create_dir_all(&crd_dir)?;
    fs::create_dir_all(&webhook_dir)?;

    let crd = crd()?;
    let out = crd_dir.join("llamastack.io_llamastackdistributions.yaml");
    fs::write(&out, serde_yaml::to_string(&crd)?)?;
    eprintln!("wrote {}", out.display());

    let vwc = validating_webhook_configuration();
    let out = webhook_dir.join("validating.yaml");
    fs::write(&out, serde_yaml::to_string(&vwc)?)?;
    eprintln!("wrote {}", out.display());

    Ok(())
}

/// Crd merges both served versions into one manifest, with v1alpha2 as the
/// storage version and the conversion webhook wired up.
fn crd() -> Result<apiext::CustomResourceDefinition> {
    let mut crd = merge_crds(
        vec![
            v1alpha1::LlamaStackDistribution::crd(),
            v1alpha2::LlamaStackDistribution::crd(),
        ],
        "v1alpha2",
    )?;
    crd.spec.conversion = Some(apiext::CustomResourceConversion {
        strategy: "Webhook".into(),
        webhook: Some(apiext::WebhookConversion {
            conversion_review_versions: vec!["v1".into()],
            client_config: Some(apiext::WebhookClientConfig {
                service: Some(apiext::ServiceReference {
                    name: WEBHOOK_SERVICE.into(),
                    namespace: WEBHOOK_NAMESPACE.into(),
                    path: Some("/convert".into()),
                    port: Some(443),
                }),
                ..Default::default()
            }),
        }),
    });
    Ok(crd)
}

/// Validating_webhook_configuration registers the admission webhook with
/// failure policy `Fail`.
fn validating_webhook_configuration() -> admission::ValidatingWebhookConfiguration {
    admission::ValidatingWebhookConfiguration {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some("llama-stack-operator".into()),
            ..Default::default()
        },
        webhooks: Some(vec![admission::ValidatingWebhook {
            name: "vllamastackdistribution.llamastack.io".into(),
            admission_review_versions: vec!["v1".into()],
            side_effects: "None".into(),
            failure_policy: Some("Fail".into()),
            client_config: admission::WebhookClientConfig {
                service: Some(admission::ServiceReference {
                    name: WEBHOOK_SERVICE.into(),
                    namespace: WEBHOOK_NAMESPACE.into(),
                    path: Some("/v1alpha2/validate".into()),
                    port: Some(443),
                }),
                ..Default::default()
            },
            rules: Some(vec![admission::RuleWithOperations {
                api_groups: Some(vec![api::GROUP.into()]),
                api_versions: Some(vec!["v1alpha2".into()]),
                operations: Some(vec!["CREATE".into(), "UPDATE".into()]),
                resources: Some(vec!["llamastackdistributions".into()]),
                scope: Some("Namespaced".into()),
            }]),
            ..Default::default()
        }]),
    }
}

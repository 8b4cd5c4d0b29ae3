#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Controller implements common functionality for the controller binary and
//! the controller functions themselves.

use std::{env, pin::Pin, sync::LazyLock};

use futures::Future;
use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::runtime::events;

/// Prelude is the common types for the CRD controller.
pub(crate) mod prelude {
    pub use std::{collections::BTreeMap, sync::Arc};

    pub use futures::prelude::*;
    pub use k8s_openapi::apimachinery::pkg::apis::meta::{self, v1::Condition};
    pub use kube::{
        self, Resource, ResourceExt,
        api::{Api, ListParams, Patch, PatchParams, PostParams},
        runtime::{
            controller::{Action, Controller},
            events::{Event, EventType},
            watcher,
        },
    };
    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use crate::{
        CONTROLLER_NAME, CREATE_PARAMS, Context, ControllerFuture, Error, PATCH_PARAMS, Result,
        llsd_condition, new_condition, now, set_condition,
    };
}

pub mod distributions;
pub mod image_overrides;
pub mod metrics;
pub mod webhook;

/// Error enumerates everything that can go wrong in the controller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// TracingConfig indicates the error came from the tracing setup.
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    /// Tracing indicates the error came from installing the tracing subscriber.
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to find a kubeconfig.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Io indicates some OS-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON indicates a JSON serialization failed.
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    /// YAML indicates a YAML serialization failed.
    #[error("yaml error: {0}")]
    YAML(#[from] serde_yaml::Error),
    /// AddrParse indicates the provided string failed to parse into an address.
    #[error("parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    /// Tokio indicates an error starting tasks.
    #[error("tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
    /// TLS indicates some TLS error.
    #[error("tls error: {0}")]
    TLS(#[from] openssl::error::ErrorStack),
    /// MissingName indicates a name was needed and not provided.
    #[error("missing name for kubernetes object: {0}")]
    MissingName(&'static str),
    /// BadName indicates a disallowed name for a kubernetes object.
    #[error("bad name for kubernetes object: {0}")]
    BadName(String),
    /// Config means config synthesis or resolution failed.
    #[error("llama-stack config error: {0}")]
    Config(#[from] llsd_config::Error),
    /// Template means building an owned resource failed.
    #[error("template error: {0}")]
    Template(#[from] llsd_templates::Error),
    /// Webhook indicates the webhook server failed.
    #[error("webhook server error: {0}")]
    Webhook(String),
    /// Object wraps an error with the `namespace/name` it belongs to.
    #[error("{0}: {1}")]
    Object(String, #[source] Box<Error>),
}

impl Error {
    /// For_object prefixes the error with the object's `namespace/name`.
    pub fn for_object(namespace: &str, name: &str, err: Error) -> Error {
        Error::Object(format!("{namespace}/{name}"), Box::new(err))
    }
}

/// Result typedef for controllers.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Context is common context for controllers.
pub struct Context {
    /// Client is a k8s client. This should only ever be `clone()`'d out of
    /// the Context.
    pub client: kube::Client,
    /// Recorder publishes Events attributed to this controller.
    pub recorder: events::Recorder,
    /// Registry is the distribution registry, overlaid at startup.
    pub registry: std::sync::Arc<llsd_config::Registry>,
    /// Base resolves base configuration documents.
    pub base: std::sync::Arc<llsd_config::BaseResolver>,
    /// Namespace the operator itself runs in.
    pub namespace: String,
    /// Metrics collected from the reconciler.
    pub metrics: metrics::Metrics,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ctx")
    }
}

/// ControllerFuture is the type the controller constructors should return.
pub type ControllerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// REPORTER identifies this controller in published Events.
pub static REPORTER: LazyLock<events::Reporter> = LazyLock::new(|| events::Reporter {
    controller: CONTROLLER_NAME.to_string(),
    instance: env::var("CONTROLLER_POD_NAME").ok(),
});

/// Condition is like [keyify], but does not force lower-case.
fn condition<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c,
        })
        .for_each(|c| out.push(c));
    out
}

/// Keyify sanitizes the key for use in k8s metadata.
fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c.to_ascii_lowercase(),
        })
        .for_each(|c| out.push(c));
    out
}

/// Llsd_condition returns the provided argument as a name in the operator's
/// space, suitable for use as a condition type.
pub fn llsd_condition<S: AsRef<str>>(s: S) -> String {
    condition("llamastack.io/", s)
}

/// Llsd_label returns the provided argument as a name in the operator's
/// space, suitable for use as an annotation or label.
pub fn llsd_label<S: AsRef<str>>(s: S) -> String {
    keyify("llamastack.io/", s)
}

/// K8s_label returns the provided argument as a name in the
/// "app.kubernetes.io" space, suitable for use as an annotation or label.
pub fn k8s_label<S: AsRef<str>>(s: S) -> String {
    keyify("app.kubernetes.io/", s)
}

/// Now is the current time as a k8s Time.
#[inline]
pub fn now() -> Time {
    Time(Timestamp::now())
}

/// New_condition builds a Condition stamped with the current time.
pub fn new_condition<S, R, M>(
    type_: S,
    status: &str,
    reason: R,
    message: M,
    observed_generation: Option<i64>,
) -> Condition
where
    S: ToString,
    R: ToString,
    M: ToString,
{
    Condition {
        type_: type_.to_string(),
        status: status.into(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation,
        last_transition_time: now(),
    }
}

/// Set_condition replaces the condition with the same type, keeping the list
/// sorted and deduplicated.
pub fn set_condition(conditions: &mut Vec<Condition>, cnd: Condition) {
    let mut found = false;
    for c in conditions.iter_mut() {
        if c.type_ == cnd.type_ {
            // An unchanged condition keeps its transition time.
            if c.status == cnd.status && c.reason == cnd.reason && c.message == cnd.message {
                c.observed_generation = cnd.observed_generation;
            } else {
                *c = cnd.clone();
            }
            found = true;
        }
    }
    if !found {
        conditions.push(cnd);
    }
    conditions.sort_unstable_by(|a, b| a.type_.cmp(&b.type_));
}

/// CREATE_PARAMS is default post parameters.
pub static CREATE_PARAMS: LazyLock<kube::api::PostParams> =
    LazyLock::new(|| kube::api::PostParams {
        dry_run: false,
        field_manager: Some(String::from(CONTROLLER_NAME)),
    });

/// PATCH_PARAMS is default patch parameters.
///
/// Applies are forced so that drifted fields snap back to the CR-derived
/// state even when another field manager grabbed them.
pub static PATCH_PARAMS: LazyLock<kube::api::PatchParams> =
    LazyLock::new(|| kube::api::PatchParams::apply(CONTROLLER_NAME).force());

/// CONTROLLER_NAME is the name the controller uses whenever it needs a
/// human-readable name.
pub const CONTROLLER_NAME: &str = "llama-stack-operator";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(llsd_condition("ConfigGenerated"), "llamastack.io/ConfigGenerated");
        assert_eq!(llsd_label("Config_Hash"), "llamastack.io/config-hash");
        assert_eq!(k8s_label("instance"), "app.kubernetes.io/instance");
    }

    #[test]
    fn set_condition_replaces_by_type() {
        let mut cnds = vec![new_condition("b", "True", "Fine", "", Some(1))];
        set_condition(&mut cnds, new_condition("a", "True", "Fine", "", Some(1)));
        set_condition(&mut cnds, new_condition("b", "False", "Broken", "nope", Some(2)));
        assert_eq!(cnds.len(), 2);
        assert_eq!(cnds[0].type_, "a");
        assert_eq!(cnds[1].status, "False");
        assert_eq!(cnds[1].observed_generation, Some(2));
    }

    #[test]
    fn set_condition_keeps_transition_time_when_unchanged() {
        let old = Condition {
            type_: "a".into(),
            status: "True".into(),
            reason: "Fine".into(),
            message: "".into(),
            observed_generation: Some(1),
            last_transition_time: Time(Timestamp::constant(1000, 0)),
        };
        let mut cnds = vec![old.clone()];
        set_condition(&mut cnds, new_condition("a", "True", "Fine", "", Some(2)));
        assert_eq!(cnds[0].last_transition_time, old.last_transition_time);
        assert_eq!(cnds[0].observed_generation, Some(2));
    }
}

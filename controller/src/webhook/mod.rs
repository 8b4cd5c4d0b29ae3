//! Webhooks for the llama-stack-operator.

use std::sync::Arc;

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace};

mod convert;
mod validate;

/// State is the webhook application server state.
pub struct State {
    client: kube::Client,
    registry: Arc<llsd_config::Registry>,
    base: Arc<llsd_config::BaseResolver>,
}

impl State {
    /// New creates a new State.
    pub fn new(
        client: kube::Client,
        registry: Arc<llsd_config::Registry>,
        base: Arc<llsd_config::BaseResolver>,
    ) -> State {
        State {
            client,
            registry,
            base,
        }
    }
}

/// App returns an `axum::Router`.
pub fn app(srv: State) -> Router {
    let state = Arc::new(srv);
    trace!("state constructed");
    let app = Router::new()
        .route("/convert", post(convert::handler))
        .route("/v1alpha2/validate", post(validate::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    trace!("router constructed");
    app
}

mod prelude {
    pub use std::sync::Arc;

    pub use axum::{Json, extract, http::StatusCode};
    pub use k8s_openapi::api::core;
    pub use kube::{
        api::Api,
        core::{
            DynamicObject, ResourceExt,
            admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        },
    };
    pub use tracing::{debug, error, info, instrument, trace};

    pub use super::State;
}

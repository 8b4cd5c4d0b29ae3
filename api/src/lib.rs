#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Api contains the versions of the LlamaStackDistribution CRD.

use kube::KubeSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod convert;
pub mod v1alpha1;
pub mod v1alpha2;

/// GROUP is the kubernetes API group.
pub static GROUP: &str = "llamastack.io";

/// DistributionSelector names the upstream distribution to run.
///
/// Exactly one of `name` or `image` must be populated. A `name` is resolved
/// through the operator's distribution registry; an `image` is used verbatim.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, KubeSchema)]
#[serde(rename_all = "camelCase")]
#[x_kube(validation = (
    "(has(self.name) && !has(self.image)) || (!has(self.name) && has(self.image))",
    r#"exactly one of "name" or "image" must be provided"#
))]
pub struct DistributionSelector {
    /// Name of a distribution known to the operator's registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image is a container image reference, used as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// SecretKeySelector selects a key from a Secret in the object's namespace.
#[derive(
    Clone,
    Default,
    Debug,
    Deserialize,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Validate,
    KubeSchema,
)]
#[serde(rename_all = "camelCase")]
#[x_kube(validation = ("self.name != '' && self.key != ''", r#""key" and "name" must be populated"#))]
pub struct SecretKeySelector {
    /// The key to select.
    pub key: String,
    /// The name of the referent.
    pub name: String,
}

/// ConfigMapKeySelector selects a key from a ConfigMap in the object's namespace.
#[derive(
    Clone,
    Default,
    Debug,
    Deserialize,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Validate,
    KubeSchema,
)]
#[serde(rename_all = "camelCase")]
#[x_kube(validation = ("self.name != '' && self.key != ''", r#""key" and "name" must be populated"#))]
pub struct ConfigMapKeySelector {
    /// The key to select.
    pub key: String,
    /// The name of the referent.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use kube::core::CustomResourceExt;

    #[test]
    fn crd_names() {
        assert_eq!(
            super::v1alpha2::LlamaStackDistribution::crd_name(),
            "llamastackdistributions.llamastack.io"
        );
        assert_eq!(
            super::v1alpha1::LlamaStackDistribution::crd_name(),
            "llamastackdistributions.llamastack.io"
        );
    }
}

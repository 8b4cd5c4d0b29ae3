//! Registry maps distribution names to container images.
//!
//! The embedded table ships with the operator binary; an `image-overrides`
//! overlay read from the cluster can replace entries without a rebuild.

use std::collections::BTreeMap;

use api::DistributionSelector;

use crate::{Error, Result};

// The repository and tag components can be changed by providing the
// environment variables `CONTAINER_REPOSITORY` or `CONTAINER_TAG` at
// compile-time.
#[cfg(debug_assertions)]
const DEFAULT_CONTAINER_TAG: &str = "latest";
#[cfg(not(debug_assertions))]
const DEFAULT_CONTAINER_TAG: &str = "0.2.12";
const DEFAULT_CONTAINER_REPOSITORY: &str = "docker.io/llamastack";

/// NAMES is every distribution shipped in the embedded registry.
///
/// Each entry must have a matching base config under `configs/`; the
/// `xtask check` step enforces the correspondence.
pub static NAMES: &[&str] = &["meta-reference-gpu", "ollama", "remote-vllm", "starter"];

fn embedded_image(name: &str) -> String {
    let repo = option_env!("CONTAINER_REPOSITORY").unwrap_or(DEFAULT_CONTAINER_REPOSITORY);
    let tag = option_env!("CONTAINER_TAG").unwrap_or(DEFAULT_CONTAINER_TAG);
    format!("{repo}/distribution-{name}:{tag}")
}

/// Resolved is the outcome of distribution resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    /// Image is the concrete image reference.
    pub image: String,
    /// Name is the registry name the image was resolved from, if any.
    ///
    /// Unset when the CR supplied `distribution.image` directly.
    pub name: Option<String>,
}

/// Registry is the name → image table used for resolution.
///
/// Read-only after construction; the controller builds one at startup and
/// shares it behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Registry {
    entries: BTreeMap<String, String>,
}

impl Registry {
    /// Embedded returns the registry shipped with the binary.
    pub fn embedded() -> Registry {
        Registry {
            entries: NAMES
                .iter()
                .map(|&name| (name.to_string(), embedded_image(name)))
                .collect(),
        }
    }

    /// With_overrides overlays `overlay` onto the table; overlay entries win.
    pub fn with_overrides<I>(mut self, overlay: I) -> Registry
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, image) in overlay {
            self.entries.insert(name, image);
        }
        self
    }

    /// Resolve translates the selector into a concrete image reference.
    pub fn resolve(&self, sel: &DistributionSelector) -> Result<Resolved> {
        if let Some(image) = &sel.image {
            return Ok(Resolved {
                image: image.clone(),
                name: None,
            });
        }
        let name = sel
            .name
            .as_deref()
            .ok_or_else(|| Error::invalid("spec.distribution: one of \"name\" or \"image\" must be set"))?;
        match self.entries.get(name) {
            Some(image) => Ok(Resolved {
                image: image.clone(),
                name: Some(name.to_string()),
            }),
            None => Err(Error::UnknownDistribution(name.to_string())),
        }
    }

    /// Names iterates the registered distribution names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_name(name: &str) -> DistributionSelector {
        DistributionSelector {
            name: Some(name.into()),
            image: None,
        }
    }

    #[test]
    fn resolves_embedded_names() {
        let reg = Registry::embedded();
        for name in NAMES {
            let got = reg.resolve(&by_name(name)).expect("known name");
            assert_eq!(got.name.as_deref(), Some(*name));
            assert!(got.image.contains(name), "image {} names {name}", got.image);
        }
    }

    #[test]
    fn direct_image_is_verbatim() {
        let reg = Registry::embedded();
        let got = reg
            .resolve(&DistributionSelector {
                name: None,
                image: Some("example.com/llsd:dev".into()),
            })
            .unwrap();
        assert_eq!(got.image, "example.com/llsd:dev");
        assert!(got.name.is_none());
    }

    #[test]
    fn unknown_name_errors() {
        let reg = Registry::embedded();
        let err = reg.resolve(&by_name("nope")).unwrap_err();
        assert!(matches!(err, Error::UnknownDistribution(ref n) if n == "nope"));
    }

    #[test]
    fn overrides_take_precedence() {
        let reg = Registry::embedded()
            .with_overrides([("starter".to_string(), "mirror.internal/starter:pinned".to_string())]);
        let got = reg.resolve(&by_name("starter")).unwrap();
        assert_eq!(got.image, "mirror.internal/starter:pinned");
        // Non-overridden names keep the embedded mapping.
        let got = reg.resolve(&by_name("ollama")).unwrap();
        assert!(got.image.starts_with(DEFAULT_CONTAINER_REPOSITORY));
    }
}

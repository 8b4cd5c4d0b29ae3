//! Consistency checks run in CI.

use std::collections::BTreeSet;

use super::Result;

/// Registry verifies every distribution name has an embedded base config,
/// and vice versa.
pub fn registry() -> Result<()> {
    let names: BTreeSet<&str> = llsd_config::registry::NAMES.iter().copied().collect();
    let configs: BTreeSet<&str> = llsd_config::base::embedded_names().collect();

    let mut problems = Vec::new();
    for name in names.difference(&configs) {
        problems.push(format!("registry entry {name:?} has no embedded base config"));
    }
    for name in configs.difference(&names) {
        problems.push(format!("embedded base config {name:?} is not in the registry"));
    }
    for name in &configs {
        if let Err(err) = llsd_config::base::embedded(name) {
            problems.push(format!("embedded base config {name:?} does not load: {err}"));
        }
    }

    if problems.is_empty() {
        eprintln!("registry and embedded configs agree ({} entries)", names.len());
        Ok(())
    } else {
        Err(problems.join("\n").into())
    }
}

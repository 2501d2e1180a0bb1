//! # Configuration Fingerprint
//!
//! SHA-256 over the content of a workload's ConfigMaps and Secrets.
//!
//! Entries are sorted by (child identity, key) before hashing, so neither the
//! order children were fetched in nor map iteration order affects the result.
//! Every component is length-prefixed, which keeps `("ab", "c")` and
//! `("a", "bc")` from producing the same input stream.

use crate::store::ConfigSource;
use sha2::{Digest, Sha256};

fn update_component(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Lowercase hex fingerprint of every (identity, key, value) in `children`
#[must_use]
pub fn calculate_config_hash(children: &[ConfigSource]) -> String {
    let mut entries: Vec<(&ConfigSource, &String, &Vec<u8>)> = children
        .iter()
        .flat_map(|child| child.data.iter().map(move |(key, value)| (child, key, value)))
        .collect();
    entries.sort_by(|a, b| (&a.0.id, a.1).cmp(&(&b.0.id, b.1)));

    let mut hasher = Sha256::new();
    for (child, key, value) in entries {
        update_component(&mut hasher, child.id.kind.as_str().as_bytes());
        update_component(&mut hasher, child.id.namespace.as_bytes());
        update_component(&mut hasher, child.id.name.as_bytes());
        update_component(&mut hasher, key.as_bytes());
        update_component(&mut hasher, value);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChildRef;

    fn cm(name: &str) -> ConfigSource {
        ConfigSource::new(ChildRef::config_map("default", name))
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let hash = calculate_config_hash(&[cm("app").with_entry("key", "value")]);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_ignores_child_order() {
        let a = cm("a").with_entry("x", "1").with_entry("y", "2");
        let b = ConfigSource::new(ChildRef::secret("default", "b")).with_entry("token", "t");
        assert_eq!(
            calculate_config_hash(&[a.clone(), b.clone()]),
            calculate_config_hash(&[b, a])
        );
    }

    #[test]
    fn test_hash_changes_with_any_key_or_value() {
        let base = calculate_config_hash(&[cm("app").with_entry("key", "value")]);
        assert_ne!(base, calculate_config_hash(&[cm("app").with_entry("key", "other")]));
        assert_ne!(base, calculate_config_hash(&[cm("app").with_entry("other", "value")]));
        assert_ne!(
            base,
            calculate_config_hash(&[cm("app").with_entry("key", "value").with_entry("extra", "")])
        );
    }

    #[test]
    fn test_hash_depends_on_identity() {
        let as_config_map = calculate_config_hash(&[cm("app").with_entry("key", "value")]);
        let as_secret = calculate_config_hash(&[ConfigSource::new(ChildRef::secret("default", "app"))
            .with_entry("key", "value")]);
        let renamed = calculate_config_hash(&[cm("app2").with_entry("key", "value")]);
        assert_ne!(as_config_map, as_secret);
        assert_ne!(as_config_map, renamed);
    }

    #[test]
    fn test_component_boundaries_are_unambiguous() {
        let left = calculate_config_hash(&[cm("app").with_entry("ab", "c")]);
        let right = calculate_config_hash(&[cm("app").with_entry("a", "bc")]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_resource_version_and_owners_do_not_matter() {
        let plain = cm("app").with_entry("key", "value");
        let mut touched = plain.clone();
        touched.resource_version = Some("42".to_string());
        touched.owner_references.push(Default::default());
        assert_eq!(calculate_config_hash(&[plain]), calculate_config_hash(&[touched]));
    }
}

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::Resource;
use sha2::{Digest, Sha256};

use crate::errors::Error;

pub const MAX_NAME_LENGTH: usize = 63;

/// Owner reference marking `K` as the controller of a child object.
pub fn object_to_owner_reference<K: Resource<DynamicType = ()>>(meta: &ObjectMeta) -> Result<OwnerReference, Error> {
    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone().ok_or(Error::MissingKey(".metadata.name"))?,
        uid: meta.uid.clone().ok_or(Error::MissingKey(".metadata.uid"))?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Hex SHA-256 of `input`, cut to `len` characters.
pub fn short_hash(input: &[u8], len: usize) -> String {
    let digest = hex::encode(Sha256::digest(input));
    digest.chars().take(len).collect()
}

/// Lowercase, non `[a-z0-9-]` runs collapsed into single dashes, trimmed of dashes.
pub fn sanitize_name_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// Generate a name which is no greater than 63 chars in length
/// always keeping the `prefix` and as much of `suffix` as possible, favoring its ending.
pub fn bounded_name(prefix: &str, suffix: &str) -> String {
    let keep = MAX_NAME_LENGTH.saturating_sub(prefix.len());
    let suffix = suffix
        .chars()
        .rev()
        .take(keep)
        .collect::<Vec<char>>()
        .iter()
        .rev()
        .collect::<String>();
    format!("{}{}", prefix, suffix.trim_start_matches('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_name() {
        let prefix = "aim-discovery-";
        assert_eq!(bounded_name(prefix, "some-suffix"), "aim-discovery-some-suffix");

        let mut suffix = std::iter::repeat("a").take(100).collect::<String>();
        suffix.push_str("required-suffix");
        let result = bounded_name(prefix, &suffix);
        assert_eq!(result.len(), 63);
        assert!(result.starts_with(prefix));
        assert!(result.ends_with("aaaarequired-suffix"));
    }

    #[test]
    fn test_sanitize_name_component() {
        assert_eq!(sanitize_name_component("Llama_3.1:8B"), "llama-3-1-8b");
        assert_eq!(sanitize_name_component("--x--"), "x");
        assert_eq!(sanitize_name_component("..."), "");
    }

    #[test]
    fn test_short_hash() {
        let hash = short_hash(b"ghcr.io/amd/llama:1.0", 8);
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, short_hash(b"ghcr.io/amd/llama:1.0", 8));
    }
}

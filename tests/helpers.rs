use serde::de::DeserializeOwned;
use serde_yaml;

// Read a manifest from `tests/fixtures` into a typed resource
pub fn fixture<K: DeserializeOwned>(name: &str) -> K {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    let manifest = std::fs::read_to_string(&path).expect("Failed to read fixture file");
    serde_yaml::from_str(&manifest).expect("Unable to parse fixture into resource")
}

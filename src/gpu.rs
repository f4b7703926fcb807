//! GPU inventory from node labels and matching of hardware requirements against it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;

use crate::crd::common::HardwareRequirement;
use crate::engine::{ComponentHealth, FetchResult};

pub const COMPONENT_GPU: &str = "GPU";

pub const LABEL_AMD_DEVICE_ID: &str = "amd.com/gpu.device-id";
pub const LABEL_AMD_DEVICE_ID_BETA: &str = "beta.amd.com/gpu.device-id";
pub const LABEL_AMD_FAMILY: &str = "amd.com/gpu.family";
pub const LABEL_AMD_FAMILY_BETA: &str = "beta.amd.com/gpu.family";
pub const LABEL_AMD_VRAM: &str = "amd.com/gpu.vram";
pub const LABEL_AMD_VRAM_BETA: &str = "beta.amd.com/gpu.vram";
pub const LABEL_NVIDIA_PRODUCT: &str = "nvidia.com/gpu.product";
pub const LABEL_NVIDIA_MIG_PRODUCT: &str = "nvidia.com/mig.product";
pub const LABEL_NVIDIA_FAMILY: &str = "nvidia.com/gpu.family";
pub const LABEL_NFD_NVIDIA_MODEL: &str = "feature.node.kubernetes.io/nvidia-gpu-model";

const RESOURCE_PREFIX_AMD: &str = "amd.com/";
const RESOURCE_PREFIX_NVIDIA: &str = "nvidia.com/";

/// PCI device id to commercial model name.
const KNOWN_AMD_DEVICES: &[(&str, &str)] = &[
    // Instinct
    ("738c", "MI100"),
    ("738e", "MI100"),
    ("7408", "MI250X"),
    ("740c", "MI250X"),
    ("740f", "MI210"),
    ("7410", "MI210"),
    ("74a0", "MI300A"),
    ("74a1", "MI300X"),
    ("74a2", "MI308X"),
    ("74a5", "MI325X"),
    ("74a8", "MI308X"),
    ("74a9", "MI300X"),
    ("74b5", "MI300X"),
    ("74b6", "MI308X"),
    ("74b9", "MI325X"),
    ("74bd", "MI300X"),
    ("75a0", "MI350X"),
    ("75a3", "MI355X"),
    ("75b0", "MI350X"),
    ("75b3", "MI355X"),
    // Radeon Pro
    ("7460", "V710"),
    ("7461", "V710"),
    ("7448", "W7900"),
    ("744a", "W7900"),
    ("7449", "W7800"),
    ("745e", "W7800"),
    ("73a2", "W6900X"),
    ("73a3", "W6800"),
    ("73ab", "W6800X"),
    ("73a1", "V620"),
    ("73ae", "V620"),
    // Radeon
    ("7550", "RX9070"),
    ("744c", "RX7900"),
    ("73af", "RX6900"),
    ("73bf", "RX6800"),
];

/// Fallback per-GPU VRAM when nodes carry no VRAM label, in device plugin label format.
const KNOWN_GPU_VRAM: &[(&str, &str)] = &[
    ("MI355X", "288G"),
    ("MI350X", "288G"),
    ("MI325X", "256G"),
    ("MI308X", "128G"),
    ("MI300X", "192G"),
    ("MI300A", "128G"),
    ("MI250X", "128G"),
    ("MI210", "64G"),
    ("MI100", "32G"),
    ("V710", "32G"),
    ("W7900", "48G"),
    ("W7800", "32G"),
    ("W6900X", "32G"),
    ("W6800", "32G"),
    ("W6800X", "32G"),
    ("V620", "32G"),
    ("RX9070", "16G"),
    ("RX7900", "24G"),
    ("RX6900", "16G"),
    ("RX6800", "16G"),
    ("H200", "141G"),
    ("H100", "80G"),
    ("A100", "80G"),
    ("L40S", "48G"),
    ("L4", "24G"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VramSource {
    Label,
    Static,
    Unknown,
}

/// Live capacity for one GPU model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuResourceInfo {
    pub resource_name: String,
    /// Device plugin format such as `192G`; empty when unknown.
    pub vram: String,
    pub vram_source: VramSource,
}

/// GPU models present in the cluster, keyed by normalized model name.
pub type GpuCapacity = BTreeMap<String, GpuResourceInfo>;

pub fn amd_device_model(device_id: &str) -> String {
    let device_id = device_id.trim().to_lowercase();
    let device_id = device_id.trim_start_matches("0x");
    KNOWN_AMD_DEVICES
        .iter()
        .find(|(id, _)| *id == device_id)
        .map(|(_, model)| model.to_string())
        .unwrap_or_else(|| format!("AMD-{}", device_id.to_uppercase()))
}

pub fn known_vram(model: &str) -> Option<&'static str> {
    KNOWN_GPU_VRAM.iter().find(|(m, _)| *m == model).map(|(_, vram)| *vram)
}

/// Reduce a marketing or label name to a model key, `"Instinct MI300X (rev 2)"` becomes `MI300X`.
pub fn normalize_gpu_model(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() {
        return String::new();
    }
    let model = model.replace('_', "-").to_uppercase();
    let tokens: Vec<&str> = model
        .split(|c| matches!(c, '-' | ' ' | '/' | ':'))
        .filter(|t| !t.is_empty())
        .collect();

    let picked = tokens
        .iter()
        .filter(|t| !matches!(**t, "AMD" | "NVIDIA" | "TESLA" | "RTX" | "INSTINCT"))
        .find(|t| is_model_token(t));
    match (picked, tokens.first()) {
        (Some(token), _) => token.trim_start_matches("INSTINCT").to_string(),
        (None, Some(first)) => first.to_string(),
        (None, None) => model,
    }
}

// Letters, digits, at least one digit.
fn is_model_token(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) && token.chars().any(|c| c.is_ascii_digit())
}

fn label_value<'a>(labels: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| labels.get(*key))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

// Count-encoded labels such as `amd.com/gpu.device-id.74a1=4`.
fn label_suffix<'a>(labels: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        let prefix = format!("{}.", key);
        let found = labels.iter().find_map(|(k, v)| {
            let value = v.trim();
            if value.is_empty() || value == "0" {
                return None;
            }
            k.strip_prefix(prefix.as_str()).filter(|suffix| !suffix.is_empty())
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

pub fn amd_model_from_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    let device_keys = [LABEL_AMD_DEVICE_ID, LABEL_AMD_DEVICE_ID_BETA];
    let family_keys = [LABEL_AMD_FAMILY, LABEL_AMD_FAMILY_BETA];
    if let Some(device_id) = label_value(labels, &device_keys).or_else(|| label_suffix(labels, &device_keys)) {
        return Some(amd_device_model(device_id));
    }
    label_value(labels, &family_keys)
        .or_else(|| label_suffix(labels, &family_keys))
        .map(normalize_gpu_model)
}

pub fn nvidia_model_from_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    let product_keys = [LABEL_NVIDIA_PRODUCT, LABEL_NVIDIA_MIG_PRODUCT];
    let family_keys = [LABEL_NVIDIA_FAMILY];
    label_value(labels, &product_keys)
        .or_else(|| label_suffix(labels, &product_keys))
        .or_else(|| label_value(labels, &family_keys))
        .or_else(|| label_suffix(labels, &family_keys))
        .or_else(|| label_value(labels, &[LABEL_NFD_NVIDIA_MODEL]))
        .map(normalize_gpu_model)
}

/// VRAM of `model` on a node, preferring the node label over the static table.
pub fn gpu_vram(model: &str, labels: &BTreeMap<String, String>) -> (String, VramSource) {
    if let Some(vram) = label_value(labels, &[LABEL_AMD_VRAM, LABEL_AMD_VRAM_BETA]) {
        return (vram.to_string(), VramSource::Label);
    }
    match known_vram(&normalize_gpu_model(model)) {
        Some(vram) => (vram.to_string(), VramSource::Static),
        None => (String::new(), VramSource::Unknown),
    }
}

/// Aggregate GPU models across nodes. Nodes whose labels do not name a model are skipped;
/// the first node seen for a model decides its VRAM.
pub fn gpu_capacity_from_nodes(nodes: &[Node]) -> GpuCapacity {
    let empty = BTreeMap::new();
    let mut capacity = GpuCapacity::new();
    for node in nodes {
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);
        let detected = [
            (RESOURCE_PREFIX_AMD, amd_model_from_labels(labels)),
            (RESOURCE_PREFIX_NVIDIA, nvidia_model_from_labels(labels)),
        ];
        for (prefix, model) in detected {
            let model = match model {
                Some(model) if !model.is_empty() => model,
                _ => continue,
            };
            capacity.entry(model.clone()).or_insert_with(|| {
                let (vram, vram_source) = gpu_vram(&model, labels);
                GpuResourceInfo {
                    resource_name: format!("{}gpu", prefix),
                    vram,
                    vram_source,
                }
            });
        }
    }
    capacity
}

/// VRAM label value in bytes. `G` and `T` are binary units as the device plugin reports them.
pub fn parse_vram_label(vram: &str) -> Option<u64> {
    let vram = vram.trim().to_uppercase();
    if vram.is_empty() {
        return None;
    }
    let (digits, multiplier) = if let Some(n) = vram.strip_suffix('G') {
        (n, 1u64 << 30)
    } else if let Some(n) = vram.strip_suffix('T') {
        (n, 1u64 << 40)
    } else {
        (vram.as_str(), 1)
    };
    digits.parse::<u64>().ok().and_then(|v| v.checked_mul(multiplier))
}

/// Kubernetes style quantity in bytes: plain, decimal (`k`, `M`, `G`, `T`, `P`) or binary (`Ki` .. `Pi`).
pub fn parse_quantity(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return None,
    };
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

/// Decide whether `requirement` can run on the enumerated capacity.
///
/// `Ready` when it can, `NotAvailable` when capacity was listed and cannot satisfy it,
/// `Degraded` when the capacity itself could not be listed.
pub fn match_hardware(requirement: &HardwareRequirement, capacity: &FetchResult<GpuCapacity>) -> ComponentHealth {
    let gpu = match &requirement.gpu {
        Some(gpu) if gpu.requests > 0 => gpu,
        _ => return ComponentHealth::ready(COMPONENT_GPU, "CPUOnly", "No GPU requested"),
    };

    let capacity = match capacity {
        FetchResult::Found(capacity) => capacity,
        FetchResult::NotFound => {
            return ComponentHealth::not_available(COMPONENT_GPU, "GPUNotAvailable", "No GPU nodes found in cluster")
        }
        FetchResult::Error(err) => {
            return ComponentHealth::degraded(COMPONENT_GPU, "GPUCheckFailed", format!("Failed to list cluster GPUs: {}", err))
                .transient()
        }
    };

    let available = capacity.keys().cloned().collect::<Vec<String>>().join(", ");
    let requested = gpu.model.as_deref().map(normalize_gpu_model).filter(|m| !m.is_empty());
    let candidates: Vec<(&String, &GpuResourceInfo)> = match &requested {
        Some(model) => capacity.iter().filter(|(name, _)| *name == model).collect(),
        None => capacity.iter().collect(),
    };

    if candidates.is_empty() {
        let message = match &requested {
            Some(model) => format!("Required GPU model '{}' not available in cluster. Available: {}", model, available),
            None => "No GPUs available in cluster".to_string(),
        };
        return ComponentHealth::not_available(COMPONENT_GPU, "GPUNotAvailable", message);
    }

    if let Some(min_vram) = &gpu.min_vram {
        let min_bytes = match parse_quantity(min_vram) {
            Some(bytes) => bytes,
            None => {
                return ComponentHealth::failed(COMPONENT_GPU, "InvalidMinVRAM", format!("Cannot parse minVram '{}'", min_vram))
            }
        };
        let fits = candidates.iter().any(|(model, info)| {
            let vram = if info.vram.is_empty() { known_vram(model).unwrap_or("") } else { info.vram.as_str() };
            parse_vram_label(vram).map(|bytes| bytes >= min_bytes).unwrap_or(false)
        });
        if !fits {
            return ComponentHealth::not_available(
                COMPONENT_GPU,
                "InsufficientVRAM",
                format!("No available GPU has at least {} VRAM. Available: {}", min_vram, available),
            );
        }
    }

    let names: Vec<&str> = candidates.iter().map(|(m, _)| m.as_str()).collect();
    ComponentHealth::ready(COMPONENT_GPU, "GPUAvailable", format!("GPU available: {}", names.join(", ")))
}

use crate::error::JoinError;
use crate::types::ResourceSpec;

const RESERVED: &[(&str, &str)] = &[("CPU", "num-cpus"), ("GPU", "num-gpus")];

/// Parse the `--resources` JSON object into a resource map.
pub fn parse_resource_map(raw: &str) -> Result<ResourceSpec, JoinError> {
    serde_json::from_str(raw).map_err(JoinError::InvalidResources)
}

/// Merge the generic resource map with the dedicated CPU/GPU counts into
/// one spec. The generic map must not name the reserved resources; an
/// absent count leaves the key unset so the bootstrap layer auto-detects.
pub fn build_resource_spec(
    generic: ResourceSpec,
    num_cpus: Option<u64>,
    num_gpus: Option<u64>,
) -> Result<ResourceSpec, JoinError> {
    for (name, flag) in RESERVED {
        if generic.contains_key(*name) {
            return Err(JoinError::ReservedResource {
                name: (*name).to_string(),
                flag,
            });
        }
    }

    let mut spec = generic;
    if let Some(cpus) = num_cpus {
        spec.insert("CPU".to_string(), cpus);
    }
    if let Some(gpus) = num_gpus {
        spec.insert("GPU".to_string(), gpus);
    }
    Ok(spec)
}

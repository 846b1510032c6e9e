use k8s_openapi::api::core::v1::Pod;

/// Diffs the serialized pods. Missing maps and lists are added whole, so the
/// patch applies in order without creating parents first.
pub fn diff(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch, serde_json::Error> {
    let original = serde_json::to_value(original)?;
    let mutated = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&original, &mutated))
}

//! Request body rewriting
//!
//! The proxy never transforms request bodies except for one case: when the
//! requested model name is an alias, the `model` field is replaced with the
//! alias target before the body is forwarded.

use serde_json::Value;

/// Replace the top-level `model` field and re-serialize the body.
///
/// All other fields pass through verbatim.
pub fn replace_model_in_request_body(mut body: Value, model: &str) -> Vec<u8> {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), Value::String(model.to_string()));
    }
    serde_json::to_vec(&body).unwrap_or_default()
}

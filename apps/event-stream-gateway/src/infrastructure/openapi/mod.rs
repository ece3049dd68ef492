//! Base API Description
//!
//! The OpenAPI document the per-stream routes are generated from. It holds
//! the wildcard stream route whose first parameter is the stream list.

use serde_json::Value;

const BASE_SPEC: &str = include_str!("spec.yaml");

/// Parse the embedded base API description.
///
/// # Errors
///
/// Returns the YAML parse error if the embedded document is malformed.
pub fn base_spec() -> Result<Value, serde_yaml_bw::Error> {
    serde_yaml_bw::from_str(BASE_SPEC)
}

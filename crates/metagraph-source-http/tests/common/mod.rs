//! Common test utilities for metagraph-source-http integration tests.

#![allow(dead_code)]

use std::sync::Once;

use serde_json::{json, Value};

static INIT: Once = Once::new();

/// Install a test subscriber when `RUST_LOG` is set, once per test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Test data factory for a schema list entry.
pub fn create_summary(id: &str, classification: &str) -> Value {
    json!({ "id": id, "classification": classification })
}

/// Test data factory for a content schema with translated title fields.
pub fn create_asset_schema() -> Value {
    json!({
        "id": "Asset",
        "classification": "content",
        "labels": { "en": "Asset" },
        "fields": [
            { "id": "Title_en", "kind": "string", "labels": { "en": "Title" }, "is_searchable": true },
            { "id": "Title_de", "kind": "string", "labels": { "en": "Title (de)" } },
            { "id": "Color", "kind": "single-select", "labels": { "en": "Color" }, "target_schema_id": "Colors" }
        ]
    })
}

/// Test data factory for a list schema without values.
pub fn create_list_schema(id: &str) -> Value {
    json!({
        "id": id,
        "classification": "list",
        "labels": { "en": id }
    })
}

/// Test data factory for list values.
pub fn create_values(ids: &[&str]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({ "id": id, "labels": { "en": id } }))
            .collect(),
    )
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Creates an OAuth error response.
pub fn create_oauth_error(code: &str, description: &str) -> Value {
    json!({
        "error": code,
        "error_description": description
    })
}

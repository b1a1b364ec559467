use crate::StorageError;
use std::collections::HashMap;

/// Sends a storage failure to Sentry. Without an initialised client this is a no-op.
pub fn report_storage_error(provider: &str, operation: &str, error: &StorageError, name: Option<&str>) {
    let mut extra = HashMap::new();
    extra.insert("provider", provider);
    extra.insert("kind", error.kind());
    if let Some(name) = name {
        extra.insert("archive", name);
    }

    let error_message = format!("{operation}: {error}");
    let extra_json = serde_json::to_string(&extra).unwrap_or_default();
    let sentry_message = format!("{error_message} | context: {extra_json}");
    sentry::capture_message(&sentry_message, sentry::Level::Error);
}

//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Validate JSON config and warn about unknown fields.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    let expected = expected_config_keys();
    let unknowns = find_unknown_keys(&value, &expected, "");

    for path in unknowns {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Find unknown keys in JSON value compared to expected keys.
/// Returns paths like "hub.unknownField" or "endpoints[1].typo".
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let mut unknowns = Vec::new();

    let Value::Object(obj) = value else {
        return unknowns;
    };

    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if let Some(item) = expected.lists.get(key.as_str()) {
            if let Value::Array(items) = child {
                for (i, element) in items.iter().enumerate() {
                    unknowns.extend(find_unknown_keys(element, item, &format!("{path}[{i}]")));
                }
            }
        } else if !expected.fields.contains(key.as_str()) {
            unknowns.push(path);
        }
    }

    unknowns
}

/// Expected keys for a config section.
/// `fields` are leaf fields, `nested` are nested objects with their own expected keys,
/// `lists` are arrays whose elements are objects with their own expected keys.
struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
    lists: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
            lists: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }

    fn with_list(mut self, key: &'static str, item: ExpectedKeys) -> Self {
        self.lists.insert(key, item);
        self
    }
}

/// Expected keys for simlink-core Config (settings.rs)
fn expected_config_keys() -> ExpectedKeys {
    let hub_keys = ExpectedKeys::new(&[
        "listenPort",
        "listenOnlyOnLocalhost",
        "socketBufferSize",
        "handshake",
    ]);

    let transport_keys = ExpectedKeys::new(&["readChunkSize", "logAllCommunications"]);

    let host_keys = ExpectedKeys::new(&["tickRateHz"]);

    let collaborator_keys = ExpectedKeys::new(&["kind", "treeName"]);

    let endpoint_keys = ExpectedKeys::new(&["name", "schedule", "trailingYields"])
        .with_list("collaborators", collaborator_keys);

    ExpectedKeys::new(&[])
        .with_nested("hub", hub_keys)
        .with_nested("transport", transport_keys)
        .with_nested("host", host_keys)
        .with_list("endpoints", endpoint_keys)
}

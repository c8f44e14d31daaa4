use super::Backend;
use std::collections::BTreeMap;

pub fn parse_backend(s: &str) -> Option<Backend> {
    match s.to_lowercase().as_str() {
        "kafka" => Some(Backend::Kafka),
        "mock" => Some(Backend::Mock),
        _ => None,
    }
}

/// Parse `key=value` pairs; entries without `=` are ignored.
pub fn parse_connect_kv(pairs: &[String]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for p in pairs {
        if let Some((k, v)) = p.split_once('=') {
            params.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    params
}

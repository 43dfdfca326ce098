//! Deterministic cache keys

use std::collections::BTreeMap;

/// Build a key from a resource name and parameters
///
/// Parameters are sorted by name so the same query always maps to the same
/// key: `query_key("tickets", [("status", "open"), ("guildId", "1")])` is
/// `tickets?guildId=1&status=open`. The resource name is the key prefix, so
/// `invalidate("tickets")` reaches every variant.
pub fn query_key<I, K, V>(resource: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let params: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();

    if params.is_empty() {
        return resource.to_string();
    }

    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}?{}", resource, query.join("&"))
}

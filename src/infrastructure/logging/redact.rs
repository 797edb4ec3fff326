use std::collections::BTreeMap;

const SECRET_MARKERS: [&str; 5] = ["PASSWORD", "SECRET", "TOKEN", "API_KEY", "CREDENTIAL"];

const REDACTED: &str = "[REDACTED]";

/// Whether an environment key names a secret.
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Copy of `env` safe to log or print.
pub fn redact_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let value = if is_secret_key(k) { REDACTED.to_string() } else { v.clone() };
            (k.clone(), value)
        })
        .collect()
}

use std::path::Path;

use anyhow::Context;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::config::HarnessConfig;
use crate::runtime_state::atomic_write;
use crate::sinks::{ADDITIONAL_CONFIG, CUSTOM_CONFIG};

const RATE_LIMIT_KEYS: [&str; 7] = [
    "rc_message",
    "rc_registration",
    "rc_login",
    "rc_admin_redaction",
    "rc_joins",
    "rc_3pid_validation",
    "rc_invites",
];

/// Overrides layered on top of the generated `homeserver.yaml`.
pub fn additional_config(config: &HarnessConfig) -> JsonValue {
    let mut document = JsonMap::new();
    document.insert("public_baseurl".into(), json!(config.public_baseurl()));
    document.insert("enable_registration".into(), json!(true));
    document.insert(
        "enable_registration_without_verification".into(),
        json!(true),
    );
    document.insert(
        "listeners".into(),
        json!([{
            "port": config.http_port,
            "tls": false,
            "bind_addresses": ["0.0.0.0"],
            "type": "http",
            "resources": [{ "names": ["client", "federation"], "compress": false }],
        }]),
    );
    if config.disable_rate_limiting {
        document.extend(relaxed_rate_limits());
    }
    JsonValue::Object(document)
}

fn relaxed_rate_limits() -> JsonMap<String, JsonValue> {
    let limit = json!({ "per_second": 1000, "burst_count": 1000 });
    RATE_LIMIT_KEYS
        .iter()
        .map(|key| {
            let value = match *key {
                "rc_login" => json!({
                    "address": limit,
                    "account": limit,
                    "failed_attempts": limit,
                }),
                "rc_joins" => json!({ "local": limit, "remote": limit }),
                "rc_invites" => json!({ "per_room": limit, "per_user": limit }),
                _ => limit.clone(),
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Writes `additional.yaml` (as JSON, which YAML accepts) and the verbatim `custom.yaml`.
pub fn write_configs(workdir: &Path, config: &HarnessConfig) -> anyhow::Result<()> {
    let additional = serde_json::to_vec_pretty(&additional_config(config))?;
    let path = workdir.join(ADDITIONAL_CONFIG);
    atomic_write(&path, &additional).with_context(|| format!("write {}", path.display()))?;
    let path = workdir.join(CUSTOM_CONFIG);
    atomic_write(&path, config.custom_config.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_uses_configured_port() {
        let config = HarnessConfig {
            http_port: 8448,
            ..Default::default()
        };
        let document = additional_config(&config);
        assert_eq!(document["public_baseurl"], "http://localhost:8448");
        assert_eq!(document["enable_registration"], true);
        assert_eq!(document["listeners"][0]["port"], 8448);
        assert_eq!(document["listeners"][0]["bind_addresses"][0], "0.0.0.0");
        assert!(document.get("rc_message").is_none());
    }

    #[test]
    fn disabling_rate_limits_adds_every_limit() {
        let config = HarnessConfig {
            disable_rate_limiting: true,
            ..Default::default()
        };
        let document = additional_config(&config);
        for key in RATE_LIMIT_KEYS {
            assert!(document.get(key).is_some(), "{key} missing");
        }
        assert_eq!(document["rc_message"]["per_second"], 1000);
        assert_eq!(document["rc_login"]["failed_attempts"]["burst_count"], 1000);
        assert_eq!(document["rc_joins"]["remote"]["per_second"], 1000);
        assert_eq!(document["rc_invites"]["per_user"]["burst_count"], 1000);
    }

    #[test]
    fn writes_both_config_files() {
        let temp = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            custom_config: "max_upload_size: 1M\n".to_string(),
            ..Default::default()
        };
        write_configs(temp.path(), &config).unwrap();
        let additional: JsonValue = serde_json::from_slice(
            &std::fs::read(temp.path().join(ADDITIONAL_CONFIG)).unwrap(),
        )
        .unwrap();
        assert_eq!(additional["listeners"][0]["type"], "http");
        assert_eq!(
            std::fs::read_to_string(temp.path().join(CUSTOM_CONFIG)).unwrap(),
            "max_upload_size: 1M\n"
        );
    }
}

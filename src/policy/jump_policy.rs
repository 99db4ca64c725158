//! Jump policy wire artifact
//!
//! The JSON object delivered to a jump agent:
//!
//! ```json
//! { "ip": "10.0.0.1", "iptables_rules": ["-A FORWARD ...", "..."] }
//! ```
//!
//! `iptables_rules` is always serialized as an array. A missing or `null`
//! rule list deserializes to an empty list, so a re-serialized policy never
//! carries `null`.

use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};

/// Firewall snapshot for one jump peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpPolicy {
    /// Jump peer address
    #[serde(default)]
    pub ip: String,

    /// Ordered iptables rule arguments
    #[serde(default, deserialize_with = "null_as_empty")]
    pub iptables_rules: Vec<String>,
}

impl JumpPolicy {
    /// Create a policy
    pub fn new(ip: impl Into<String>, iptables_rules: Vec<String>) -> Self {
        Self {
            ip: ip.into(),
            iptables_rules,
        }
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populated_rules() {
        let policy = JumpPolicy::new(
            "10.0.0.1",
            vec![
                "-A FORWARD -s 10.0.0.9/32 -j DROP".to_string(),
                "-t nat -A POSTROUTING -s 10.0.0.2/32 -o eth0 -j MASQUERADE".to_string(),
            ],
        );
        let json = policy.to_json().unwrap();
        assert_eq!(JumpPolicy::from_json(&json).unwrap(), policy);
    }

    #[test]
    fn test_empty_rules_serialize_as_array() {
        let policy = JumpPolicy::new("10.0.0.1", Vec::new());
        let json = policy.to_json().unwrap();
        assert_eq!(json, r#"{"ip":"10.0.0.1","iptables_rules":[]}"#);
        assert_eq!(JumpPolicy::from_json(&json).unwrap(), policy);
    }

    #[test]
    fn test_null_rules_become_empty() {
        for input in [
            r#"{"ip":"10.0.0.1","iptables_rules":null}"#,
            r#"{"ip":"10.0.0.1"}"#,
        ] {
            let policy = JumpPolicy::from_json(input).unwrap();
            assert!(policy.iptables_rules.is_empty());
            let json = policy.to_json().unwrap();
            assert!(json.contains(r#""iptables_rules":[]"#), "got {}", json);
            assert!(!json.contains("null"));
        }
    }

    #[test]
    fn test_empty_ip() {
        let policy = JumpPolicy::from_json(r#"{"ip":"","iptables_rules":null}"#).unwrap();
        assert_eq!(policy, JumpPolicy::default());
        assert_eq!(policy.to_json().unwrap(), r#"{"ip":"","iptables_rules":[]}"#);
    }
}

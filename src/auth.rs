//! Session credentials and the auth bootstrap file formats.
//!
//! Credentials are produced by the pairing stage and survive restarts
//! through a small JSON file. Two shapes are accepted: the five-field form
//! this crate exports, and the legacy browser-bundle form with `WABrowserId`
//! and friends.

use std::fmt;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::WaError;

/// Credentials for an authenticated session.
///
/// Shared read-only with the crypto envelope; replaced only by
/// `load_auth_info` and cleared on logout or session invalidation.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub client_id: String,
    pub server_token: String,
    pub client_token: String,
    pub enc_key: [u8; 32],
    pub mac_key: [u8; 32],
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("client_id", &self.client_id)
            .field("server_token", &self.server_token)
            .field("client_token", &self.client_token)
            .field("enc_key", &"[redacted]")
            .field("mac_key", &"[redacted]")
            .finish()
    }
}

impl AuthInfo {
    /// Read credentials from a bootstrap file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WaError> {
        let raw = fs::read_to_string(path).map_err(|e| WaError::Auth(e.to_string()))?;
        let value: Value = serde_json::from_str(&raw)?;
        Self::from_json(&value)
    }

    /// Parse credentials from either accepted JSON shape.
    pub fn from_json(value: &Value) -> Result<Self, WaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| WaError::Auth("auth info must be a json object".to_string()))?;

        if obj.contains_key("clientID") {
            return Ok(Self {
                client_id: string_field(value, "clientID")?,
                server_token: string_field(value, "serverToken")?,
                client_token: string_field(value, "clientToken")?,
                enc_key: key_field(value, "encKey")?,
                mac_key: key_field(value, "macKey")?,
            });
        }

        if obj.contains_key("WABrowserId") {
            let bundle = match obj.get("WASecretBundle") {
                Some(Value::String(s)) => serde_json::from_str(s)?,
                Some(v @ Value::Object(_)) => v.clone(),
                _ => {
                    return Err(WaError::Auth(
                        "WASecretBundle must be a json string or object".to_string(),
                    ))
                }
            };
            return Ok(Self {
                client_id: string_field(value, "WABrowserId")?,
                server_token: string_field(value, "WAToken1")?,
                client_token: string_field(value, "WAToken2")?,
                enc_key: key_field(&bundle, "encKey")?,
                mac_key: key_field(&bundle, "macKey")?,
            });
        }

        Err(WaError::Auth("unrecognized auth info shape".to_string()))
    }

    /// The five-field export shape with base64 keys.
    pub fn base_encoded(&self) -> Value {
        json!({
            "clientID": self.client_id,
            "serverToken": self.server_token,
            "clientToken": self.client_token,
            "encKey": STANDARD.encode(self.enc_key),
            "macKey": STANDARD.encode(self.mac_key),
        })
    }
}

/// Some exporters wrap ID and token values in literal double quotes.
fn string_field(value: &Value, key: &str) -> Result<String, WaError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.replace('"', ""))
        .ok_or_else(|| WaError::Auth(format!("missing string field {key}")))
}

fn key_field(value: &Value, key: &str) -> Result<[u8; 32], WaError> {
    let bytes: Vec<u8> = match value.get(key) {
        Some(Value::String(s)) => STANDARD
            .decode(s)
            .map_err(|e| WaError::Auth(format!("{key} is not valid base64: {e}")))?,
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .filter(|n| *n < 256)
                    .map(|n| n as u8)
                    .ok_or_else(|| WaError::Auth(format!("{key} has a non-byte element")))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(WaError::Auth(format!("missing key field {key}"))),
    };

    bytes
        .try_into()
        .map_err(|b: Vec<u8>| WaError::Auth(format!("{key} must be 32 bytes, got {}", b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(byte: u8) -> String {
        STANDARD.encode([byte; 32])
    }

    #[test]
    fn test_modern_shape_base64_keys() {
        let value = json!({
            "clientID": "abc123",
            "serverToken": "srv",
            "clientToken": "cli",
            "encKey": b64(1),
            "macKey": b64(2),
        });
        let auth = AuthInfo::from_json(&value).unwrap();
        assert_eq!(auth.client_id, "abc123");
        assert_eq!(auth.enc_key, [1u8; 32]);
        assert_eq!(auth.mac_key, [2u8; 32]);
    }

    #[test]
    fn test_modern_shape_byte_array_keys() {
        let value = json!({
            "clientID": "abc123",
            "serverToken": "srv",
            "clientToken": "cli",
            "encKey": vec![3u8; 32],
            "macKey": vec![4u8; 32],
        });
        let auth = AuthInfo::from_json(&value).unwrap();
        assert_eq!(auth.enc_key, [3u8; 32]);
        assert_eq!(auth.mac_key, [4u8; 32]);
    }

    #[test]
    fn test_legacy_shape_with_bundle_string() {
        let bundle = json!({"encKey": b64(5), "macKey": b64(6)}).to_string();
        let value = json!({
            "WABrowserId": "\"browser-id\"",
            "WAToken1": "\"token-one\"",
            "WAToken2": "token-two",
            "WASecretBundle": bundle,
        });
        let auth = AuthInfo::from_json(&value).unwrap();
        assert_eq!(auth.client_id, "browser-id");
        assert_eq!(auth.server_token, "token-one");
        assert_eq!(auth.client_token, "token-two");
        assert_eq!(auth.enc_key, [5u8; 32]);
    }

    #[test]
    fn test_legacy_shape_with_bundle_object() {
        let value = json!({
            "WABrowserId": "id",
            "WAToken1": "t1",
            "WAToken2": "t2",
            "WASecretBundle": {"encKey": b64(7), "macKey": b64(8)},
        });
        let auth = AuthInfo::from_json(&value).unwrap();
        assert_eq!(auth.mac_key, [8u8; 32]);
    }

    #[test]
    fn test_export_reimports() {
        let auth = AuthInfo {
            client_id: "id".into(),
            server_token: "srv".into(),
            client_token: "cli".into(),
            enc_key: [9u8; 32],
            mac_key: [10u8; 32],
        };
        let reloaded = AuthInfo::from_json(&auth.base_encoded()).unwrap();
        assert_eq!(reloaded, auth);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let value = json!({
            "clientID": "id",
            "serverToken": "srv",
            "clientToken": "cli",
            "encKey": STANDARD.encode([1u8; 16]),
            "macKey": b64(2),
        });
        assert!(AuthInfo::from_json(&value).is_err());
    }

    #[test]
    fn test_unknown_shape_rejected() {
        assert!(AuthInfo::from_json(&json!({"foo": 1})).is_err());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let auth = AuthInfo {
            client_id: "id".into(),
            server_token: "srv".into(),
            client_token: "cli".into(),
            enc_key: [9u8; 32],
            mac_key: [10u8; 32],
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("9, 9"));
    }
}

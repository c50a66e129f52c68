//! Wire encoding for one API version.

use serde_json::Value;

use crate::error::RegistryError;

/// Encode/decode strategy for one API version's wire representation.
pub trait Codec: Send + Sync {
    /// Version stamped into encoded objects.
    fn version(&self) -> &str;

    /// Serialize `obj`, stamping `apiVersion`.
    ///
    /// # Errors
    /// Returns [`RegistryError::Codec`] if `obj` is not a typed object.
    fn encode(&self, obj: &Value) -> Result<Vec<u8>, RegistryError>;

    /// Parse `data` as an object of this version.
    ///
    /// # Errors
    /// Returns [`RegistryError::Codec`] on malformed input or on an
    /// `apiVersion` belonging to another version.
    fn decode(&self, data: &[u8]) -> Result<Value, RegistryError>;
}

/// JSON codec; objects carry their `kind` and `apiVersion` inline.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    version: String,
}

impl JsonCodec {
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Codec for JsonCodec {
    fn version(&self) -> &str {
        &self.version
    }

    fn encode(&self, obj: &Value) -> Result<Vec<u8>, RegistryError> {
        let mut obj = obj.clone();
        let Some(fields) = obj.as_object_mut() else {
            return Err(RegistryError::Codec("only objects can be encoded".to_owned()));
        };
        if !fields.get("kind").is_some_and(Value::is_string) {
            return Err(RegistryError::Codec("object has no kind".to_owned()));
        }
        fields.insert("apiVersion".to_owned(), Value::String(self.version.clone()));
        Ok(serde_json::to_vec(&obj)?)
    }

    fn decode(&self, data: &[u8]) -> Result<Value, RegistryError> {
        let mut obj: Value = serde_json::from_slice(data)?;
        let Some(fields) = obj.as_object_mut() else {
            return Err(RegistryError::Codec("expected a JSON object".to_owned()));
        };
        match fields.get("apiVersion").and_then(Value::as_str) {
            Some(v) if v != self.version => {
                return Err(RegistryError::Codec(format!(
                    "apiVersion \"{v}\" cannot be decoded as \"{}\"",
                    self.version
                )));
            }
            Some(_) => {}
            None => {
                fields.insert("apiVersion".to_owned(), Value::String(self.version.clone()));
            }
        }
        Ok(obj)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_stamps_version() {
        let codec = JsonCodec::new("v1beta1");
        let bytes = codec.encode(&json!({"kind": "Build", "apiVersion": "v0"})).unwrap();
        let back: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back["apiVersion"], "v1beta1");
        assert_eq!(back["kind"], "Build");
    }

    #[test]
    fn encode_rejects_untyped_values() {
        let codec = JsonCodec::new("v1beta1");
        assert!(codec.encode(&json!([1, 2])).is_err());
        assert!(codec.encode(&json!({"name": "x"})).is_err());
    }

    #[test]
    fn decode_rejects_foreign_version() {
        let codec = JsonCodec::new("v1beta1");
        let err = codec
            .decode(br#"{"kind":"Build","apiVersion":"v1beta3"}"#)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Codec(_)));
    }

    #[test]
    fn decode_fills_missing_version() {
        let codec = JsonCodec::new("v1beta1");
        let obj = codec.decode(br#"{"kind":"Build"}"#).unwrap();
        assert_eq!(obj["apiVersion"], "v1beta1");
    }
}

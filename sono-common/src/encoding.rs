//! Serde helpers for binary payloads
//!
//! Artwork bytes travel through text-oriented stores (JSON values in the
//! metadata cache), so they are serialized as standard base64 strings.

/// `#[serde(with = "base64_bytes")]` for `Vec<u8>` fields
pub mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        #[serde(with = "super::base64_bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn test_bytes_serialize_as_base64_text() {
        let payload = Payload { data: vec![0xff, 0xd8, 0xff, 0x00] };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"data":"/9j/AA=="}"#);

        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let result: Result<Payload, _> = serde_json::from_str(r#"{"data":"***"}"#);
        assert!(result.is_err());
    }
}

//! String-encoded integers for JSON payloads.
//!
//! 64-bit seeds and 128-bit RNG word positions overflow the exactly
//! representable integer range of common JSON consumers, so they are written
//! as decimal strings. Decoding accepts both forms for seeds that fit.

pub mod u64_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum U64Input {
            String(String),
            Number(u64),
        }

        match U64Input::deserialize(deserializer)? {
            U64Input::String(raw) => raw.parse::<u64>().map_err(D::Error::custom),
            U64Input::Number(value) => Ok(value),
        }
    }
}

pub mod u128_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(D::Error::custom)
    }
}

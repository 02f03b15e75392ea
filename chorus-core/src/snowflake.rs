//! Platform snowflake ids
//!
//! Ids travel as decimal strings on the wire and are compared as integers.
//! The serde helpers here accept either form and always write strings.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serializer};
use std::fmt;

/// A platform object id
pub type Snowflake = u64;

/// Milliseconds between the unix epoch and the platform epoch (2015-01-01)
pub const PLATFORM_EPOCH_MS: u64 = 1_420_070_400_000;

/// Creation time encoded in the high bits of a snowflake
pub fn created_at(id: Snowflake) -> DateTime<Utc> {
    let millis = (id >> 22) + PLATFORM_EPOCH_MS;
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a snowflake as a decimal string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Snowflake, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Snowflake, E> {
        u64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Snowflake, E> {
        value
            .parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}

/// `#[serde(with = "snowflake::as_str")]` for required ids
pub mod as_str {
    use super::*;

    pub fn serialize<S: Serializer>(id: &Snowflake, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Snowflake, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// `#[serde(default, with = "snowflake::option_str")]` for optional ids
pub mod option_str {
    use super::*;

    struct OptionVisitor;

    impl<'de> Visitor<'de> for OptionVisitor {
        type Value = Option<Snowflake>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an optional snowflake")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(SnowflakeVisitor).map(Some)
        }
    }

    pub fn serialize<S: Serializer>(id: &Option<Snowflake>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Snowflake>, D::Error> {
        deserializer.deserialize_option(OptionVisitor)
    }
}

/// `#[serde(default, with = "snowflake::vec_str")]` for id lists
pub mod vec_str {
    use super::*;

    #[derive(Deserialize)]
    struct Item(#[serde(with = "super::as_str")] Snowflake);

    pub fn serialize<S: Serializer>(ids: &[Snowflake], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(ids.iter().map(|id| id.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Snowflake>, D::Error> {
        let items = Vec::<Item>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|item| item.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Probe {
        #[serde(with = "as_str")]
        id: Snowflake,
        #[serde(default, with = "option_str")]
        parent: Option<Snowflake>,
        #[serde(default, with = "vec_str")]
        roles: Vec<Snowflake>,
    }

    #[test]
    fn test_accepts_strings_and_numbers() {
        let probe: Probe =
            serde_json::from_str(r#"{"id":"42","parent":7,"roles":["1","2"]}"#).unwrap();
        assert_eq!(probe.id, 42);
        assert_eq!(probe.parent, Some(7));
        assert_eq!(probe.roles, vec![1, 2]);

        let missing: Probe = serde_json::from_str(r#"{"id":1,"parent":null}"#).unwrap();
        assert_eq!(missing.parent, None);
        assert!(missing.roles.is_empty());
    }

    #[test]
    fn test_writes_strings() {
        let probe = Probe { id: 9, parent: None, roles: vec![3] };
        let json = serde_json::to_string(&probe).unwrap();
        assert_eq!(json, r#"{"id":"9","parent":null,"roles":["3"]}"#);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Probe>(r#"{"id":"abc"}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"id":-4}"#).is_err());
    }

    #[test]
    fn test_created_at() {
        // 2015-01-01T00:00:01Z
        let id = 1000u64 << 22;
        assert_eq!(created_at(id).timestamp_millis(), PLATFORM_EPOCH_MS as i64 + 1000);
    }
}

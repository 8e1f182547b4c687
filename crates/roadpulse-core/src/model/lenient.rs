//! Field deserializers that accept the loosely typed documents written by
//! older clients: `null` reads as the field default and whole-number fields
//! accept floats.

use serde::de::{Deserialize, Deserializer, Error as _};
use serde_json::{Number, Value};

use super::default_anonymous;

/// `null` reads as `T::default()`.
pub(super) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A whole number that may arrive as a float (rounded) or `null` (default).
pub(super) fn whole<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + TryFrom<i64>,
{
    match Option::<Number>::deserialize(deserializer)? {
        None => Ok(T::default()),
        Some(n) => {
            let int = round(&n)
                .ok_or_else(|| D::Error::custom(format!("{n} is not a whole number")))?;
            T::try_from(int).map_err(|_| D::Error::custom(format!("{n} is out of range")))
        }
    }
}

/// A percentage: numbers are rounded and clamped to `0..=100`, anything
/// else (including `null`) is absent.
pub(super) fn percent<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_number)
        .and_then(round)
        .and_then(|pct| u8::try_from(pct.clamp(0, 100)).ok()))
}

/// Optional instant; anything other than a number is absent.
pub(super) fn instant<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_number).and_then(round))
}

/// Display name; `null` and the empty string read as "Anonymous".
pub(super) fn name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_anonymous))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn round(n: &Number) -> Option<i64> {
    if let Some(int) = n.as_i64() {
        return Some(int);
    }
    let float = n.as_f64()?.round();
    (float.is_finite() && float >= i64::MIN as f64 && float < i64::MAX as f64)
        .then_some(float as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Fields {
        #[serde(default, deserialize_with = "whole")]
        level: u8,
        #[serde(default, deserialize_with = "whole")]
        points: i64,
        #[serde(default, deserialize_with = "or_default")]
        tags: Vec<String>,
        #[serde(default, deserialize_with = "percent")]
        accuracy: Option<u8>,
        #[serde(default = "default_anonymous", deserialize_with = "name")]
        user: String,
        #[serde(default, deserialize_with = "instant")]
        seen: Option<i64>,
    }

    fn read(value: serde_json::Value) -> Result<Fields, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn nulls_read_as_defaults() {
        let p = read(json!({
            "level": null, "points": null, "tags": null, "accuracy": null, "user": null
        }))
        .expect("decode");
        assert_eq!(p.level, 0);
        assert_eq!(p.points, 0);
        assert!(p.tags.is_empty());
        assert_eq!(p.accuracy, None);
        assert_eq!(p.user, "Anonymous");
    }

    #[test]
    fn missing_fields_read_as_defaults() {
        let p = read(json!({})).expect("decode");
        assert_eq!(p.level, 0);
        assert_eq!(p.user, "Anonymous");
    }

    #[test]
    fn floats_round_to_whole_numbers() {
        let p = read(json!({"level": 42.6, "points": 119.4})).expect("decode");
        assert_eq!(p.level, 43);
        assert_eq!(p.points, 119);
    }

    #[test]
    fn whole_rejects_values_outside_the_target_type() {
        assert!(read(json!({"level": 300})).is_err());
        assert!(read(json!({"level": -1})).is_err());
        assert!(read(json!({"level": "high"})).is_err());
    }

    #[test]
    fn percent_rounds_and_clamps() {
        assert_eq!(read(json!({"accuracy": 87.5})).expect("decode").accuracy, Some(88));
        assert_eq!(read(json!({"accuracy": 140})).expect("decode").accuracy, Some(100));
        assert_eq!(read(json!({"accuracy": -3})).expect("decode").accuracy, Some(0));
        assert_eq!(read(json!({"accuracy": "n/a"})).expect("decode").accuracy, None);
    }

    #[test]
    fn empty_name_is_anonymous() {
        assert_eq!(read(json!({"user": ""})).expect("decode").user, "Anonymous");
        assert_eq!(read(json!({"user": "Asha"})).expect("decode").user, "Asha");
    }

    #[test]
    fn non_numeric_instant_is_absent() {
        assert_eq!(read(json!({"seen": 17})).expect("decode").seen, Some(17));
        assert_eq!(read(json!({"seen": {"seconds": 1}})).expect("decode").seen, None);
    }
}

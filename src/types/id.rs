// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Attempt IDs are derived from the target name and start time.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use thiserror::Error;

use super::TargetName;

/// Marker types for phantom type parameters.
/// Using empty enums prevents instantiation and requires no trait bounds.
pub enum AttemptMarker {}

/// A type-safe identifier that prevents accidental mixing of different ID types.
#[must_use = "IDs reference persisted records and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: String) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

// Manual trait implementations that don't require T to implement the trait.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Id").field("value", &self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type AttemptId = Id<AttemptMarker>;

const ATTEMPT_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Error)]
#[error("invalid attempt id '{id}' (expected {target}-<YYYYMMDDTHHMMSSmmmZ>)")]
pub struct InvalidAttemptId {
    id: String,
    target: String,
}

impl Id<AttemptMarker> {
    /// Build an attempt ID like `web-prod-20261018T101500123Z`.
    ///
    /// IDs sort lexicographically in start order for a given target.
    pub fn generate(target: &TargetName, started_at: DateTime<Utc>) -> Self {
        Self::new(format!(
            "{}-{}",
            target,
            started_at.format(ATTEMPT_TIME_FORMAT)
        ))
    }

    /// Accept an externally supplied ID only if it names an attempt of `target`.
    pub fn parse(target: &TargetName, raw: &str) -> Result<Self, InvalidAttemptId> {
        let well_formed = raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && raw
                .strip_prefix(target.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|stamp| {
                    NaiveDateTime::parse_from_str(stamp, ATTEMPT_TIME_FORMAT).is_ok()
                });
        if well_formed {
            Ok(Self::new(raw.to_string()))
        } else {
            Err(InvalidAttemptId {
                id: raw.to_string(),
                target: target.to_string(),
            })
        }
    }
}

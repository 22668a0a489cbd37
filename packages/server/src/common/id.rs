//! Typed UUID identifiers.
//!
//! `Id<T, V>` wraps a `Uuid` and tags it with the entity it identifies, so an
//! execution ID can never be passed where a run ID is expected. `V` selects
//! how new values are generated: [`V7`] (time-ordered) or [`V4`] (random).
//!
//! ```rust,ignore
//! let execution = ExecutionId::new();
//! let run = RunId::new();
//! // let wrong: RunId = execution; // does not compile
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// Time-ordered UUIDs. Newer IDs sort after older ones.
pub struct V7;

/// Random UUIDs.
pub struct V4;

#[repr(transparent)]
pub struct Id<T, V = V7>(Uuid, PhantomData<fn() -> (T, V)>);

impl<T> Id<T, V7> {
    pub fn new() -> Self {
        Self(Uuid::now_v7(), PhantomData)
    }
}

impl<T> Default for Id<T, V7> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Id<T, V4> {
    pub fn new() -> Self {
        Self(Uuid::new_v4(), PhantomData)
    }
}

impl<T> Default for Id<T, V4> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Id<T, V> {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from the hyphenated string form used in query parameters.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?, PhantomData))
    }
}

impl<T, V> Clone for Id<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Id<T, V> {}

impl<T, V> Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("?");
        write!(f, "{}Id({})", entity, self.0)
    }
}

impl<T, V> Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T, V> PartialEq for Id<T, V> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T, V> Eq for Id<T, V> {}

impl<T, V> Hash for Id<T, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T, V> FromStr for Id<T, V> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T, V> Serialize for Id<T, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T, V> Deserialize<'de> for Id<T, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Batch;
    type BatchId = Id<Batch>;
    type RandomBatchId = Id<Batch, V4>;

    #[test]
    fn v7_ids_are_time_ordered() {
        let first = BatchId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = BatchId::new();
        assert!(first.as_uuid() < second.as_uuid());
    }

    #[test]
    fn v4_ids_are_random() {
        assert_eq!(RandomBatchId::new().as_uuid().get_version_num(), 4);
        assert_ne!(RandomBatchId::new(), RandomBatchId::new());
    }

    #[test]
    fn parse_accepts_display_output() {
        let id = BatchId::new();
        assert_eq!(BatchId::parse(&id.to_string()).unwrap(), id);
        assert!(BatchId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn serializes_as_plain_uuid_string() {
        let id = BatchId::new();
        assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(id.to_string()));
    }

    #[test]
    fn debug_names_the_entity() {
        assert!(format!("{:?}", BatchId::new()).starts_with("BatchId("));
    }
}

//! The fully-qualified name operations run against: a database plus a collection.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A database name paired with a collection name, as sent in a command's `$db` field and
/// collection-name argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let db = parts.next()?;
        let coll = parts.collect::<Vec<_>>().join(".");
        if coll.is_empty() {
            return None;
        }
        Some(Self {
            db: db.to_string(),
            coll,
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).ok_or_else(|| D::Error::custom("missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn displays_as_dotted_name() {
        let ns = Namespace::new("test", "coll");
        assert_eq!(ns.to_string(), "test.coll");
    }

    #[test]
    fn deserializes_from_dotted_string() {
        let ns: Namespace = crate::bson::from_bson(crate::bson::Bson::String("test.coll".into())).unwrap();
        assert_eq!(ns, Namespace::new("test", "coll"));
    }
}

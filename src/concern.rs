//! Read concerns and write concerns: the consistency/durability knobs attached to operations and,
//! as defaults, to the client itself.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::error::{Error, ErrorKind, Result};

/// The consistency and isolation level a read operation is performed with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadConcern {
    pub level: ReadConcernLevel,
}

impl ReadConcern {
    pub fn majority() -> Self {
        ReadConcernLevel::Majority.into()
    }

    pub fn local() -> Self {
        ReadConcernLevel::Local.into()
    }

    pub fn linearizable() -> Self {
        ReadConcernLevel::Linearizable.into()
    }

    pub fn available() -> Self {
        ReadConcernLevel::Available.into()
    }

    pub fn snapshot() -> Self {
        ReadConcernLevel::Snapshot.into()
    }

    pub fn custom(level: impl AsRef<str>) -> Self {
        ReadConcernLevel::from_str(level.as_ref()).into()
    }
}

impl From<ReadConcernLevel> for ReadConcern {
    fn from(level: ReadConcernLevel) -> Self {
        Self { level }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Linearizable,
    Available,
    Snapshot,
    /// Forward-compatibility escape hatch for read concern levels added after this crate.
    Custom(String),
}

impl ReadConcernLevel {
    pub(crate) fn from_str(s: &str) -> Self {
        match s {
            "local" => ReadConcernLevel::Local,
            "majority" => ReadConcernLevel::Majority,
            "linearizable" => ReadConcernLevel::Linearizable,
            "available" => ReadConcernLevel::Available,
            "snapshot" => ReadConcernLevel::Snapshot,
            s => ReadConcernLevel::Custom(s.to_string()),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            ReadConcernLevel::Local => "local",
            ReadConcernLevel::Majority => "majority",
            ReadConcernLevel::Linearizable => "linearizable",
            ReadConcernLevel::Available => "available",
            ReadConcernLevel::Snapshot => "snapshot",
            ReadConcernLevel::Custom(ref s) => s,
        }
    }
}

impl Serialize for ReadConcernLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReadConcernLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ReadConcernLevel::from_str(&s))
    }
}

/// The level of acknowledgement requested from the server for a write.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct WriteConcern {
    pub w: Option<Acknowledgment>,

    #[serde(
        rename = "wtimeout",
        serialize_with = "crate::serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "crate::serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub w_timeout: Option<Duration>,

    #[serde(rename = "j")]
    pub journal: Option<bool>,
}

impl WriteConcern {
    pub fn nodes(v: u32) -> Self {
        Acknowledgment::Nodes(v).into()
    }

    pub fn majority() -> Self {
        Acknowledgment::Majority.into()
    }

    pub fn custom(s: impl AsRef<str>) -> Self {
        Acknowledgment::from(s.as_ref()).into()
    }

    pub(crate) fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(Error::new(ErrorKind::InvalidArgument {
                message: "write concern cannot have w=0 and j=true".into(),
            }));
        }
        Ok(())
    }
}

impl From<Acknowledgment> for WriteConcern {
    fn from(w: Acknowledgment) -> Self {
        WriteConcern {
            w: Some(w),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// Acknowledgement from the given number of nodes. `0` is unacknowledged and unsupported by
    /// this crate's operation executor; it is rejected in [`WriteConcern::validate`] only in
    /// combination with `journal: true`, matching the upstream write-concern spec's one
    /// explicitly invalid combination.
    Nodes(u32),
    Majority,
    /// A custom write concern tag set name.
    Custom(String),
}

impl Serialize for Acknowledgment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Acknowledgment::Majority => serializer.serialize_str("majority"),
            Acknowledgment::Nodes(n) => serializer.serialize_u32(*n),
            Acknowledgment::Custom(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Acknowledgment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IntOrString {
            Int(u32),
            String(String),
        }
        match IntOrString::deserialize(deserializer)? {
            IntOrString::String(s) => Ok(s.into()),
            IntOrString::Int(i) => Ok(i.into()),
        }
    }
}

impl From<u32> for Acknowledgment {
    fn from(i: u32) -> Self {
        Acknowledgment::Nodes(i)
    }
}

impl From<&str> for Acknowledgment {
    fn from(s: &str) -> Self {
        if s == "majority" {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Custom(s.to_string())
        }
    }
}

impl From<String> for Acknowledgment {
    fn from(s: String) -> Self {
        Acknowledgment::from(s.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn majority_write_concern_is_acknowledged() {
        assert!(WriteConcern::majority().is_acknowledged());
    }

    #[test]
    fn w_zero_with_journal_is_invalid() {
        let wc = WriteConcern {
            w: Some(Acknowledgment::Nodes(0)),
            journal: Some(true),
            ..Default::default()
        };
        assert!(wc.validate().is_err());
    }

    #[test]
    fn custom_read_concern_level_round_trips_through_str() {
        let rc = ReadConcern::custom("majority");
        assert_eq!(rc.level, ReadConcernLevel::Majority);
        let rc2 = ReadConcern::custom("linearizableButWeird");
        assert!(matches!(rc2.level, ReadConcernLevel::Custom(_)));
    }
}

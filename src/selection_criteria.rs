//! Describes which servers in a topology are suitable for a given operation: either a read
//! preference (mode, tag sets, max staleness) or an arbitrary predicate over server metadata.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use derivative::Derivative;

use crate::bson::{Bson, Document};
use crate::error::{Error, ErrorKind, Result};
use crate::options::ServerAddress;
use crate::sdam::ServerInfo;

/// Describes which servers are suitable for a given operation.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum SelectionCriteria {
    ReadPreference(ReadPreference),
    /// An arbitrary filter over candidate servers, used internally to pin an operation to a
    /// specific address (e.g. a getMore bound to the server that opened its cursor).
    Predicate(#[derivative(Debug = "ignore")] Predicate),
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ReadPreference(a), Self::ReadPreference(b)) => a == b,
            (Self::Predicate(a), Self::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    pub fn as_read_pref(&self) -> Option<&ReadPreference> {
        match self {
            Self::ReadPreference(rp) => Some(rp),
            Self::Predicate(..) => None,
        }
    }

    pub fn is_read_pref_primary(&self) -> bool {
        matches!(self, Self::ReadPreference(ReadPreference::Primary))
    }

    pub fn max_staleness(&self) -> Option<Duration> {
        self.as_read_pref().and_then(|p| p.max_staleness())
    }

    /// Builds a predicate-based criteria pinning selection to a single address, used to bind a
    /// getMore (or a resumed change-stream aggregate) to the server that owns its cursor.
    pub fn from_address(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |server: &ServerInfo| {
            server.address() == &address
        }))
    }
}

pub type Predicate = Arc<dyn Send + Sync + Fn(&ServerInfo) -> bool>;

/// How the driver routes a read operation to members of a replica set (or a sharded cluster's
/// mongos).
#[derive(Clone, Debug, PartialEq)]
pub enum ReadPreference {
    Primary,
    Secondary {
        tag_sets: Option<Vec<TagSet>>,
        max_staleness: Option<Duration>,
    },
    PrimaryPreferred {
        tag_sets: Option<Vec<TagSet>>,
        max_staleness: Option<Duration>,
    },
    SecondaryPreferred {
        tag_sets: Option<Vec<TagSet>>,
        max_staleness: Option<Duration>,
    },
    Nearest {
        tag_sets: Option<Vec<TagSet>>,
        max_staleness: Option<Duration>,
    },
}

impl ReadPreference {
    pub fn max_staleness(&self) -> Option<Duration> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::Secondary { max_staleness, .. }
            | ReadPreference::PrimaryPreferred { max_staleness, .. }
            | ReadPreference::SecondaryPreferred { max_staleness, .. }
            | ReadPreference::Nearest { max_staleness, .. } => *max_staleness,
        }
    }

    pub fn tag_sets(&self) -> Option<&[TagSet]> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::Secondary { tag_sets, .. }
            | ReadPreference::PrimaryPreferred { tag_sets, .. }
            | ReadPreference::SecondaryPreferred { tag_sets, .. }
            | ReadPreference::Nearest { tag_sets, .. } => tag_sets.as_deref(),
        }
    }

    pub fn with_tags(self, tag_sets: Vec<TagSet>) -> Result<Self> {
        let tag_sets = Some(tag_sets);
        match self {
            ReadPreference::Primary => Err(Error::new(ErrorKind::InvalidArgument {
                message: "read preference tags can only be specified for a non-primary mode"
                    .into(),
            })),
            ReadPreference::Secondary { max_staleness, .. } => Ok(ReadPreference::Secondary {
                tag_sets,
                max_staleness,
            }),
            ReadPreference::PrimaryPreferred { max_staleness, .. } => {
                Ok(ReadPreference::PrimaryPreferred {
                    tag_sets,
                    max_staleness,
                })
            }
            ReadPreference::SecondaryPreferred { max_staleness, .. } => {
                Ok(ReadPreference::SecondaryPreferred {
                    tag_sets,
                    max_staleness,
                })
            }
            ReadPreference::Nearest { max_staleness, .. } => Ok(ReadPreference::Nearest {
                tag_sets,
                max_staleness,
            }),
        }
    }

    pub fn with_max_staleness(self, max_staleness: Duration) -> Result<Self> {
        let max_staleness = Some(max_staleness);
        match self {
            ReadPreference::Primary => Err(Error::new(ErrorKind::InvalidArgument {
                message: "max staleness can only be specified for a non-primary mode".into(),
            })),
            ReadPreference::Secondary { tag_sets, .. } => Ok(ReadPreference::Secondary {
                tag_sets,
                max_staleness,
            }),
            ReadPreference::PrimaryPreferred { tag_sets, .. } => {
                Ok(ReadPreference::PrimaryPreferred {
                    tag_sets,
                    max_staleness,
                })
            }
            ReadPreference::SecondaryPreferred { tag_sets, .. } => {
                Ok(ReadPreference::SecondaryPreferred {
                    tag_sets,
                    max_staleness,
                })
            }
            ReadPreference::Nearest { tag_sets, .. } => Ok(ReadPreference::Nearest {
                tag_sets,
                max_staleness,
            }),
        }
    }

    /// The `$readPreference` document sent alongside a command when it isn't implied by the mode
    /// (e.g. a secondaryPreferred query against a sharded cluster).
    pub fn into_document(self) -> Document {
        let (mode, tag_sets, max_staleness) = match self {
            ReadPreference::Primary => ("primary", None, None),
            ReadPreference::PrimaryPreferred {
                tag_sets,
                max_staleness,
            } => ("primaryPreferred", tag_sets, max_staleness),
            ReadPreference::Secondary {
                tag_sets,
                max_staleness,
            } => ("secondary", tag_sets, max_staleness),
            ReadPreference::SecondaryPreferred {
                tag_sets,
                max_staleness,
            } => ("secondaryPreferred", tag_sets, max_staleness),
            ReadPreference::Nearest {
                tag_sets,
                max_staleness,
            } => ("nearest", tag_sets, max_staleness),
        };

        let mut doc = Document::new();
        doc.insert("mode", mode);

        if let Some(max_stale) = max_staleness {
            doc.insert("maxStalenessSeconds", max_stale.as_secs() as i64);
        }

        if let Some(tag_sets) = tag_sets {
            let tags: Vec<Bson> = tag_sets
                .into_iter()
                .map(|tag_set| {
                    Bson::Document(tag_set.into_iter().map(|(k, v)| (k, Bson::String(v))).collect())
                })
                .collect();
            doc.insert("tags", tags);
        }

        doc
    }
}

/// A read preference tag set: all tags in the set must match a server's own tags for it to be
/// considered.
pub type TagSet = HashMap<String, String>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags_rejected_on_primary_mode() {
        assert!(ReadPreference::Primary.with_tags(vec![]).is_err());
    }

    #[test]
    fn into_document_includes_mode_and_staleness() {
        let pref = ReadPreference::SecondaryPreferred {
            tag_sets: None,
            max_staleness: Some(Duration::from_secs(90)),
        };
        let doc = pref.into_document();
        assert_eq!(doc.get_str("mode"), Some("secondaryPreferred"));
        assert_eq!(doc.get_i64("maxStalenessSeconds"), Some(90));
    }
}

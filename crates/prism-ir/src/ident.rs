// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record identifiers.

use std::fmt;
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Prefix marking identifiers synthesized on the client rather than supplied
/// by the server.
const CLIENT_PREFIX: &str = "client:";

/// Identifier of the root record: the entry point every operation's root
/// selections are normalized under and read from.
pub const ROOT_ID: &str = "client:root";

/// Typename recorded on the root record.
pub const ROOT_TYPE: &str = "__Root";

/// Identifier of the well-known viewer record
/// (`make_client_id(ROOT_ID, "viewer", None)`).
pub const VIEWER_ID: &str = "client:root:viewer";

/// Opaque interned identifier for a normalized record.
///
/// Ids are cheap to clone (`Arc<str>`), totally ordered so id-keyed maps
/// iterate deterministically, and hashable for the hot intersection sets used
/// by publish/notify.
///
/// Invariants
/// - An id never changes for the lifetime of the record it names.
/// - Ids starting with `client:` were synthesized by the normalizer (or are
///   one of the well-known roots) and never round-trip to a server.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataId(Arc<str>);

impl DataId {
    /// Returns the textual form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id was synthesized on the client.
    #[must_use]
    pub fn is_client(&self) -> bool {
        self.0.starts_with(CLIENT_PREFIX)
    }

    /// The root record id.
    #[must_use]
    pub fn root() -> Self {
        Self::from(ROOT_ID)
    }

    /// The viewer record id.
    #[must_use]
    pub fn viewer() -> Self {
        Self::from(VIEWER_ID)
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for DataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({:?})", &*self.0)
    }
}

impl Serialize for DataId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DataId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Synthesizes a stable client id for a record the server did not identify.
///
/// The id is positional: `parent:storageKey` for singular links and
/// `parent:storageKey:i` for the `i`-th element of a plural link. Ids are
/// prefixed with `client:` exactly once, so nesting under an already-client
/// parent does not stack prefixes.
pub fn make_client_id(parent: &DataId, storage_key: &str, index: Option<usize>) -> DataId {
    let mut key = format!("{parent}:{storage_key}");
    if let Some(i) = index {
        key.push(':');
        key.push_str(&i.to_string());
    }
    if key.starts_with(CLIENT_PREFIX) {
        DataId::from(key)
    } else {
        DataId::from(format!("{CLIENT_PREFIX}{key}"))
    }
}

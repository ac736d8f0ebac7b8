//! Typed ids.
//!
//! The PEARL API issues integer ids for every stored resource; the wrappers
//! keep a project id from being passed where a checkpoint id is expected.
//! They serialize as bare JSON numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(
    /// Identifier of a project.
    ProjectId
);
typed_id!(
    /// Identifier of a provisioned GPU instance.
    InstanceId
);
typed_id!(
    /// Identifier of a saved checkpoint.
    CheckpointId
);
typed_id!(
    /// Identifier of a base model.
    ModelId
);
typed_id!(
    /// Identifier of a stored AOI.
    AoiId
);
typed_id!(
    /// Server-issued identifier of an AOI patch.
    PatchId
);

/// Client-side key for an AOI patch submitted but not yet acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchRequestId(uuid::Uuid);

impl PatchRequestId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PatchRequestId {
    fn default() -> Self {
        Self::new_v4()
    }
}

impl fmt::Display for PatchRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

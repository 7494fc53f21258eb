//! Opaque string identifiers.
//!
//! Session and event ids are minted here. Job and workflow ids usually come
//! from a collaborator and are carried through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, generated) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            /// Mints a fresh UUID v4 value.
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

string_id!(
    /// A recording session, minted on `start_session`.
    SessionId,
    generated
);
string_id!(
    /// An emitted event.
    EventId,
    generated
);
string_id!(
    /// Handle the processing pipeline hands back for a submitted job.
    JobId,
    generated
);
string_id!(
    /// Document id on the real path, template-derived id when synthesized.
    WorkflowId
);

/// Per-session monotonic event sequence number. The first event of a session is 1.
pub type SeqNo = u64;

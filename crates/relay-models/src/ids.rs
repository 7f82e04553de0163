//! Type-safe ID wrappers.
//!
//! IDs look like `work-1760000000000_3f9a1c2` (prefix, creation time in
//! milliseconds, random suffix) so that they sort roughly by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new time-ordered random ID.
            pub fn new() -> Self {
                Self(format!("{}-{}", $prefix, timestamped_suffix()))
            }

            /// Wraps an existing string (deserialization, tests, wire input).
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

fn timestamped_suffix() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &random[..7]
    )
}

define_id!(WorkId, "work");
define_id!(ResponseId, "resp");
define_id!(ConversationId, "conv");
define_id!(JobId, "job");

//! Strongly-typed identifiers used across the registry and message layer.
//!
//! Container and application identities are opaque uuids carried verbatim
//! on the wire; client identities are the routing-frame bytes ZeroMQ-style
//! ROUTER sockets prepend to each request, treated as opaque strings here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a strongly-typed newtype id wrapping a `String`.
///
/// `uuid` variant adds a `new()` constructor (uuid v4) and `Default`;
/// without it, callers must construct via `from_string`/`parse`.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn parse(s: impl Into<String>) -> crate::types::Result<Self> {
                let s = s.into();
                if s.is_empty() {
                    return Err(crate::types::Error::schema_violation(concat!(
                        stringify!($name),
                        " cannot be empty"
                    )));
                }
                Ok(Self(s))
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
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: impl Into<String>) -> crate::types::Result<Self> {
                let s = s.into();
                if s.is_empty() {
                    return Err(crate::types::Error::schema_violation(concat!(
                        stringify!($name),
                        " cannot be empty"
                    )));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ContainerId, uuid);
define_id!(ApplicationId, uuid);
define_id!(ClientId);

/// A process id as reported by the operating system. Not a uuid — a raw
/// numeric handle, newtyped so it can't be confused with a byte count or a
/// resource count at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(v: u32) -> Self {
        Pid(v)
    }
}

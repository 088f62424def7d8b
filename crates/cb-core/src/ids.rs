//! Typed ID wrappers providing compile-time safety for entity identifiers.
//!
//! Platform-owned entities (courses, users, videos...) use UUID newtypes.
//! Provider records are keyed by the integer ids the administrative side
//! assigns, and job messages carry those integers on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a newtype ID wrapper over `Uuid`.
///
/// The macro produces a struct with:
/// - `new()` to create a random v4 UUID
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Serialize`, `Deserialize`
/// - `Display` and `FromStr` delegating to the inner UUID
/// - `From<Uuid>` and `Into<Uuid>` conversions
/// - `Default` that generates a new random ID
macro_rules! typed_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Create a new random ID.
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
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

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }

            impl From<Uuid> for $name {
                fn from(uuid: Uuid) -> Self {
                    Self(uuid)
                }
            }

            impl From<$name> for Uuid {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

/// Generate a newtype ID wrapper over an `i64` row id.
macro_rules! row_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(i64);

            impl $name {
                /// Return the raw row id.
                #[must_use]
                pub fn get(self) -> i64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = std::num::ParseIntError;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    s.trim().parse::<i64>().map(Self)
                }
            }

            impl From<i64> for $name {
                fn from(id: i64) -> Self {
                    Self(id)
                }
            }

            impl From<$name> for i64 {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

typed_id! {
    /// Unique identifier for a canonical course.
    CourseId,
    /// Unique identifier for a canonical user.
    UserId,
    /// Unique identifier for a progress milestone.
    MilestoneId,
    /// Unique identifier for a per-day activity record.
    ActivityId,
    /// Unique identifier for an open-content library.
    LibraryId,
    /// Unique identifier for an imported video.
    VideoId,
}

row_id! {
    /// Row id of a provider platform (the LMS credential record).
    ProviderId,
    /// Row id of an open-content provider (Kiwix, YouTube).
    ContentProviderId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_id_unique() {
        let a = CourseId::new();
        let b = CourseId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn course_id_display_and_parse() {
        let id = CourseId::new();
        let s = id.to_string();
        let parsed: CourseId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn provider_id_parse_trims() {
        let id: ProviderId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn provider_id_serializes_as_number() {
        let json = serde_json::to_string(&ProviderId::from(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn user_id_serializes_as_string() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}

//! Identity and ordering types for memberlink.

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| TypesError::InvalidId {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_string()[..8])
            }
        }
    };
}

uuid_id!(
    /// A user that can hold team and channel memberships.
    UserId,
    "user"
);
uuid_id!(
    /// A team; the top tier of the membership hierarchy.
    TeamId,
    "team"
);
uuid_id!(
    /// A channel; always owned by exactly one team.
    ChannelId,
    "channel"
);
uuid_id!(
    /// An externally provisioned group (e.g. a directory group).
    GroupId,
    "group"
);

/// A point in time used to bound the grant resolver's change window.
///
/// Milliseconds since the Unix epoch. The engine never persists a
/// watermark; the caller tracks the last successful run.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Watermark(i64);

impl Watermark {
    /// Create a watermark from milliseconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::NegativeWatermark`] for values below zero.
    pub fn new(millis: i64) -> Result<Self, TypesError> {
        if millis < 0 {
            return Err(TypesError::NegativeWatermark(millis));
        }
        Ok(Self(millis))
    }

    /// The epoch: every group membership is newer than this.
    pub fn zero() -> Self {
        Self(0)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Self(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)))
            .unwrap_or_default()
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Watermark {
    type Error = TypesError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Watermark> for i64 {
    fn from(value: Watermark) -> Self {
        value.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watermark({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parses_own_display() {
        let original = TeamId::new();
        let restored: TeamId = original.to_string().parse().unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn id_rejects_garbage() {
        let err = "not-a-uuid".parse::<ChannelId>().unwrap_err();
        assert_eq!(
            err,
            TypesError::InvalidId {
                kind: "channel",
                value: "not-a-uuid".into()
            }
        );
    }

    #[test]
    fn id_debug_is_short() {
        let id = UserId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("UserId("));
        assert_eq!(debug.len(), "UserId(".len() + 8 + 1);
    }

    #[test]
    fn id_serializes_as_plain_string() {
        let id = GroupId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn watermark_rejects_negative() {
        assert_eq!(
            Watermark::new(-1),
            Err(TypesError::NegativeWatermark(-1))
        );
        assert_eq!(Watermark::new(0).unwrap(), Watermark::zero());
    }

    #[test]
    fn watermark_ordering() {
        let w1 = Watermark::new(100).unwrap();
        let w2 = Watermark::new(200).unwrap();
        assert!(w1 < w2);
    }

    #[test]
    fn watermark_now_is_after_epoch() {
        assert!(Watermark::now() > Watermark::zero());
    }

    #[test]
    fn watermark_deserialize_validates() {
        let ok: Watermark = serde_json::from_str("1500").unwrap();
        assert_eq!(ok.as_millis(), 1500);
        assert!(serde_json::from_str::<Watermark>("-3").is_err());
    }
}

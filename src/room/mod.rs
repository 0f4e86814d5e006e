//! Room and participant identifiers.
//!
//! A room is never stored on its own: it exists only as the scope under which
//! participant records are written, so the types here are pure values.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_ROOM_NAME: &str = "Meeting";
pub const NEW_ROOM_NAME: &str = "New Meeting";

/// ASCII digits only.
const ROOM_ID_PATTERN: &str = r"^[0-9]{3}-[0-9]{3}-[0-9]{3}$";

fn room_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ROOM_ID_PATTERN).expect("room id pattern is valid"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("Meeting ID required")]
    Empty,
    #[error("Invalid Meeting ID format '{0}' (expected e.g. 123-456-789)")]
    Malformed(String),
}

/// Shareable room code in `DDD-DDD-DDD` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh id from three independent zero-padded groups.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let a: u16 = rng.gen_range(0..1000);
        let b: u16 = rng.gen_range(0..1000);
        let c: u16 = rng.gen_range(0..1000);
        Self(format!("{a:03}-{b:03}-{c:03}"))
    }

    /// Validate a user-typed code. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, RoomIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if !room_id_regex().is_match(trimmed) {
            return Err(RoomIdError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Wrap an id this client created itself. Not validated.
    pub fn trusted(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        room_id_regex().is_match(&self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room id plus the display name shown in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
}

impl RoomInfo {
    pub fn new(id: RoomId, name: Option<String>) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_ROOM_NAME.to_string());
        Self { id, name }
    }

    /// A room this client is creating: generated id, "New Meeting" unless named.
    pub fn create(name: Option<String>) -> Self {
        Self::new(
            RoomId::generate(),
            Some(name.unwrap_or_else(|| NEW_ROOM_NAME.to_string())),
        )
    }
}

/// Client-generated participant id, stable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// `user-<creation millis>`.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(format!("user-{millis}"))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_ids_always_match_pattern() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let id = RoomId::generate_with(&mut rng);
            assert!(id.is_well_formed(), "bad id: {id}");
        }
        for _ in 0..100 {
            assert!(RoomId::generate().is_well_formed());
        }
    }

    #[test]
    fn test_parse_accepts_valid_code() {
        let id = RoomId::parse("  123-456-789 ").unwrap();
        assert_eq!(id.as_str(), "123-456-789");
    }

    #[test]
    fn test_parse_rejects_malformed_codes() {
        assert_eq!(RoomId::parse("   "), Err(RoomIdError::Empty));
        for bad in [
            "12-456-789",
            "123456789",
            "abc-def-ghi",
            "123-456-7890",
            "123-456-789x",
            "١٢٣-٤٥٦-٧٨٩",
            "１２３-４５６-７８９",
        ] {
            assert!(
                matches!(RoomId::parse(bad), Err(RoomIdError::Malformed(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_trusted_id_is_not_validated() {
        let id = RoomId::trusted("my-room");
        assert_eq!(id.as_str(), "my-room");
        assert!(!id.is_well_formed());
    }

    #[test]
    fn test_room_info_name_defaults() {
        let info = RoomInfo::new(RoomId::trusted("1"), None);
        assert_eq!(info.name, "Meeting");
        let info = RoomInfo::new(RoomId::trusted("1"), Some("  ".to_string()));
        assert_eq!(info.name, "Meeting");
        let info = RoomInfo::create(None);
        assert_eq!(info.name, "New Meeting");
        assert!(info.id.is_well_formed());
    }

    #[test]
    fn test_participant_id_format() {
        let id = ParticipantId::generate();
        assert!(id.as_str().starts_with("user-"));
        assert!(id.as_str()["user-".len()..].parse::<u128>().is_ok());
    }
}

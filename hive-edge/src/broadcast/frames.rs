//! Broadcast topics and typed frames
//!
//! Topics are `playlist/{id}` and `hive/{id}/presence`; STOMP-style
//! destinations (`/topic/...` to receive, `/app/...` to send) map onto the
//! same topic space.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named real-time channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Playlist(String),
    HivePresence(String),
}

impl Topic {
    /// Parse a bare topic name (`playlist/42`, `hive/7/presence`)
    pub fn parse(name: &str) -> Option<Self> {
        let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["playlist", id] => Some(Self::Playlist((*id).to_string())),
            ["hive", id, "presence"] => Some(Self::HivePresence((*id).to_string())),
            _ => None,
        }
    }

    /// Parse a STOMP-style destination (`/topic/playlist/42`, `/app/hive/7/presence`)
    pub fn from_destination(destination: &str) -> Option<Self> {
        let rest = destination
            .strip_prefix("/topic/")
            .or_else(|| destination.strip_prefix("/app/"))?;
        Self::parse(rest)
    }

    /// Canonical topic name used as the pub/sub key
    pub fn name(&self) -> String {
        match self {
            Self::Playlist(id) => format!("playlist/{}", id),
            Self::HivePresence(id) => format!("hive/{}/presence", id),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Typed frames carried on broadcast topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all_fields = "camelCase")]
pub enum Frame {
    TrackAdded {
        track_id: String,
        title: String,
        added_by: String,
    },
    TrackRemoved {
        track_id: String,
        removed_by: String,
    },
    TrackReordered {
        track_id: String,
        from_position: usize,
        to_position: usize,
        moved_by: String,
    },
    UserJoined {
        user_id: String,
    },
    UserLeft {
        user_id: String,
    },
    PermissionDenied {
        action: String,
        reason: String,
    },
}

impl Frame {
    /// Short action label, used in permission checks and denial frames
    pub fn action(&self) -> &'static str {
        match self {
            Self::TrackAdded { .. } => "TRACK_ADDED",
            Self::TrackRemoved { .. } => "TRACK_REMOVED",
            Self::TrackReordered { .. } => "TRACK_REORDERED",
            Self::UserJoined { .. } => "USER_JOINED",
            Self::UserLeft { .. } => "USER_LEFT",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parsing() {
        assert_eq!(
            Topic::parse("playlist/42"),
            Some(Topic::Playlist("42".to_string()))
        );
        assert_eq!(
            Topic::parse("hive/7/presence"),
            Some(Topic::HivePresence("7".to_string()))
        );
        assert_eq!(Topic::parse("hive/7"), None);
        assert_eq!(Topic::parse("forum/1"), None);
        assert_eq!(Topic::parse(""), None);
    }

    #[test]
    fn test_destination_parsing() {
        assert_eq!(
            Topic::from_destination("/topic/playlist/42"),
            Some(Topic::Playlist("42".to_string()))
        );
        assert_eq!(
            Topic::from_destination("/app/hive/7/presence"),
            Some(Topic::HivePresence("7".to_string()))
        );
        assert_eq!(Topic::from_destination("playlist/42"), None);
        assert_eq!(Topic::from_destination("/queue/playlist/42"), None);
    }

    #[test]
    fn test_topic_name_roundtrip() {
        for name in ["playlist/42", "hive/7/presence"] {
            assert_eq!(Topic::parse(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::TrackAdded {
            track_id: "t-1".to_string(),
            title: "Focus Beats".to_string(),
            added_by: "user-1".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "TRACK_ADDED");
        assert_eq!(json["trackId"], "t-1");
        assert_eq!(json["addedBy"], "user-1");

        let parsed: Frame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_permission_denied_shape() {
        let frame = Frame::PermissionDenied {
            action: "TRACK_REMOVED".to_string(),
            reason: "not an editor".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "PERMISSION_DENIED");
        assert_eq!(json["action"], "TRACK_REMOVED");
    }

    #[test]
    fn test_frame_actions() {
        assert_eq!(
            Frame::UserJoined {
                user_id: "u".to_string()
            }
            .action(),
            "USER_JOINED"
        );
        assert_eq!(
            Frame::TrackReordered {
                track_id: "t".to_string(),
                from_position: 0,
                to_position: 2,
                moved_by: "u".to_string(),
            }
            .action(),
            "TRACK_REORDERED"
        );
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or transmitted enum tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Implements `as_str` / `FromStr` / `Display` for a fieldless enum so the
/// same tags are used in SQLite columns and on the wire.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitnessLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

string_enum!(FitnessLevel {
    Beginner => "beginner",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub fitness_level: FitnessLevel,
    pub interests: Vec<String>,
    pub onboarded: bool,
    pub created_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

string_enum!(ConversationKind {
    Direct => "direct",
    Group => "group",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub sender_id: Uuid,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
}

/// A direct or group thread as seen by one member. `unread_count`, `pinned`
/// and `muted` are per-member values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: String,
    pub participants: Vec<Uuid>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub pinned: bool,
    pub muted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

string_enum!(MediaKind {
    Image => "image",
    Video => "video",
    File => "file",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Delivery status of a message. Ordered so a status can only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

string_enum!(DeliveryStatus {
    Sent => "sent",
    Delivered => "delivered",
    Read => "read",
});

impl DeliveryStatus {
    /// Forward-only transition: never moves a status backwards.
    pub fn advance(self, to: DeliveryStatus) -> DeliveryStatus {
        self.max(to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

const PREVIEW_LEN: usize = 80;

impl Message {
    /// Short summary used for conversation lists.
    pub fn preview(&self) -> String {
        match (&self.text, &self.media) {
            (Some(text), _) if !text.trim().is_empty() => {
                let text = text.trim();
                if text.chars().count() > PREVIEW_LEN {
                    let cut: String = text.chars().take(PREVIEW_LEN).collect();
                    format!("{}…", cut)
                } else {
                    text.to_string()
                }
            }
            (_, Some(media)) => format!("[{}]", media.kind),
            _ => String::new(),
        }
    }

    pub fn summary(&self) -> LastMessage {
        LastMessage {
            sender_id: self.sender_id,
            preview: self.preview(),
            timestamp: self.created_at,
        }
    }
}

/// True when a message body carries neither text nor media.
pub fn is_blank_content(text: Option<&str>, media: Option<&MediaDescriptor>) -> bool {
    text.is_none_or(|t| t.trim().is_empty()) && media.is_none()
}

// -- Goals --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalFrequency {
    Daily,
    Weekly,
}

string_enum!(GoalFrequency {
    Daily => "daily",
    Weekly => "weekly",
});

impl GoalFrequency {
    /// Key of the period a check-in on `date` counts towards. A goal accepts
    /// one check-in per period.
    pub fn period_key(&self, date: NaiveDate) -> String {
        match self {
            Self::Daily => date.format("%Y-%m-%d").to_string(),
            Self::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
}

string_enum!(GoalStatus {
    Active => "active",
    Completed => "completed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub frequency: GoalFrequency,
    pub target_check_ins: u32,
    pub completed_check_ins: u32,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub period: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Feed --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    pub like_count: u32,
    pub comment_count: u32,
    /// Whether the requesting user liked the post. Always false in broadcasts.
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Partners --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

string_enum!(ConnectionStatus {
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerConnection {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl PartnerConnection {
    /// The participant that is not `user_id`, or `None` if `user_id` is not
    /// part of this connection.
    pub fn other_party(&self, user_id: Uuid) -> Option<Uuid> {
        if self.requester_id == user_id {
            Some(self.recipient_id)
        } else if self.recipient_id == user_id {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerSuggestion {
    pub profile: UserProfile,
    pub shared_interests: Vec<String>,
}

// -- Leaderboard --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub check_ins: u32,
    pub completed_goals: u32,
    pub score: u32,
}

pub const COMPLETED_GOAL_BONUS: u32 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_never_regresses() {
        assert_eq!(DeliveryStatus::Read.advance(DeliveryStatus::Sent), DeliveryStatus::Read);
        assert_eq!(DeliveryStatus::Sent.advance(DeliveryStatus::Delivered), DeliveryStatus::Delivered);
    }

    #[test]
    fn weekly_period_groups_days_of_same_iso_week() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let next_monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let f = GoalFrequency::Weekly;
        assert_eq!(f.period_key(monday), f.period_key(sunday));
        assert_ne!(f.period_key(sunday), f.period_key(next_monday));
        assert_eq!(GoalFrequency::Daily.period_key(monday), "2026-10-12");
    }

    #[test]
    fn connection_status_uses_uppercase_tags() {
        assert_eq!(ConnectionStatus::Pending.as_str(), "PENDING");
        assert_eq!("ACCEPTED".parse::<ConnectionStatus>(), Ok(ConnectionStatus::Accepted));
        assert!("accepted".parse::<ConnectionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }

    #[test]
    fn blank_content_detection() {
        let media = MediaDescriptor {
            url: "https://cdn.example/run.jpg".into(),
            kind: MediaKind::Image,
            name: None,
        };
        assert!(is_blank_content(None, None));
        assert!(is_blank_content(Some("   "), None));
        assert!(!is_blank_content(Some("  "), Some(&media)));
        assert!(!is_blank_content(Some("hi"), None));
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Payload, RecordKind, default_anonymous, lenient};

/// Per-user karma document (`users/{uid}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKarma {
    #[serde(default, deserialize_with = "lenient::whole")]
    pub karma_points: i64,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub total_reports: u64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub achievements: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient::instant",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity: Option<i64>,
}

impl UserKarma {
    /// Document written the first time a signed-in user opens the karma view.
    #[must_use]
    pub fn initial(now_us: i64) -> Self {
        Self {
            karma_points: 0,
            total_reports: 0,
            achievements: vec![Achievement::FirstReport.as_str().to_string()],
            last_activity: Some(now_us),
        }
    }

    #[must_use]
    pub fn has(&self, achievement: Achievement) -> bool {
        self.achievements.iter().any(|a| a == achievement.as_str())
    }
}

impl Payload for UserKarma {
    const KIND: RecordKind = RecordKind::UserKarma;
}

/// Badges a user can unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstReport,
    PhotoReporter,
    QuickReporter,
    CommunityLeader,
}

impl Achievement {
    pub const ALL: [Self; 4] = [
        Self::FirstReport,
        Self::PhotoReporter,
        Self::QuickReporter,
        Self::CommunityLeader,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstReport => "first_report",
            Self::PhotoReporter => "photo_reporter",
            Self::QuickReporter => "quick_reporter",
            Self::CommunityLeader => "community_leader",
        }
    }

    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::FirstReport => "🥇",
            Self::PhotoReporter => "📸",
            Self::QuickReporter => "⚡",
            Self::CommunityLeader => "👑",
        }
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::FirstReport => "First Report",
            Self::PhotoReporter => "Photo Reporter",
            Self::QuickReporter => "Quick Reporter",
            Self::CommunityLeader => "Community Leader",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::FirstReport => "Submitted your first traffic report",
            Self::PhotoReporter => "Submitted 5 reports with photos",
            Self::QuickReporter => "Reported 3 issues in one day",
            Self::CommunityLeader => "Reach 500 karma points",
        }
    }
}

impl fmt::Display for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the server-maintained `leaderboard` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_anonymous", deserialize_with = "lenient::name")]
    pub user_name: String,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub karma_points: i64,
    #[serde(default, deserialize_with = "lenient::whole")]
    pub total_reports: u64,
    /// Verified-report accuracy in percent, rounded and clamped to 0..=100.
    #[serde(default, deserialize_with = "lenient::percent")]
    pub accuracy: Option<u8>,
    #[serde(default, deserialize_with = "lenient::instant")]
    pub last_activity: Option<i64>,
}

impl Default for LeaderboardEntry {
    fn default() -> Self {
        Self {
            user_id: None,
            user_name: default_anonymous(),
            karma_points: 0,
            total_reports: 0,
            accuracy: None,
            last_activity: None,
        }
    }
}

impl Payload for LeaderboardEntry {
    const KIND: RecordKind = RecordKind::LeaderboardEntry;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_decodes_to_zero_karma() {
        let karma = UserKarma::decode(&serde_json::Map::new()).expect("decode");
        assert_eq!(karma, UserKarma::default());
        assert_eq!(karma.karma_points, 0);
    }

    #[test]
    fn initial_document_grants_first_report() {
        let karma = UserKarma::initial(5);
        assert!(karma.has(Achievement::FirstReport));
        assert!(!karma.has(Achievement::PhotoReporter));
        assert_eq!(karma.last_activity, Some(5));
        let body = karma.to_document().expect("encode");
        assert_eq!(body["achievements"], json!(["first_report"]));
    }

    #[test]
    fn leaderboard_entry_defaults_name() {
        let body = json!({"karmaPoints": 310, "totalReports": 12});
        let entry = LeaderboardEntry::decode(body.as_object().expect("object")).expect("decode");
        assert_eq!(entry.user_name, "Anonymous");
        assert_eq!(entry.karma_points, 310);
        assert!(entry.accuracy.is_none());
    }

    #[test]
    fn fractional_accuracy_is_rounded() {
        let body = json!({"userName": "a", "karmaPoints": 900, "accuracy": 87.5});
        let entry = LeaderboardEntry::decode(body.as_object().expect("object")).expect("decode");
        assert_eq!(entry.accuracy, Some(88));

        let body = json!({"accuracy": 120, "userName": null});
        let entry = LeaderboardEntry::decode(body.as_object().expect("object")).expect("decode");
        assert_eq!(entry.accuracy, Some(100));
        assert_eq!(entry.user_name, "Anonymous");
    }

    #[test]
    fn null_fields_read_as_defaults() {
        let body = json!({"karmaPoints": 120.0, "totalReports": 12, "achievements": null});
        let karma = UserKarma::decode(body.as_object().expect("object")).expect("decode");
        assert_eq!(karma.karma_points, 120);
        assert_eq!(karma.total_reports, 12);
        assert!(karma.achievements.is_empty());
    }

    #[test]
    fn achievements_have_display_metadata() {
        for a in Achievement::ALL {
            assert!(!a.emoji().is_empty());
            assert!(!a.title().is_empty());
            assert!(!a.description().is_empty());
        }
        assert_eq!(Achievement::CommunityLeader.to_string(), "community_leader");
        assert_eq!(Achievement::CommunityLeader.description(), "Reach 500 karma points");
        assert_eq!(Achievement::FirstReport.emoji(), "🥇");
    }
}

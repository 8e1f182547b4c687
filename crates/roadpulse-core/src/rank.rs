//! Top-K leaderboard rows with current-actor augmentation.
//!
//! Ordering comes from the data source; rows are rendered in the order the
//! snapshot lists them. When the signed-in actor is not among them, one point
//! lookup is made and, on success, a single synthetic "You" row is appended.

use serde::Serialize;
use tracing::warn;

use crate::model::{LeaderboardEntry, Payload, RecordId, UserKarma};
use crate::session::{Actor, initial_of};
use crate::source::{Collection, PointLookup};

/// Accuracy shown for the synthetic row when the lookup carries none.
pub const DEFAULT_ACCURACY: u8 = 100;

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];
const OTHER_MEDAL: &str = "🏅";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyBadge {
    High,
    Medium,
    Low,
}

impl AccuracyBadge {
    #[must_use]
    pub const fn for_accuracy(pct: u8) -> Self {
        if pct >= 90 {
            Self::High
        } else if pct >= 70 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::High => "green",
            Self::Medium => "yellow",
            Self::Low => "red",
        }
    }
}

/// Medal for a 1-based rank.
#[must_use]
pub fn medal(rank: usize) -> &'static str {
    rank.checked_sub(1)
        .and_then(|i| MEDALS.get(i).copied())
        .unwrap_or(OTHER_MEDAL)
}

/// One rendered leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    /// 1-based rank; `None` for the synthetic row.
    pub rank: Option<usize>,
    pub medal: &'static str,
    pub user_id: RecordId,
    pub name: String,
    pub initial: char,
    pub karma_points: i64,
    pub total_reports: u64,
    pub accuracy: Option<u8>,
    pub badge: Option<AccuracyBadge>,
    /// Row belongs to the signed-in actor.
    pub highlighted: bool,
    pub synthetic: bool,
}

/// What happened when checking whether the actor needed a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Augmentation {
    /// Nobody signed in.
    NoActor,
    /// Actor already ranked.
    NotNeeded,
    Appended,
    /// Lookup succeeded but the actor has no karma document.
    ActorUnknown,
    LookupFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub rows: Vec<LeaderboardRow>,
    pub augmentation: Augmentation,
}

impl Leaderboard {
    #[must_use]
    pub fn synthetic_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.synthetic).count()
    }
}

/// Build rows for a ranked snapshot of `(document id, entry)`.
///
/// Rows are matched to the actor by record identity: the leaderboard
/// document id, or the entry's `userId` when present.
pub fn build_leaderboard(
    ranked: &[(RecordId, LeaderboardEntry)],
    actor: Option<&Actor>,
    lookup: &dyn PointLookup,
) -> Leaderboard {
    let mut rows: Vec<LeaderboardRow> = ranked
        .iter()
        .enumerate()
        .map(|(i, (id, entry))| ranked_row(i + 1, id, entry, actor))
        .collect();

    let Some(actor) = actor else {
        return Leaderboard {
            rows,
            augmentation: Augmentation::NoActor,
        };
    };
    if rows.iter().any(|r| r.highlighted) {
        return Leaderboard {
            rows,
            augmentation: Augmentation::NotNeeded,
        };
    }

    let augmentation = match lookup.get(Collection::Users, &actor.uid) {
        Ok(Some(doc)) => match UserKarma::decode(&doc) {
            Ok(karma) => {
                rows.push(synthetic_row(actor, &karma));
                Augmentation::Appended
            }
            Err(e) => {
                warn!(uid = %actor.uid, error = %e, "actor karma document is invalid");
                Augmentation::LookupFailed {
                    error: e.to_string(),
                }
            }
        },
        Ok(None) => Augmentation::ActorUnknown,
        Err(e) => {
            warn!(uid = %actor.uid, error = %e, "actor karma lookup failed");
            Augmentation::LookupFailed {
                error: format!("{e:#}"),
            }
        }
    };

    Leaderboard { rows, augmentation }
}

fn ranked_row(
    rank: usize,
    id: &RecordId,
    entry: &LeaderboardEntry,
    actor: Option<&Actor>,
) -> LeaderboardRow {
    let user_id = entry
        .user_id
        .as_deref()
        .map_or_else(|| id.clone(), RecordId::from);
    let highlighted = actor.is_some_and(|a| a.uid == user_id || a.uid == *id);
    LeaderboardRow {
        rank: Some(rank),
        medal: medal(rank),
        initial: initial_of(&entry.user_name),
        name: entry.user_name.clone(),
        user_id,
        karma_points: entry.karma_points,
        total_reports: entry.total_reports,
        accuracy: entry.accuracy,
        badge: entry.accuracy.map(AccuracyBadge::for_accuracy),
        highlighted,
        synthetic: false,
    }
}

fn synthetic_row(actor: &Actor, karma: &UserKarma) -> LeaderboardRow {
    LeaderboardRow {
        rank: None,
        medal: OTHER_MEDAL,
        user_id: actor.uid.clone(),
        name: "You".to_string(),
        initial: actor.initial(),
        karma_points: karma.karma_points,
        total_reports: karma.total_reports,
        accuracy: Some(DEFAULT_ACCURACY),
        badge: Some(AccuracyBadge::for_accuracy(DEFAULT_ACCURACY)),
        highlighted: true,
        synthetic: true,
    }
}

//! Report submission.
//!
//! A submitted draft becomes a `reports` document. When someone is signed
//! in, karma is awarded afterwards; an award failure is logged and never
//! fails the submission.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::KarmaConfig;
use crate::model::{Coordinates, Payload, RecordId, Report, ReportStatus, ReportType};
use crate::session::Actor;
use crate::source::{Collection, FieldUpdate, MutationSink};

/// Form state before submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDraft {
    pub report_type: ReportType,
    pub description: String,
    pub location: String,
    /// Pinned map location; required.
    pub coordinates: Option<Coordinates>,
    pub photo_url: Option<String>,
}

impl ReportDraft {
    /// Build the stored report for `actor` at `now_us`.
    ///
    /// # Errors
    ///
    /// Returns an error if no location was pinned or the result fails
    /// validation.
    pub fn into_report(self, actor: Option<&Actor>, now_us: i64) -> Result<Report> {
        let Some(coordinates) = self.coordinates else {
            bail!("pin a location on the map before submitting");
        };
        let report = Report {
            report_type: self.report_type,
            description: self.description.trim().to_string(),
            location: self.location.trim().to_string(),
            coordinates,
            photo_url: self.photo_url.filter(|u| !u.trim().is_empty()),
            timestamp: now_us,
            status: ReportStatus::Pending,
            user_id: actor.map(|a| a.uid.to_string()),
            user_name: actor
                .and_then(|a| a.display_name.clone())
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Anonymous".to_string()),
            karma_awarded: false,
            upvotes: 0,
            downvotes: 0,
        };
        report.validate()?;
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KarmaAward {
    Awarded { uid: RecordId, points: i64 },
    SignedOut,
    Failed { uid: RecordId, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub report_id: RecordId,
    pub karma: KarmaAward,
}

/// Submit a report and award karma to the signed-in actor.
///
/// # Errors
///
/// Returns an error if the draft is invalid or the report write fails.
/// Karma award failures are reported in [`SubmitOutcome::karma`] instead.
pub fn submit_report(
    sink: &dyn MutationSink,
    draft: ReportDraft,
    actor: Option<&Actor>,
    karma: &KarmaConfig,
    now_us: i64,
) -> Result<SubmitOutcome> {
    let report = draft.into_report(actor, now_us)?;
    let doc = report.to_document()?;
    let report_id = sink
        .submit(Collection::Reports, doc)
        .context("submit report")?;
    info!(report_id = %report_id, report_type = %report.report_type, "report submitted");

    let karma = match actor {
        Some(actor) => award_karma(sink, &actor.uid, karma.points_per_report, now_us),
        None => KarmaAward::SignedOut,
    };
    Ok(SubmitOutcome { report_id, karma })
}

/// Add `points` and one report to the user's karma document.
pub fn award_karma(
    sink: &dyn MutationSink,
    uid: &RecordId,
    points: i64,
    now_us: i64,
) -> KarmaAward {
    let updates = [
        FieldUpdate::increment("karmaPoints", points),
        FieldUpdate::increment("totalReports", 1),
        FieldUpdate::set("lastActivity", now_us),
    ];
    match sink.update(Collection::Users, uid, &updates) {
        Ok(()) => {
            info!(uid = %uid, points, "karma awarded");
            KarmaAward::Awarded {
                uid: uid.clone(),
                points,
            }
        }
        Err(e) => {
            warn!(uid = %uid, error = %format!("{e:#}"), "error awarding karma");
            KarmaAward::Failed {
                uid: uid.clone(),
                error: format!("{e:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::store::LocalStore;
    use std::cell::RefCell;

    fn draft() -> ReportDraft {
        ReportDraft {
            report_type: ReportType::Pothole,
            description: "  deep one near the bus stop ".to_string(),
            location: "MG Road".to_string(),
            coordinates: Some(Coordinates {
                latitude: 10.99,
                longitude: 76.0,
            }),
            photo_url: None,
        }
    }

    /// Accepts reports, rejects every field update.
    #[derive(Default)]
    struct FlakyUsers {
        submitted: RefCell<Vec<Document>>,
    }

    impl MutationSink for FlakyUsers {
        fn submit(&self, _collection: Collection, doc: Document) -> Result<RecordId> {
            self.submitted.borrow_mut().push(doc);
            Ok(RecordId::from("r1"))
        }

        fn update(&self, _c: Collection, _id: &RecordId, _u: &[FieldUpdate]) -> Result<()> {
            bail!("permission denied")
        }
    }

    #[test]
    fn signed_in_submission_awards_karma() {
        let store = LocalStore::in_memory().expect("store");
        let actor = Actor::new("u1").with_display_name("Asha");
        let outcome = submit_report(&store, draft(), Some(&actor), &KarmaConfig::default(), 77)
            .expect("submit");
        assert_eq!(
            outcome.karma,
            KarmaAward::Awarded {
                uid: "u1".into(),
                points: 10
            }
        );

        let report = store
            .fetch(Collection::Reports, &outcome.report_id)
            .expect("fetch")
            .expect("stored");
        assert_eq!(report["type"], "Pothole");
        assert_eq!(report["status"], "pending");
        assert_eq!(report["userName"], "Asha");
        assert_eq!(report["userId"], "u1");
        assert_eq!(report["description"], "deep one near the bus stop");
        assert_eq!(report["karmaAwarded"], false);

        let user = store
            .fetch(Collection::Users, &"u1".into())
            .expect("fetch")
            .expect("user doc");
        assert_eq!(user["karmaPoints"], 10);
        assert_eq!(user["totalReports"], 1);
        assert_eq!(user["lastActivity"], 77);
    }

    #[test]
    fn anonymous_submission_skips_karma() {
        let store = LocalStore::in_memory().expect("store");
        let outcome =
            submit_report(&store, draft(), None, &KarmaConfig::default(), 1).expect("submit");
        assert_eq!(outcome.karma, KarmaAward::SignedOut);
        let report = store
            .fetch(Collection::Reports, &outcome.report_id)
            .expect("fetch")
            .expect("stored");
        assert_eq!(report["userName"], "Anonymous");
        assert!(report["userId"].is_null());
        assert_eq!(store.count(Collection::Users).expect("count"), 0);
    }

    #[test]
    fn award_failure_does_not_fail_submission() {
        let sink = FlakyUsers::default();
        let actor = Actor::new("u1");
        let outcome = submit_report(&sink, draft(), Some(&actor), &KarmaConfig::default(), 1)
            .expect("submit");
        assert_eq!(outcome.report_id.as_str(), "r1");
        assert!(matches!(outcome.karma, KarmaAward::Failed { .. }));
        assert_eq!(sink.submitted.borrow().len(), 1);
    }

    #[test]
    fn missing_location_is_rejected() {
        let store = LocalStore::in_memory().expect("store");
        let mut d = draft();
        d.coordinates = None;
        let err = submit_report(&store, d, None, &KarmaConfig::default(), 1).expect_err("no pin");
        assert!(err.to_string().contains("pin a location"));
        assert_eq!(store.count(Collection::Reports).expect("count"), 0);
    }

    #[test]
    fn display_name_not_email_becomes_user_name() {
        let actor = Actor::new("u1").with_email("a@b.test");
        let report = draft().into_report(Some(&actor), 1).expect("report");
        assert_eq!(report.user_name, "Anonymous");
    }
}

//! Karma panel and leaderboard.
//!
//! Signed out, the view only shows a login prompt. Signed in, it follows the
//! actor's `users/{uid}` document (creating it with defaults when the source
//! reports no document at all) and the top-K `leaderboard` query.

use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::{ViewStats, decode_batch};
use crate::config::KarmaConfig;
use crate::model::{Achievement, LeaderboardEntry, Payload, RecordId, UserKarma};
use crate::rank::{Leaderboard, build_leaderboard};
use crate::session::{Actor, Session, SessionChange};
use crate::source::{Backend, Collection, Delivery, Direction, QueryDescriptor, Subscription};
use crate::sync::SnapshotMirror;

const VIEW: &str = "karma";

/// Radius of the progress ring, in canvas units.
pub const RING_RADIUS: f64 = 52.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementBadge {
    pub achievement: Achievement,
    pub emoji: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub achieved: bool,
}

/// Everything the karma panel shows for the signed-in actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KarmaPanel {
    pub user_name: String,
    pub initial: char,
    pub karma_points: i64,
    pub total_reports: u64,
    /// Points towards the next milestone, `0.0..1.0`.
    pub progress: f64,
    pub next_milestone: i64,
    /// Stroke-dash offset of the progress ring.
    pub ring_offset: f64,
    pub achievements: Vec<AchievementBadge>,
}

impl KarmaPanel {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(actor: &Actor, karma: &UserKarma, step: i64) -> Self {
        let step = step.max(1);
        let points = karma.karma_points.max(0);
        let progress = (points % step) as f64 / step as f64;
        let circumference = 2.0 * PI * RING_RADIUS;
        Self {
            user_name: actor.display_label().to_string(),
            initial: actor.initial(),
            karma_points: karma.karma_points,
            total_reports: karma.total_reports,
            progress,
            next_milestone: (points / step + 1) * step,
            ring_offset: circumference * (1.0 - progress),
            achievements: Achievement::ALL
                .into_iter()
                .map(|a| AchievementBadge {
                    achievement: a,
                    emoji: a.emoji(),
                    title: a.title(),
                    description: a.description(),
                    achieved: karma.has(a),
                })
                .collect(),
        }
    }
}

/// Karma rendering collaborator.
pub trait KarmaSink {
    /// # Errors
    ///
    /// Returns an error if the prompt could not be shown.
    fn show_login_prompt(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the panel could not be redrawn.
    fn show_panel(&mut self, panel: &KarmaPanel) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the leaderboard could not be redrawn.
    fn show_leaderboard(&mut self, board: &Leaderboard) -> Result<()>;
}

struct KarmaState<B, K> {
    backend: B,
    sink: K,
    config: KarmaConfig,
    actor: Option<Actor>,
    user_mirror: SnapshotMirror<UserKarma>,
    /// Default document already requested for this sign-in.
    defaults_requested: bool,
    board_mirror: SnapshotMirror<LeaderboardEntry>,
    panel: Option<KarmaPanel>,
    board: Option<Leaderboard>,
    stats: ViewStats,
    now_us: i64,
}

impl<B: Backend, K: KarmaSink> KarmaState<B, K> {
    fn on_user_doc(&mut self, delivery: Delivery) {
        self.stats.deliveries += 1;
        let snapshot = match delivery {
            Delivery::Snapshot(s) => s,
            Delivery::Error(e) => return self.stats.record_error(VIEW, e),
        };
        let exists = !snapshot.order.is_empty();
        let batch = decode_batch(VIEW, snapshot.changes, &mut self.stats);
        self.stats.apply += self.user_mirror.apply(&batch);

        let Some(actor) = self.actor.clone() else {
            return;
        };
        if !exists {
            self.create_defaults(&actor);
            return;
        }
        let Some(karma) = self.user_mirror.payloads().next().cloned() else {
            warn!(
                view = VIEW,
                uid = %actor.uid,
                "karma document is unreadable, leaving it as is"
            );
            return;
        };
        let panel = KarmaPanel::build(&actor, &karma, self.config.progress_step);
        if let Err(e) = self.sink.show_panel(&panel) {
            warn!(view = VIEW, error = %e, "karma panel render failed");
            self.stats.apply.errors += 1;
        }
        self.panel = Some(panel);
    }

    fn create_defaults(&mut self, actor: &Actor) {
        if self.defaults_requested {
            return;
        }
        self.defaults_requested = true;
        let result = UserKarma::initial(self.now_us)
            .to_document()
            .map_err(anyhow::Error::from)
            .and_then(|doc| self.backend.merge(Collection::Users, &actor.uid, doc));
        match result {
            Ok(()) => info!(view = VIEW, uid = %actor.uid, "created default karma document"),
            Err(e) => warn!(
                view = VIEW,
                uid = %actor.uid,
                error = %e,
                "could not create karma document"
            ),
        }
    }

    fn on_leaderboard(&mut self, delivery: Delivery) {
        self.stats.deliveries += 1;
        let snapshot = match delivery {
            Delivery::Snapshot(s) => s,
            Delivery::Error(e) => return self.stats.record_error(VIEW, e),
        };
        let batch = decode_batch(VIEW, snapshot.changes, &mut self.stats);
        self.stats.apply += self.board_mirror.apply(&batch);

        // Unreadable entries keep their rank slot as anonymous rows.
        let projection = self.board_mirror.projection();
        let ranked: Vec<(RecordId, LeaderboardEntry)> = snapshot
            .order
            .iter()
            .map(|id| (id.clone(), projection.get(id).cloned().unwrap_or_default()))
            .collect();
        let board = build_leaderboard(&ranked, self.actor.as_ref(), &self.backend);
        if let Err(e) = self.sink.show_leaderboard(&board) {
            warn!(view = VIEW, error = %e, "leaderboard render failed");
            self.stats.apply.errors += 1;
        }
        self.board = Some(board);
    }

    fn reset(&mut self) {
        self.user_mirror.teardown();
        self.board_mirror.teardown();
        self.defaults_requested = false;
        self.panel = None;
        self.board = None;
    }

    fn prompt_login(&mut self) {
        if let Err(e) = self.sink.show_login_prompt() {
            warn!(view = VIEW, error = %e, "login prompt render failed");
            self.stats.apply.errors += 1;
        }
    }
}

/// The karma view context.
pub struct KarmaView<B, K> {
    state: Rc<RefCell<KarmaState<B, K>>>,
    subscriptions: Vec<Subscription>,
}

impl<B, K> KarmaView<B, K>
where
    B: Backend + Clone + 'static,
    K: KarmaSink + 'static,
{
    /// Build the view for the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if a subscription cannot be registered.
    pub fn open(
        backend: B,
        sink: K,
        config: KarmaConfig,
        session: &Session,
        now_us: i64,
    ) -> Result<Self> {
        let state = Rc::new(RefCell::new(KarmaState {
            backend,
            sink,
            config,
            actor: None,
            user_mirror: SnapshotMirror::mirror(),
            defaults_requested: false,
            board_mirror: SnapshotMirror::mirror(),
            panel: None,
            board: None,
            stats: ViewStats::default(),
            now_us,
        }));
        let mut view = Self {
            state,
            subscriptions: Vec::new(),
        };
        match session.current() {
            Some(actor) => view.subscribe(actor.clone())?,
            None => view.state.borrow_mut().prompt_login(),
        }
        Ok(view)
    }

    /// Follow a sign-in state change.
    ///
    /// # Errors
    ///
    /// Returns an error if resubscribing fails.
    pub fn on_session_changed(&mut self, change: &SessionChange, now_us: i64) -> Result<()> {
        match change {
            SessionChange::SignedIn(actor) => {
                self.unsubscribe();
                self.state.borrow_mut().now_us = now_us;
                self.subscribe(actor.clone())
            }
            SessionChange::SignedOut => {
                self.unsubscribe();
                let mut state = self.state.borrow_mut();
                state.reset();
                state.actor = None;
                state.prompt_login();
                Ok(())
            }
            SessionChange::Unchanged => Ok(()),
        }
    }

    fn subscribe(&mut self, actor: Actor) -> Result<()> {
        let (backend, limit) = {
            let mut state = self.state.borrow_mut();
            state.reset();
            state.actor = Some(actor.clone());
            (state.backend.clone(), state.config.leaderboard_limit)
        };

        let shared = Rc::clone(&self.state);
        let sub = backend
            .subscribe(
                QueryDescriptor::document(Collection::Users, actor.uid.clone()),
                Box::new(move |d| shared.borrow_mut().on_user_doc(d)),
            )
            .with_context(|| format!("subscribe to users/{}", actor.uid))?;
        self.subscriptions.push(sub);

        let shared = Rc::clone(&self.state);
        let query = QueryDescriptor::collection(Collection::Leaderboard)
            .order_by("karmaPoints", Direction::Desc)
            .limit(limit);
        let sub = backend
            .subscribe(query, Box::new(move |d| shared.borrow_mut().on_leaderboard(d)))
            .context("subscribe to leaderboard")?;
        self.subscriptions.push(sub);

        info!(view = VIEW, uid = %actor.uid, "karma view subscribed");
        Ok(())
    }
}

impl<B, K> KarmaView<B, K> {
    fn unsubscribe(&mut self) {
        for mut sub in self.subscriptions.drain(..) {
            sub.cancel();
        }
    }

    #[must_use]
    pub fn panel(&self) -> Option<KarmaPanel> {
        self.state.borrow().panel.clone()
    }

    #[must_use]
    pub fn leaderboard(&self) -> Option<Leaderboard> {
        self.state.borrow().board.clone()
    }

    #[must_use]
    pub fn stats(&self) -> ViewStats {
        self.state.borrow().stats.clone()
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.state.borrow().sink)
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }

    pub fn close(mut self) -> ViewStats {
        self.unsubscribe();
        self.stats()
    }
}

impl<B, K> Drop for KarmaView<B, K> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

//! Who is signed in.
//!
//! Authentication itself happens elsewhere; views only need to know the
//! current actor and be told when it changes.

use serde::{Deserialize, Serialize};

use crate::model::RecordId;

/// The signed-in user as the views see them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub uid: RecordId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Actor {
    #[must_use]
    pub fn new(uid: impl Into<RecordId>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Display name, else email, else "Anonymous".
    #[must_use]
    pub fn display_label(&self) -> &str {
        [self.display_name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or("Anonymous")
    }

    /// Uppercase avatar initial.
    #[must_use]
    pub fn initial(&self) -> char {
        initial_of(self.display_label())
    }
}

/// Uppercase first character of a name, `?` when empty.
#[must_use]
pub fn initial_of(name: &str) -> char {
    name.trim()
        .chars()
        .next()
        .map_or('?', |c| c.to_uppercase().next().unwrap_or(c))
}

/// Sign-in state transition reported to views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(Actor),
    SignedOut,
    Unchanged,
}

/// Current sign-in state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    current: Option<Actor>,
}

impl Session {
    #[must_use]
    pub const fn signed_out() -> Self {
        Self { current: None }
    }

    #[must_use]
    pub const fn signed_in(actor: Actor) -> Self {
        Self {
            current: Some(actor),
        }
    }

    pub fn sign_in(&mut self, actor: Actor) -> SessionChange {
        if self.current.as_ref() == Some(&actor) {
            return SessionChange::Unchanged;
        }
        tracing::info!(uid = %actor.uid, "signed in");
        self.current = Some(actor.clone());
        SessionChange::SignedIn(actor)
    }

    pub fn sign_out(&mut self) -> SessionChange {
        match self.current.take() {
            Some(actor) => {
                tracing::info!(uid = %actor.uid, "signed out");
                SessionChange::SignedOut
            }
            None => SessionChange::Unchanged,
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&Actor> {
        self.current.as_ref()
    }

    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.current.is_some()
    }
}

//! Route gates: decide whether a page renders, waits, or redirects.
//!
//! Evaluation is a pure function of the resolution phase, the session and
//! the page's required roles. Gates return the navigation they want;
//! [`ProtectedRoute`] is the thin adapter that hands it to a [`Navigator`].

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::auth::{has_role, AuthContext, AuthSnapshot, Profile, ResolutionPhase, RoleSet, Session};
use crate::routes::RouteTargets;

/// What a page should do on this render pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "kind", content = "to", rename_all = "camelCase")]
pub enum GateDecision {
    /// Session not known yet: show a neutral placeholder.
    Placeholder,
    Render,
    Redirect(String),
}

/// Gate for pages that need a logged-in user with one of `required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGate {
    required: RoleSet,
    targets: RouteTargets,
}

impl RouteGate {
    pub fn new(required: RoleSet, targets: RouteTargets) -> Self {
        Self { required, targets }
    }

    /// Gate with default redirect targets.
    pub fn for_roles(required: RoleSet) -> Self {
        Self::new(required, RouteTargets::default())
    }

    pub fn required(&self) -> RoleSet {
        self.required
    }

    pub fn evaluate(&self, phase: ResolutionPhase, session: &Session) -> GateDecision {
        match (phase, session.profile()) {
            (ResolutionPhase::Pending, _) => GateDecision::Placeholder,
            (ResolutionPhase::ResolvedUnauthenticated, _) | (_, None) => {
                GateDecision::Redirect(self.targets.login.clone())
            }
            (ResolutionPhase::ResolvedAuthenticated, Some(profile)) => {
                if has_role(profile, &self.required) {
                    GateDecision::Render
                } else {
                    GateDecision::Redirect(self.targets.unauthorized.clone())
                }
            }
        }
    }
}

impl Default for RouteGate {
    /// Any logged-in role.
    fn default() -> Self {
        Self::for_roles(RoleSet::all())
    }
}

/// Gate for pages only logged-out visitors should see, like the login form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestGate {
    targets: RouteTargets,
}

impl GuestGate {
    pub fn new(targets: RouteTargets) -> Self {
        Self { targets }
    }

    pub fn evaluate(&self, phase: ResolutionPhase, session: &Session) -> GateDecision {
        match phase {
            ResolutionPhase::Pending => GateDecision::Placeholder,
            ResolutionPhase::ResolvedAuthenticated if session.is_authenticated() => {
                GateDecision::Redirect(self.targets.home.clone())
            }
            _ => GateDecision::Render,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Protected(RouteGate),
    Guest(GuestGate),
    /// Page that always forwards elsewhere.
    Redirect(String),
}

impl Gate {
    pub fn evaluate(&self, phase: ResolutionPhase, session: &Session) -> GateDecision {
        match self {
            Gate::Protected(gate) => gate.evaluate(phase, session),
            Gate::Guest(gate) => gate.evaluate(phase, session),
            Gate::Redirect(to) => GateDecision::Redirect(to.clone()),
        }
    }

    pub fn evaluate_snapshot(&self, snapshot: &AuthSnapshot) -> GateDecision {
        self.evaluate(snapshot.phase, &snapshot.session)
    }
}

/// Performs navigation on behalf of a gate.
pub trait Navigator {
    fn navigate(&mut self, to: &str);
}

/// Navigator that only remembers where it was sent.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    pub visits: Vec<String>,
}

impl RecordingNavigator {
    pub fn last(&self) -> Option<&str> {
        self.visits.last().map(String::as_str)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, to: &str) {
        self.visits.push(to.to_string());
    }
}

/// A page wrapped in a gate and subscribed to the auth context.
pub struct ProtectedRoute {
    gate: Gate,
    state: watch::Receiver<AuthSnapshot>,
    last_redirect: Option<String>,
}

impl ProtectedRoute {
    pub fn new(gate: Gate, context: &AuthContext) -> Self {
        Self {
            gate,
            state: context.subscribe(),
            last_redirect: None,
        }
    }

    /// Evaluate against the latest snapshot. Renders `children` only when
    /// allowed; issues at most one navigation per distinct redirect target
    /// until the decision changes.
    pub fn render<R>(
        &mut self,
        navigator: &mut dyn Navigator,
        children: impl FnOnce(Option<&Profile>) -> R,
    ) -> Option<R> {
        let snapshot = self.state.borrow_and_update().clone();
        let decision = self.gate.evaluate_snapshot(&snapshot);
        debug!(phase = ?snapshot.phase, ?decision, "Gate evaluated");

        match decision {
            GateDecision::Render => {
                self.last_redirect = None;
                Some(children(snapshot.user()))
            }
            GateDecision::Redirect(to) => {
                if self.last_redirect.as_deref() != Some(to.as_str()) {
                    navigator.navigate(&to);
                    self.last_redirect = Some(to);
                }
                None
            }
            GateDecision::Placeholder => {
                self.last_redirect = None;
                None
            }
        }
    }

    /// Current decision without rendering or navigating.
    pub fn decision(&self) -> GateDecision {
        self.gate.evaluate_snapshot(&self.state.borrow())
    }

    /// Wait for the next session or phase change. False once the context
    /// has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}

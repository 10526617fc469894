//! Session gate: the login / registration state machine in front of the chat.
//!
//! ```text
//! Anonymous --login ok--> Authenticated --logout--> Anonymous
//! Anonymous --login bad--> Rejected --input changed--> Anonymous
//! Anonymous --register--> Registering --submit ok / back--> Anonymous (or Authenticated)
//! ```
//!
//! The gate owns the [`ChatSession`] while authenticated, so logging out
//! discards the transcript.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::{Config, RegistrationPolicy};
use crate::error::{AuthError, Result};
use crate::session::{ChatSession, ChatSettings, ReplyTarget};
use crate::store::{CredentialStore, Registration};

/// Where the gate currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous,
    Registering,
    Rejected,
    Authenticated,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Anonymous => "anonymous",
            Phase::Registering => "registering",
            Phase::Rejected => "rejected",
            Phase::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Discrete user input driving the gate.
#[derive(Debug, Clone)]
pub enum GateEvent {
    SubmitLogin { username: String, password: String },
    ClickRegister,
    SubmitRegistration(Registration),
    ClickBack,
    InputChanged,
    Logout,
}

impl GateEvent {
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        GateEvent::SubmitLogin {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateEvent::SubmitLogin { .. } => "log in",
            GateEvent::ClickRegister => "start registration",
            GateEvent::SubmitRegistration(_) => "register",
            GateEvent::ClickBack => "go back",
            GateEvent::InputChanged => "edit input",
            GateEvent::Logout => "log out",
        }
    }
}

/// Outcome of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    LoggedIn,
    Rejected,
    Retry,
    StartedRegistration,
    Registered { auto_login: bool },
    Cancelled,
    LoggedOut,
}

/// The signed-in user and their chat.
#[derive(Debug)]
pub struct ActiveSession {
    /// Increases with every login through this gate.
    pub login_id: u64,
    pub username: String,
    pub display_name: String,
    pub chat: ChatSession,
}

#[derive(Debug)]
enum GateState {
    Anonymous,
    Registering,
    Rejected,
    Authenticated(Box<ActiveSession>),
}

#[derive(Debug)]
pub struct SessionGate {
    state: GateState,
    policy: RegistrationPolicy,
    min_password_length: usize,
    settings: ChatSettings,
    catalog: Arc<ModelCatalog>,
    logins: u64,
}

impl SessionGate {
    pub fn new(config: &Config, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            state: GateState::Anonymous,
            policy: config.auth.registration_policy,
            min_password_length: config.auth.min_password_length,
            settings: ChatSettings::from(config),
            catalog,
            logins: 0,
        }
    }

    pub fn with_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            GateState::Anonymous => Phase::Anonymous,
            GateState::Registering => Phase::Registering,
            GateState::Rejected => Phase::Rejected,
            GateState::Authenticated(_) => Phase::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, GateState::Authenticated(_))
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match &self.state {
            GateState::Authenticated(active) => Some(active),
            _ => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.active().map(|a| a.username.as_str())
    }

    pub fn login_id(&self) -> Option<u64> {
        self.active().map(|a| a.login_id)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.active().map(|a| a.display_name.as_str())
    }

    pub fn chat(&self) -> Option<&ChatSession> {
        self.active().map(|a| &a.chat)
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatSession> {
        match &mut self.state {
            GateState::Authenticated(active) => Some(&mut active.chat),
            _ => None,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Apply one event.
    ///
    /// A wrong password is not an error: it moves to `Rejected` and returns
    /// `Transition::Rejected`. Validation, duplicate-user and storage errors
    /// leave the phase unchanged.
    pub fn handle(&mut self, event: GateEvent, store: &mut CredentialStore) -> Result<Transition> {
        match (self.phase(), event) {
            (Phase::Rejected, GateEvent::InputChanged) => {
                self.state = GateState::Anonymous;
                Ok(Transition::Retry)
            }
            // Submitting again counts as changing the input first.
            (Phase::Rejected, event @ (GateEvent::SubmitLogin { .. } | GateEvent::ClickRegister)) => {
                self.state = GateState::Anonymous;
                self.handle(event, store)
            }

            (Phase::Anonymous, GateEvent::SubmitLogin { username, password }) => {
                self.login(username.trim(), &password, store)
            }
            (Phase::Anonymous, GateEvent::ClickRegister) => {
                self.state = GateState::Registering;
                Ok(Transition::StartedRegistration)
            }

            (Phase::Registering, GateEvent::SubmitRegistration(registration)) => {
                self.register(&registration, store)
            }
            (Phase::Registering, GateEvent::ClickBack) => {
                self.state = GateState::Anonymous;
                Ok(Transition::Cancelled)
            }

            (Phase::Authenticated, GateEvent::Logout) => {
                if let Some(name) = self.username() {
                    info!("User {} logged out", name);
                }
                self.state = GateState::Anonymous;
                Ok(Transition::LoggedOut)
            }
            (_, GateEvent::Logout) | (_, GateEvent::InputChanged) => Ok(Transition::Unchanged),

            (phase, event) => Err(AuthError::InvalidTransition {
                phase: phase.name(),
                event: event.name(),
            }
            .into()),
        }
    }

    fn login(&mut self, username: &str, password: &str, store: &CredentialStore) -> Result<Transition> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Validation("Username and password are required".into()).into());
        }
        match store.verify_login(username, password) {
            Ok(record) => {
                let display_name = record.name.clone();
                self.authenticate(username, display_name);
                info!("User {} logged in", username);
                Ok(Transition::LoggedIn)
            }
            Err(e) => {
                warn!("Rejected login for {}: {}", username, e);
                self.state = GateState::Rejected;
                Ok(Transition::Rejected)
            }
        }
    }

    fn register(&mut self, registration: &Registration, store: &mut CredentialStore) -> Result<Transition> {
        let record = store.register(registration, self.min_password_length)?;
        match self.policy {
            RegistrationPolicy::ReturnToLogin => {
                self.state = GateState::Anonymous;
                Ok(Transition::Registered { auto_login: false })
            }
            RegistrationPolicy::AutoLogin => {
                self.authenticate(registration.username.trim(), record.name);
                Ok(Transition::Registered { auto_login: true })
            }
        }
    }

    fn authenticate(&mut self, username: &str, display_name: String) {
        let chat = ChatSession::new(self.settings.clone(), &self.catalog);
        self.logins += 1;
        self.state = GateState::Authenticated(Box::new(ActiveSession {
            login_id: self.logins,
            username: username.to_string(),
            display_name,
            chat,
        }));
    }
}

// A streamed reply holding the whole gate keeps the user from logging out
// underneath it.
#[async_trait]
impl ReplyTarget for SessionGate {
    async fn commit_reply(&mut self, text: String) {
        match self.chat_mut() {
            Some(chat) => chat.commit_reply(text),
            None => debug!("No active chat, reply dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnkiError;

    fn setup() -> (SessionGate, CredentialStore) {
        let mut store = CredentialStore::in_memory();
        store
            .register(&Registration::new("alice", "Alice", "a@x.com", "pw1234"), 1)
            .unwrap();
        let gate = SessionGate::new(&Config::default(), Arc::new(ModelCatalog::builtin()));
        (gate, store)
    }

    #[test]
    fn test_initial_phase() {
        let (gate, _) = setup();
        assert_eq!(gate.phase(), Phase::Anonymous);
        assert!(gate.chat().is_none());
    }

    #[test]
    fn test_login_success() {
        let (mut gate, mut store) = setup();
        let t = gate.handle(GateEvent::login("alice", "pw1234"), &mut store).unwrap();
        assert_eq!(t, Transition::LoggedIn);
        assert_eq!(gate.phase(), Phase::Authenticated);
        assert_eq!(gate.username(), Some("alice"));
        assert_eq!(gate.display_name(), Some("Alice"));
        assert!(gate.chat().unwrap().transcript().is_empty());
    }

    #[test]
    fn test_login_rejected_then_retry() {
        let (mut gate, mut store) = setup();
        let before = store.data().clone();

        let t = gate.handle(GateEvent::login("alice", "wrong"), &mut store).unwrap();
        assert_eq!(t, Transition::Rejected);
        assert_eq!(gate.phase(), Phase::Rejected);
        assert_eq!(store.data(), &before);

        let t = gate.handle(GateEvent::InputChanged, &mut store).unwrap();
        assert_eq!(t, Transition::Retry);
        assert_eq!(gate.phase(), Phase::Anonymous);
    }

    #[test]
    fn test_unknown_user_rejected() {
        let (mut gate, mut store) = setup();
        let t = gate.handle(GateEvent::login("mallory", "pw1234"), &mut store).unwrap();
        assert_eq!(t, Transition::Rejected);
    }

    #[test]
    fn test_resubmit_from_rejected() {
        let (mut gate, mut store) = setup();
        gate.handle(GateEvent::login("alice", "wrong"), &mut store).unwrap();
        let t = gate.handle(GateEvent::login("alice", "pw1234"), &mut store).unwrap();
        assert_eq!(t, Transition::LoggedIn);
    }

    #[test]
    fn test_blank_login_is_validation_error() {
        let (mut gate, mut store) = setup();
        let err = gate.handle(GateEvent::login("  ", ""), &mut store).unwrap_err();
        assert!(matches!(err, EnkiError::Auth(AuthError::Validation(_))));
        assert_eq!(gate.phase(), Phase::Anonymous);
    }

    #[test]
    fn test_registration_returns_to_login() {
        let (mut gate, mut store) = setup();
        gate.handle(GateEvent::ClickRegister, &mut store).unwrap();
        assert_eq!(gate.phase(), Phase::Registering);

        let reg = Registration::new("bob", "Bob", "", "pw").confirmed("pw");
        let t = gate.handle(GateEvent::SubmitRegistration(reg), &mut store).unwrap();
        assert_eq!(t, Transition::Registered { auto_login: false });
        assert_eq!(gate.phase(), Phase::Anonymous);
        assert!(store.contains("bob"));
    }

    #[test]
    fn test_registration_auto_login() {
        let (gate, mut store) = setup();
        let mut gate = gate.with_policy(RegistrationPolicy::AutoLogin);
        gate.handle(GateEvent::ClickRegister, &mut store).unwrap();
        let reg = Registration::new("bob", "Bob", "", "pw");
        let t = gate.handle(GateEvent::SubmitRegistration(reg), &mut store).unwrap();
        assert_eq!(t, Transition::Registered { auto_login: true });
        assert_eq!(gate.username(), Some("bob"));
    }

    #[test]
    fn test_failed_registration_stays_registering() {
        let (mut gate, mut store) = setup();
        gate.handle(GateEvent::ClickRegister, &mut store).unwrap();
        let dup = Registration::new("alice", "Other", "", "pw");
        let err = gate.handle(GateEvent::SubmitRegistration(dup), &mut store).unwrap_err();
        assert!(matches!(err, EnkiError::Auth(AuthError::DuplicateUser(_))));
        assert_eq!(gate.phase(), Phase::Registering);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_back_from_registration() {
        let (mut gate, mut store) = setup();
        gate.handle(GateEvent::ClickRegister, &mut store).unwrap();
        let t = gate.handle(GateEvent::ClickBack, &mut store).unwrap();
        assert_eq!(t, Transition::Cancelled);
        assert_eq!(gate.phase(), Phase::Anonymous);
    }

    #[test]
    fn test_logout_clears_chat() {
        let (mut gate, mut store) = setup();
        gate.handle(GateEvent::login("alice", "pw1234"), &mut store).unwrap();
        gate.chat_mut().unwrap().submit("hello", None, "sk").unwrap();

        let first = gate.login_id().unwrap();

        let t = gate.handle(GateEvent::Logout, &mut store).unwrap();
        assert_eq!(t, Transition::LoggedOut);
        assert!(gate.chat().is_none());
        assert_eq!(gate.login_id(), None);

        gate.handle(GateEvent::login("alice", "pw1234"), &mut store).unwrap();
        assert!(gate.chat().unwrap().transcript().is_empty());
        assert_ne!(gate.login_id(), Some(first));
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut gate, mut store) = setup();
        let err = gate.handle(GateEvent::ClickBack, &mut store).unwrap_err();
        assert!(matches!(err, EnkiError::Auth(AuthError::InvalidTransition { .. })));

        gate.handle(GateEvent::login("alice", "pw1234"), &mut store).unwrap();
        let err = gate.handle(GateEvent::ClickRegister, &mut store).unwrap_err();
        assert!(matches!(err, EnkiError::Auth(AuthError::InvalidTransition { phase: "authenticated", .. })));
        assert!(gate.is_authenticated());

        gate.handle(GateEvent::Logout, &mut store).unwrap();
        assert_eq!(gate.handle(GateEvent::Logout, &mut store).unwrap(), Transition::Unchanged);
    }
}

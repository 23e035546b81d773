//! Trusted networks login flow
//!
//! One flow per login attempt:
//!
//! ```text
//! Init → Finished                   (selection supplied, or bypass with one candidate)
//!      → AwaitingSelection → Finished
//!      → Aborted                    (client not in a trusted network)
//! AwaitingSelection → Aborted       (access revoked between steps)
//! ```
//!
//! Every step re-checks the client address, so a flow cannot outlive a
//! configuration that no longer trusts the client.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::{AuthError, AuthResult, InvalidAuth};
use crate::models::{CandidateUser, Credential};

/// Lifecycle of a login flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Init,
    AwaitingSelection,
    Finished,
    Aborted,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid login flow transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: FlowState,
    pub to: FlowState,
}

impl FlowState {
    /// Attempt a transition to a new state
    pub fn try_transition(self, to: FlowState) -> Result<FlowState, InvalidTransition> {
        use FlowState::*;

        let valid = matches!(
            (self, to),
            (Init, AwaitingSelection)
                | (Init, Finished)
                | (Init, Aborted)
                | (AwaitingSelection, Finished)
                | (AwaitingSelection, AwaitingSelection)
                | (AwaitingSelection, Aborted)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Finished | FlowState::Aborted)
    }
}

/// Why a flow was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    NotWhitelisted,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::NotWhitelisted => "not_whitelisted",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one flow step
#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    /// Login succeeded with this credential
    Finished(Credential),
    /// Waiting for the client to pick one of these users (`user_id -> name`)
    AwaitingInput(IndexMap<String, String>),
    /// Login refused
    Aborted(AbortReason),
}

/// What a login flow needs from its auth provider
#[async_trait]
pub trait LoginFlowProvider: Send + Sync {
    /// Check that the client may use this provider
    fn validate_access(&self, ip: IpAddr) -> Result<(), InvalidAuth>;

    /// Resolve the chosen user to a credential of this provider
    async fn get_or_create_credentials(&self, user_id: &str) -> AuthResult<Credential>;
}

/// State of one login attempt
#[derive(Debug, Clone)]
pub struct LoginFlow {
    flow_id: String,
    ip_address: IpAddr,
    available_users: IndexMap<String, String>,
    allow_bypass_login: bool,
    state: FlowState,
    created_at: DateTime<Utc>,
}

impl LoginFlow {
    pub fn new(ip_address: IpAddr, candidates: Vec<CandidateUser>, allow_bypass_login: bool) -> Self {
        Self {
            flow_id: Ulid::new().to_string(),
            ip_address,
            available_users: candidates.into_iter().map(|c| (c.id, c.name)).collect(),
            allow_bypass_login,
            state: FlowState::Init,
            created_at: Utc::now(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn ip_address(&self) -> IpAddr {
        self.ip_address
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Candidate users, `user_id -> display name`
    pub fn available_users(&self) -> &IndexMap<String, String> {
        &self.available_users
    }

    /// Run the `init` step, optionally with the client's selection
    pub async fn step_init(
        &mut self,
        provider: &dyn LoginFlowProvider,
        user_input: Option<&str>,
    ) -> AuthResult<FlowResult> {
        if self.state.is_terminal() {
            return Err(AuthError::FlowFinished {
                flow_id: self.flow_id.clone(),
            });
        }

        if let Err(reason) = provider.validate_access(self.ip_address) {
            info!("Login flow {} aborted: {}", self.flow_id, reason);
            self.transition(FlowState::Aborted)?;
            return Ok(FlowResult::Aborted(AbortReason::NotWhitelisted));
        }

        if let Some(user_id) = user_input {
            return self.finish(provider, user_id).await;
        }

        if self.allow_bypass_login && self.available_users.len() == 1 {
            if let Some(user_id) = self.available_users.keys().next().cloned() {
                debug!("Login flow {} bypassing selection for {}", self.flow_id, user_id);
                return self.finish(provider, &user_id).await;
            }
        }

        self.transition(FlowState::AwaitingSelection)?;
        Ok(FlowResult::AwaitingInput(self.available_users.clone()))
    }

    /// Submit the client's choice of user
    pub async fn submit_selection(
        &mut self,
        provider: &dyn LoginFlowProvider,
        user_id: &str,
    ) -> AuthResult<FlowResult> {
        self.step_init(provider, Some(user_id)).await
    }

    async fn finish(
        &mut self,
        provider: &dyn LoginFlowProvider,
        user_id: &str,
    ) -> AuthResult<FlowResult> {
        // Only the offered users are acceptable; the flow stays open
        if !self.available_users.contains_key(user_id) {
            info!("Login flow {} rejected selection {}", self.flow_id, user_id);
            return Err(AuthError::InvalidSelection {
                user_id: user_id.to_string(),
            });
        }

        let credential = provider.get_or_create_credentials(user_id).await?;
        self.transition(FlowState::Finished)?;
        info!(
            "Login flow {} finished for user {} from {}",
            self.flow_id, user_id, self.ip_address
        );
        Ok(FlowResult::Finished(credential))
    }

    fn transition(&mut self, to: FlowState) -> AuthResult<()> {
        self.state = self
            .state
            .try_transition(to)
            .map_err(|_| AuthError::FlowFinished {
                flow_id: self.flow_id.clone(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockProvider {
        allowed: Mutex<bool>,
        bind_calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(allowed: bool) -> Self {
            Self {
                allowed: Mutex::new(allowed),
                bind_calls: AtomicUsize::new(0),
            }
        }

        fn binds(&self) -> usize {
            self.bind_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LoginFlowProvider for MockProvider {
        fn validate_access(&self, ip: IpAddr) -> Result<(), InvalidAuth> {
            if *self.allowed.lock().unwrap() {
                Ok(())
            } else {
                Err(InvalidAuth::NotInTrustedNetworks { ip })
            }
        }

        async fn get_or_create_credentials(&self, user_id: &str) -> AuthResult<Credential> {
            self.bind_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::for_user("trusted_networks", None, user_id))
        }
    }

    fn candidates(names: &[&str]) -> Vec<CandidateUser> {
        names
            .iter()
            .map(|n| CandidateUser {
                id: n.to_lowercase(),
                name: n.to_string(),
            })
            .collect()
    }

    fn flow(names: &[&str], bypass: bool) -> LoginFlow {
        LoginFlow::new("192.168.1.10".parse().unwrap(), candidates(names), bypass)
    }

    #[test]
    fn test_transitions() {
        use FlowState::*;
        assert!(Init.try_transition(AwaitingSelection).is_ok());
        assert!(Init.try_transition(Finished).is_ok());
        assert!(Init.try_transition(Aborted).is_ok());
        assert!(AwaitingSelection.try_transition(Finished).is_ok());
        assert!(AwaitingSelection.try_transition(Init).is_err());
        assert!(Finished.try_transition(AwaitingSelection).is_err());
        assert!(Aborted.try_transition(Finished).is_err());
        assert!(Finished.is_terminal());
        assert!(Aborted.is_terminal());
        assert!(!AwaitingSelection.is_terminal());
    }

    #[tokio::test]
    async fn test_prompt_then_finish() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice", "Bob"], false);

        let result = flow.step_init(&provider, None).await.unwrap();
        let FlowResult::AwaitingInput(users) = result else {
            panic!("expected form, got {:?}", result);
        };
        assert_eq!(
            users.iter().collect::<Vec<_>>(),
            vec![
                (&"alice".to_string(), &"Alice".to_string()),
                (&"bob".to_string(), &"Bob".to_string())
            ]
        );
        assert_eq!(flow.state(), FlowState::AwaitingSelection);

        let result = flow.submit_selection(&provider, "alice").await.unwrap();
        let FlowResult::Finished(cred) = result else {
            panic!("expected finish, got {:?}", result);
        };
        assert_eq!(cred.bound_user_id(), Some("alice"));
        assert_eq!(flow.state(), FlowState::Finished);
    }

    #[tokio::test]
    async fn test_bypass_with_single_candidate() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice"], true);

        let result = flow.step_init(&provider, None).await.unwrap();
        assert!(matches!(result, FlowResult::Finished(ref c) if c.bound_user_id() == Some("alice")));
        assert_eq!(provider.binds(), 1);
    }

    #[tokio::test]
    async fn test_bypass_needs_exactly_one_candidate() {
        let provider = MockProvider::new(true);

        let mut two = flow(&["Alice", "Bob"], true);
        assert!(matches!(
            two.step_init(&provider, None).await.unwrap(),
            FlowResult::AwaitingInput(_)
        ));

        let mut none = flow(&[], true);
        assert!(matches!(
            none.step_init(&provider, None).await.unwrap(),
            FlowResult::AwaitingInput(ref users) if users.is_empty()
        ));
        assert_eq!(provider.binds(), 0);
    }

    #[tokio::test]
    async fn test_single_candidate_without_bypass_prompts() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice"], false);
        assert!(matches!(
            flow.step_init(&provider, None).await.unwrap(),
            FlowResult::AwaitingInput(_)
        ));
    }

    #[tokio::test]
    async fn test_abort_when_not_allowed() {
        let provider = MockProvider::new(false);
        let mut flow = flow(&["Alice"], true);

        let result = flow.step_init(&provider, Some("alice")).await.unwrap();
        assert_eq!(result, FlowResult::Aborted(AbortReason::NotWhitelisted));
        assert_eq!(flow.state(), FlowState::Aborted);
        assert_eq!(provider.binds(), 0);

        // Terminal: no further steps
        assert!(matches!(
            flow.step_init(&provider, None).await,
            Err(AuthError::FlowFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_access_revoked_between_steps() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice", "Bob"], false);
        flow.step_init(&provider, None).await.unwrap();

        *provider.allowed.lock().unwrap() = false;
        let result = flow.submit_selection(&provider, "alice").await.unwrap();
        assert_eq!(result, FlowResult::Aborted(AbortReason::NotWhitelisted));
        assert_eq!(provider.binds(), 0);
    }

    #[tokio::test]
    async fn test_out_of_band_selection_rejected() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice"], false);
        flow.step_init(&provider, None).await.unwrap();

        let result = flow.submit_selection(&provider, "mallory").await;
        assert!(matches!(result, Err(AuthError::InvalidSelection { ref user_id }) if user_id == "mallory"));
        assert_eq!(provider.binds(), 0);
        assert_eq!(flow.state(), FlowState::AwaitingSelection);

        // The flow can still be completed with a valid choice
        assert!(matches!(
            flow.submit_selection(&provider, "alice").await.unwrap(),
            FlowResult::Finished(_)
        ));
    }

    #[tokio::test]
    async fn test_finished_flow_rejects_steps() {
        let provider = MockProvider::new(true);
        let mut flow = flow(&["Alice"], true);
        flow.step_init(&provider, None).await.unwrap();

        assert!(matches!(
            flow.submit_selection(&provider, "alice").await,
            Err(AuthError::FlowFinished { .. })
        ));
        assert_eq!(provider.binds(), 1);
    }

    #[test]
    fn test_abort_reason_serialization() {
        assert_eq!(AbortReason::NotWhitelisted.to_string(), "not_whitelisted");
        assert_eq!(
            serde_json::to_value(AbortReason::NotWhitelisted).unwrap(),
            serde_json::json!("not_whitelisted")
        );
    }
}

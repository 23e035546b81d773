//! In-flight login flows, addressed by flow id

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::login_flow::{FlowResult, LoginFlow};
use crate::provider::TrustedNetworksAuthProvider;

/// How long a flow may wait for the client's selection
pub const FLOW_EXPIRATION: Duration = Duration::from_secs(600);

/// Result of a step, tagged with the flow it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStep {
    pub flow_id: String,
    pub result: FlowResult,
}

/// Keeps flows that are waiting for client input
pub struct LoginFlowManager {
    provider: Arc<TrustedNetworksAuthProvider>,
    flows: RwLock<HashMap<String, LoginFlow>>,
    expiration: Duration,
}

impl LoginFlowManager {
    pub fn new(provider: Arc<TrustedNetworksAuthProvider>) -> Self {
        Self {
            provider,
            flows: RwLock::new(HashMap::new()),
            expiration: FLOW_EXPIRATION,
        }
    }

    /// Use a different flow lifetime
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn provider(&self) -> &Arc<TrustedNetworksAuthProvider> {
        &self.provider
    }

    /// Start a flow; only flows waiting for input are kept
    pub async fn start(&self, client_ip: IpAddr) -> AuthResult<FlowStep> {
        let (flow, result) = self.provider.start_login(client_ip).await?;
        let flow_id = flow.flow_id().to_string();

        if !flow.state().is_terminal() {
            let mut flows = self.flows.write().await;
            self.drop_expired(&mut flows);
            flows.insert(flow_id.clone(), flow);
        }

        Ok(FlowStep { flow_id, result })
    }

    /// Advance a flow with the client's selection
    pub async fn step(&self, flow_id: &str, user_id: &str) -> AuthResult<FlowStep> {
        // Taken out of the map so two submissions can't run the same flow
        let mut flow = {
            let mut flows = self.flows.write().await;
            self.drop_expired(&mut flows);
            flows.remove(flow_id).ok_or_else(|| AuthError::UnknownFlow {
                flow_id: flow_id.to_string(),
            })?
        };

        let result = self.provider.submit_selection(&mut flow, user_id).await;

        if flow.state().is_terminal() {
            debug!("Login flow {} done ({:?})", flow_id, flow.state());
        } else {
            self.flows.write().await.insert(flow_id.to_string(), flow);
        }

        Ok(FlowStep {
            flow_id: flow_id.to_string(),
            result: result?,
        })
    }

    /// Look at a pending flow
    pub async fn get(&self, flow_id: &str) -> Option<LoginFlow> {
        self.flows
            .read()
            .await
            .get(flow_id)
            .filter(|flow| !self.is_expired(flow))
            .cloned()
    }

    /// Drop a pending flow, returning whether it existed
    pub async fn abort(&self, flow_id: &str) -> bool {
        self.flows.write().await.remove(flow_id).is_some()
    }

    pub async fn in_progress(&self) -> usize {
        let mut flows = self.flows.write().await;
        self.drop_expired(&mut flows);
        flows.len()
    }

    fn is_expired(&self, flow: &LoginFlow) -> bool {
        (Utc::now() - flow.created_at())
            .to_std()
            .map(|age| age > self.expiration)
            .unwrap_or(false)
    }

    fn drop_expired(&self, flows: &mut HashMap<String, LoginFlow>) {
        let before = flows.len();
        flows.retain(|_, flow| !self.is_expired(flow));
        if flows.len() < before {
            debug!("Dropped {} expired login flows", before - flows.len());
        }
    }
}

//! Home Assistant login flow API for the trusted networks provider
//!
//! Based on: https://developers.home-assistant.io/docs/auth_api
//!
//! Login flow:
//! 1. GET /auth/providers - List available auth providers
//! 2. POST /auth/login_flow - Start a login flow for the client address
//! 3. POST /auth/login_flow/{flow_id} - Submit the selected user

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ha_auth::{AuthError, FlowResult, FlowStep, LoginFlowManager};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Auth state shared across all auth endpoints
#[derive(Clone)]
pub struct AuthState {
    flows: Arc<LoginFlowManager>,
}

impl AuthState {
    pub fn new(flows: Arc<LoginFlowManager>) -> Self {
        Self { flows }
    }

    pub fn flows(&self) -> &LoginFlowManager {
        &self.flows
    }

    /// `[type, id]` pair identifying the provider
    fn handler(&self) -> (String, Option<String>) {
        let provider = self.flows.provider();
        (
            provider.provider_type().to_string(),
            provider.id().map(str::to_string),
        )
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Auth provider info
#[derive(Serialize)]
pub struct AuthProvider {
    pub name: String,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub provider_type: String,
}

/// Response for GET /auth/providers
#[derive(Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<AuthProvider>,
    pub preselect_remember_me: bool,
}

/// Request for POST /auth/login_flow
#[derive(Deserialize)]
pub struct LoginFlowInitRequest {
    pub client_id: String,
    pub handler: (String, Option<String>),
    pub redirect_uri: String,
    #[serde(rename = "type", default = "default_flow_type")]
    pub flow_type: String,
}

fn default_flow_type() -> String {
    "authorize".to_string()
}

/// Request for POST /auth/login_flow/{flow_id}
#[derive(Deserialize)]
pub struct LoginFlowStepRequest {
    pub client_id: String,
    pub user: String,
}

/// Login flow step response
#[derive(Serialize)]
pub struct LoginFlowResponse {
    pub flow_id: String,
    pub handler: (String, Option<String>),
    pub step_id: String,
    #[serde(rename = "type")]
    pub result_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<Vec<DataSchemaItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Data schema item for form fields
#[derive(Serialize)]
pub struct DataSchemaItem {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    /// `[value, label]` pairs for select fields
    pub options: Vec<(String, String)>,
}

/// Error response
#[derive(Serialize)]
pub struct AuthErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_code: Option<String>,
}

fn error_response(status: StatusCode, message: &str, message_code: Option<&str>) -> Response {
    (
        status,
        Json(AuthErrorResponse {
            message: message.to_string(),
            message_code: message_code.map(str::to_string),
        }),
    )
        .into_response()
}

/// Build the HA login flow JSON for a step result
fn flow_response(
    handler: (String, Option<String>),
    step: FlowStep,
    errors: Option<HashMap<String, String>>,
) -> LoginFlowResponse {
    let mut response = LoginFlowResponse {
        flow_id: step.flow_id,
        handler,
        step_id: "init".to_string(),
        result_type: String::new(),
        data_schema: None,
        errors: None,
        reason: None,
        result: None,
    };

    match step.result {
        FlowResult::AwaitingInput(users) => {
            response.result_type = "form".to_string();
            response.data_schema = Some(vec![DataSchemaItem {
                name: "user".to_string(),
                field_type: "select".to_string(),
                required: true,
                options: users.into_iter().collect(),
            }]);
            response.errors = Some(errors.unwrap_or_default());
        }
        FlowResult::Finished(credential) => {
            response.result_type = "create_entry".to_string();
            response.result = Some(json!({
                "credential_id": credential.id,
                "user_id": credential.bound_user_id(),
            }));
        }
        FlowResult::Aborted(reason) => {
            response.result_type = "abort".to_string();
            response.reason = Some(reason.to_string());
        }
    }

    response
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid JSON: {}", e),
            Some("invalid_json"),
        )
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /auth/providers - List available auth providers
pub async fn get_providers(State(auth): State<AuthState>) -> impl IntoResponse {
    let provider = auth.flows.provider();
    Json(ProvidersResponse {
        providers: vec![AuthProvider {
            name: provider.name().to_string(),
            id: provider.id().map(str::to_string),
            provider_type: provider.provider_type().to_string(),
        }],
        preselect_remember_me: false,
    })
}

/// POST /auth/login_flow - Start a new login flow
pub async fn create_login_flow(
    State(auth): State<AuthState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let request: LoginFlowInitRequest = match parse_json(&body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    if request.handler != auth.handler() {
        return error_response(StatusCode::NOT_FOUND, "Invalid handler specified", None);
    }
    if request.client_id.is_empty() || request.redirect_uri.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid client id or redirect uri", None);
    }

    info!(
        "create_login_flow: client_id={}, type={}, remote={}",
        request.client_id,
        request.flow_type,
        peer.ip()
    );

    match auth.flows.start(peer.ip()).await {
        Ok(step) => Json(flow_response(auth.handler(), step, None)).into_response(),
        Err(e) => auth_error_response(e),
    }
}

/// POST /auth/login_flow/{flow_id} - Submit the selected user
pub async fn submit_login_flow(
    State(auth): State<AuthState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(flow_id): Path<String>,
    body: Bytes,
) -> Response {
    let request: LoginFlowStepRequest = match parse_json(&body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    let Some(flow) = auth.flows.get(&flow_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Invalid flow specified", None);
    };

    // A flow belongs to the address that started it
    if flow.ip_address() != peer.ip() {
        warn!(
            "submit_login_flow: flow {} started from {}, submitted from {}",
            flow_id,
            flow.ip_address(),
            peer.ip()
        );
        return error_response(StatusCode::BAD_REQUEST, "IP address changed", None);
    }

    info!("submit_login_flow: flow_id={}, client_id={}", flow_id, request.client_id);

    match auth.flows.step(&flow_id, &request.user).await {
        Ok(step) => Json(flow_response(auth.handler(), step, None)).into_response(),
        Err(AuthError::InvalidSelection { .. }) => {
            let step = FlowStep {
                flow_id,
                result: FlowResult::AwaitingInput(flow.available_users().clone()),
            };
            let errors = HashMap::from([("user".to_string(), "invalid_user".to_string())]);
            (
                StatusCode::BAD_REQUEST,
                Json(flow_response(auth.handler(), step, Some(errors))),
            )
                .into_response()
        }
        Err(e) => auth_error_response(e),
    }
}

fn auth_error_response(error: AuthError) -> Response {
    match error {
        AuthError::UnknownFlow { .. } | AuthError::FlowFinished { .. } => {
            error_response(StatusCode::NOT_FOUND, "Invalid flow specified", None)
        }
        AuthError::InvalidUser { .. } => {
            error_response(StatusCode::BAD_REQUEST, "Invalid user", Some("invalid_user"))
        }
        other => {
            warn!("login flow failed: {}", other);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login flow failed",
                Some("unknown_error"),
            )
        }
    }
}

//! Local HTTP control API for the chat session.
//!
//! Lets other processes (status bars, editor plugins) read the chat view
//! and drive the session. Runs on 127.0.0.1:8768 (configurable) using axum
//! and only talks to the controller through its command channel.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::session::{Command, SessionState, SessionView};
use crate::transcript::Turn;

#[derive(Clone)]
pub struct ApiState {
    pub commands: mpsc::Sender<Command>,
    pub view: watch::Receiver<SessionView>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SubmitRequest {
    prompt: String,
}

#[derive(Serialize)]
struct StatusResponse {
    state: SessionState,
    speaking: bool,
    turns: usize,
    user_name: Option<String>,
    attached_image: Option<String>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/transcript", get(handle_transcript))
        .route("/submit", post(handle_submit))
        .route("/stop", post(handle_stop))
        .route("/new-chat", post(handle_new_chat))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let view = state.view.borrow();
    Json(StatusResponse {
        state: view.state,
        speaking: view.speaking,
        turns: view.turns.len(),
        user_name: view.user_name.clone(),
        attached_image: view.attached_image.clone(),
    })
}

async fn handle_transcript(State(state): State<ApiState>) -> Json<Vec<Turn>> {
    Json(state.view.borrow().turns.clone())
}

async fn handle_submit(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> Json<SimpleResponse> {
    if req.prompt.trim().is_empty() {
        return Json(SimpleResponse::err("empty prompt"));
    }
    let busy = state.view.borrow().state != SessionState::Idle;
    if busy {
        return Json(SimpleResponse::err("a reply is already in progress"));
    }

    info!("HTTP /submit: {} chars", req.prompt.len());
    send(&state, Command::Submit(req.prompt), "submitted").await
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    send(&state, Command::Stop, "stopped").await
}

async fn handle_new_chat(State(state): State<ApiState>) -> Json<SimpleResponse> {
    let busy = state.view.borrow().state != SessionState::Idle;
    if busy {
        return Json(SimpleResponse::err("a reply is already in progress"));
    }
    send(&state, Command::NewChat, "cleared").await
}

async fn send(state: &ApiState, command: Command, status: &str) -> Json<SimpleResponse> {
    match state.commands.send(command).await {
        Ok(()) => Json(SimpleResponse::ok(status)),
        Err(_) => Json(SimpleResponse::err("session closed")),
    }
}

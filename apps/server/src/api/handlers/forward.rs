//! Forward trigger handlers

use crate::{
    request_context::RequestContext,
    services::forward::{Flavor, ForwardReport},
    state::AppState,
    Error, Result,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

/// Trigger payload
#[derive(Debug, Deserialize)]
pub struct ForwardEvent {
    #[serde(default)]
    pub uuid: Option<String>,
}

impl ForwardEvent {
    /// Parse a trigger body; the root id must be present and non-blank.
    pub fn root_id(body: &[u8]) -> Result<String> {
        let event: ForwardEvent = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidRequest(format!("Invalid event body: {e}")))?;
        match event.uuid.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(Error::InvalidRequest(
                "Event body must carry a non-empty 'uuid'".to_string(),
            )),
        }
    }
}

/// `POST /forwarder/_event`
pub async fn forward_event(
    State(state): State<AppState>,
    context: Option<Extension<RequestContext>>,
    body: Bytes,
) -> Result<Response> {
    run_flavor(state, Flavor::Encounter, context, body).await
}

/// `POST /forwarder/:flavor/_event`
pub async fn forward_flavor_event(
    State(state): State<AppState>,
    Path(flavor): Path<String>,
    context: Option<Extension<RequestContext>>,
    body: Bytes,
) -> Result<Response> {
    let flavor: Flavor = flavor.parse()?;
    run_flavor(state, flavor, context, body).await
}

async fn run_flavor(
    state: AppState,
    flavor: Flavor,
    context: Option<Extension<RequestContext>>,
    body: Bytes,
) -> Result<Response> {
    let root_id = ForwardEvent::root_id(&body)?;
    let run_id = context
        .map(|Extension(ctx)| ctx.run_id().to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // The run lives on its own task so uploads already issued finish even
    // when the caller disconnects; the guard stops new ones.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let guard = CancelOnDrop::new(cancel_tx);

    let service = state.forward_service.clone();
    let task = tokio::spawn(async move { service.run(flavor, &root_id, &run_id, cancel_rx).await });

    let report = task
        .await
        .map_err(|e| Error::Internal(format!("Forward task failed: {e}")))?;
    guard.disarm();

    Ok(report_response(report))
}

/// Shape a run report into the trigger response.
pub fn report_response(report: ForwardReport) -> Response {
    let mut body = json!({
        "uuid": report.uuid,
        "sent": report.sent,
    });
    if !report.notes.is_empty() {
        body["notes"] = json!(report.notes);
    }

    match report.failure {
        None => {
            body["status"] = json!(report.status.as_str());
            (StatusCode::OK, Json(body)).into_response()
        }
        Some(failure) => {
            body["error"] = json!(failure.error.public_message());
            body["step"] = json!(failure.step.as_str());
            (failure.error.status_code(), Json(body)).into_response()
        }
    }
}

/// Flags the run as cancelled unless disarmed before being dropped.
struct CancelOnDrop {
    sender: Option<watch::Sender<bool>>,
}

impl CancelOnDrop {
    fn new(sender: watch::Sender<bool>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    fn disarm(mut self) {
        self.sender.take();
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            tracing::warn!("Trigger request dropped, cancelling forward run");
            sender.send_replace(true);
        }
    }
}

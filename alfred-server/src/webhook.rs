use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Extension, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use alfred_core::event::{DELIVERY_HEADER, EVENT_HEADER};
use alfred_core::signature::SIGNATURE_HEADER;
use alfred_core::{classify, verify_github_signature, Classification};

use crate::dispatch::{DispatchError, Precondition};
use crate::AppState;

/// Largest body accepted on the webhook routes.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Identifier attached to every webhook request for log correlation.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
    pub request_id: String,
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let request_id = RequestId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let Some(signature) = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        warn!(request_id = %request_id.0, "Missing webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!(request_id = %request_id.0, "Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // The handler gets the exact bytes that were verified.
    let mut new_request = Request::from_parts(parts, Body::from(bytes));
    new_request.extensions_mut().insert(request_id);

    Ok(next.run(new_request).await)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let event_type = header_value(&headers, EVENT_HEADER);
    let delivery = header_value(&headers, DELIVERY_HEADER);

    let span = info_span!(
        "webhook",
        request_id = %request_id.0,
        event = event_type.as_deref().unwrap_or("-"),
        delivery = delivery.as_deref().unwrap_or("-"),
    );

    let (status, message) = handle_webhook(&state, event_type, delivery, &body)
        .instrument(span)
        .await;

    (
        status,
        Json(WebhookResponse {
            message,
            request_id: request_id.0,
        }),
    )
}

async fn handle_webhook(
    state: &AppState,
    event_type: Option<String>,
    delivery: Option<String>,
    body: &[u8],
) -> (StatusCode, String) {
    info!("Received webhook payload");

    let Some(event_type) = event_type else {
        warn!("Missing {} header", EVENT_HEADER);
        return (
            StatusCode::BAD_REQUEST,
            format!("missing {} header", EVENT_HEADER),
        );
    };

    let event = match classify(&event_type, body) {
        Ok(Classification::Handled(event)) => event,
        Ok(Classification::NotHandled { reason, .. }) => {
            info!("Not handled: {}", reason);
            return (StatusCode::OK, format!("not handled: {}", reason));
        }
        Err(e) => {
            warn!("Malformed {} payload: {}", event_type, e);
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    info!("Dispatching {}", event.name());

    match state.dispatcher.dispatch(event, delivery.as_deref()).await {
        Ok(outcome) => {
            info!("Webhook handled: {}", outcome);
            (StatusCode::OK, outcome.to_string())
        }
        Err(e) => {
            let status = dispatch_status(&e);
            if status.is_server_error() {
                error!("Webhook failed: {}", e);
            } else {
                warn!("Webhook rejected: {}", e);
            }
            (status, e.to_string())
        }
    }
}

/// HTTP status for a failed dispatch.
///
/// Infrastructure failures are 5xx so GitHub redelivers; rejected input and
/// failed guards are 4xx.
pub fn dispatch_status(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::Syntax(_) => StatusCode::BAD_REQUEST,
        DispatchError::Precondition(Precondition::NotFound(_)) => StatusCode::NOT_FOUND,
        DispatchError::Precondition(
            Precondition::AlreadyExists(_) | Precondition::InvalidState(_),
        ) => StatusCode::CONFLICT,
        DispatchError::Store(_) | DispatchError::Stream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DispatchError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/webhook", post(github_webhook_handler))
        .route("/api/webhook/install", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::stream::StreamError;
    use alfred_core::CommandSyntaxError;

    #[test]
    fn test_dispatch_status_mapping() {
        let cases = [
            (
                DispatchError::Syntax(CommandSyntaxError::NotAPositiveInteger {
                    verb: "/bounty",
                    value: "x".to_string(),
                    usage: "/bounty <amount> <@user>",
                }),
                StatusCode::BAD_REQUEST,
            ),
            (
                DispatchError::Precondition(Precondition::NotFound("x".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                DispatchError::Precondition(Precondition::AlreadyExists("x".to_string())),
                StatusCode::CONFLICT,
            ),
            (
                DispatchError::Precondition(Precondition::InvalidState("x".to_string())),
                StatusCode::CONFLICT,
            ),
            (
                DispatchError::Store(StoreError::storage("commit", "disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DispatchError::Stream(StreamError::Connection("refused".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DispatchError::Timeout {
                    operation: "transaction",
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(dispatch_status(&error), expected, "{}", error);
        }
    }

    #[test]
    fn test_header_value() {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, "issues".parse().unwrap());
        assert_eq!(header_value(&headers, EVENT_HEADER), Some("issues".to_string()));
        assert_eq!(header_value(&headers, DELIVERY_HEADER), None);
    }
}

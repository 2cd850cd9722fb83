use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::api::handler::AppState;
use crate::error::AppError;

/// Verify the courier's shared secret on webhook calls.
///
/// The courier sends it as `X-API-KEY` (some of their integrations use
/// `X-WEBHOOK-KEY`); either header is accepted.
pub async fn verify_webhook_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.webhook_secret.is_empty() {
        error!("No webhook secret configured, rejecting courier webhook");
        return AppError::Config("webhook authentication not configured".to_string())
            .into_response();
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .or_else(|| request.headers().get("x-webhook-key"))
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if key == state.webhook_secret => next.run(request).await,
        _ => {
            warn!("Invalid or missing webhook authentication");
            AppError::Unauthorized.into_response()
        }
    }
}

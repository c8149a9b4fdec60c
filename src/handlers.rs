use crate::config::Config;
use crate::errors::AppError;
use crate::forecast_client::ForecastClient;
use crate::forecast_models::{ForecastRequest, ForecastResult};
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Serialized forecast client shared by every request.
    pub forecast_client: Arc<ForecastClient>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and the number of queued forecasts.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "adops-forecast",
            "version": env!("CARGO_PKG_VERSION"),
            "network_code": state.config.network_code,
            "queued_forecasts": state.forecast_client.pending()
        })),
    )
}

/// POST /api/v1/forecasts
///
/// Runs an availability forecast for a prospective line item.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - Flight dates, creative sizes and targeting.
///
/// # Returns
///
/// * `Result<Json<ForecastResult>, AppError>` - The forecast or an error. Remote
///   faults are returned with their fault string untouched.
pub async fn request_forecast(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForecastRequest>,
) -> Result<Json<ForecastResult>, AppError> {
    tracing::info!(
        "POST /forecasts - {} sizes, start {}, end {}",
        request.creative_sizes.len(),
        request.date_range.start,
        request.date_range.end
    );

    let forecast = state.forecast_client.request_forecast(request).await?;

    Ok(Json(forecast))
}

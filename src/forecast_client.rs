//! Availability forecasts against the Ad Manager ForecastService.
//!
//! Each call runs `Queued -> Authorizing -> Compiling -> InFlight ->
//! {Decoded | Faulted}`. Everything from authorization to decoding happens
//! inside one scheduler slot, so at most one request reaches the remote
//! service at a time. Ad unit name enrichment runs afterwards, outside the
//! slot, and can never fail the call.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ad_unit_directory::{AdUnitDirectory, BoardAdUnitDirectory, CachedAdUnitDirectory};
use crate::config::{Config, ForecastSettings};
use crate::credential_cache::{CredentialCache, OAuthTokenExchanger, SystemClock};
use crate::errors::{AppError, ForecastError};
use crate::forecast_models::{ForecastRequest, ForecastResult};
use crate::scheduler::RequestScheduler;
use crate::soap_compiler;
use crate::soap_decoder::{self, DecodedResponse};

/// Raw HTTP outcome of a forecast POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends a compiled SOAP body to the forecast endpoint.
#[async_trait]
pub trait ForecastTransport: Send + Sync {
    async fn post(&self, token: &str, body: String) -> Result<TransportResponse, ForecastError>;
}

/// Transport over HTTPS with `reqwest`.
#[derive(Clone)]
pub struct HttpForecastTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpForecastTransport {
    /// Creates a new `HttpForecastTransport`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Full URL of the ForecastService.
    pub fn new(endpoint: String) -> Result<Self, ForecastError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                ForecastError::Transport(format!("Failed to create forecast client: {}", e))
            })?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ForecastTransport for HttpForecastTransport {
    async fn post(&self, token: &str, body: String) -> Result<TransportResponse, ForecastError> {
        debug!("POST {} ({} bytes)", self.endpoint, body.len());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml;charset=UTF-8")
            .header("Authorization", format!("Bearer {}", token))
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}

/// Lifecycle of one forecast call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Queued,
    Authorizing,
    Compiling,
    InFlight,
    Decoded,
    Faulted,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Queued => "queued",
            CallState::Authorizing => "authorizing",
            CallState::Compiling => "compiling",
            CallState::InFlight => "in_flight",
            CallState::Decoded => "decoded",
            CallState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

fn transition(call_id: Uuid, state: CallState) {
    debug!(%call_id, %state, "forecast call state");
}

/// Entry point for availability forecasts.
pub struct ForecastClient {
    scheduler: RequestScheduler,
    credentials: Arc<CredentialCache>,
    transport: Arc<dyn ForecastTransport>,
    settings: Arc<ForecastSettings>,
    directory: Option<Arc<dyn AdUnitDirectory>>,
}

impl ForecastClient {
    pub fn new(
        scheduler: RequestScheduler,
        credentials: Arc<CredentialCache>,
        transport: Arc<dyn ForecastTransport>,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            scheduler,
            credentials,
            transport,
            settings: Arc::new(settings),
            directory: None,
        }
    }

    /// Enables ad unit name enrichment from `directory`.
    pub fn with_directory(mut self, directory: Arc<dyn AdUnitDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Wires the production client from configuration.
    ///
    /// # Returns
    ///
    /// * `Result<Self, AppError>` - The client, or the HTTP client setup error.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let exchanger = OAuthTokenExchanger::new(
            config.token_url.clone(),
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
            config.oauth_refresh_token.clone(),
        )
        .map_err(|e| AppError::InternalError(e.to_string()))?;

        let credentials = CredentialCache::new(
            Arc::new(exchanger),
            Arc::new(SystemClock),
            config.token_refresh_margin(),
        );

        let transport = HttpForecastTransport::new(config.forecast_url.clone())
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        let client = Self::new(
            RequestScheduler::new(config.forecast_queue_capacity),
            Arc::new(credentials),
            Arc::new(transport),
            config.forecast_settings(),
        );

        match config.board {
            Some(ref board) => {
                let board_directory = BoardAdUnitDirectory::new(board)?;
                let directory = CachedAdUnitDirectory::new(Arc::new(board_directory));
                Ok(client.with_directory(Arc::new(directory)))
            }
            None => Ok(client),
        }
    }

    /// Number of forecast calls waiting behind the one in flight.
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Requests an availability forecast.
    ///
    /// The request is validated before it is queued, so a malformed request
    /// never waits behind other calls or touches the network.
    ///
    /// # Arguments
    ///
    /// * `request` - Flight dates, creative sizes and targeting.
    ///
    /// # Returns
    ///
    /// * `Result<ForecastResult, ForecastError>` - The forecast, with ad unit
    ///   names attached when they could be resolved.
    pub async fn request_forecast(
        &self,
        request: ForecastRequest,
    ) -> Result<ForecastResult, ForecastError> {
        let call_id = Uuid::new_v4();
        soap_compiler::validate(&request)?;

        info!(
            %call_id,
            "Forecast requested: {} sizes, {} ad units, start {}",
            request.creative_sizes.len(),
            request.targeted_ad_unit_ids.len(),
            request.date_range.start
        );
        transition(call_id, CallState::Queued);

        let forecast = self
            .scheduler
            .enqueue(run_forecast(
                call_id,
                Arc::clone(&self.credentials),
                Arc::clone(&self.transport),
                Arc::clone(&self.settings),
                request.clone(),
            ))
            .await??;

        let names = self.resolve_ad_unit_names(call_id, &request).await;
        Ok(forecast.with_ad_unit_names(names))
    }

    async fn resolve_ad_unit_names(
        &self,
        call_id: Uuid,
        request: &ForecastRequest,
    ) -> BTreeMap<i64, String> {
        let Some(directory) = self.directory.as_ref() else {
            return BTreeMap::new();
        };
        let ids = request.referenced_ad_unit_ids();
        if ids.is_empty() {
            return BTreeMap::new();
        }

        match directory.resolve_names(&ids).await {
            Ok(names) => names,
            Err(e) => {
                warn!(%call_id, "Ad unit name lookup failed, continuing without names: {}", e);
                BTreeMap::new()
            }
        }
    }
}

async fn run_forecast(
    call_id: Uuid,
    credentials: Arc<CredentialCache>,
    transport: Arc<dyn ForecastTransport>,
    settings: Arc<ForecastSettings>,
    request: ForecastRequest,
) -> Result<ForecastResult, ForecastError> {
    transition(call_id, CallState::Authorizing);
    let token = credentials.get_access_token().await?;

    transition(call_id, CallState::Compiling);
    let body = soap_compiler::compile(&request, &settings)?;

    transition(call_id, CallState::InFlight);
    let response = transport.post(&token, body).await?;

    match soap_decoder::decode(&response.body, response.status)? {
        DecodedResponse::Forecast(forecast) => {
            transition(call_id, CallState::Decoded);
            info!(
                %call_id,
                "✓ Forecast decoded: {} available, {} matched",
                forecast.available_units,
                forecast.matched_units
            );
            Ok(forecast)
        }
        DecodedResponse::Fault(fault) => {
            transition(call_id, CallState::Faulted);
            warn!(%call_id, status = response.status, "Forecast fault: {}", fault);
            Err(ForecastError::RemoteFault(fault))
        }
    }
}

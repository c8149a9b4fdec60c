use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_VERSION: &str = "v202405";
pub const DEFAULT_TIME_ZONE: &str = "America/New_York";
pub const DEFAULT_APPLICATION_NAME: &str = "adops-forecast";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_BOARD_API_URL: &str = "https://api.monday.com/v2";
pub const DEFAULT_AD_UNIT_ID_COLUMN: &str = "ad_unit_id";
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub network_code: String,
    pub application_name: String,
    pub api_version: String,
    pub forecast_url: String,
    pub time_zone_id: String,
    pub token_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_refresh_token: String,
    pub token_refresh_margin_secs: u64,
    pub forecast_queue_capacity: usize,
    pub board: Option<BoardConfig>,
}

/// Connection details for the project-management board holding ad unit names.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    pub api_url: String,
    pub api_token: String,
    pub board_id: String,
    pub ad_unit_id_column: String,
}

/// Values fixed for the lifetime of the process that shape every forecast
/// request: the SOAP header identity, schema version and operational time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSettings {
    pub network_code: String,
    pub application_name: String,
    pub api_version: String,
    pub time_zone_id: String,
}

impl ForecastSettings {
    pub fn new(network_code: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self {
            network_code: network_code.into(),
            application_name: application_name.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            time_zone_id: DEFAULT_TIME_ZONE.to_string(),
        }
    }

    /// XML namespace of the publisher API for this schema version.
    pub fn namespace(&self) -> String {
        format!(
            "https://www.google.com/apis/ads/publisher/{}",
            self.api_version
        )
    }
}

/// Default ForecastService endpoint for a schema version.
pub fn default_forecast_url(api_version: &str) -> String {
    format!(
        "https://ads.google.com/apis/ads/publisher/{}/ForecastService",
        api_version
    )
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, value: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(&value)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_version =
            optional("AD_MANAGER_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let board = match (optional("BOARD_API_TOKEN"), optional("AD_UNIT_BOARD_ID")) {
            (Some(api_token), Some(board_id)) => Some(BoardConfig {
                api_url: http_url(
                    "BOARD_API_URL",
                    optional("BOARD_API_URL").unwrap_or_else(|| DEFAULT_BOARD_API_URL.to_string()),
                )?,
                api_token,
                board_id,
                ad_unit_id_column: optional("AD_UNIT_ID_COLUMN")
                    .unwrap_or_else(|| DEFAULT_AD_UNIT_ID_COLUMN.to_string()),
            }),
            _ => None,
        };

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            network_code: required("AD_MANAGER_NETWORK_CODE").and_then(|code| {
                if !code.chars().all(|c| c.is_ascii_digit()) {
                    anyhow::bail!("AD_MANAGER_NETWORK_CODE must be numeric");
                }
                Ok(code)
            })?,
            application_name: optional("AD_MANAGER_APPLICATION_NAME")
                .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string()),
            forecast_url: http_url(
                "AD_MANAGER_FORECAST_URL",
                optional("AD_MANAGER_FORECAST_URL")
                    .unwrap_or_else(|| default_forecast_url(&api_version)),
            )?,
            api_version,
            time_zone_id: optional("AD_MANAGER_TIME_ZONE")
                .unwrap_or_else(|| DEFAULT_TIME_ZONE.to_string()),
            token_url: http_url(
                "OAUTH_TOKEN_URL",
                optional("OAUTH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            )?,
            oauth_client_id: required("OAUTH_CLIENT_ID")?,
            oauth_client_secret: required("OAUTH_CLIENT_SECRET")?,
            oauth_refresh_token: required("OAUTH_REFRESH_TOKEN")?,
            token_refresh_margin_secs: optional("TOKEN_REFRESH_MARGIN_SECS")
                .map(|v| v.parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("TOKEN_REFRESH_MARGIN_SECS must be a number"))?
                .unwrap_or(DEFAULT_REFRESH_MARGIN_SECS),
            forecast_queue_capacity: optional("FORECAST_QUEUE_CAPACITY")
                .map(|v| v.parse::<usize>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("FORECAST_QUEUE_CAPACITY must be a number"))?
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            board,
        };

        if config.forecast_queue_capacity == 0 {
            anyhow::bail!("FORECAST_QUEUE_CAPACITY must be greater than zero");
        }

        // Log successful configuration load (without secrets)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Forecast URL: {}", config.forecast_url);
        tracing::debug!("Network code: {}", config.network_code);
        tracing::debug!("Time zone: {}", config.time_zone_id);
        match config.board {
            Some(ref board) => tracing::info!("Ad unit board configured: {}", board.board_id),
            None => tracing::info!("No ad unit board configured, name enrichment disabled"),
        }

        Ok(config)
    }

    pub fn forecast_settings(&self) -> ForecastSettings {
        ForecastSettings {
            network_code: self.network_code.clone(),
            application_name: self.application_name.clone(),
            api_version: self.api_version.clone(),
            time_zone_id: self.time_zone_id.clone(),
        }
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

//! Ad Manager Forecast Client Library
//!
//! Requests availability forecasts from the Ad Manager SOAP ForecastService on
//! behalf of the ad operations host. Calls share one OAuth access token and go
//! out strictly one at a time.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Forecast pipeline (credentials, scheduling, SOAP encoding and decoding).
//! - `integrations`: External service integrations.
//! - `ad_unit_directory`: Ad unit display names from the project board.
//! - `circuit_breaker`: Circuit breaker for the ad unit directory.
//! - `config`: Configuration management.
//! - `credential_cache`: Single-flight OAuth access token cache.
//! - `errors`: Error handling types.
//! - `forecast_client`: Forecast orchestration.
//! - `forecast_models`: Request and result models.
//! - `handlers`: HTTP request handlers.
//! - `scheduler`: FIFO one-at-a-time request scheduler.
//! - `soap_compiler`: Forecast request to SOAP envelope.
//! - `soap_decoder`: SOAP response to forecast result or fault.

pub mod api;
pub mod core;
pub mod integrations;

pub mod ad_unit_directory;
pub mod circuit_breaker;
pub mod config;
pub mod credential_cache;
pub mod errors;
pub mod forecast_client;
pub mod forecast_models;
pub mod handlers;
pub mod scheduler;
pub mod soap_compiler;
pub mod soap_decoder;

/// Integration tests with mocked external APIs
/// Exercises the full forecast pipeline (token endpoint, ForecastService, board)
/// without hitting real external services
use adops_forecast::config::{BoardConfig, Config};
use adops_forecast::errors::{AppError, CredentialError, ForecastError};
use adops_forecast::forecast_client::ForecastClient;
use adops_forecast::forecast_models::ForecastRequest;
use adops_forecast::handlers::{self, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORECAST_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header><ResponseHeader xmlns="https://www.google.com/apis/ads/publisher/v202405"><requestId>abc</requestId></ResponseHeader></soap:Header>
  <soap:Body>
    <getAvailabilityForecastResponse xmlns="https://www.google.com/apis/ads/publisher/v202405">
      <rval>
        <availableUnits>1000000</availableUnits>
        <deliveredUnits>0</deliveredUnits>
        <matchedUnits>950000</matchedUnits>
        <possibleUnits>1200000</possibleUnits>
        <reservedUnits>0</reservedUnits>
        <contendingLineItems>
          <lineItemId>555</lineItemId>
          <contendingImpressions>20000</contendingImpressions>
        </contendingLineItems>
      </rval>
    </getAvailabilityForecastResponse>
  </soap:Body>
</soap:Envelope>"#;

const FAULT_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Server</faultcode>
      <faultstring>[AuthenticationError.NETWORK_NOT_FOUND @ ]</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;

/// Helper function to create test config pointing at the mock server
fn create_test_config(base_url: &str, board: Option<BoardConfig>) -> Config {
    Config {
        port: 8080,
        network_code: "1234".to_string(),
        application_name: "adops-forecast-tests".to_string(),
        api_version: "v202405".to_string(),
        forecast_url: format!("{}/apis/ads/publisher/v202405/ForecastService", base_url),
        time_zone_id: "America/New_York".to_string(),
        token_url: format!("{}/token", base_url),
        oauth_client_id: "client-id".to_string(),
        oauth_client_secret: "client-secret".to_string(),
        oauth_refresh_token: "refresh-token".to_string(),
        token_refresh_margin_secs: 300,
        forecast_queue_capacity: 8,
        board,
    }
}

fn create_request() -> ForecastRequest {
    serde_json::from_value(serde_json::json!({
        "dateRange": { "start": "immediate", "end": "2025-12-31" },
        "creativeSizes": [{ "width": 300, "height": 250 }],
        "targetedAdUnitIds": [123]
    }))
    .unwrap()
}

async fn mount_token(mock_server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.mock",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(expected_calls)
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_forecast_round_trip_reuses_token() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .and(header("Authorization", "Bearer ya29.mock"))
        .and(header("Content-Type", "text/xml;charset=UTF-8"))
        .and(body_string_contains("<networkCode>1234</networkCode>"))
        .and(body_string_contains("<adUnitId>123</adUnitId>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORECAST_RESPONSE))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), None);
    let client = ForecastClient::from_config(&config).unwrap();

    let first = client.request_forecast(create_request()).await.unwrap();
    let second = client.request_forecast(create_request()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.available_units, 1_000_000);
    assert_eq!(first.matched_units, 950_000);
    assert_eq!(first.possible_units, 1_200_000);
    assert_eq!(first.contending_line_items.len(), 1);
    assert_eq!(first.contending_line_items[0].line_item_id, 555);
    assert_eq!(first.contending_line_items[0].contending_impressions, 20_000);
}

#[tokio::test]
async fn test_fault_string_returned_verbatim() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .respond_with(ResponseTemplate::new(500).set_body_string(FAULT_RESPONSE))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), None);
    let client = ForecastClient::from_config(&config).unwrap();

    match client.request_forecast(create_request()).await {
        Err(ForecastError::RemoteFault(fault)) => {
            assert_eq!(fault.fault_string, "[AuthenticationError.NETWORK_NOT_FOUND @ ]");
        }
        other => panic!("Expected remote fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_refresh_token_never_posts_forecast() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORECAST_RESPONSE))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), None);
    let client = ForecastClient::from_config(&config).unwrap();

    let result = client.request_forecast(create_request()).await;
    assert!(matches!(
        result,
        Err(ForecastError::Credential(CredentialError::Rejected { status: 400, .. }))
    ));
}

#[tokio::test]
async fn test_board_names_attached_to_forecast() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORECAST_RESPONSE))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/board"))
        .and(header("Authorization", "board-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "items_page_by_column_values": {
                    "items": [
                        { "name": "Homepage Leaderboard", "column_values": [{ "text": "123" }] }
                    ]
                }
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let board = BoardConfig {
        api_url: format!("{}/board", mock_server.uri()),
        api_token: "board-token".to_string(),
        board_id: "987".to_string(),
        ad_unit_id_column: "ad_unit_id".to_string(),
    };
    let config = create_test_config(&mock_server.uri(), Some(board));
    let client = ForecastClient::from_config(&config).unwrap();

    let result = client.request_forecast(create_request()).await.unwrap();
    assert_eq!(
        result.ad_unit_names.get(&123).map(String::as_str),
        Some("Homepage Leaderboard")
    );

    // Second call is served from the name cache
    client.request_forecast(create_request()).await.unwrap();
}

#[tokio::test]
async fn test_board_outage_does_not_fail_forecast() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORECAST_RESPONSE))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/board"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let board = BoardConfig {
        api_url: format!("{}/board", mock_server.uri()),
        api_token: "board-token".to_string(),
        board_id: "987".to_string(),
        ad_unit_id_column: "ad_unit_id".to_string(),
    };
    let config = create_test_config(&mock_server.uri(), Some(board));
    let client = ForecastClient::from_config(&config).unwrap();

    let result = client.request_forecast(create_request()).await.unwrap();
    assert_eq!(result.available_units, 1_000_000);
    assert!(result.ad_unit_names.is_empty());
}

#[tokio::test]
async fn test_handler_maps_errors_to_status_codes() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/apis/ads/publisher/v202405/ForecastService"))
        .respond_with(ResponseTemplate::new(500).set_body_string(FAULT_RESPONSE))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), None);
    let client = ForecastClient::from_config(&config).unwrap();
    let state = Arc::new(AppState {
        config,
        forecast_client: Arc::new(client),
    });

    let fault = handlers::request_forecast(State(state.clone()), Json(create_request()))
        .await
        .unwrap_err();
    assert!(matches!(fault, AppError::RemoteFault(ref msg) if msg.contains("NETWORK_NOT_FOUND")));
    assert_eq!(fault.into_response().status(), StatusCode::BAD_GATEWAY);

    let mut invalid = create_request();
    invalid.creative_sizes.clear();
    let bad_request = handlers::request_forecast(State(state), Json(invalid))
        .await
        .unwrap_err();
    assert_eq!(bad_request.into_response().status(), StatusCode::BAD_REQUEST);
}

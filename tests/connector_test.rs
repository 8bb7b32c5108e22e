use stream_producer::config::ConnectorConfig;
use stream_producer::connector::{configure_connector, ConnectorOutcome, HttpConnectClient};
use stream_producer::testing::{CannedHttpServer, MockConnectClient};
use stream_producer::Error;

#[tokio::test]
async fn test_configured_connector_is_left_alone() {
    let client = MockConnectClient::new().with_existing("stations");

    let outcome = configure_connector(&client, &ConnectorConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome, ConnectorOutcome::AlreadyConfigured);
    assert!(client.posted().is_empty());
}

#[tokio::test]
async fn test_custom_connector_settings_are_posted() {
    let client = MockConnectClient::new();
    let config = ConnectorConfig {
        name: "stops".to_string(),
        table_whitelist: "stops".to_string(),
        incrementing_column: "id".to_string(),
        poll_interval_ms: 3_600_000,
        ..ConnectorConfig::default()
    };

    configure_connector(&client, &config).await.unwrap();

    let posted = client.posted();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].name, "stops");
    assert_eq!(posted[0].config["table.whitelist"], "stops");
    assert_eq!(posted[0].config["incrementing.column.name"], "id");
    assert_eq!(posted[0].config["poll.interval.ms"], "3600000");
    assert_eq!(client.get_calls(), vec!["stops".to_string()]);
}

#[tokio::test]
async fn test_unreachable_control_plane() {
    let config = ConnectorConfig {
        connect_url: "http://127.0.0.1:1".to_string(),
        timeout_secs: 1,
        ..ConnectorConfig::default()
    };
    let client = HttpConnectClient::new(&config).unwrap();

    let err = configure_connector(&client, &config).await.unwrap_err();

    assert!(matches!(err, Error::Http(_)));
}

fn connector_config(server: &CannedHttpServer) -> ConnectorConfig {
    ConnectorConfig {
        connect_url: server.url(),
        timeout_secs: 5,
        ..ConnectorConfig::default()
    }
}

#[tokio::test]
async fn test_http_existing_connector_skips_post() {
    let server = CannedHttpServer::start(vec![(200, r#"{"name": "stations"}"#.to_string())])
        .await
        .unwrap();
    let config = connector_config(&server);
    let client = HttpConnectClient::new(&config).unwrap();

    let outcome = configure_connector(&client, &config).await.unwrap();

    assert_eq!(outcome, ConnectorOutcome::AlreadyConfigured);
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/connectors/stations");
}

#[tokio::test]
async fn test_http_missing_connector_is_created() {
    let server = CannedHttpServer::start(vec![
        (404, r#"{"error_code": 404}"#.to_string()),
        (201, r#"{"name": "stations"}"#.to_string()),
    ])
    .await
    .unwrap();
    let config = connector_config(&server);
    let client = HttpConnectClient::new(&config).unwrap();

    let outcome = configure_connector(&client, &config).await.unwrap();

    assert_eq!(outcome, ConnectorOutcome::Created);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/connectors");

    let body: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(body["name"], "stations");
    assert_eq!(body["config"]["mode"], "incrementing");
    assert_eq!(body["config"]["incrementing.column.name"], "stop_id");
    assert_eq!(body["config"]["key.converter.schemas.enable"], "false");
}

#[tokio::test]
async fn test_http_rejected_post_is_fatal() {
    let server = CannedHttpServer::start(vec![
        (404, r#"{"error_code": 404}"#.to_string()),
        (409, r#"{"error_code": 409, "message": "rebalance in progress"}"#.to_string()),
    ])
    .await
    .unwrap();
    let config = connector_config(&server);
    let client = HttpConnectClient::new(&config).unwrap();

    let err = configure_connector(&client, &config).await.unwrap_err();

    match err {
        Error::Connector { status, body } => {
            assert_eq!(status, 409);
            assert!(body.contains("rebalance in progress"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
#[ignore] // Requires running Kafka Connect
async fn test_live_connector_is_idempotent() {
    let config = ConnectorConfig::default();
    let client = HttpConnectClient::new(&config).unwrap();

    configure_connector(&client, &config).await.unwrap();
    let second = configure_connector(&client, &config).await.unwrap();

    assert_eq!(second, ConnectorOutcome::AlreadyConfigured);
}

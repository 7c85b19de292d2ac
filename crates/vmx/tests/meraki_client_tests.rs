//! Meraki Dashboard client tests against a mock HTTP server.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vmx::config::DashboardConfig;
use vmx::providers::{CreateNetworkRequest, DashboardProvider, Meraki, ProviderError};

const API_KEY: &str = "test-api-key";

fn client(server: &MockServer) -> Meraki {
    let config = DashboardConfig {
        base_url: server.uri(),
        per_page: 2,
        max_pages: 5,
        ..DashboardConfig::default()
    };
    Meraki::from_config(API_KEY, &config).unwrap()
}

#[tokio::test]
async fn test_list_organizations_sends_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/organizations"))
        .and(header("Authorization", format!("Bearer {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "org_1", "name": "Acme", "url": "https://n1.meraki.com/o/abc/manage"},
            {"id": "org_2", "name": "Globex"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let orgs = client(&server).list_organizations().await.unwrap();

    assert_eq!(orgs.len(), 2);
    assert_eq!(orgs[0].id, "org_1");
    assert_eq!(orgs[0].name, "Acme");
    assert!(orgs[1].url.is_none());
}

#[tokio::test]
async fn test_inventory_follows_link_header() {
    let server = MockServer::start().await;
    let inventory = "/organizations/org_1/inventory/devices";
    let next = format!(
        "{}{inventory}?perPage=2&startingAfter=Q2XX-0000-0002",
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path(inventory))
        .and(query_param("perPage", "2"))
        .and(query_param_is_missing("startingAfter"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", format!("<{next}>; rel=next").as_str())
                .set_body_json(json!([
                    {"serial": "Q2XX-0000-0001", "model": "VMX-S", "networkId": null},
                    {"serial": "Q2XX-0000-0002", "model": "MX68", "networkId": "N_1"}
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(inventory))
        .and(query_param("startingAfter", "Q2XX-0000-0002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"serial": "Q2XX-0000-0003", "model": "VMX-M", "productType": "appliance"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let devices = client(&server)
        .list_inventory_devices("org_1")
        .await
        .unwrap();

    let serials: Vec<_> = devices.iter().map(|d| d.serial.as_str()).collect();
    assert_eq!(
        serials,
        vec!["Q2XX-0000-0001", "Q2XX-0000-0002", "Q2XX-0000-0003"]
    );
    assert!(devices[0].is_unassigned());
    assert!(!devices[1].is_unassigned());
    assert_eq!(devices[2].product_type.as_deref(), Some("appliance"));
}

#[tokio::test]
async fn test_pagination_limit_is_enforced() {
    let server = MockServer::start().await;
    let looping = format!("{}/organizations?perPage=2&startingAfter=x", server.uri());

    Mock::given(method("GET"))
        .and(path("/organizations"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", format!("<{looping}>; rel=next").as_str())
                .set_body_json(json!([])),
        )
        .expect(5)
        .mount(&server)
        .await;

    let err = client(&server).list_organizations().await.unwrap_err();
    assert!(matches!(err, ProviderError::Config(_)));
}

#[tokio::test]
async fn test_create_network_posts_appliance_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/organizations/org_1/networks"))
        .and(body_json(json!({
            "name": "Branch-12",
            "productTypes": ["appliance"],
            "timeZone": "Europe/Paris"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "N_42",
            "organizationId": "org_1",
            "name": "Branch-12",
            "productTypes": ["appliance"],
            "timeZone": "Europe/Paris",
            "url": "https://n1.meraki.com/Branch-12/n/abc/manage",
            "tags": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let network = client(&server)
        .create_network(
            "org_1",
            CreateNetworkRequest {
                name: "Branch-12".to_string(),
                product_types: vec!["appliance".to_string()],
                time_zone: "Europe/Paris".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(network.id, "N_42");
    assert_eq!(network.organization_id.as_deref(), Some("org_1"));
    assert_eq!(
        network.url.as_deref(),
        Some("https://n1.meraki.com/Branch-12/n/abc/manage")
    );
}

#[tokio::test]
async fn test_claim_sends_serials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/networks/N_42/devices/claim"))
        .and(body_json(json!({"serials": ["Q2XX-0000-0001"]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .claim_devices("N_42", &["Q2XX-0000-0001".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_claim_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/networks/N_42/devices/claim"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["Device with serial Q2XX-0000-0001 is already claimed"]
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .claim_devices("N_42", &["Q2XX-0000-0001".to_string()])
        .await
        .unwrap_err();

    match &err {
        ProviderError::Api { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(
                message,
                "Device with serial Q2XX-0000-0001 is already claimed"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_create_token_parses_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/devices/Q2XX-0000-0001/appliance/vmx/authenticationToken",
        ))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "tok_abc",
            "expiresAt": "2030-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(&server)
        .create_vmx_token("Q2XX-0000-0001")
        .await
        .unwrap();

    assert_eq!(token.token, "tok_abc");
    assert_eq!(
        token.expires_at.map(|t| t.to_rfc3339()).as_deref(),
        Some("2030-01-01T00:00:00+00:00")
    );
    assert!(!format!("{token:?}").contains("tok_abc"));
}

#[tokio::test]
async fn test_error_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/organizations/org_404/inventory/devices/Q2XX-0000-0001"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": ["Not found"]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/networks/N_401/devices"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"errors": ["Invalid API key"]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/networks/N_429/devices"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "2")
                .set_body_json(json!({"errors": ["Too many requests"]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/networks/N_503/devices"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let meraki = client(&server);

    let err = meraki
        .get_inventory_device("org_404", "Q2XX-0000-0001")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(ref m) if m == "Not found"));

    let err = meraki.list_network_devices("N_401").await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(!err.is_transient());

    let err = meraki.list_network_devices("N_429").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::RateLimited {
            retry_after_secs: Some(2),
            ..
        }
    ));
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(2)));
    assert!(err.is_transient());

    let err = meraki.list_network_devices("N_503").await.unwrap_err();
    assert!(
        matches!(err, ProviderError::Api { status: 503, ref message } if message == "upstream unavailable")
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_delete_missing_network_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/networks/N_42"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).delete_network("N_42").await.unwrap();
}

#[tokio::test]
async fn test_remove_device_sends_serial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/networks/N_42/devices/remove"))
        .and(body_json(json!({"serial": "Q2XX-0000-0001"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .remove_device("N_42", "Q2XX-0000-0001")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let config = DashboardConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        ..DashboardConfig::default()
    };
    let meraki = Meraki::from_config(API_KEY, &config).unwrap();

    let err = meraki.list_organizations().await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)));
    assert!(err.is_transient());
}

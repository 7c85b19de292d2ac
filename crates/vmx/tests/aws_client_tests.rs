//! EC2 client tests against a mock Query API endpoint.

use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use vmx::config::ComputeConfig;
use vmx::providers::aws::{Credentials, Ec2};
use vmx::providers::{
    ComputeProvider, InstanceState, InstanceTag, LaunchInstanceRequest, ProviderError,
};

const RUN_INSTANCES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<RunInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
  <reservationId>r-1234567890abcdef0</reservationId>
  <ownerId>123456789012</ownerId>
  <groupSet/>
  <instancesSet>
    <item>
      <instanceId>i-0123</instanceId>
      <imageId>ami-0abc</imageId>
      <instanceState><code>0</code><name>pending</name></instanceState>
      <privateDnsName/>
      <instanceType>c5.large</instanceType>
      <tagSet>
        <item><key>Name</key><value>Cisco Meraki VMX-S - Branch-12</value></item>
        <item><key>Network</key><value>N_42</value></item>
      </tagSet>
    </item>
  </instancesSet>
</RunInstancesResponse>"#;

fn config(server: &MockServer) -> ComputeConfig {
    ComputeConfig {
        region: "eu-west-3".to_string(),
        endpoint: Some(server.uri()),
        ..ComputeConfig::default()
    }
}

fn client(server: &MockServer) -> Ec2 {
    Ec2::from_config(
        Credentials::new("AKIDEXAMPLE", "secret", None),
        &config(server),
    )
    .unwrap()
}

fn xml(status: u16, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.to_string(), "text/xml;charset=UTF-8")
}

fn error_xml(code: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Errors><Error><Code>{code}</Code><Message>{message}</Message></Error></Errors>\
         <RequestID>ea966190-f9aa-478e-9ede-example</RequestID></Response>"
    )
}

fn signed_for_region(req: &Request) -> bool {
    req.headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/")
                && v.contains("/eu-west-3/ec2/aws4_request")
        })
}

fn launch_request() -> LaunchInstanceRequest {
    LaunchInstanceRequest {
        image_id: "ami-0abc".to_string(),
        instance_type: "c5.large".to_string(),
        user_data: "tok_abc".to_string(),
        tags: vec![
            InstanceTag::new("Name", "Cisco Meraki VMX-S - Branch-12"),
            InstanceTag::new("Network", "N_42"),
        ],
        subnet_id: None,
        security_group_ids: vec![],
        key_name: None,
        client_token: Some("run-0001".to_string()),
    }
}

#[tokio::test]
async fn test_run_instance_signs_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header_exists("x-amz-date"))
        .and(signed_for_region)
        .and(body_string_contains("Action=RunInstances"))
        .and(body_string_contains("Version=2016-11-15"))
        .and(body_string_contains("UserData=dG9rX2FiYw%3D%3D"))
        .and(body_string_contains("TagSpecification.1.Tag.2.Value=N_42"))
        .and(body_string_contains("ClientToken=run-0001"))
        .respond_with(xml(200, RUN_INSTANCES_XML))
        .expect(1)
        .mount(&server)
        .await;

    let instance = client(&server).run_instance(launch_request()).await.unwrap();

    assert_eq!(instance.id, "i-0123");
    assert_eq!(instance.state, InstanceState::Pending);
    assert_eq!(instance.instance_type, "c5.large");
    assert_eq!(instance.tag("Network"), Some("N_42"));
}

#[tokio::test]
async fn test_session_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-amz-security-token", "session-token"))
        .respond_with(xml(200, RUN_INSTANCES_XML))
        .expect(1)
        .mount(&server)
        .await;

    let ec2 = Ec2::from_config(
        Credentials::new("AKIDEXAMPLE", "secret", Some("session-token".to_string())),
        &config(&server),
    )
    .unwrap();

    ec2.run_instance(launch_request()).await.unwrap();
}

#[tokio::test]
async fn test_disable_source_dest_check() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Action=ModifyInstanceAttribute"))
        .and(body_string_contains("InstanceId=i-0123"))
        .and(body_string_contains("SourceDestCheck.Value=false"))
        .respond_with(xml(
            200,
            r#"<ModifyInstanceAttributeResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/"><requestId>r</requestId><return>true</return></ModifyInstanceAttributeResponse>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("InstanceId=i-0456"))
        .respond_with(xml(
            200,
            r#"<ModifyInstanceAttributeResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/"><requestId>r</requestId><return>false</return></ModifyInstanceAttributeResponse>"#,
        ))
        .mount(&server)
        .await;

    let ec2 = client(&server);
    ec2.disable_source_dest_check("i-0123").await.unwrap();

    let err = ec2.disable_source_dest_check("i-0456").await.unwrap_err();
    assert!(matches!(err, ProviderError::Api { .. }));
}

#[tokio::test]
async fn test_find_instances_follows_next_token() {
    let server = MockServer::start().await;
    let page = |id: &str, next: Option<&str>| {
        format!(
            r#"<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>r</requestId>
  <reservationSet>
    <item>
      <reservationId>r-{id}</reservationId>
      <instancesSet>
        <item>
          <instanceId>{id}</instanceId>
          <imageId>ami-0abc</imageId>
          <instanceState><code>16</code><name>running</name></instanceState>
          <instanceType>c5.large</instanceType>
          <tagSet><item><key>Network</key><value>N_42</value></item></tagSet>
        </item>
      </instancesSet>
    </item>
  </reservationSet>
  {}
</DescribeInstancesResponse>"#,
            next.map(|t| format!("<nextToken>{t}</nextToken>"))
                .unwrap_or_default()
        )
    };

    Mock::given(method("POST"))
        .and(body_string_contains("Action=DescribeInstances"))
        .and(body_string_contains("Filter.1.Name=tag%3ANetwork"))
        .and(|req: &Request| !String::from_utf8_lossy(&req.body).contains("NextToken"))
        .respond_with(xml(200, &page("i-0001", Some("page-2"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("NextToken=page-2"))
        .respond_with(xml(200, &page("i-0002", None)))
        .expect(1)
        .mount(&server)
        .await;

    let instances = client(&server)
        .find_instances_by_tag("Network", "N_42")
        .await
        .unwrap();

    let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["i-0001", "i-0002"]);
    assert!(instances.iter().all(|i| i.state == InstanceState::Running));
}

#[tokio::test]
async fn test_terminate_instance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Action=TerminateInstances"))
        .and(body_string_contains("InstanceId.1=i-0123"))
        .respond_with(xml(
            200,
            r#"<TerminateInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>r</requestId>
  <instancesSet>
    <item>
      <instanceId>i-0123</instanceId>
      <currentState><code>32</code><name>shutting-down</name></currentState>
      <previousState><code>16</code><name>running</name></previousState>
    </item>
  </instancesSet>
</TerminateInstancesResponse>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).terminate_instance("i-0123").await.unwrap();
}

#[tokio::test]
async fn test_error_document_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("InstanceId=i-missing"))
        .respond_with(xml(
            400,
            &error_xml("InvalidInstanceID.NotFound", "The instance ID 'i-missing' does not exist"),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("InstanceId=i-throttled"))
        .respond_with(xml(503, &error_xml("RequestLimitExceeded", "Request limit exceeded.")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("InstanceId=i-denied"))
        .respond_with(xml(
            401,
            &error_xml("AuthFailure", "AWS was not able to validate the provided access credentials"),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("InstanceId=i-broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal failure"))
        .mount(&server)
        .await;

    let ec2 = client(&server);

    let err = ec2.disable_source_dest_check("i-missing").await.unwrap_err();
    assert!(
        matches!(err, ProviderError::NotFound(ref m) if m.starts_with("InvalidInstanceID.NotFound:"))
    );

    let err = ec2.disable_source_dest_check("i-throttled").await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
    assert!(err.is_transient());

    let err = ec2.disable_source_dest_check("i-denied").await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));

    let err = ec2.disable_source_dest_check("i-broken").await.unwrap_err();
    assert!(
        matches!(err, ProviderError::Api { status: 500, ref message } if message == "internal failure")
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_undecodable_success_body_is_xml_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(xml(
            200,
            "<ModifyInstanceAttributeResponse><requestId>r</requestId></ModifyInstanceAttributeResponse>",
        ))
        .mount(&server)
        .await;

    let err = client(&server)
        .disable_source_dest_check("i-0123")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Xml(_)));
}

#[tokio::test]
async fn test_undecodable_launch_response_is_xml_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Action=RunInstances"))
        .respond_with(xml(
            200,
            "<RunInstancesResponse><instancesSet><item><imageId>ami-0abc</imageId></item></instancesSet></RunInstancesResponse>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).run_instance(launch_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Xml(_)));
}

#[tokio::test]
async fn test_find_instances_fails_when_pages_never_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Action=DescribeInstances"))
        .respond_with(xml(
            200,
            r#"<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/"><requestId>r</requestId><reservationSet/><nextToken>again</nextToken></DescribeInstancesResponse>"#,
        ))
        .expect(50)
        .mount(&server)
        .await;

    let err = client(&server)
        .find_instances_by_tag("Network", "N_42")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Config(ref m) if m.contains("exceeded 50 pages")));
}

mod support;

use std::time::Duration;

use mcpfinder_core::auth::{AuthProbe, FallbackStage};
use mcpfinder_core::commands::{RegisterCommand, RegisterOptions, RegisterOutcome};
use mcpfinder_core::config::PackageLauncher;
use mcpfinder_core::error::{RegisterError, SubmissionFailure};
use mcpfinder_core::manifest::{AuthType, Manifest};
use mcpfinder_core::registry::{RegistryClient, sign};
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{Answer, FakeConnector, FakeServer, ScriptedOperator, StaticProber};

const SECRET: &str = "pipeline-secret";

fn registry(server: &MockServer, secret: Option<&str>) -> RegistryClient {
    RegistryClient::new(
        Url::parse(&server.uri()).unwrap(),
        secret.map(|s| SecretString::from(s.to_string())),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn command(connector: FakeConnector, probe: AuthProbe, registry: RegistryClient) -> RegisterCommand {
    RegisterCommand::new(
        Box::new(connector),
        Box::new(StaticProber(probe)),
        registry,
        PackageLauncher::default(),
        Duration::from_secs(5),
    )
}

async fn mount_register(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/v1/register"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Manifest bodies the registry received, in order.
async fn submitted(server: &MockServer) -> Vec<(Manifest, Option<String>, Vec<u8>)> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| {
            let authorization = r
                .headers
                .get("authorization")
                .map(|v| v.to_str().unwrap().to_string());
            (serde_json::from_slice(&r.body).unwrap(), authorization, r.body)
        })
        .collect()
}

fn weather_package() -> FakeServer {
    FakeServer::with_tools("weather", &["forecast", "alerts", "radar"])
}

#[tokio::test]
async fn refused_endpoint_registers_as_unanalyzed() {
    let registry_server = MockServer::start().await;
    mount_register(
        &registry_server,
        201,
        json!({ "id": "srv_1", "operation": "created" }),
    )
    .await;

    let connector = FakeConnector::guarded(FakeServer::with_tools("hidden", &["x"]), None);
    let cmd = command(
        connector,
        AuthProbe::default(),
        registry(&registry_server, Some(SECRET)),
    );
    let mut operator = ScriptedOperator::new([
        Answer::Confirm(false), // have a credential?
        Answer::Confirm(false), // declare categories?
        Answer::Input(""),      // description
        Answer::Input(""),      // tags
        Answer::Confirm(false), // requires a credential?
        Answer::Confirm(true),  // submit
    ]);

    let options = RegisterOptions::new().with_locator("https://example.com/mcp");
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();

    let report = match outcome {
        RegisterOutcome::Submitted(report) => report,
        other => panic!("expected submission, got {other:?}"),
    };
    assert_eq!(report.fallback, Some(FallbackStage::MinimalUnknown));
    assert!(!report.capability_only);
    assert_eq!(report.result.id, "srv_1");

    let sent = submitted(&registry_server).await;
    assert_eq!(sent.len(), 1);
    let (manifest, authorization, body) = &sent[0];
    assert_eq!(manifest.name, "example");
    assert_eq!(manifest.url, "https://example.com/mcp");
    assert!(manifest.has_tag("unanalyzed"));
    assert!(manifest.has_tag("auth-required"));
    assert_eq!(manifest.capabilities.len(), 1);
    assert_eq!(manifest.capabilities[0].name, "unknown_capabilities");
    assert!(manifest.installation.is_none());
    assert!(manifest.auth.is_none());

    let expected = sign(&SecretString::from(SECRET.to_string()), body).unwrap();
    assert_eq!(authorization.as_deref(), Some(format!("HMAC {expected}").as_str()));
    assert_eq!(operator.remaining(), 0);
}

#[tokio::test]
async fn package_registers_with_installation_and_tools() {
    let registry_server = MockServer::start().await;
    mount_search(&registry_server, json!([])).await;
    mount_register(
        &registry_server,
        200,
        json!({ "id": "srv_2", "operation": "updated" }),
    )
    .await;

    let connector = FakeConnector::open(weather_package()).with_scratch_dirs();
    let scratch_dirs = connector.scratch_dirs.clone();
    let closed = connector.closed.clone();
    let cmd = command(connector, AuthProbe::default(), registry(&registry_server, None));
    let mut operator = ScriptedOperator::new([
        Answer::Input("Weather forecasts"),
        Answer::Input("Weather, forecast ,weather"),
        Answer::Confirm(false),
        Answer::Confirm(true),
    ]);

    let options = RegisterOptions::new().with_locator("@acme/weather-mcp");
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();
    assert!(matches!(outcome, RegisterOutcome::Submitted(_)));

    let sent = submitted(&registry_server).await;
    let (manifest, authorization, _) = &sent[0];
    assert_eq!(manifest.name, "weather");
    assert_eq!(manifest.description, "Weather forecasts");
    assert_eq!(manifest.url, "@acme/weather-mcp");
    assert_eq!(manifest.tags, vec!["weather", "forecast"]);
    assert_eq!(manifest.capabilities.len(), 3);
    assert!(manifest.capabilities.iter().all(|c| c.kind.as_str() == "tool"));

    let installation = manifest.installation.as_ref().unwrap();
    assert_eq!(installation.command, "npx");
    assert_eq!(installation.args, vec!["-y", "@acme/weather-mcp"]);
    assert!(installation.env.is_empty());
    assert!(authorization.is_none());

    // One session, closed, scratch directory gone
    let dirs = scratch_dirs.lock().unwrap();
    assert_eq!(dirs.len(), 1);
    assert!(!dirs[0].exists());
    assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(operator.notices.iter().any(|n| n.contains("unsigned")));
}

#[tokio::test]
async fn dry_run_prepares_without_submitting() {
    let registry_server = MockServer::start().await;
    mount_register(&registry_server, 201, json!({ "id": "never" })).await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, Some(SECRET)),
    );
    let mut operator = ScriptedOperator::new([Answer::Confirm(false)]);

    let options = RegisterOptions::new()
        .with_locator("@acme/weather-mcp")
        .with_description("Weather forecasts")
        .with_tag("weather")
        .with_dry_run(true);
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();

    match outcome {
        RegisterOutcome::DryRun { manifest, prepared } => {
            assert_eq!(prepared.body, manifest.to_canonical_json().unwrap());
            let expected = sign(&SecretString::from(SECRET.to_string()), &prepared.body);
            assert_eq!(prepared.signature, expected);
        }
        other => panic!("expected dry run, got {other:?}"),
    }
    assert!(submitted(&registry_server).await.is_empty());
}

#[tokio::test]
async fn declined_submission_sends_nothing() {
    let registry_server = MockServer::start().await;
    mount_search(&registry_server, json!([])).await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([
        Answer::Input("Weather forecasts"),
        Answer::Input(""),
        Answer::Confirm(false),
        Answer::Confirm(false),
    ]);

    let options = RegisterOptions::new().with_locator("@acme/weather-mcp");
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();

    assert!(matches!(outcome, RegisterOutcome::Declined));
    assert!(submitted(&registry_server).await.is_empty());
}

#[tokio::test]
async fn degraded_update_of_analyzed_entry_needs_confirmation() {
    let registry_server = MockServer::start().await;
    mount_search(
        &registry_server,
        json!([{ "id": "srv_9", "url": "https://example.com/mcp", "tags": ["search"] }]),
    )
    .await;

    let cmd = command(
        FakeConnector::guarded(FakeServer::with_tools("hidden", &["x"]), None),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([
        Answer::Confirm(false),
        Answer::Confirm(false),
        Answer::Confirm(false), // replace analyzed data?
    ]);

    let options = RegisterOptions::new().with_locator("https://example.com/mcp");
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();

    assert!(matches!(outcome, RegisterOutcome::Declined));
    assert!(submitted(&registry_server).await.is_empty());
}

#[tokio::test]
async fn capability_only_update_keeps_registered_metadata() {
    let registry_server = MockServer::start().await;
    mount_search(
        &registry_server,
        json!([{
            "id": "srv_7",
            "url": "https://weather.example.com/mcp",
            "name": "weather",
            "description": "Registered description",
            "tags": ["weather", "official"]
        }]),
    )
    .await;
    mount_register(
        &registry_server,
        200,
        json!({ "id": "srv_7", "operation": "updated" }),
    )
    .await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([Answer::Confirm(true)]);

    let options = RegisterOptions::new().with_locator("https://weather.example.com/mcp");
    let report = match cmd.execute(&options, &mut operator).await.unwrap() {
        RegisterOutcome::Submitted(report) => report,
        other => panic!("expected submission, got {other:?}"),
    };

    assert!(report.capability_only);
    assert!(report.warnings.is_empty());
    assert!(!operator.prompts.iter().any(|p| p == "Description"));

    let (manifest, _, _) = &submitted(&registry_server).await[0];
    assert_eq!(manifest.description, "Registered description");
    assert_eq!(manifest.tags, vec!["weather", "official"]);
    assert_eq!(manifest.capabilities.len(), 3);
}

#[tokio::test]
async fn capability_only_update_keeps_registered_auth() {
    let registry_server = MockServer::start().await;
    mount_search(
        &registry_server,
        json!([{
            "id": "srv_8",
            "url": "https://weather.example.com/mcp",
            "description": "Registered description",
            "tags": ["weather"],
            "auth": {
                "type": "oauth",
                "key_name": "WEATHER_TOKEN",
                "instructions": "Sign in at weather.example.com"
            }
        }]),
    )
    .await;
    mount_register(
        &registry_server,
        200,
        json!({ "id": "srv_8", "operation": "updated" }),
    )
    .await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([Answer::Confirm(true)]);

    let options = RegisterOptions::new().with_locator("https://weather.example.com/mcp");
    let outcome = cmd.execute(&options, &mut operator).await.unwrap();
    assert!(matches!(outcome, RegisterOutcome::Submitted(_)));

    let (manifest, _, _) = &submitted(&registry_server).await[0];
    let auth = manifest.auth.as_ref().unwrap();
    assert_eq!(auth.auth_type, AuthType::Oauth);
    assert_eq!(auth.key_name.as_deref(), Some("WEATHER_TOKEN"));
    assert_eq!(
        auth.instructions.as_deref(),
        Some("Sign in at weather.example.com")
    );
}

#[tokio::test]
async fn declared_auth_uses_probe_inference() {
    let registry_server = MockServer::start().await;
    mount_register(
        &registry_server,
        201,
        json!({ "id": "srv_3", "operation": "created" }),
    )
    .await;

    let probe = AuthProbe {
        authorization_servers: vec!["https://auth.example.com".to_string()],
        ..AuthProbe::default()
    };
    let cmd = command(
        FakeConnector::guarded(FakeServer::with_tools("hidden", &["x"]), None),
        probe,
        registry(&registry_server, Some(SECRET)),
    );
    let mut operator = ScriptedOperator::new([
        Answer::Confirm(false),
        Answer::Confirm(true),
        Answer::Many(vec![0, 1]),
        Answer::Input("Hosted search"),
        Answer::Input("search"),
        Answer::Confirm(true),               // requires a credential?
        Answer::Input(""),                   // variable name, default API_KEY
        Answer::Input("Sign in at example.com"),
    ]);

    let options = RegisterOptions::new()
        .with_locator("https://example.com/mcp")
        .with_assume_yes(true);
    let report = match cmd.execute(&options, &mut operator).await.unwrap() {
        RegisterOutcome::Submitted(report) => report,
        other => panic!("expected submission, got {other:?}"),
    };
    assert_eq!(report.fallback, Some(FallbackStage::ManualDeclared));

    let (manifest, _, _) = &submitted(&registry_server).await[0];
    assert_eq!(manifest.tags, vec!["search", "auth-required"]);
    let names: Vec<_> = manifest.capabilities.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["tools_available", "resources_available"]);

    let auth = manifest.auth.as_ref().unwrap();
    assert_eq!(auth.auth_type, AuthType::Oauth);
    assert_eq!(auth.key_name.as_deref(), Some("API_KEY"));
    assert_eq!(auth.instructions.as_deref(), Some("Sign in at example.com"));
    assert!(operator.notices.iter().any(|n| n.contains("oauth")));
}

#[tokio::test]
async fn invalid_locator_is_prompted_again() {
    let registry_server = MockServer::start().await;
    mount_search(&registry_server, json!([])).await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([Answer::Input("@acme/weather-mcp")]);

    let options = RegisterOptions::new()
        .with_locator("   ")
        .with_description("Weather")
        .with_tag("weather")
        .with_dry_run(true);
    let err = cmd.execute(&options, &mut operator).await;

    // Script runs out at the credential question, after the re-prompt succeeded
    assert!(matches!(err, Err(RegisterError::Cancelled(_))));
    assert!(operator.notices.iter().any(|n| n.starts_with("Invalid locator")));
    assert_eq!(
        operator.prompts[0],
        "Server locator (npm package or http(s) URL)"
    );
}

#[tokio::test]
async fn cancellation_releases_every_session() {
    let registry_server = MockServer::start().await;

    let connector = FakeConnector::guarded(weather_package(), Some("tok")).with_scratch_dirs();
    let scratch_dirs = connector.scratch_dirs.clone();
    let credentials = connector.credentials.clone();
    let closed = connector.closed.clone();
    let cmd = command(connector, AuthProbe::default(), registry(&registry_server, None));
    let mut operator = ScriptedOperator::new([
        Answer::Confirm(true),
        Answer::Secret("wrong"),
        // cancelled at "declare categories?"
    ]);

    let options = RegisterOptions::new().with_locator("@acme/weather-mcp");
    let err = cmd.execute(&options, &mut operator).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(credentials.lock().unwrap().len(), 2);
    assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(scratch_dirs.lock().unwrap().iter().all(|d| !d.exists()));
    assert!(submitted(&registry_server).await.is_empty());
}

#[tokio::test]
async fn registry_rejection_is_a_submission_error() {
    let registry_server = MockServer::start().await;
    mount_search(&registry_server, json!([])).await;
    mount_register(&registry_server, 400, json!({ "error": "Invalid manifest" })).await;

    let cmd = command(
        FakeConnector::open(weather_package()),
        AuthProbe::default(),
        registry(&registry_server, None),
    );
    let mut operator = ScriptedOperator::new([Answer::Confirm(false)]);

    let options = RegisterOptions::new()
        .with_locator("@acme/weather-mcp")
        .with_description("Weather")
        .with_tag("weather")
        .with_assume_yes(true);
    let err = cmd.execute(&options, &mut operator).await.unwrap_err();

    match err {
        RegisterError::Submission(SubmissionFailure::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid manifest");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

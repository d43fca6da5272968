//! End-to-end pipeline runs against a mocked OpenAI-compatible backend.

#![cfg(feature = "openai")]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value as JsonValue};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cce_core::{CheckStatus, FsReferenceSource, Stage};
use cce_runtime::providers::{ApiCredential, CachedClient, CredentialSource, OpenAiClient};
use cce_runtime::{
    AiClient, AssessmentPipeline, ClientSettings, ErrorKind, ResponseCache, RetryPolicy,
};

const CONFIG: &str = "hostname edge-rtr-02\n\
ip ssh version 2\n\
line vty 0 4\n transport input telnet\n";

fn reference_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../reference")
}

fn completion(content: JsonValue) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": {"role": "assistant", "content": content.to_string()},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 100, "completion_tokens": 50},
    }))
}

/// One mock per stage, told apart by the template text in the prompt.
async fn mount_stages(server: &MockServer, stage2: JsonValue, expected_calls: u64) {
    let answers = [
        (
            "Identify the network device",
            json!({
                "vendor": "Cisco", "os_type": "IOS", "os_version": "15.7(3)M",
                "hostname": "edge-rtr-02", "device_type": "router",
                "device_role": "branch edge", "confidence": "high",
            }),
        ),
        ("Decide which baseline checks apply", stage2),
        (
            "Extract the configuration lines",
            json!({"parsed_config": {
                "CCE-NET-001": {"found_config": ["ip ssh version 2"], "extracted_values": {"version": 2}, "config_present": true},
                "CCE-NET-002": {"found_config": [" transport input telnet"], "extracted_values": {}, "config_present": true},
            }}),
        ),
        (
            "Assess each check",
            json!({"assessment_results": [
                {"check_id": "CCE-NET-001", "status": "pass", "score": 100, "findings": "SSHv2 enforced",
                 "recommendation": "", "remediation_commands": []},
                {"check_id": "CCE-NET-002", "status": "fail", "score": 0, "findings": "telnet allowed on vty 0 4",
                 "recommendation": "Allow SSH only", "remediation_commands": ["line vty 0 4", "transport input ssh"]},
            ]}),
        ),
    ];

    for (marker, answer) in answers {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains(marker))
            .respond_with(completion(answer))
            .expect(expected_calls)
            .mount(server)
            .await;
    }
}

fn full_mapping() -> JsonValue {
    json!({
        "applicable_checks": [
            {"check_id": "CCE-NET-001", "reason": "SSH management"},
            {"check_id": "CCE-NET-002", "reason": "VTY lines configured"},
        ],
        "excluded_checks": [
            {"check_id": "CCE-NET-003", "reason": "banner handled by jump host"},
        ],
    })
}

fn openai(server: &MockServer) -> Arc<dyn AiClient> {
    let client = OpenAiClient::new(
        ApiCredential::new("sk-test", CredentialSource::Programmatic, "OpenAI API key"),
        ClientSettings::new("gpt-4o-mini").with_retry(RetryPolicy::new(2, Duration::from_millis(5))),
    )
    .unwrap()
    .with_base_url(server.uri());
    Arc::new(client)
}

fn pipeline(client: Arc<dyn AiClient>) -> AssessmentPipeline {
    AssessmentPipeline::builder()
        .client(client)
        .reference(Arc::new(FsReferenceSource::new(reference_dir())))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pipeline_over_http() {
    let server = MockServer::start().await;
    mount_stages(&server, full_mapping(), 1).await;

    let result = pipeline(openai(&server)).run(CONFIG, Map::new()).await.unwrap();

    assert_eq!(result.asset_info.hostname, "edge-rtr-02");
    assert_eq!(result.criteria_mapping.excluded_ids(), vec!["CCE-NET-003"]);
    assert!(result.config_parsing.get("CCE-NET-003").is_none());
    assert_eq!(
        result.vulnerability_assessment.get("CCE-NET-002").unwrap().status,
        CheckStatus::Fail
    );
    assert_eq!(result.summary.total_checks, 2);
    assert_eq!(result.summary.pass_percentage, 50.0);
    assert_eq!(result.metadata["ai_provider"], json!("openai"));
    assert_eq!(result.metadata["model"], json!("gpt-4o-mini"));

    let out = tempfile::tempdir().unwrap();
    let saved = result.save_json(out.path()).unwrap();
    let name = saved.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("cce_assessment_edge-rtr-02_"));

    let written: JsonValue = serde_json::from_str(&std::fs::read_to_string(&saved).unwrap()).unwrap();
    for key in [
        "timestamp",
        "execution_time_seconds",
        "asset_info",
        "criteria_mapping",
        "config_parsing",
        "vulnerability_assessment",
        "summary",
        "metadata",
    ] {
        assert!(written.get(key).is_some(), "missing {key}");
    }
}

#[tokio::test]
async fn test_cached_second_run_skips_backend() {
    let server = MockServer::start().await;
    mount_stages(&server, full_mapping(), 1).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ResponseCache::new(cache_dir.path(), Duration::from_secs(3600)));
    let client: Arc<dyn AiClient> = Arc::new(CachedClient::new(openai(&server), cache.clone()));
    let pipeline = pipeline(client);

    let first = pipeline.run(CONFIG, Map::new()).await.unwrap();
    let second = pipeline.run(CONFIG, Map::new()).await.unwrap();

    assert_eq!(first.vulnerability_assessment, second.vulnerability_assessment);
    assert_eq!(cache.get_stats().unwrap().total_entries, 4);
}

#[tokio::test]
async fn test_incomplete_mapping_aborts_before_parsing() {
    let server = MockServer::start().await;

    let gap = json!({
        "applicable_checks": [{"check_id": "CCE-NET-001", "reason": "SSH management"}],
        "excluded_checks": [],
    });

    for (marker, calls) in [
        ("Identify the network device", 1u64),
        ("Decide which baseline checks apply", 1),
        ("Extract the configuration lines", 0),
        ("Assess each check", 0),
    ] {
        let answer = if marker.starts_with("Identify") {
            json!({
                "vendor": "Cisco", "os_type": "IOS", "os_version": "15.7(3)M",
                "hostname": "edge-rtr-02", "device_type": "router",
                "device_role": "branch edge", "confidence": 0.8,
            })
        } else {
            gap.clone()
        };
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains(marker))
            .respond_with(completion(answer))
            .expect(calls)
            .mount(&server)
            .await;
    }

    let err = pipeline(openai(&server)).run(CONFIG, Map::new()).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::CriteriaMapping));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_server_error_surfaces_after_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(2)
        .mount(&server)
        .await;

    let err = pipeline(openai(&server)).run(CONFIG, Map::new()).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::AssetIdentification));
    assert_eq!(err.kind(), ErrorKind::Client);
    assert!(err.to_string().contains("upstream unavailable"));
}

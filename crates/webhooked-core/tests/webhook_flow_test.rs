//! End to end tests of the webhook flow
//!
//! Tests use temporary directories with real configuration files to verify:
//! - Configuration loading with template files
//! - HMAC signature verification through chained steps
//! - Payload formatting and file sink output
//! - Error mapping for rejected calls

use tempfile::TempDir;
use webhooked_core::sinks::BuiltinSinkLoader;
use webhooked_core::{AppContext, Config, Error, StepRegistry, WebhookRequest, webhook_service};

const SIGNATURE: &str = "88cd2108b5347d973cf39cdf9053d7dd42704876d8c9a9bd8e2d168259d3ddf7";

/// Write a configuration whose sink appends to `events.jsonl` in `dir`.
fn setup_project(dir: &TempDir) -> AppContext {
    std::fs::write(
        dir.path().join("event.tmpl"),
        r#"{"event": {{ Payload }}, "delivery": "{{ getHeader("X-Delivery", Request.Headers) }}"}"#,
    )
    .unwrap();

    let events = dir.path().join("events.jsonl");
    std::fs::write(
        dir.path().join("webhooks.yaml"),
        format!(
            r#"
apiVersion: v1alpha1
specs:
  - name: signed
    entrypointUrl: /webhooks/signed
    security:
      - header:
          id: signature
          inputs:
            - name: headerName
              value: X-Signature
      - generate_hmac_256:
          id: expected
          inputs:
            - name: secret
              value: test
            - name: payload
              value: test
      - compare:
          inputs:
            - name: first
              value: "{{{{ Outputs.signature.value }}}}"
            - name: second
              value: "{{{{ Outputs.expected.value }}}}"
    formatting:
      templatePath: event.tmpl
    storage:
      - type: file
        specs:
          path: {}
    response:
      formatting:
        templateString: '{{{{ (PreviousPayload | fromJson).delivery }}}}'
      httpCode: 202
"#,
            events.display()
        ),
    )
    .unwrap();

    let config = Config::load(dir.path()).unwrap();
    AppContext::build(config, StepRegistry::with_builtins(), &BuiltinSinkLoader).unwrap()
}

fn signed_request(signature: &str) -> WebhookRequest {
    WebhookRequest::post("/webhooks/signed")
        .unwrap()
        .with_header("X-Signature", signature)
        .unwrap()
        .with_header("X-Delivery", "d-42")
        .unwrap()
        .with_body(r#"{"action":"opened"}"#)
}

#[tokio::test]
async fn test_signed_request_is_stored() {
    let dir = TempDir::new().unwrap();
    let ctx = setup_project(&dir);

    let webhook = ctx.webhook_by_endpoint("/webhooks/signed");
    let body = webhook_service(&ctx, webhook, signed_request(SIGNATURE), None)
        .await
        .unwrap();
    assert_eq!(body, "d-42");

    let stored = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let line: serde_json::Value = serde_json::from_str(stored.trim()).unwrap();
    assert_eq!(line["event"]["action"], "opened");
    assert_eq!(line["delivery"], "d-42");
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = setup_project(&dir);

    let webhook = ctx.webhook_by_endpoint("/webhooks/signed");
    let err = webhook_service(&ctx, webhook, signed_request("forged"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SecurityFailed));
    assert!(!dir.path().join("events.jsonl").exists());
}

#[tokio::test]
async fn test_concurrent_requests_do_not_share_pipeline_state() {
    let dir = TempDir::new().unwrap();
    let ctx = std::sync::Arc::new(setup_project(&dir));

    let mut handles = Vec::new();
    for i in 0..8 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let signature = if i % 2 == 0 { SIGNATURE } else { "forged" };
            let webhook = ctx.webhook_by_endpoint("/webhooks/signed");
            webhook_service(&ctx, webhook, signed_request(signature), None)
                .await
                .is_ok()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);

    let stored = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    assert_eq!(stored.lines().count(), 4);
}

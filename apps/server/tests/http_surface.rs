#[allow(unused)]
mod support;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value as JsonValue};
use support::*;

#[tokio::test]
async fn health_reports_ok() -> anyhow::Result<()> {
    let app = TestApp::new();

    let (status, headers, body) = app.request(Method::GET, "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));
    let body: JsonValue = serde_json::from_slice(&body)?;
    assert_eq!(body, json!({"status": "ok", "service": "relay"}));
    Ok(())
}

#[tokio::test]
async fn blank_uuid_is_rejected_before_any_fetch() -> anyhow::Result<()> {
    let app = TestApp::new();

    for body in [json!({}), json!({"uuid": ""}), json!({"uuid": "  "})] {
        let (status, _, bytes) = app
            .request(Method::POST, "/forwarder/_event", Some(to_json_body(&body)?))
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: JsonValue = serde_json::from_slice(&bytes)?;
        assert!(error["error"].as_str().unwrap_or_default().contains("uuid"));
    }

    assert!(app.primary.reads().is_empty());
    assert!(app.destination.put_keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_flavor_is_a_bad_request() -> anyhow::Result<()> {
    let app = TestApp::new();

    let (status, _, _) = app
        .request(
            Method::POST,
            "/forwarder/allergy/_event",
            Some(to_json_body(&json!({"uuid": "P1"}))?),
        )
        .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.primary.reads().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_root_is_not_found() -> anyhow::Result<()> {
    let app = TestApp::new();

    let (status, body) = app.trigger("/forwarder/_event", "E404").await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["uuid"], "E404");
    assert_eq!(body["step"], "resolve-root");
    assert_eq!(body["sent"], json!({}));
    assert_eq!(
        app.primary.reads(),
        vec!["Encounter/E404".to_string()]
    );
    assert!(app.secondary.reads().contains(&"Encounter/E404".to_string()));
    Ok(())
}

#[tokio::test]
async fn root_without_patient_is_rejected() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert(json!({
        "resourceType": "Encounter",
        "id": "E2",
        "status": "finished"
    }));

    let (status, body) = app.trigger("/forwarder/_event", "E2").await?;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["step"], "resolve-root");
    assert!(app.destination.put_keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn metrics_expose_forward_runs() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert(patient("P9"));
    let (status, _) = app.trigger("/forwarder/procedure/_event", "P9").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = app.request(Method::GET, "/metrics", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/plain"));
    let text = String::from_utf8(body.to_vec())?;
    assert!(text.contains("relay_forward_runs_total"));
    assert!(text.contains(r#"flavor="procedure""#));
    Ok(())
}

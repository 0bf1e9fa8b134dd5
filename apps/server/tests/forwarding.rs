#[allow(unused)]
mod support;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use relay::config::DefaultOrganizationConfig;
use serde_json::json;
use std::time::Duration;
use support::*;
use tower::ServiceExt as _;

fn seed_encounter(app: &TestApp) {
    app.primary.insert_all([
        location("L0", None),
        location("L1", Some("L0")),
        practitioner("Pr1"),
        patient("P1"),
        EncounterBuilder::new("E1", "P1")
            .location("L1")
            .participant("Pr1")
            .build(),
    ]);
}

#[tokio::test]
async fn encounter_closure_is_uploaded_dependencies_first() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], "E1");
    assert_eq!(body["status"], "ok");
    assert_eq!(
        body["sent"],
        json!({"Encounter": 1, "Location": 2, "Patient": 1, "Practitioner": 1})
    );
    assert!(body.get("notes").is_none());
    assert_eq!(
        app.destination.put_keys(),
        vec![
            "Location/L0",
            "Location/L1",
            "Practitioner/Pr1",
            "Patient/P1",
            "Encounter/E1"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn shared_practitioner_is_uploaded_once() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);
    let mut obs = observation("o1", "P1", "E1");
    obs["performer"] = json!([{"reference": "Practitioner/Pr1"}]);
    app.primary.search_result("Observation", vec![obs], vec![]);

    let (status, body) = app.trigger("/forwarder/encounter/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"]["Observation"], 1);
    assert_eq!(body["sent"]["Practitioner"], 1);
    assert_eq!(put_count(&app, "Practitioner/Pr1"), 1);
    assert_eq!(put_count(&app, "Patient/P1"), 1);
    Ok(())
}

#[tokio::test]
async fn location_chain_uploads_outermost_parent_first() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert_all([
        location("L1", None),
        location("L2", Some("L1")),
        location("L3", Some("L2")),
        patient("P1"),
        EncounterBuilder::new("E1", "P1").location("L3").build(),
    ]);

    let (status, _) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    let locations: Vec<String> = app
        .destination
        .put_keys()
        .into_iter()
        .filter(|k| k.starts_with("Location/"))
        .collect();
    assert_eq!(locations, vec!["Location/L1", "Location/L2", "Location/L3"]);
    Ok(())
}

#[tokio::test]
async fn self_referencing_location_is_uploaded_without_its_parent() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert_all([
        location("L5", Some("L5")),
        patient("P1"),
        EncounterBuilder::new("E1", "P1").location("L5").build(),
    ]);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"]["Location"], 1);
    let uploaded = app
        .destination
        .last_put("Location/L5")
        .ok_or_else(|| anyhow::anyhow!("Location/L5 was not uploaded"))?;
    assert!(uploaded.get("partOf").is_none());
    Ok(())
}

#[tokio::test]
async fn encounter_part_of_itself_is_uploaded_once() -> anyhow::Result<()> {
    let app = TestApp::new();
    let mut encounter = EncounterBuilder::new("E1", "P1").build();
    encounter["partOf"] = json!({"reference": "Encounter/E1"});
    app.primary.insert_all([patient("P1"), encounter]);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"]["Encounter"], 1);
    assert_eq!(put_count(&app, "Encounter/E1"), 1);
    let uploaded = app
        .destination
        .last_put("Encounter/E1")
        .ok_or_else(|| anyhow::anyhow!("Encounter/E1 was not uploaded"))?;
    assert!(uploaded.get("partOf").is_none());
    Ok(())
}

#[tokio::test]
async fn absent_practitioner_is_stripped_from_the_encounter() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert_all([
        patient("P1"),
        EncounterBuilder::new("E1", "P1").participant("ghost").build(),
    ]);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert!(body["sent"].get("Practitioner").is_none());
    let encounter = app
        .destination
        .last_put("Encounter/E1")
        .ok_or_else(|| anyhow::anyhow!("Encounter/E1 was not uploaded"))?;
    assert!(encounter["participant"][0].get("individual").is_none());
    Ok(())
}

#[tokio::test]
async fn destination_reported_dependency_is_recovered() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert_all([patient("P1"), medication("42")]);
    let order = json!({
        "resourceType": "MedicationRequest",
        "id": "mr1",
        "status": "active",
        "intent": "order",
        "subject": {"reference": "Patient/P1"},
        "medicationCodeableConcept": {"text": "Amoxicillin"},
        "supportingInformation": [{"reference": "Medication/42"}]
    });
    app.primary.search_result("MedicationRequest", vec![order], vec![]);
    app.destination.require("MedicationRequest/mr1", "Medication/42");

    let (status, body) = app
        .trigger("/forwarder/medication-request/_event", "P1")
        .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sent"]["Medication"], 1);
    assert_eq!(body["sent"]["MedicationRequest"], 1);
    assert_eq!(put_count(&app, "MedicationRequest/mr1"), 2);
    let keys = app.destination.put_keys();
    let medication_at = keys
        .iter()
        .position(|k| k == "Medication/42")
        .ok_or_else(|| anyhow::anyhow!("Medication/42 was not uploaded"))?;
    let last_order_at = keys.iter().rposition(|k| k == "MedicationRequest/mr1");
    assert!(Some(medication_at) < last_order_at);
    Ok(())
}

#[tokio::test]
async fn rejected_search_match_is_reported_as_a_note() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);
    app.primary.search_result(
        "Observation",
        vec![observation("o1", "P1", "E1"), observation("o2", "P1", "E1")],
        vec![],
    );
    app.destination
        .reject("Observation/o2", 422, "Observation.valueQuantity: unit not allowed");

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["sent"]["Observation"], 1);
    let notes = body["notes"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("notes missing"))?;
    assert_eq!(notes.len(), 1);
    assert!(notes[0]
        .as_str()
        .unwrap_or_default()
        .starts_with("Observation/o2:"));
    Ok(())
}

#[tokio::test]
async fn failing_search_does_not_stop_the_others() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);
    app.primary.fail_search("Observation");
    app.primary
        .search_result("Condition", vec![condition("c1", "P1")], vec![]);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["sent"]["Condition"], 1);
    assert!(body["notes"][0]
        .as_str()
        .unwrap_or_default()
        .starts_with("Observation:"));
    Ok(())
}

#[tokio::test]
async fn truncated_search_is_reported_as_a_note() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);
    app.primary
        .search_result("Observation", vec![observation("o1", "P1", "E1")], vec![]);
    app.primary.truncate_search("Observation");

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["sent"]["Observation"], 1);
    let notes = body["notes"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("notes missing"))?;
    assert_eq!(notes.len(), 1);
    assert!(notes[0]
        .as_str()
        .unwrap_or_default()
        .starts_with("Observation: search truncated"));
    Ok(())
}

#[tokio::test]
async fn missing_service_provider_points_at_default_organization() -> anyhow::Result<()> {
    let app = TestApp::new_with_config(|config| {
        config.forwarding.default_organization = Some(DefaultOrganizationConfig {
            id: "relay-default".to_string(),
            name: "Default facility".to_string(),
        });
    });
    app.primary.insert_all([
        patient("P1"),
        EncounterBuilder::new("E1", "P1")
            .service_provider("unknown")
            .build(),
    ]);

    let (status, body) = app.trigger("/forwarder/_event", "E1").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"]["Organization"], 1);
    let encounter = app
        .destination
        .last_put("Encounter/E1")
        .ok_or_else(|| anyhow::anyhow!("Encounter/E1 was not uploaded"))?;
    assert_eq!(
        encounter["serviceProvider"]["reference"],
        "Organization/relay-default"
    );
    Ok(())
}

#[tokio::test]
async fn uploaded_codings_reach_the_terminology_validator() -> anyhow::Result<()> {
    let app = TestApp::new();
    seed_encounter(&app);
    app.primary
        .search_result("Observation", vec![observation("o1", "P1", "E1")], vec![]);

    let (status, _) = app.trigger("/forwarder/_event", "E1").await?;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app
        .terminology
        .codes()
        .contains(&"http://loinc.org|8867-4".to_string()));
    Ok(())
}

#[tokio::test]
async fn dropped_trigger_stops_further_uploads() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.primary.insert_all([
        location("L1", None),
        practitioner("Pr1"),
        patient("P1"),
        EncounterBuilder::new("E1", "P1")
            .location("L1")
            .participant("Pr1")
            .build(),
    ]);
    app.destination.delay(Duration::from_millis(300));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/forwarder/_event")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"uuid": "E1"}"#))?;
    let router = app.router.clone();
    let in_flight = tokio::spawn(async move { router.oneshot(request).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    in_flight.abort();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(app.destination.put_keys(), vec!["Location/L1"]);
    Ok(())
}

//! Integration tests for campaign setup and state reads.

mod common;

use axum::http::StatusCode;
use uuid::Uuid;

#[tokio::test]
async fn test_create_campaign_then_read_state() {
    let app = common::build_test_app();

    let (campaign_id, player_id) = common::create_campaign(app.clone()).await;
    let (status, json) = common::get_json(
        app,
        &format!("/api/v1/campaigns/{campaign_id}/state?player_id={player_id}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["turn_number"], 0);
    assert_eq!(json["campaign"]["title"], "Fog over the Docks");
    assert_eq!(json["character_sheet"]["name"], "Ada");
    assert_eq!(json["character_sheet"]["hit_points"], 10);
    assert_eq!(json["nearby"], serde_json::json!(["Guard"]));
    assert!(json["character_sheet"].get("secret_agenda").is_none());
}

#[tokio::test]
async fn test_create_campaign_without_player_returns_400() {
    let app = common::build_test_app();
    let body = serde_json::json!({
        "title": "Empty Docks",
        "time_period": "gaslight",
        "characters": [{ "name": "Guard", "role": "npc" }]
    });

    let (status, json) = common::post_json(app, "/api/v1/campaigns", &body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_state_of_unknown_campaign_returns_404() {
    let app = common::build_test_app();

    let (status, json) = common::get_json(
        app,
        &format!(
            "/api/v1/campaigns/{}/state?player_id={}",
            Uuid::new_v4(),
            Uuid::new_v4()
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "campaign_not_found");
}

#[tokio::test]
async fn test_state_for_unknown_player_returns_404() {
    let app = common::build_test_app();
    let (campaign_id, _) = common::create_campaign(app.clone()).await;

    let (status, json) = common::get_json(
        app,
        &format!(
            "/api/v1/campaigns/{campaign_id}/state?player_id={}",
            Uuid::new_v4()
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "character_not_found");
}

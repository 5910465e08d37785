mod common;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::body::Body;
use axum::http::StatusCode;
use common::{expect_json, TestApp};
use http_body_util::BodyExt;
use serde_json::{json, Value};

async fn campaign_with_owner(app: &TestApp) -> Result<(String, String)> {
    let owner = app.token("owner-1")?;
    let campaign_id = app
        .create_campaign(&owner, json!({ "name": "Drive", "organizationName": "Tigers" }))
        .await?;
    Ok((owner, campaign_id))
}

#[tokio::test]
async fn import_edit_and_delete_participants() -> Result<()> {
    let app = TestApp::new()?;
    let (owner, campaign_id) = campaign_with_owner(&app).await?;
    let base = format!("/api/campaigns/{campaign_id}/participants");

    let imported: Value = expect_json(
        app.post_json(
            &format!("{base}/import"),
            &json!({ "tsv": "Zed\tAdams\t5550001\nBad\t\t5550002\n\nAmy\tBrown\t5550003\n" }),
            Some(&owner),
        )
        .await?,
        StatusCode::CREATED,
    )
    .await?;
    assert_eq!(imported["imported"].as_array().map(Vec::len), Some(2));

    let listed: Vec<Value> = expect_json(app.get(&base, Some(&owner)).await?, StatusCode::OK).await?;
    let names: Vec<&str> = listed
        .iter()
        .filter_map(|p| p["lastName"].as_str())
        .collect();
    assert_eq!(names, vec!["Adams", "Brown"]);
    assert!(listed.iter().all(|p| p["campaignId"] == json!(campaign_id)));

    let nothing = app
        .post_json(&format!("{base}/import"), &json!({ "tsv": "\n\t\t\n" }), Some(&owner))
        .await?;
    assert_eq!(nothing.status(), StatusCode::BAD_REQUEST);

    let id = listed[0]["id"].as_str().context("participant id")?.to_string();
    let edited: Value = expect_json(
        app.patch_json(&format!("{base}/{id}"), &json!({ "phoneNumber": "5559999" }), Some(&owner))
            .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(edited["phoneNumber"], json!("5559999"));
    assert_eq!(edited["firstName"], json!("Zed"));

    let deleted = app.delete(&format!("{base}/{id}"), Some(&owner)).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let gone = app.get(&format!("{base}/{id}"), Some(&owner)).await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn guardian_step_is_bypassed_for_good() -> Result<()> {
    let app = TestApp::new()?;
    let (owner, campaign_id) = campaign_with_owner(&app).await?;
    let participant_id = app
        .add_participant(&owner, &campaign_id, "Jo", "5550100")
        .await?;
    let page = format!("/api/participants/{participant_id}");

    let view: Value = expect_json(app.get(&page, None).await?, StatusCode::OK).await?;
    assert_eq!(view["onboarding"], json!("needs-guardian-step"));
    assert_eq!(view["campaign"]["organizationName"], json!("Tigers"));
    assert_eq!(view["campaign"]["targetDonorCount"], json!(10));

    let skipped: Value = expect_json(
        app.post_json(&format!("{page}/onboarding/skip"), &json!({}), None)
            .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(skipped["onboarding"], json!("bypassed"));

    app.post_json(&format!("{page}/onboarding/messaged"), &json!({}), None)
        .await?;
    let view: Value = expect_json(app.get(&page, None).await?, StatusCode::OK).await?;
    assert_eq!(view["onboarding"], json!("bypassed"));
    assert_eq!(view["participant"]["hasSkippedGuardians"], json!(true));
    assert_eq!(view["participant"]["hasMessagedGuardians"], json!(true));

    let unknown = app.get("/api/participants/nobody", None).await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn contact_import_and_access_show_up_in_campaign_logs() -> Result<()> {
    let app = TestApp::new()?;
    let (owner, campaign_id) = campaign_with_owner(&app).await?;
    let participant_id = app
        .add_participant(&owner, &campaign_id, "Jo", "5550100")
        .await?;
    let page = format!("/api/participants/{participant_id}");
    let guardian = json!({ "type": "guardian", "firstName": "Lee", "lastName": "Park" });

    app.post_json(&format!("{page}/access"), &guardian, None).await?;

    let donors: Vec<Value> = expect_json(
        app.post_json(
            &format!("{page}/donors/import"),
            &json!({
                "addedBy": guardian,
                "firstNameFirst": false,
                "contacts": [
                    { "name": "Diaz Rae Ann", "phoneNumber": "+1 (555) 020-3000" },
                    { "name": "Smith, Jane", "phoneNumber": "555.020.4000" },
                    { "name": "", "phoneNumber": "5550205000" }
                ]
            }),
            None,
        )
        .await?,
        StatusCode::CREATED,
    )
    .await?;
    let imported: Vec<(String, String, String)> = donors
        .iter()
        .map(|d| {
            (
                d["firstName"].as_str().unwrap_or_default().to_string(),
                d["lastName"].as_str().unwrap_or_default().to_string(),
                d["phoneNumber"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        imported,
        vec![
            ("Rae Ann".to_string(), "Diaz".to_string(), "15550203000".to_string()),
            ("Jane".to_string(), "Smith".to_string(), "5550204000".to_string()),
        ]
    );

    let report: Value = expect_json(
        app.get(&format!("/api/campaigns/{campaign_id}/logs"), Some(&owner))
            .await?,
        StatusCode::OK,
    )
    .await?;
    let activity = &report["participants"][0];
    assert_eq!(activity["participantId"], json!(participant_id));
    assert_eq!(activity["accesses"][0]["type"], json!("guardian"));
    let logs = activity["logs"].as_array().context("logs")?;
    assert_eq!(logs.len(), 2);
    assert!(logs
        .iter()
        .all(|log| log["action"] == json!("add_donor") && log["addedBy"]["firstName"] == json!("Lee")));
    Ok(())
}

async fn next_event(body: &mut Body) -> Result<String> {
    let mut text = String::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .context("timed out waiting for event")?;
        let Some(frame) = frame else {
            bail!("stream ended");
        };
        if let Ok(data) = frame?.into_data() {
            text.push_str(&String::from_utf8_lossy(&data));
        }
        if text.contains("\n\n") {
            return Ok(text);
        }
    }
}

#[tokio::test]
async fn live_guardian_list_follows_writes_and_releases_listener() -> Result<()> {
    let app = TestApp::new()?;
    let (owner, campaign_id) = campaign_with_owner(&app).await?;
    let participant_id = app
        .add_participant(&owner, &campaign_id, "Jo", "5550100")
        .await?;
    let listeners = || app.state.store.changes().active_listeners();

    let response = app
        .get(&format!("/api/participants/{participant_id}/guardians/stream"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(listeners(), 1);
    let mut body = response.into_body();

    let initial = next_event(&mut body).await?;
    assert!(initial.contains("event: snapshot"));
    assert!(initial.contains("data: []"));

    app.post_json(
        &format!("/api/participants/{participant_id}/guardians"),
        &json!({ "firstName": "Lee", "phoneNumber": "5550101" }),
        None,
    )
    .await?;
    let updated = next_event(&mut body).await?;
    assert!(updated.contains("\"firstName\":\"Lee\""));

    drop(body);
    assert_eq!(listeners(), 0);
    Ok(())
}

#[tokio::test]
async fn encoded_slash_in_participant_id_does_not_reach_other_records() -> Result<()> {
    let app = TestApp::new()?;
    let (owner, campaign_id) = campaign_with_owner(&app).await?;
    let participant_id = app
        .add_participant(&owner, &campaign_id, "Jo", "5550100")
        .await?;
    let guardian: Value = expect_json(
        app.post_json(
            &format!("/api/participants/{participant_id}/guardians"),
            &json!({ "firstName": "Gus", "lastName": "Grd", "phoneNumber": "5550101" }),
            None,
        )
        .await?,
        StatusCode::CREATED,
    )
    .await?;
    let guardian_id = guardian["id"].as_str().context("guardian id")?;
    let smuggled = format!("{participant_id}%2Fguardians%2F{guardian_id}");

    let public = app.get(&format!("/api/participants/{smuggled}"), None).await?;
    assert_eq!(public.status(), StatusCode::NOT_FOUND);

    let skip = app
        .post_json(&format!("/api/participants/{smuggled}/onboarding/skip"), &json!({}), None)
        .await?;
    assert_eq!(skip.status(), StatusCode::NOT_FOUND);

    let managed = app
        .get(
            &format!("/api/campaigns/{campaign_id}/participants/{smuggled}"),
            Some(&owner),
        )
        .await?;
    assert_eq!(managed.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

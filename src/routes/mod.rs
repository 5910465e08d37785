use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod campaigns;
pub mod health;
pub mod invites;
pub mod messaging;
pub mod participants;
pub mod profile;
pub mod public;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());

    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:cid",
            get(campaigns::get_campaign).patch(campaigns::update_campaign),
        )
        .route(
            "/:cid/donor-messages",
            post(campaigns::create_donor_message),
        )
        .route(
            "/:cid/donor-messages/:mid",
            patch(campaigns::update_donor_message).delete(campaigns::delete_message),
        )
        .route(
            "/:cid/donor-messages/:mid/activate",
            post(campaigns::activate_message),
        )
        .route("/:cid/preview", post(campaigns::preview_message))
        .route("/:cid/progress", get(campaigns::campaign_progress))
        .route("/:cid/logs", get(campaigns::campaign_logs))
        .route(
            "/:cid/templates/:kind",
            get(campaigns::get_template).put(campaigns::save_template),
        )
        .route("/:cid/send/:kind", post(messaging::send_outreach))
        .route("/:cid/invites", post(invites::send_invite))
        .route(
            "/:cid/participants",
            get(participants::list_participants).post(participants::create_participant),
        )
        .route(
            "/:cid/participants/import",
            post(participants::import_participant_rows),
        )
        .route(
            "/:cid/participants/:pid",
            get(participants::get_participant)
                .patch(participants::update_participant)
                .delete(participants::remove_participant),
        )
        .route(
            "/:cid/participants/:pid/guardians/send",
            post(messaging::send_to_guardians),
        )
        .route(
            "/:cid/participants/:pid/guardians/:gid/messages",
            get(messaging::guardian_history),
        )
        .route(
            "/:cid/participants/:pid/donors/:did/messages",
            get(messaging::donor_history),
        )
        .route(
            "/:cid/participants/:pid/messages",
            get(messaging::participant_history),
        );

    let invite_routes = Router::new()
        .route("/:cid/:iid", get(invites::show_invite))
        .route("/:cid/:iid/accept", post(invites::accept))
        .route("/:cid/:iid/decline", post(invites::decline));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/campaigns", campaign_routes)
        .nest("/api/invites", invite_routes)
        .route(
            "/api/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let public_routes = Router::new()
        .route("/:pid", get(public::show_participant))
        .route("/:pid/access", post(public::record_page_access))
        .route("/:pid/guardians", post(public::create_guardian))
        .route("/:pid/guardians/send", post(public::message_guardians))
        .route("/:pid/guardians/stream", get(public::stream_guardians))
        .route("/:pid/donors", post(public::create_donor))
        .route("/:pid/donors/import", post(public::import_donor_contacts))
        .route("/:pid/donors/stream", get(public::stream_donors))
        .route(
            "/:pid/donors/:did/messages/:mid/send",
            post(public::send_donor_message),
        )
        .route(
            "/:pid/donors/:did/messages/:mid/sent",
            post(public::mark_donor_message_sent),
        )
        .route("/:pid/onboarding/messaged", post(public::guardians_messaged))
        .route("/:pid/onboarding/skip", post(public::guardians_skipped));

    Router::new()
        .merge(protected_routes)
        .nest("/api/participants", public_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

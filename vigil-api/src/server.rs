use anyhow::Result;
use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::env;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use vigil_core::VigilContext;

use crate::auth;
use crate::handlers;

/// Origins come from the comma-separated `CORS_ORIGINS`; permissive when unset.
fn cors_layer() -> CorsLayer {
    match env::var("CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        Err(_) => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn router(ctx: VigilContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/auth/register", post(handlers::register))
        .route("/api/v1/users/me", get(handlers::get_me).delete(handlers::delete_me))
        .route("/api/v1/users/me/push-token", put(handlers::update_push_token))
        .route("/api/v1/users/me/deactivate", post(handlers::deactivate))
        .route(
            "/api/v1/users/me/location-consent",
            get(handlers::get_location_consent).put(handlers::update_location_consent),
        )
        .route("/api/v1/checkin", post(handlers::check_in))
        .route("/api/v1/checkin/status", get(handlers::check_in_status))
        .route(
            "/api/v1/checkin/settings",
            get(handlers::get_check_in_settings).put(handlers::update_check_in_settings),
        )
        .route("/api/v1/checkin/history", get(handlers::check_in_history))
        .route("/api/v1/checkin/quick", post(handlers::quick_check_in))
        .route(
            "/api/v1/contacts",
            get(handlers::list_contacts).post(handlers::create_contact),
        )
        .route(
            "/api/v1/contacts/:id",
            get(handlers::get_contact)
                .put(handlers::update_contact)
                .delete(handlers::delete_contact),
        )
        .route("/api/v1/contacts/:id/verify", post(handlers::verify_contact))
        .route(
            "/api/v1/contacts/:id/consent",
            get(handlers::consent_status).post(handlers::request_consent),
        )
        .route(
            "/api/v1/consent/:token",
            get(handlers::get_consent_request).post(handlers::respond_to_consent),
        )
        .route("/api/v1/sos/trigger", post(handlers::trigger_sos))
        .route("/api/v1/sos/:id/cancel", post(handlers::cancel_sos))
        .route("/api/v1/sos/status", get(handlers::sos_status))
        .route("/api/v1/sos/history", get(handlers::sos_history))
        .route(
            "/api/v1/settings/reminder",
            get(handlers::get_reminder_settings).put(handlers::update_reminder_settings),
        )
        .route(
            "/api/v1/settings/reminder/quiet-hours",
            delete(handlers::clear_quiet_hours),
        )
        .route(
            "/api/v1/message",
            get(handlers::get_personal_message)
                .put(handlers::save_personal_message)
                .delete(handlers::delete_personal_message),
        )
        .route("/api/v1/location/history", get(handlers::location_history))
        .route("/api/v1/notifications/logs", get(handlers::notification_logs))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer())
                .layer(Extension(ctx))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

pub async fn run(ctx: VigilContext) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.api_port);
    let app = router(ctx);

    tracing::info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;
    use vigil_core::testing::TestHarness;
    use vigil_core::types::{CheckInMethod, ConsentStatus, ContactType, SosStatus};
    use vigil_core::{Config, Store};
    use vigil_engine::SessionTokenService;

    use crate::auth::generate_token;

    fn harness() -> TestHarness {
        let mut config = Config::default();
        config.scheduler.sos_countdown_secs = 600;
        TestHarness::with_config(config)
    }

    fn bearer(h: &TestHarness, user_id: Uuid) -> String {
        generate_token(user_id, &h.ctx.config.server.jwt_secret, 1).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let h = harness();
        let app = router(h.ctx.clone());

        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "vigil-api");
    }

    #[tokio::test]
    async fn test_auth_required() {
        let h = harness();
        let app = router(h.ctx.clone());

        let (status, body) = send(&app, "GET", "/api/v1/checkin/status", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "INVALID_TOKEN");

        let (status, _) = send(&app, "GET", "/api/v1/checkin/status", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, "GET", "/api/v1/checkin/status", Some(&bearer(&h, Uuid::new_v4())), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_deactivated_user_is_forbidden() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        let (status, _) = send(&app, "POST", "/api/v1/users/me/deactivate", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "POST", "/api/v1/checkin", Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "INACTIVE_USER");

        let stored = h.store.get_user(user.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_register_then_profile() {
        let h = harness();
        let app = router(h.ctx.clone());

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": " Jamie@Example.com ", "nickname": "Jamie" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = body["access_token"].as_str().unwrap().to_string();

        let (status, me) = send(&app, "GET", "/api/v1/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["email"], "jamie@example.com");
        assert_eq!(me["has_push_token"], false);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": "jamie@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "DUPLICATE_EMAIL");
    }

    #[tokio::test]
    async fn test_check_in_and_status() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(Some(Utc::now() - Duration::days(3)));
        let token = bearer(&h, user.id);

        let (status, body) = send(&app, "POST", "/api/v1/checkin", Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Check-in successful");
        assert!(body["next_check_in_due"].is_string());

        let (status, body) = send(&app, "GET", "/api/v1/checkin/status", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_overdue"], false);
        assert_eq!(body["check_in_cycle"], 7);

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/checkin/history?page=0&limit=1000",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["total"], 1);

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/checkin/history?page=9223372036854775807&limit=100",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_check_in_settings_validation() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/checkin/settings",
            Some(&token),
            Some(json!({ "check_in_cycle": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/checkin/settings",
            Some(&token),
            Some(json!({ "grace_period": 72 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["check_in_cycle"], 7);
        assert_eq!(body["grace_period"], 72);
    }

    #[tokio::test]
    async fn test_quick_check_in_with_valid_token() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(Some(Utc::now() - Duration::days(6)));
        let issued = SessionTokenService::new(h.ctx.clone())
            .issue(user.id, None)
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/checkin/quick",
            None,
            Some(json!({ "token": issued.token, "device_type": "ios" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (logs, total) = h.store.check_in_history(user.id, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].method, CheckInMethod::PushResponse);

        let stored = h.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_check_in, Some(logs[0].checked_at));

        let token = h.store.get_session_token(&issued.token).await.unwrap().unwrap();
        assert!(token.used_at.is_some());
    }

    #[tokio::test]
    async fn test_quick_check_in_failures_are_200() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let issued = SessionTokenService::new(h.ctx.clone())
            .issue(user.id, None)
            .await
            .unwrap();

        let (status, body) = send(&app, "POST", "/api/v1/checkin/quick", None, Some(json!({ "token": "nope" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);

        let (status, body) = send(&app, "POST", "/api/v1/checkin/quick", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);

        let payload = json!({ "token": issued.token });
        let (_, first) = send(&app, "POST", "/api/v1/checkin/quick", None, Some(payload.clone())).await;
        let (status, second) = send(&app, "POST", "/api/v1/checkin/quick", None, Some(payload)).await;
        assert_eq!(first["success"], true);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["success"], false);
    }

    #[tokio::test]
    async fn test_contact_limits_and_duplicates() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        for i in 0..3 {
            let (status, _) = send(
                &app,
                "POST",
                "/api/v1/contacts",
                Some(&token),
                Some(json!({
                    "name": format!("Contact {}", i),
                    "contact_type": "email",
                    "contact_value": format!("c{}@example.com", i),
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/contacts",
            Some(&token),
            Some(json!({ "name": "Extra", "contact_type": "email", "contact_value": "x@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CONTACT001");

        let (status, body) = send(&app, "GET", "/api/v1/contacts", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_count"], 3);
        assert_eq!(body["max_contacts"], 3);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_contact() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);
        let contact = json!({ "name": "Kim", "contact_type": "email", "contact_value": "kim@example.com" });

        let (status, _) = send(&app, "POST", "/api/v1/contacts", Some(&token), Some(contact.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "POST", "/api/v1/contacts", Some(&token), Some(contact)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONTACT002");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/contacts",
            Some(&token),
            Some(json!({ "name": "Lee", "contact_type": "email", "contact_value": "not-an-email" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "INVALID_CONTACT_VALUE");
    }

    #[tokio::test]
    async fn test_other_users_contact_is_not_found() {
        let h = harness();
        let app = router(h.ctx.clone());
        let owner = h.user(None);
        let other = h.user(None);
        let contact = h.approved_contact(owner.id, "kim@example.com");

        let uri = format!("/api/v1/contacts/{}", contact.id);
        let (status, body) = send(&app, "GET", &uri, Some(&bearer(&h, other.id)), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "CONTACT_NOT_FOUND");

        let (status, _) = send(&app, "GET", &uri, Some(&bearer(&h, owner.id)), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_consent_flow_over_http() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);
        let contact = h.contact(user.id, ContactType::Email, "kim@example.com", ConsentStatus::Pending, false);

        let uri = format!("/api/v1/contacts/{}/consent", contact.id);
        let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["delivered"], true);
        assert_eq!(h.delivery.emails().len(), 1);

        let consent_token = h
            .store
            .get_contact(user.id, contact.id)
            .await
            .unwrap()
            .unwrap()
            .consent_token
            .unwrap();
        assert!(h.delivery.emails()[0].text.contains(&consent_token));

        let public = format!("/api/v1/consent/{}", consent_token);
        let (status, body) = send(&app, "GET", &public, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requester_nickname"], "Jamie");

        let (status, body) = send(&app, "POST", &public, None, Some(json!({ "approved": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");

        let (status, body) = send(&app, "POST", &public, None, Some(json!({ "approved": true }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "CONSENT_NOT_FOUND");

        let (status, body) = send(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");
    }

    #[tokio::test]
    async fn test_sos_trigger_then_cancel() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        h.approved_contact(user.id, "kim@example.com");
        let token = bearer(&h, user.id);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/sos/trigger",
            Some(&token),
            Some(json!({ "location_lat": 37.5, "location_lng": 127.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["countdown_seconds"], 600);
        assert_eq!(body["event"]["status"], "triggered");
        let id = body["event"]["id"].as_str().unwrap().to_string();

        let (_, body) = send(&app, "GET", "/api/v1/sos/status", Some(&token), None).await;
        assert_eq!(body["has_active_sos"], true);

        let cancel = format!("/api/v1/sos/{}/cancel", id);
        let (status, body) = send(&app, "POST", &cancel, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"]["status"], "cancelled");

        let (status, body) = send(&app, "POST", &cancel, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SOS_NOT_FOUND");

        let event = h
            .store
            .get_sos_event(Uuid::parse_str(&id).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, SosStatus::Cancelled);
        assert!(h.delivery.emails().is_empty());

        let (_, body) = send(&app, "GET", "/api/v1/sos/history", Some(&token), None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_settings_round_trip() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        let (status, body) = send(&app, "GET", "/api/v1/settings/reminder", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reminder_hours_before"], json!([48, 24, 12]));

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/settings/reminder",
            Some(&token),
            Some(json!({
                "reminder_hours_before": [6, 72],
                "quiet_hours_start": "22:00:00",
                "quiet_hours_end": "08:00:00",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["reminder_hours_before"], json!([72, 6]));
        assert_eq!(body["settings"]["quiet_hours_start"], "22:00:00");

        let (status, body) = send(&app, "DELETE", "/api/v1/settings/reminder/quiet-hours", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["settings"]["quiet_hours_start"].is_null());
        assert!(body["settings"]["quiet_hours_end"].is_null());
    }

    #[tokio::test]
    async fn test_personal_message_endpoints() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        let (status, body) = send(&app, "GET", "/api/v1/message", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "MESSAGE_NOT_FOUND");

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/message",
            Some(&token),
            Some(json!({ "content": "x".repeat(2001) })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MESSAGE001");

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/message",
            Some(&token),
            Some(json!({ "content": "Thank you for everything." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_enabled"], true);
        assert_eq!(body["max_characters"], 2000);

        let (_, body) = send(&app, "GET", "/api/v1/message", Some(&token), None).await;
        assert_eq!(body["content"], "Thank you for everything.");

        let (status, _) = send(&app, "DELETE", "/api/v1/message", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_location_consent_endpoints() {
        let h = harness();
        let app = router(h.ctx.clone());
        let user = h.user(None);
        let token = bearer(&h, user.id);

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/users/me/location-consent",
            Some(&token),
            Some(json!({ "consent": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location_consent"], true);
        assert!(body["location_consent_at"].is_string());

        let (_, body) = send(&app, "GET", "/api/v1/location/history", Some(&token), None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }
}

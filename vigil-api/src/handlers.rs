use axum::{extract::Extension, http::StatusCode, response::Json};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use vigil_core::store::ContactUpdate;
use vigil_core::types::{CheckInMethod, SosEvent};
use vigil_core::{VigilContext, VigilError};
use vigil_engine::contacts::MAX_CONTACTS;
use vigil_engine::{
    AccountService, CheckInService, ConsentService, ContactService, LocationService, NewContact,
    PersonalMessageService, ReminderService, ReminderSettingsUpdate, SessionTokenService, SosService,
};
use vigil_notify::NotificationService;

use crate::auth::{self, AuthenticatedUser};
use crate::error::{ApiJson, ApiPath, ApiQuery, ApiResult};

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vigil-api"
    }))
}

// Accounts

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

pub async fn register(
    Extension(ctx): Extension<VigilContext>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = AccountService::new(ctx.clone())
        .register(&req.email, req.nickname)
        .await?;
    let access_token = auth::generate_token(
        user.id,
        &ctx.config.server.jwt_secret,
        ctx.config.server.jwt_expiry_days,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "user": user,
            "access_token": access_token,
            "token_type": "bearer",
        })),
    ))
}

pub async fn get_me(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let user = AccountService::new(ctx).get(auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "user": user,
        "has_push_token": user.fcm_token.is_some(),
    })))
}

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub fcm_token: Option<String>,
}

pub async fn update_push_token(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<PushTokenRequest>,
) -> ApiResult<Json<Value>> {
    let user = AccountService::new(ctx)
        .set_push_token(auth.user_id, req.fcm_token)
        .await?;
    Ok(Json(serde_json::json!({
        "message": "Push token updated",
        "has_push_token": user.fcm_token.is_some(),
    })))
}

pub async fn deactivate(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    AccountService::new(ctx).deactivate(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "message": "Account deactivated" })))
}

pub async fn delete_me(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<StatusCode> {
    AccountService::new(ctx).purge(auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Check-in

#[derive(Deserialize)]
pub struct CheckInRequest {
    #[serde(default)]
    pub method: CheckInMethod,
}

pub async fn check_in(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<CheckInRequest>,
) -> ApiResult<Json<Value>> {
    let receipt = CheckInService::new(ctx).record(auth.user_id, req.method).await?;
    Ok(Json(serde_json::json!({
        "id": receipt.log.id,
        "checked_at": receipt.log.checked_at,
        "next_check_in_due": receipt.next_check_in_due,
        "message": "Check-in successful",
    })))
}

pub async fn check_in_status(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let status = CheckInService::new(ctx).status(auth.user_id).await?;
    Ok(Json(serde_json::json!(status)))
}

pub async fn get_check_in_settings(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let user = AccountService::new(ctx).get(auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "check_in_cycle": user.check_in_cycle,
        "grace_period": user.grace_period,
    })))
}

#[derive(Deserialize)]
pub struct CheckInSettingsRequest {
    #[serde(default)]
    pub check_in_cycle: Option<i32>,
    #[serde(default)]
    pub grace_period: Option<i32>,
}

pub async fn update_check_in_settings(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<CheckInSettingsRequest>,
) -> ApiResult<Json<Value>> {
    let user = CheckInService::new(ctx)
        .update_settings(auth.user_id, req.check_in_cycle, req.grace_period)
        .await?;
    Ok(Json(serde_json::json!({
        "check_in_cycle": user.check_in_cycle,
        "grace_period": user.grace_period,
    })))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn check_in_history(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiQuery(params): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let history = CheckInService::new(ctx)
        .history(auth.user_id, params.page.unwrap_or(1), params.limit.unwrap_or(20))
        .await?;
    Ok(Json(serde_json::json!(history)))
}

#[derive(Deserialize)]
pub struct QuickCheckInRequest {
    pub token: String,
    #[serde(default)]
    pub device_type: Option<String>,
}

fn quick_failure(message: &str) -> Json<Value> {
    Json(serde_json::json!({
        "success": false,
        "message": message,
    }))
}

/// Answers 200 in every case; the outcome is the `success` flag.
pub async fn quick_check_in(
    Extension(ctx): Extension<VigilContext>,
    req: Option<axum::Json<QuickCheckInRequest>>,
) -> Json<Value> {
    let Some(axum::Json(req)) = req else {
        return quick_failure("Invalid or expired token");
    };

    match SessionTokenService::new(ctx).quick_check_in(&req.token).await {
        Ok(Some(receipt)) => {
            tracing::debug!(
                "Quick check-in for user {} from {}",
                receipt.user.id,
                req.device_type.as_deref().unwrap_or("unknown device")
            );
            Json(serde_json::json!({
                "success": true,
                "id": receipt.log.id,
                "checked_at": receipt.log.checked_at,
                "next_check_in_due": receipt.next_check_in_due,
                "message": "Check-in successful",
            }))
        }
        Ok(None) => quick_failure("Invalid or expired token"),
        Err(e) => {
            tracing::error!("Quick check-in failed: {}", e);
            quick_failure("Check-in could not be recorded, please open the app")
        }
    }
}

// Emergency contacts

pub async fn list_contacts(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let contacts = ContactService::new(ctx).list(auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "current_count": contacts.len(),
        "max_contacts": MAX_CONTACTS,
        "data": contacts,
    })))
}

pub async fn create_contact(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<NewContact>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let contact = ContactService::new(ctx).create(auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(contact))))
}

pub async fn get_contact(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let contact = ContactService::new(ctx).get(auth.user_id, contact_id).await?;
    Ok(Json(serde_json::json!(contact)))
}

#[derive(Deserialize)]
pub struct UpdateContactRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

pub async fn update_contact(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateContactRequest>,
) -> ApiResult<Json<Value>> {
    let update = ContactUpdate {
        name: req.name,
        priority: req.priority,
    };
    let contact = ContactService::new(ctx)
        .update(auth.user_id, contact_id, update)
        .await?;
    Ok(Json(serde_json::json!(contact)))
}

pub async fn delete_contact(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    ContactService::new(ctx).delete(auth.user_id, contact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn verify_contact(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let contact = ContactService::new(ctx).verify(auth.user_id, contact_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Verification request sent",
        "contact_id": contact.id,
        "sent_to": contact.contact_value,
    })))
}

// Consent

pub async fn request_consent(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let user = AccountService::new(ctx.clone()).get(auth.user_id).await?;
    let contact = ConsentService::new(ctx.clone())
        .request_consent(auth.user_id, contact_id)
        .await?;
    let delivered = NotificationService::new(ctx)
        .send_consent_request(&user, &contact)
        .await;

    Ok(Json(serde_json::json!({
        "message": "Consent request created",
        "contact_id": contact.id,
        "status": contact.status,
        "consent_expires_at": contact.consent_expires_at,
        "delivered": delivered,
    })))
}

pub async fn consent_status(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(contact_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let contact = ConsentService::new(ctx).status(auth.user_id, contact_id).await?;
    Ok(Json(serde_json::json!({
        "contact_id": contact.id,
        "status": contact.status,
        "consent_requested_at": contact.consent_requested_at,
        "consent_responded_at": contact.consent_responded_at,
        "consent_expires_at": contact.consent_expires_at,
    })))
}

pub async fn get_consent_request(
    Extension(ctx): Extension<VigilContext>,
    ApiPath(token): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let contact = ConsentService::new(ctx.clone())
        .resolve_by_token(&token)
        .await?
        .ok_or(VigilError::ConsentNotFound)?;
    let requester = ctx
        .store
        .get_user(contact.user_id)
        .await?
        .ok_or(VigilError::ConsentNotFound)?;

    Ok(Json(serde_json::json!({
        "contact_name": contact.name,
        "requester_nickname": requester.display_name(),
        "expires_at": contact.consent_expires_at,
    })))
}

#[derive(Deserialize)]
pub struct ConsentDecision {
    pub approved: bool,
}

pub async fn respond_to_consent(
    Extension(ctx): Extension<VigilContext>,
    ApiPath(token): ApiPath<String>,
    ApiJson(req): ApiJson<ConsentDecision>,
) -> ApiResult<Json<Value>> {
    let contact = ConsentService::new(ctx)
        .process_consent(&token, req.approved)
        .await?
        .ok_or(VigilError::ConsentNotFound)?;

    let message = if req.approved {
        "Thank you. You are now an emergency contact."
    } else {
        "You have declined the request."
    };
    Ok(Json(serde_json::json!({
        "message": message,
        "status": contact.status,
    })))
}

// SOS

fn sos_json(event: &SosEvent) -> Value {
    serde_json::json!({
        "id": event.id,
        "status": event.status,
        "triggered_at": event.triggered_at,
        "cancelled_at": event.cancelled_at,
        "sent_at": event.sent_at,
        "location_lat": event.location_lat,
        "location_lng": event.location_lng,
    })
}

#[derive(Deserialize)]
pub struct TriggerSosRequest {
    #[serde(default)]
    pub location_lat: Option<f64>,
    #[serde(default)]
    pub location_lng: Option<f64>,
}

pub async fn trigger_sos(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<TriggerSosRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let event = SosService::new(ctx.clone())
        .trigger(auth.user_id, req.location_lat, req.location_lng)
        .await?;
    vigil_scheduler::schedule_sos_dispatch(ctx.clone(), event.id);

    let countdown = ctx.config.scheduler.sos_countdown_secs;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": format!("SOS triggered. Your contacts will be alerted in {} seconds unless you cancel.", countdown),
            "event": sos_json(&event),
            "countdown_seconds": countdown,
        })),
    ))
}

pub async fn cancel_sos(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiPath(sos_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let event = SosService::new(ctx)
        .cancel(auth.user_id, sos_id)
        .await?
        .ok_or(VigilError::SosNotFound)?;
    Ok(Json(serde_json::json!({
        "message": "SOS cancelled",
        "event": sos_json(&event),
    })))
}

pub async fn sos_status(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let active = SosService::new(ctx).active_event(auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "has_active_sos": active.is_some(),
        "active_event": active.as_ref().map(sos_json),
    })))
}

pub async fn sos_history(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let events = SosService::new(ctx).history(auth.user_id).await?;
    let data: Vec<Value> = events.iter().map(sos_json).collect();
    Ok(Json(serde_json::json!({ "data": data })))
}

// Reminder settings

pub async fn get_reminder_settings(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let settings = ReminderService::new(ctx).settings_for(auth.user_id).await?;
    Ok(Json(serde_json::json!(settings)))
}

pub async fn update_reminder_settings(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<ReminderSettingsUpdate>,
) -> ApiResult<Json<Value>> {
    let settings = ReminderService::new(ctx).update(auth.user_id, req).await?;
    Ok(Json(serde_json::json!({
        "message": "Reminder settings updated",
        "settings": settings,
    })))
}

pub async fn clear_quiet_hours(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let settings = ReminderService::new(ctx).clear_quiet_hours(auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Quiet hours cleared",
        "settings": settings,
    })))
}

// Personal message

pub async fn get_personal_message(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let message = PersonalMessageService::new(ctx).get(auth.user_id).await?;
    Ok(Json(serde_json::json!(message)))
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
pub struct SaveMessageRequest {
    pub content: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

pub async fn save_personal_message(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<SaveMessageRequest>,
) -> ApiResult<Json<Value>> {
    let message = PersonalMessageService::new(ctx)
        .save(auth.user_id, &req.content, req.is_enabled)
        .await?;
    Ok(Json(serde_json::json!(message)))
}

pub async fn delete_personal_message(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<StatusCode> {
    PersonalMessageService::new(ctx).delete(auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Location

#[derive(Deserialize)]
pub struct LocationConsentRequest {
    pub consent: bool,
}

pub async fn get_location_consent(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let consent = LocationService::new(ctx).consent(auth.user_id).await?;
    Ok(Json(serde_json::json!(consent)))
}

pub async fn update_location_consent(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(req): ApiJson<LocationConsentRequest>,
) -> ApiResult<Json<Value>> {
    let consent = LocationService::new(ctx)
        .set_consent(auth.user_id, req.consent)
        .await?;
    Ok(Json(serde_json::json!(consent)))
}

pub async fn location_history(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let logs = LocationService::new(ctx).history(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "data": logs })))
}

// Notification log

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn notification_logs(
    Extension(ctx): Extension<VigilContext>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiQuery(params): ApiQuery<LogQuery>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let logs = ctx.store.list_notification_logs(auth.user_id, limit).await?;
    Ok(Json(serde_json::json!({ "data": logs })))
}

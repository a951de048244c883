use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> Uuid,
        email -> Text,
        nickname -> Nullable<Text>,
        check_in_cycle -> Int4,
        grace_period -> Int4,
        last_check_in -> Nullable<Timestamptz>,
        fcm_token -> Nullable<Text>,
        is_active -> Bool,
        location_consent -> Bool,
        location_consent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    check_in_logs (id) {
        id -> Uuid,
        user_id -> Uuid,
        checked_at -> Timestamptz,
        method -> Text,
    }
}

table! {
    checkin_session_tokens (id) {
        id -> Uuid,
        user_id -> Uuid,
        token -> Text,
        expires_at -> Timestamptz,
        used_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

table! {
    emergency_contacts (id) {
        id -> Uuid,
        user_id -> Uuid,
        name -> Text,
        contact_type -> Text,
        contact_value -> Text,
        priority -> Int4,
        is_verified -> Bool,
        status -> Text,
        consent_requested_at -> Nullable<Timestamptz>,
        consent_responded_at -> Nullable<Timestamptz>,
        consent_token -> Nullable<Text>,
        consent_expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    sos_events (id) {
        id -> Uuid,
        user_id -> Uuid,
        status -> Text,
        triggered_at -> Timestamptz,
        cancelled_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        location_lat -> Nullable<Float8>,
        location_lng -> Nullable<Float8>,
    }
}

table! {
    reminder_settings (id) {
        id -> Uuid,
        user_id -> Uuid,
        reminder_hours_before -> Array<Int4>,
        quiet_hours_start -> Nullable<Time>,
        quiet_hours_end -> Nullable<Time>,
        preferred_time -> Nullable<Time>,
        push_enabled -> Bool,
        email_enabled -> Bool,
        custom_message -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notification_logs (id) {
        id -> Uuid,
        user_id -> Uuid,
        contact_id -> Nullable<Uuid>,
        notification_type -> Text,
        status -> Text,
        sent_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    personal_messages (id) {
        id -> Uuid,
        user_id -> Uuid,
        content -> Text,
        is_enabled -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    location_sharing_logs (id) {
        id -> Uuid,
        user_id -> Uuid,
        event_type -> Text,
        location_lat -> Nullable<Float8>,
        location_lng -> Nullable<Float8>,
        recipient_ids -> Array<Uuid>,
        shared_at -> Timestamptz,
    }
}

joinable!(check_in_logs -> users (user_id));
joinable!(checkin_session_tokens -> users (user_id));
joinable!(emergency_contacts -> users (user_id));
joinable!(sos_events -> users (user_id));
joinable!(reminder_settings -> users (user_id));
joinable!(notification_logs -> users (user_id));
joinable!(personal_messages -> users (user_id));
joinable!(location_sharing_logs -> users (user_id));

allow_tables_to_appear_in_same_query!(
    users,
    check_in_logs,
    checkin_session_tokens,
    emergency_contacts,
    sos_events,
    reminder_settings,
    notification_logs,
    personal_messages,
    location_sharing_logs,
);

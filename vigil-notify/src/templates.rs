//! Message texts for contacts (e-mail) and users (push).
//!
//! E-mail bodies are HTML fragments; the provider wraps them in its layout.
//! Every value interpolated into HTML goes through [`html_escape`].

use chrono::{DateTime, Utc};
use vigil_core::{html_escape, EmailMessage};

pub const LEGAL_DISCLAIMER: &str = "This service does not confirm anyone's death or injury. \
It only reports that a person has stopped responding. \
If you believe someone is in danger, contact your local emergency services.";

fn disclaimer_html() -> String {
    format!(
        r#"<hr style="border: none; border-top: 1px solid #ddd; margin: 24px 0;">
<p style="color: #666; font-size: 12px; line-height: 1.6;">{}</p>"#,
        html_escape(LEGAL_DISCLAIMER)
    )
}

fn paragraph(text: &str) -> String {
    format!(
        r#"<p style="margin: 0 0 16px 0; font-size: 16px; color: #495057;">{}</p>"#,
        text
    )
}

fn email(to: &str, subject: String, paragraphs: &[String], text: String) -> EmailMessage {
    let mut html: String = paragraphs.iter().map(|p| paragraph(p)).collect();
    html.push_str(&disclaimer_html());
    EmailMessage {
        to: to.to_string(),
        subject,
        html,
        text: format!("{}\n\n---\n{}", text, LEGAL_DISCLAIMER),
    }
}

pub fn status_alert_email(app_name: &str, user_name: &str, contact_name: &str, days: i64, to: &str) -> EmailMessage {
    let subject = format!("[{}] {} has not checked in", app_name, user_name);
    let text = format!(
        "Hello {},\n\n{} has not checked in for {} days.\n\
         {} registered you as an emergency contact. Please try to reach them or check on them in person.",
        contact_name, user_name, days, user_name
    );
    email(
        to,
        subject,
        &[
            format!("Hello {},", html_escape(contact_name)),
            format!(
                "<strong>{}</strong> has not checked in for <strong>{} days</strong>.",
                html_escape(user_name),
                days
            ),
            format!(
                "{} registered you as an emergency contact. Please try to reach them or check on them in person.",
                html_escape(user_name)
            ),
        ],
        text,
    )
}

pub fn personal_message_email(app_name: &str, user_name: &str, contact_name: &str, message: &str, to: &str) -> EmailMessage {
    let subject = format!("[{}] A message from {}", app_name, user_name);
    let text = format!(
        "Hello {},\n\n{} wrote this message in advance to be delivered to you:\n\n{}\n\n\
         This message has no legal effect.",
        contact_name, user_name, message
    );
    email(
        to,
        subject,
        &[
            format!("Hello {},", html_escape(contact_name)),
            format!(
                "{} wrote this message in advance to be delivered to you:",
                html_escape(user_name)
            ),
            format!(
                r#"<span style="white-space: pre-wrap;">{}</span>"#,
                html_escape(message)
            ),
            "This message has no legal effect.".to_string(),
        ],
        text,
    )
}

pub fn sos_alert_email(app_name: &str, user_name: &str, contact_name: &str, map_link: Option<&str>, to: &str) -> EmailMessage {
    let subject = format!("[{}] SOS from {}", app_name, user_name);
    let mut text = format!(
        "Hello {},\n\n{} triggered an SOS alert and did not cancel it. Please contact them right away.",
        contact_name, user_name
    );
    let mut paragraphs = vec![
        format!("Hello {},", html_escape(contact_name)),
        format!(
            "<strong>{}</strong> triggered an SOS alert and did not cancel it. Please contact them right away.",
            html_escape(user_name)
        ),
    ];
    if let Some(link) = map_link {
        text.push_str(&format!("\n\nLast known location: {}", link));
        paragraphs.push(format!(
            r#"Last known location: <a href="{0}">{0}</a>"#,
            html_escape(link)
        ));
    }
    email(to, subject, &paragraphs, text)
}

pub fn consent_request_email(
    app_name: &str,
    user_name: &str,
    contact_name: &str,
    consent_url: &str,
    expires_at: DateTime<Utc>,
    to: &str,
) -> EmailMessage {
    let subject = format!("[{}] {} wants to add you as an emergency contact", app_name, user_name);
    let expires = expires_at.format("%Y-%m-%d %H:%M UTC").to_string();
    let text = format!(
        "Hello {},\n\n{} would like to add you as an emergency contact. \
         If they stop checking in, you will be notified by e-mail.\n\n\
         Respond here: {}\nThis link expires on {}.",
        contact_name, user_name, consent_url, expires
    );
    email(
        to,
        subject,
        &[
            format!("Hello {},", html_escape(contact_name)),
            format!(
                "<strong>{}</strong> would like to add you as an emergency contact. \
                 If they stop checking in, you will be notified by e-mail.",
                html_escape(user_name)
            ),
            format!(
                r#"<a href="{}">Accept or decline</a>. This link expires on {}."#,
                html_escape(consent_url),
                expires
            ),
        ],
        text,
    )
}

/// Title and body of the regular reminder push.
pub fn reminder_push(days_remaining: i64) -> (String, String) {
    match days_remaining {
        d if d > 1 => (
            "Check-in reminder".to_string(),
            format!("{} days left until your check-in deadline. Open the app to check in.", d),
        ),
        1 => (
            "Check-in reminder".to_string(),
            "Your check-in deadline is tomorrow. Don't forget to check in!".to_string(),
        ),
        _ => (
            "Check-in needed".to_string(),
            "Your check-in deadline is today. Please check in now.".to_string(),
        ),
    }
}

/// Sent during the grace period.
pub fn urgent_reminder_push() -> (String, String) {
    (
        "Urgent: check-in needed".to_string(),
        "Your check-in deadline has passed. Check in before your emergency contacts are notified.".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_escapes_and_carries_disclaimer() {
        let message = status_alert_email("Vigil", "<script>", "Kim", 10, "kim@example.com");
        assert_eq!(message.to, "kim@example.com");
        assert!(message.subject.contains("<script>"));
        assert!(message.html.contains("&lt;script&gt;"));
        assert!(!message.html.contains("<script>"));
        assert!(message.html.contains("10 days"));
        assert!(message.text.contains(LEGAL_DISCLAIMER));
        assert!(message.html.contains(&html_escape(LEGAL_DISCLAIMER)));
    }

    #[test]
    fn test_sos_map_link_is_optional() {
        let without = sos_alert_email("Vigil", "Jamie", "Kim", None, "kim@example.com");
        assert!(!without.text.contains("location"));

        let link = "https://maps.google.com/maps?q=1.5,2.5";
        let with = sos_alert_email("Vigil", "Jamie", "Kim", Some(link), "kim@example.com");
        assert!(with.text.contains(link));
        assert!(with.html.contains(link));
    }

    #[test]
    fn test_reminder_push_wording() {
        assert!(reminder_push(3).1.starts_with("3 days left"));
        assert!(reminder_push(1).1.contains("tomorrow"));
        assert_eq!(reminder_push(0).0, "Check-in needed");
        assert!(urgent_reminder_push().0.starts_with("Urgent"));
    }
}

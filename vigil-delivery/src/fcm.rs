use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fcm::{Client, MessageBuilder, NotificationBuilder};
use std::time::Duration;
use vigil_core::config::DeliveryConfig;
use vigil_core::{PushMessage, PushSender};

/// Firebase Cloud Messaging provider (legacy server-key API).
pub struct FcmDelivery {
    client: Option<Client>,
    server_key: Option<String>,
    timeout: Duration,
}

impl FcmDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let (client, server_key) = if let Some(key) = &config.fcm_server_key {
            tracing::info!("Initializing FCM client");
            (Some(Client::new()), Some(key.clone()))
        } else {
            tracing::warn!("FCM delivery disabled (missing configuration)");
            (None, None)
        };

        Ok(Self {
            client,
            server_key,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl PushSender for FcmDelivery {
    async fn send_push(&self, message: &PushMessage) -> Result<()> {
        let (client, server_key) = match (&self.client, &self.server_key) {
            (Some(c), Some(k)) => (c, k),
            _ => return Err(anyhow!("push provider not configured")),
        };

        let mut notification = NotificationBuilder::new();
        notification.title(&message.title);
        notification.body(&message.body);
        notification.sound("default");

        let mut builder = MessageBuilder::new(server_key, &message.token);
        builder.notification(notification.finalize());
        builder
            .data(&message.data)
            .map_err(|e| anyhow!("Failed to encode FCM data payload: {}", e))?;

        let response = tokio::time::timeout(self.timeout, client.send(builder.finalize()))
            .await
            .map_err(|_| anyhow!("FCM request timed out after {:?}", self.timeout))?
            .map_err(|e| anyhow!("FCM request failed: {:?}", e))?;

        if let Some(error) = response.error {
            return Err(anyhow!("FCM rejected message: {:?}", error));
        }
        if let Some(error) = response
            .results
            .unwrap_or_default()
            .into_iter()
            .find_map(|r| r.error)
        {
            return Err(anyhow!("FCM rejected message: {:?}", error));
        }

        tracing::debug!("Push sent via FCM (message_id: {:?})", response.message_id);
        Ok(())
    }
}

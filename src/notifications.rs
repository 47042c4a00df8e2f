//! Notification sink
//!
//! Findings are pushed to Discord when credentials are configured. Sink
//! failures are logged by callers and never propagate into scan outcomes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::patterns::Severity;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected: status {0}")]
    Rejected(u16),
}

/// One outbound notification.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub fields: Vec<(String, String)>,
}

impl NotificationMessage {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Build a sink from `DISCORD_TOKEN` / `DISCORD_CHANNEL_ID`; a no-op sink
/// when either is absent.
pub fn sink_from_env() -> Arc<dyn NotificationSink> {
    match (
        std::env::var("DISCORD_TOKEN"),
        std::env::var("DISCORD_CHANNEL_ID"),
    ) {
        (Ok(token), Ok(channel)) if !token.is_empty() && !channel.is_empty() => {
            tracing::info!(channel = %channel, "Discord notifications enabled");
            Arc::new(DiscordSink::new(token, channel))
        }
        _ => {
            tracing::info!("Discord credentials not set, notifications disabled");
            Arc::new(NullSink)
        }
    }
}

/// Discards every message. Used when no credentials are configured and as a
/// stand-in for tests.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Posts messages to a Discord channel through the bot REST API.
pub struct DiscordSink {
    client: Client,
    token: String,
    channel_id: String,
}

#[derive(Serialize)]
struct DiscordPayload {
    embeds: Vec<DiscordEmbed>,
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
}

#[derive(Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

impl DiscordSink {
    pub fn new(token: String, channel_id: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            token,
            channel_id,
        }
    }

    fn embed_color(severity: Severity) -> u32 {
        match severity {
            Severity::Critical => 0xe0_1e5a,
            Severity::High => 0xe6_7e22,
            Severity::Medium => 0xf1_c40f,
            Severity::Low => 0x33_98db,
            Severity::Info => 0x95_a5a6,
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = DiscordPayload {
            embeds: vec![DiscordEmbed {
                title: format!("{} {}", message.severity.emoji(), message.title),
                description: message.description.clone(),
                color: Self::embed_color(message.severity),
                fields: message
                    .fields
                    .iter()
                    .map(|(name, value)| DiscordField {
                        name: name.clone(),
                        value: value.clone(),
                        inline: true,
                    })
                    .collect(),
            }],
        };

        let url = format!(
            "https://discord.com/api/v10/channels/{}/messages",
            self.channel_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_accepts_everything() {
        let sink = NullSink;
        let message = NotificationMessage::new("t", "d", Severity::High)
            .with_field("url", "https://a.example.com/admin");
        sink.send(&message).await.unwrap();
    }

    #[test]
    fn severity_maps_to_embed_color() {
        assert_ne!(
            DiscordSink::embed_color(Severity::Critical),
            DiscordSink::embed_color(Severity::Info)
        );
    }
}

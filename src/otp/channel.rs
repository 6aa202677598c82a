use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::error::AppError;
use crate::models::otp::OtpPurpose;

/// Outbound SMS seam. Implementations must not log `code`.
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(
        &self,
        phone: &str,
        code: &str,
        purpose: OtpPurpose,
        language: &str,
    ) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub phone: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub language: String,
    pub queued_at: DateTime<Utc>,
}

/// Logs that a code went out and keeps nothing. Default channel until an SMS
/// provider is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(
        &self,
        phone: &str,
        _code: &str,
        purpose: OtpPurpose,
        language: &str,
    ) -> Result<(), AppError> {
        info!(phone = %mask_phone(phone), purpose = ?purpose, language, "otp handed to sms channel");
        Ok(())
    }
}

/// Messages kept per phone number by [`OutboxCodeSender`].
pub const OUTBOX_CAPACITY: usize = 8;

/// Keeps the most recent outgoing codes in memory, keyed by phone number, so
/// tests can read them back. Older messages past [`OUTBOX_CAPACITY`] are
/// dropped.
#[derive(Debug, Default)]
pub struct OutboxCodeSender {
    messages: DashMap<String, Vec<OutboxMessage>>,
}

impl OutboxCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code(&self, phone: &str) -> Option<String> {
        self.messages
            .get(phone)
            .and_then(|messages| messages.last().map(|message| message.code.clone()))
    }

    pub fn messages(&self, phone: &str) -> Vec<OutboxMessage> {
        self.messages
            .get(phone)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CodeSender for OutboxCodeSender {
    async fn send_code(
        &self,
        phone: &str,
        code: &str,
        purpose: OtpPurpose,
        language: &str,
    ) -> Result<(), AppError> {
        {
            let mut messages = self.messages.entry(phone.to_string()).or_default();
            if messages.len() >= OUTBOX_CAPACITY {
                let excess = messages.len() + 1 - OUTBOX_CAPACITY;
                messages.drain(..excess);
            }
            messages.push(OutboxMessage {
                phone: phone.to_string(),
                code: code.to_string(),
                purpose,
                language: language.to_string(),
                queued_at: Utc::now(),
            });
        }

        info!(phone = %mask_phone(phone), purpose = ?purpose, "otp queued in outbox");
        Ok(())
    }
}

pub fn mask_phone(phone: &str) -> String {
    let visible = phone.chars().rev().take(4).collect::<Vec<_>>();
    let hidden = phone.chars().count().saturating_sub(visible.len());
    let tail: String = visible.into_iter().rev().collect();
    format!("{}{}", "*".repeat(hidden), tail)
}

#[cfg(test)]
mod tests {
    use super::{CodeSender, LogCodeSender, OUTBOX_CAPACITY, OutboxCodeSender, mask_phone};
    use crate::models::otp::OtpPurpose;

    #[test]
    fn masking_keeps_last_four_digits() {
        assert_eq!(mask_phone("+919876543210"), "*********3210");
        assert_eq!(mask_phone("12"), "12");
    }

    #[tokio::test]
    async fn outbox_keeps_latest_code_per_phone() {
        let outbox = OutboxCodeSender::new();
        outbox
            .send_code("+911", "111111", OtpPurpose::DeliveryConfirmation, "en")
            .await
            .unwrap();
        outbox
            .send_code("+911", "222222", OtpPurpose::DeliveryConfirmation, "hi")
            .await
            .unwrap();

        assert_eq!(outbox.last_code("+911").as_deref(), Some("222222"));
        assert_eq!(outbox.messages("+911").len(), 2);
        assert!(outbox.last_code("+912").is_none());
    }

    #[tokio::test]
    async fn outbox_drops_oldest_beyond_capacity() {
        let outbox = OutboxCodeSender::new();
        for n in 0..OUTBOX_CAPACITY + 3 {
            outbox
                .send_code("+911", &format!("{n:06}"), OtpPurpose::DeliveryConfirmation, "en")
                .await
                .unwrap();
        }

        let messages = outbox.messages("+911");
        assert_eq!(messages.len(), OUTBOX_CAPACITY);
        assert_eq!(messages[0].code, "000003");
        assert_eq!(
            outbox.last_code("+911"),
            Some(format!("{:06}", OUTBOX_CAPACITY + 2))
        );
    }

    #[tokio::test]
    async fn log_sender_accepts_without_retaining() {
        let sender = LogCodeSender;
        assert!(
            sender
                .send_code("+911", "111111", OtpPurpose::DeliveryConfirmation, "en")
                .await
                .is_ok()
        );
    }
}

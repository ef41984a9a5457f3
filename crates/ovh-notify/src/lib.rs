//! Notifier (C7).
//!
//! A deduplicated, best-effort outbound message sink. `Notifier::notify`
//! never returns an error to its caller: the scheduler and monitor loops
//! must never stall or retry because a notification failed to send.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// Identical text sent again within this window is dropped.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Tracks the last text sent and when, so a burst of identical notifications
/// (e.g. the same DC flipping available across two consecutive monitor
/// ticks) collapses to one outbound message.
struct Dedup {
    last: Mutex<Option<(String, Instant)>>,
}

impl Dedup {
    fn new() -> Self {
        Self { last: Mutex::new(None) }
    }

    /// Returns true if `text` should be suppressed as a duplicate.
    fn is_duplicate(&self, text: &str) -> bool {
        let mut last = self.last.lock().unwrap();
        let suppress = matches!(
            last.as_ref(),
            Some((prev_text, at)) if prev_text == text && at.elapsed() < DEDUP_WINDOW
        );
        if !suppress {
            *last = Some((text.to_string(), Instant::now()));
        }
        suppress
    }
}

#[derive(Serialize)]
struct TelegramSendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// `Send(text)` against a Telegram bot's `sendMessage` endpoint.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
    dedup: Dedup,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
            dedup: Dedup::new(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        if self.dedup.is_duplicate(text) {
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .http
            .post(&url)
            .json(&TelegramSendMessage { chat_id: &self.chat_id, text })
            .send()
            .await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = %resp.status(), "telegram notifier: non-success response, dropping");
            }
            Err(e) => {
                warn!(error = %e, "telegram notifier: send failed, dropping");
            }
            Ok(_) => {}
        }
    }
}

/// Discards every message. Used when no notifier is configured, and in tests.
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _text: &str) {}
}

/// Records every message it receives, ignoring dedup, for test assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_suppresses_identical_text_within_window() {
        let dedup = Dedup::new();
        assert!(!dedup.is_duplicate("plan available in gra"));
        assert!(dedup.is_duplicate("plan available in gra"));
    }

    #[test]
    fn dedup_allows_distinct_text_back_to_back() {
        let dedup = Dedup::new();
        assert!(!dedup.is_duplicate("plan available in gra"));
        assert!(!dedup.is_duplicate("plan available in sbg"));
    }

    #[tokio::test]
    async fn recording_notifier_captures_every_call() {
        let notifier = RecordingNotifier::default();
        notifier.notify("a").await;
        notifier.notify("b").await;
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn null_notifier_never_panics() {
        let notifier = NullNotifier;
        notifier.notify("anything").await;
    }
}

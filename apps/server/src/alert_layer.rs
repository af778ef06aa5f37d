//! Tracing layer that pushes ERROR events to the owner's Telegram chat,
//! throttled so a cascading failure does not flood the chat: one message
//! per 10 s globally, and identical messages suppressed for a minute.
//! The HTTP call is spawned, never awaited on the logging path.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Throttling state, separated from the layer so it can be unit tested.
struct Throttle {
    last_sent: Option<Instant>,
    seen: HashMap<u64, Instant>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            seen: HashMap::new(),
        }
    }

    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.seen
            .retain(|_, ts| now.duration_since(*ts) < DEDUP_WINDOW);

        if self.seen.contains_key(&hash) {
            return false;
        }
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < MIN_INTERVAL {
                return false;
            }
        }

        self.last_sent = Some(now);
        self.seen.insert(hash, now);
        true
    }
}

pub struct AlertLayer {
    bot_token: String,
    chat_id: i64,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl AlertLayer {
    pub fn new(bot_token: String, chat_id: i64) -> Self {
        Self {
            bot_token,
            chat_id,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        let admitted = self
            .throttle
            .lock()
            .map(|mut t| t.admit(hash, Instant::now()))
            .unwrap_or(false);
        if !admitted {
            return;
        }

        let meta = event.metadata();
        let location = format!(
            "{} ({}:{})",
            meta.target(),
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into())
        );
        let text = format!(
            "\u{1f6a8} <b>Server error</b>\n<code>{}</code>\n\u{1f4cd} {}\n\u{1f550} {}",
            message,
            location,
            chrono::Utc::now().format("%H:%M:%S UTC")
        );

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.http.clone();
        let chat_id = self.chat_id;
        tokio::spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML"
                }))
                .send()
                .await;
        });
    }
}

/// Pulls the `message` field plus structured fields out of a tracing event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_string(), val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_admitted() {
        let mut t = Throttle::new();
        assert!(t.admit(1, Instant::now()));
    }

    #[test]
    fn test_global_interval_suppresses_distinct_alerts() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(!t.admit(2, now + Duration::from_secs(5)));
        assert!(t.admit(2, now + MIN_INTERVAL));
    }

    #[test]
    fn test_duplicate_suppressed_past_interval() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(!t.admit(1, now + MIN_INTERVAL + Duration::from_secs(1)));
    }

    #[test]
    fn test_duplicate_admitted_after_dedup_window() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(t.admit(1, now + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn test_visitor_message_with_fields() {
        let mut v = MessageVisitor::default();
        v.message = "outbox worker pass failed".into();
        v.fields.push(("event_id".into(), "7".into()));
        assert_eq!(v.message(), "outbox worker pass failed (event_id=7)");
    }

    #[test]
    fn test_visitor_fields_only() {
        let v = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(v.message(), "error=timeout");
    }
}

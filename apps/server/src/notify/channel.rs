use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fmt;

use crate::models::Client;

/// Delivery medium for client-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Telegram,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(Channel::Telegram),
            "email" => Some(Channel::Email),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery strategy. The dispatcher walks an ordered plan of these.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// A sender must only be attempted when `can_reach` holds.
    fn can_reach(&self, client: &Client) -> bool;

    async fn attempt(
        &self,
        client: &Client,
        subject: Option<&str>,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Outcome of one dispatch: the channel actually used (or the terminal
/// fallback label when nothing was reachable), the final status, and the
/// error history of every failed attempt, oldest first.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: Channel,
    pub sent: bool,
    pub error: Option<String>,
}

/// Channel precedence for one client:
/// 1. forced channel with reachable contact info — that channel only;
/// 2. linked Telegram + telegram preference — Telegram, then email fallback;
/// 3. email address on file — email;
/// 4. nothing — empty plan, the dispatch is logged as failed.
pub fn delivery_plan(client: &Client, force: Option<Channel>) -> Vec<Channel> {
    match force {
        Some(Channel::Telegram) if client.telegram_chat_id.is_some() => {
            return vec![Channel::Telegram];
        }
        Some(Channel::Email) if client.email.is_some() => {
            return vec![Channel::Email];
        }
        // Forced channel without contact info falls through to the
        // preference chain rather than failing outright.
        _ => {}
    }

    let mut plan = Vec::new();
    if client.telegram_chat_id.is_some() && client.preferred_channel == "telegram" {
        plan.push(Channel::Telegram);
    }
    if client.email.is_some() {
        plan.push(Channel::Email);
    }
    plan
}

/// Walks the delivery plan, trying each sender until one succeeds.
pub struct Dispatcher {
    senders: Vec<Box<dyn ChannelSender>>,
}

impl Dispatcher {
    pub fn new(senders: Vec<Box<dyn ChannelSender>>) -> Self {
        Self { senders }
    }

    fn sender_for(&self, channel: Channel) -> Option<&dyn ChannelSender> {
        self.senders
            .iter()
            .find(|s| s.channel() == channel)
            .map(|s| s.as_ref())
    }

    /// Try the plan in order. Returns the final channel and status; errors
    /// from earlier failed attempts are kept, joined in order, so a
    /// fallback success still preserves the first failure's diagnostics.
    pub async fn dispatch(
        &self,
        client: &Client,
        subject: Option<&str>,
        body: &str,
        force: Option<Channel>,
    ) -> Delivery {
        let plan = delivery_plan(client, force);
        let mut errors: Vec<String> = Vec::new();
        let mut last_channel = None;

        for channel in plan {
            let Some(sender) = self.sender_for(channel) else {
                continue;
            };
            if !sender.can_reach(client) {
                continue;
            }
            last_channel = Some(channel);
            match sender.attempt(client, subject, body).await {
                Ok(()) => {
                    return Delivery {
                        channel,
                        sent: true,
                        error: if errors.is_empty() {
                            None
                        } else {
                            Some(errors.join("; "))
                        },
                    };
                }
                Err(e) => {
                    tracing::warn!("{} delivery failed for client {}: {}", channel, client.id, e);
                    errors.push(format!("{}: {}", channel, e));
                }
            }
        }

        // Nothing worked (or nothing was reachable). Email is the terminal
        // fallback label for the audit row.
        Delivery {
            channel: last_channel.unwrap_or(Channel::Email),
            sent: false,
            error: Some(if errors.is_empty() {
                "no delivery channel available for client".into()
            } else {
                errors.join("; ")
            }),
        }
    }
}

/// Append the audit row. Every dispatch writes exactly one, success or not.
pub async fn record_sent_message(
    pool: &SqlitePool,
    client_id: i64,
    appointment_id: Option<i64>,
    delivery: &Delivery,
    message_text: &str,
) {
    let status = if delivery.sent { "sent" } else { "failed" };
    let result = sqlx::query(
        "INSERT INTO sent_messages (client_id, appointment_id, channel, message_text,
                                    delivery_status, error_message)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(client_id)
    .bind(appointment_id)
    .bind(delivery.channel.as_str())
    .bind(message_text)
    .bind(status)
    .bind(&delivery.error)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!("failed to record sent message for client {}: {}", client_id, e);
    }
}

// ── Telegram sender ──

pub struct TelegramSender {
    http: reqwest::Client,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
        }
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn can_reach(&self, client: &Client) -> bool {
        client.telegram_chat_id.is_some()
    }

    async fn attempt(
        &self,
        client: &Client,
        _subject: Option<&str>,
        body: &str,
    ) -> anyhow::Result<()> {
        let chat_id = client
            .telegram_chat_id
            .ok_or_else(|| anyhow::anyhow!("client has no telegram chat id"))?;

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": body,
                "parse_mode": "HTML"
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error: {} - {}", status, text);
        }
        Ok(())
    }
}

// ── Email sender (Resend) ──

pub struct EmailSender {
    http: reqwest::Client,
    api_key: String,
    from: String,
    bot_username: String,
}

impl EmailSender {
    pub fn new(api_key: String, from: String, bot_username: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            from,
            bot_username,
        }
    }

    /// Every email carries a "connect Telegram" block with the deep link
    /// that lets the webhook match the chat back to this client by phone.
    fn html_body(&self, client: &Client, body: &str) -> String {
        let digits: String = client.phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let deep_link = format!("https://t.me/{}?start=phone_{}", self.bot_username, digits);
        format!(
            "<p>{}</p>\
             <div style=\"margin-top:30px;padding:20px;background:#f5f5f5;border-radius:10px\">\
             <p>💡 Хочете отримувати миттєві повідомлення в Telegram?</p>\
             <a href=\"{}\">📱 Підключити Telegram</a></div>",
            body.replace('\n', "<br>"),
            deep_link
        )
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn can_reach(&self, client: &Client) -> bool {
        client.email.is_some()
    }

    async fn attempt(
        &self,
        client: &Client,
        subject: Option<&str>,
        body: &str,
    ) -> anyhow::Result<()> {
        let to = client
            .email
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("client has no email address"))?;

        let resp = self
            .http
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [to],
                "subject": subject.unwrap_or("Повідомлення від салону"),
                "html": self.html_body(client, body),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Resend error: {} - {}", status, text);
        }
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(chat_id: Option<i64>, email: Option<&str>, preferred: &str) -> Client {
        Client {
            id: 1,
            full_name: "Олена".into(),
            phone: "+380501234567".into(),
            email: email.map(String::from),
            notes: None,
            telegram_chat_id: chat_id,
            telegram_username: None,
            preferred_channel: preferred.into(),
            created_at: "2026-01-01 00:00:00".into(),
        }
    }

    /// Scripted sender for dispatcher tests.
    struct ScriptedSender {
        channel: Channel,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(channel: Channel, fail: bool) -> Self {
            Self {
                channel,
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChannelSender for ScriptedSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn can_reach(&self, client: &Client) -> bool {
            match self.channel {
                Channel::Telegram => client.telegram_chat_id.is_some(),
                Channel::Email => client.email.is_some(),
            }
        }

        async fn attempt(
            &self,
            _client: &Client,
            _subject: Option<&str>,
            _body: &str,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("send failed")
            }
            Ok(())
        }
    }

    // ── delivery_plan ──

    #[test]
    fn test_plan_forced_telegram_with_chat_id() {
        let c = client(Some(42), Some("a@b.c"), "email");
        assert_eq!(delivery_plan(&c, Some(Channel::Telegram)), vec![Channel::Telegram]);
    }

    #[test]
    fn test_plan_forced_telegram_without_chat_id_falls_through() {
        let c = client(None, Some("a@b.c"), "email");
        assert_eq!(delivery_plan(&c, Some(Channel::Telegram)), vec![Channel::Email]);
    }

    #[test]
    fn test_plan_preferred_telegram_has_email_fallback() {
        let c = client(Some(42), Some("a@b.c"), "telegram");
        assert_eq!(
            delivery_plan(&c, None),
            vec![Channel::Telegram, Channel::Email]
        );
    }

    #[test]
    fn test_plan_telegram_linked_but_email_preferred() {
        let c = client(Some(42), Some("a@b.c"), "email");
        assert_eq!(delivery_plan(&c, None), vec![Channel::Email]);
    }

    #[test]
    fn test_plan_email_only() {
        let c = client(None, Some("a@b.c"), "email");
        assert_eq!(delivery_plan(&c, None), vec![Channel::Email]);
    }

    #[test]
    fn test_plan_no_contact_info() {
        let c = client(None, None, "email");
        assert!(delivery_plan(&c, None).is_empty());
    }

    // ── dispatcher ──

    #[tokio::test]
    async fn test_telegram_failure_falls_back_to_email() {
        let dispatcher = Dispatcher::new(vec![
            Box::new(ScriptedSender::new(Channel::Telegram, true)),
            Box::new(ScriptedSender::new(Channel::Email, false)),
        ]);
        let c = client(Some(42), Some("a@b.c"), "telegram");

        let delivery = dispatcher.dispatch(&c, None, "hello", None).await;
        assert_eq!(delivery.channel, Channel::Email);
        assert!(delivery.sent);
        // the Telegram failure is preserved alongside the fallback success
        assert!(delivery.error.as_deref().unwrap().contains("telegram"));
    }

    #[tokio::test]
    async fn test_no_contact_logs_failed_with_email_label() {
        let dispatcher = Dispatcher::new(vec![
            Box::new(ScriptedSender::new(Channel::Telegram, false)),
            Box::new(ScriptedSender::new(Channel::Email, false)),
        ]);
        let c = client(None, None, "email");

        let delivery = dispatcher.dispatch(&c, None, "hello", None).await;
        assert_eq!(delivery.channel, Channel::Email);
        assert!(!delivery.sent);
        assert!(delivery.error.is_some());
    }

    #[tokio::test]
    async fn test_forced_channel_has_no_fallback() {
        let telegram = Box::new(ScriptedSender::new(Channel::Telegram, true));
        let email = Box::new(ScriptedSender::new(Channel::Email, false));
        let dispatcher = Dispatcher::new(vec![telegram, email]);
        let c = client(Some(42), Some("a@b.c"), "telegram");

        let delivery = dispatcher
            .dispatch(&c, None, "hello", Some(Channel::Telegram))
            .await;
        assert_eq!(delivery.channel, Channel::Telegram);
        assert!(!delivery.sent);
    }

    #[tokio::test]
    async fn test_both_channels_fail_keeps_both_errors() {
        let dispatcher = Dispatcher::new(vec![
            Box::new(ScriptedSender::new(Channel::Telegram, true)),
            Box::new(ScriptedSender::new(Channel::Email, true)),
        ]);
        let c = client(Some(42), Some("a@b.c"), "telegram");

        let delivery = dispatcher.dispatch(&c, None, "hello", None).await;
        assert!(!delivery.sent);
        let err = delivery.error.unwrap();
        assert!(err.contains("telegram") && err.contains("email"));
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!(Channel::parse("telegram"), Some(Channel::Telegram));
        assert_eq!(Channel::parse("email"), Some(Channel::Email));
        assert_eq!(Channel::parse("sms"), None);
    }
}

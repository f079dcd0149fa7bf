//! User notifications shown by the worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

use crate::ServiceWorkerError;

/// Action id that opens the application.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

/// Tag of the periodic reminder.
pub const DAILY_REMINDER_TAG: &str = "daily-reminder";

const DEFAULT_PUSH_BODY: &str = "رسالة جديدة من منظم سلمى!";
const REMINDER_BODY: &str = "لا تنسي مراجعة مهامك لليوم";

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Payload attached to push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Milliseconds since the Unix epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub vibrate: Vec<u32>,
    pub data: Option<NotificationData>,
    pub actions: Vec<NotificationAction>,
    pub tag: Option<String>,
}

/// A notification ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// Notification for an incoming push. An absent payload gets the default body.
    pub fn push(app_name: &str, payload: Option<&str>) -> Self {
        let star = emoji_icon("⭐");
        Self {
            title: app_name.to_string(),
            options: NotificationOptions {
                body: payload.unwrap_or(DEFAULT_PUSH_BODY).to_string(),
                icon: Some(star.clone()),
                badge: Some(star),
                vibrate: vec![100, 50, 100],
                data: Some(NotificationData {
                    date_of_arrival: crate::now_millis(),
                    primary_key: 1,
                }),
                actions: vec![
                    NotificationAction {
                        action: ACTION_EXPLORE.into(),
                        title: "فتح التطبيق".into(),
                        icon: emoji_icon("👀"),
                    },
                    NotificationAction {
                        action: ACTION_CLOSE.into(),
                        title: "إغلاق".into(),
                        icon: emoji_icon("❌"),
                    },
                ],
                tag: None,
            },
        }
    }

    /// The static daily reminder.
    pub fn reminder(app_name: &str) -> Self {
        Self {
            title: app_name.to_string(),
            options: NotificationOptions {
                body: REMINDER_BODY.to_string(),
                icon: Some(emoji_icon("⭐")),
                tag: Some(DAILY_REMINDER_TAG.to_string()),
                ..Default::default()
            },
        }
    }
}

/// An incoming push message. The payload is opaque text.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<String>,
}

impl PushEvent {
    pub fn new(data: Option<String>) -> Self {
        Self { data }
    }
}

/// The user clicked a notification or one of its actions.
#[derive(Debug, Clone, Default)]
pub struct NotificationClickEvent {
    /// Action id, `None` for a click on the notification body.
    pub action: Option<String>,
}

impl NotificationClickEvent {
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
        }
    }

    pub fn body() -> Self {
        Self::default()
    }

    /// Whether the "open app" action was chosen.
    pub fn wants_app(&self) -> bool {
        self.action.as_deref() == Some(ACTION_EXPLORE)
    }
}

/// Displays notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: Notification) -> Result<(), ServiceWorkerError>;
}

/// Number of notifications a [`LogNotifier`] remembers.
pub const HISTORY_LIMIT: usize = 32;

/// Notifier that logs each notification and remembers the most recent
/// [`HISTORY_LIMIT`] of them.
#[derive(Debug, Default)]
pub struct LogNotifier {
    shown: Mutex<VecDeque<Notification>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recently shown notifications, oldest first.
    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .map(|shown| shown.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: Notification) -> Result<(), ServiceWorkerError> {
        info!(
            title = %notification.title,
            body = %notification.options.body,
            actions = notification.options.actions.len(),
            "Showing notification"
        );
        let mut shown = self
            .shown
            .lock()
            .map_err(|e| ServiceWorkerError::NotificationError(e.to_string()))?;
        if shown.len() == HISTORY_LIMIT {
            shown.pop_front();
        }
        shown.push_back(notification);
        Ok(())
    }
}

/// Inline SVG data URL drawing a single emoji.
fn emoji_icon(emoji: &str) -> String {
    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 96 96"><text y="0.9em" font-size="80">{emoji}</text></svg>"#
    );
    format!("data:image/svg+xml,{}", urlencoding::encode(&svg))
}

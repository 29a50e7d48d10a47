use std::{sync::Arc, time::Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{config::AppConfig, db::ProfileStore, resolver::Resolver, session_store::SessionStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub grade: Option<i16>,
    pub goal: Option<String>,
    pub daily_streak: i32,
    pub opt_in: bool,
    pub test_date: Option<NaiveDate>,
    pub study_plan: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            grade: None,
            goal: None,
            daily_streak: 0,
            opt_in: false,
            test_date: None,
            study_plan: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: &UserUpdate) {
        if let Some(grade) = update.grade {
            self.grade = Some(grade);
        }
        if let Some(goal) = &update.goal {
            self.goal = Some(goal.clone());
        }
        if let Some(streak) = update.daily_streak {
            self.daily_streak = streak;
        }
        if let Some(opt_in) = update.opt_in {
            self.opt_in = opt_in;
        }
        if let Some(test_date) = update.test_date {
            self.test_date = Some(test_date);
        }
        if let Some(plan) = &update.study_plan {
            self.study_plan = Some(plan.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial profile update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub grade: Option<i16>,
    pub goal: Option<String>,
    pub daily_streak: Option<i32>,
    pub opt_in: Option<bool>,
    pub test_date: Option<NaiveDate>,
    pub study_plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub user_id: String,
    pub kind: String,
    pub details: Value,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub message: String,
    pub echo: String,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: String,
}

impl ReplyEnvelope {
    pub fn new(message: impl Into<String>, status: ReplyStatus, user_id: Option<String>) -> Self {
        let message = message.into();
        Self {
            echo: message.clone(),
            message,
            status,
            user_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Webhook body after canonicalisation. Transports name the fields
/// differently; all known spellings are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub user_id: Option<String>,
    pub message: String,
}

const USER_ID_KEYS: &[&str] = &["userId", "psid", "user_id", "subscriber_id", "subscriberId"];
const MESSAGE_KEYS: &[&str] = &["message", "text", "last_input_text", "lastInputText"];

impl InboundMessage {
    /// `None` when the body is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let user_id = USER_ID_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(scalar_text)
            .filter(|id| !id.is_empty());
        let message = MESSAGE_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(scalar_text)
            .unwrap_or_default();
        Some(Self { user_id, message })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub resolver: Resolver,
    pub started_at: Instant,
}

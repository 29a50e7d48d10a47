use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    ai::{Completion, CompletionClient, PromptHints},
    classifier::{classify, detect_subject, is_return_to_menu, Intent, MenuChoice},
    prompting::GENERAL_CONTEXT,
    replies,
    session_store::{Mode, Session, SessionContext, SessionStore},
};

const MAX_REMEMBERED_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Template,
    Ai,
    /// The completion was attempted and a template was used instead.
    Fallback,
}

impl ReplySource {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplySource::Template => "template",
            ReplySource::Ai => "ai",
            ReplySource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    /// Mode after this message; `None` means the main menu.
    pub mode: Option<Mode>,
    pub source: ReplySource,
    /// How the message was treated; `None` for messages handled inside a mode.
    pub intent: Option<Intent>,
    /// Exam date first captured by this message.
    pub exam_date: Option<NaiveDate>,
}

impl Resolution {
    fn template(text: &str, mode: Option<Mode>, intent: Option<Intent>) -> Self {
        Self {
            text: text.to_string(),
            mode,
            source: ReplySource::Template,
            intent,
            exam_date: None,
        }
    }
}

/// Conversation state machine: picks a reply for a message and moves the
/// user's session between the main menu and the feature modes.
pub struct Resolver {
    sessions: Arc<dyn SessionStore>,
    ai: Arc<dyn CompletionClient>,
    ai_timeout: Duration,
}

impl Resolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ai: Arc<dyn CompletionClient>,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            ai,
            ai_timeout,
        }
    }

    pub fn ai_configured(&self) -> bool {
        self.ai.is_configured()
    }

    /// Reads the session, classifies only when no mode is active, and resolves.
    pub async fn reply(&self, user_id: &str, message: &str) -> Resolution {
        let session = self.sessions.get(user_id);
        let intent = match &session {
            // Ignored by `resolve` while a mode is active.
            Some(_) => Intent::Fallback,
            None => classify(message),
        };
        self.resolve(user_id, intent, message, session).await
    }

    /// While `session` holds an active mode, `intent` is ignored: only an
    /// explicit return-to-menu phrase leaves the mode, everything else goes
    /// to the completion service labelled with the mode.
    pub async fn resolve(
        &self,
        user_id: &str,
        intent: Intent,
        message: &str,
        session: Option<Session>,
    ) -> Resolution {
        match session {
            Some(session) => self.continue_mode(user_id, session, message).await,
            None => self.resolve_idle(user_id, intent, message).await,
        }
    }

    async fn resolve_idle(&self, user_id: &str, intent: Intent, message: &str) -> Resolution {
        let entered = match intent {
            Intent::Greeting | Intent::MenuRequest => {
                return Resolution::template(replies::MAIN_MENU, None, Some(intent));
            }
            Intent::Subject(subject) => {
                return Resolution::template(replies::subject(subject), None, Some(intent));
            }
            Intent::Fallback => return self.answer_idle(message).await,
            Intent::Choice(MenuChoice::ExamPrep) | Intent::Exam => Mode::ExamPrep,
            Intent::Choice(MenuChoice::HomeworkHelp) | Intent::Homework => Mode::HomeworkHelp,
            Intent::Choice(MenuChoice::Practice) => Mode::PracticeMode,
        };

        let mut context = SessionContext::new();
        let exam_date = capture_details(entered, &mut context, message, today());
        self.sessions.set(user_id, entered, context);
        info!(user_id, mode = %entered, "mode entered");

        Resolution {
            text: replies::mode_entry(entered).to_string(),
            mode: Some(entered),
            source: ReplySource::Template,
            intent: Some(intent),
            exam_date,
        }
    }

    async fn answer_idle(&self, message: &str) -> Resolution {
        let hints = PromptHints {
            subject: detect_subject(message).map(|s| s.as_str().to_string()),
            exam_date: None,
        };
        let (text, source) = match self.attempt_completion(message, GENERAL_CONTEXT, &hints).await {
            Completion::Completed(text) => (text, ReplySource::Ai),
            Completion::Unavailable => (replies::FALLBACK_MENU.to_string(), ReplySource::Fallback),
        };
        Resolution {
            text,
            mode: None,
            source,
            intent: Some(Intent::Fallback),
            exam_date: None,
        }
    }

    async fn continue_mode(&self, user_id: &str, session: Session, message: &str) -> Resolution {
        let mode = session.mode;
        if is_return_to_menu(message) {
            self.sessions.clear(user_id);
            info!(user_id, mode = %mode, "returned to main menu");
            return Resolution::template(replies::MAIN_MENU, None, Some(Intent::MenuRequest));
        }

        let mut context = session.context;
        let exam_date = capture_details(mode, &mut context, message, today());
        let turns = context.get("turns").and_then(Value::as_u64).unwrap_or(0) + 1;
        context.insert("turns".to_string(), json!(turns));
        context.insert(
            "lastMessage".to_string(),
            json!(message.chars().take(MAX_REMEMBERED_MESSAGE_CHARS).collect::<String>()),
        );

        let hints = PromptHints {
            subject: context_text(&context, "subject"),
            exam_date: context_text(&context, "examDate"),
        };
        let (text, source) = match self.attempt_completion(message, mode.as_str(), &hints).await {
            Completion::Completed(text) => (text, ReplySource::Ai),
            Completion::Unavailable => (
                replies::mode_continuation(mode).to_string(),
                ReplySource::Fallback,
            ),
        };

        self.sessions.set(user_id, mode, context);
        debug!(user_id, mode = %mode, turns, "mode continued");

        Resolution {
            text,
            mode: Some(mode),
            source,
            intent: None,
            exam_date,
        }
    }

    async fn attempt_completion(&self, prompt: &str, label: &str, hints: &PromptHints) -> Completion {
        if prompt.trim().is_empty() {
            return Completion::Unavailable;
        }
        match tokio::time::timeout(self.ai_timeout, self.ai.complete(prompt, label, hints)).await {
            Ok(Completion::Completed(text)) if text.trim().is_empty() => Completion::Unavailable,
            Ok(completion) => completion,
            Err(_) => {
                warn!(
                    context_label = label,
                    timeout_ms = self.ai_timeout.as_millis() as u64,
                    "completion timed out"
                );
                Completion::Unavailable
            }
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn context_text(context: &SessionContext, key: &str) -> Option<String> {
    context
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Records the subject and, while preparing for an exam, a future exam date.
/// Returns the exam date when this message set it.
fn capture_details(
    mode: Mode,
    context: &mut SessionContext,
    message: &str,
    today: NaiveDate,
) -> Option<NaiveDate> {
    if let Some(subject) = detect_subject(message) {
        context.insert("subject".to_string(), json!(subject.as_str()));
    }
    if mode != Mode::ExamPrep {
        return None;
    }

    let date = find_date(message).filter(|date| *date > today)?;
    let formatted = date.format("%Y-%m-%d").to_string();
    if context_text(context, "examDate").as_deref() == Some(formatted.as_str()) {
        return None;
    }
    context.insert("examDate".to_string(), json!(formatted));
    Some(date)
}

fn find_date(message: &str) -> Option<NaiveDate> {
    let date_re = Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").ok()?;
    let date = date_re
        .captures_iter(message)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());
    date
}

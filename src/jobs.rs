use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    config::JobsConfig,
    db::ProfileStore,
    error::AppResult,
    replies,
    session_store::SessionStore,
    streak::{current_streak_for, streak_stats},
    types::{AppState, UserUpdate},
};

pub const ANALYTICS_RETENTION_DAYS: i64 = 90;
const SYSTEM_USER: &str = "system";
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    DailyReminders,
    GoodLuckMessages,
    StreakRefresh,
    Maintenance,
}

impl Job {
    pub const ALL: [Job; 4] = [
        Job::DailyReminders,
        Job::GoodLuckMessages,
        Job::StreakRefresh,
        Job::Maintenance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Job::DailyReminders => "daily_reminders",
            Job::GoodLuckMessages => "good_luck_messages",
            Job::StreakRefresh => "streak_refresh",
            Job::Maintenance => "daily_maintenance",
        }
    }

    /// Local wall-clock time the job fires at.
    pub fn schedule(self, config: &JobsConfig) -> (u32, u32) {
        match self {
            Job::DailyReminders => (config.reminder_hour, 0),
            Job::GoodLuckMessages => (config.good_luck_hour, 0),
            Job::StreakRefresh => (0, 30),
            Job::Maintenance => (3, 0),
        }
    }

    pub async fn run(self, state: &AppState, now: DateTime<Utc>) -> AppResult<usize> {
        let offset = utc_offset(state.config.jobs.utc_offset_hours);
        let profiles = state.profiles.as_ref();
        match self {
            Job::DailyReminders => send_daily_reminders(profiles, now).await,
            Job::GoodLuckMessages => send_good_luck_messages(profiles, now, offset).await,
            Job::StreakRefresh => update_user_streaks(profiles, now, offset).await,
            Job::Maintenance => {
                let report = perform_daily_maintenance(
                    profiles,
                    state.sessions.as_ref(),
                    now,
                    &state.config.environment,
                )
                .await?;
                Ok(report.events_deleted as usize + report.sessions_purged)
            }
        }
    }
}

pub fn utc_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// First instant strictly after `now` whose local time is `hour:minute`.
pub fn next_run_after(
    now: DateTime<Utc>,
    hour: u32,
    minute: u32,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    let local_today = now.with_timezone(&offset).date_naive();
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));

    let candidate = Utc.from_utc_datetime(&(local_today.and_time(at) - shift));
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn preview(text: &str) -> String {
    let mut short = text.chars().take(PREVIEW_CHARS).collect::<String>();
    if text.chars().count() > PREVIEW_CHARS {
        short.push_str("...");
    }
    short
}

/// Logs a reminder for every opted-in user and records `daily_reminder_sent`.
pub async fn send_daily_reminders(
    store: &dyn ProfileStore,
    now: DateTime<Utc>,
) -> AppResult<usize> {
    let users = store.opted_in_users().await?;
    info!(total_users = users.len(), "starting daily reminders");

    let mut sent = 0;
    for (index, user) in users.iter().enumerate() {
        let variant = now.ordinal() as usize + index;
        let text = replies::daily_reminder(user, variant);
        info!(
            user_id = %user.user_id,
            streak = user.daily_streak,
            message = %preview(&text),
            "daily reminder generated"
        );

        let details = json!({
            "streak": user.daily_streak,
            "hasStudyPlan": user.study_plan.is_some(),
        });
        match store
            .record_event(&user.user_id, "daily_reminder_sent", details)
            .await
        {
            Ok(()) => sent += 1,
            Err(err) => warn!(user_id = %user.user_id, error = %err, "failed to record reminder"),
        }
    }

    info!(total_users = users.len(), reminders_sent = sent, "daily reminders completed");
    Ok(sent)
}

pub async fn send_good_luck_messages(
    store: &dyn ProfileStore,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> AppResult<usize> {
    let today = now.with_timezone(&offset).date_naive();
    let users = store.users_with_test_on(today).await?;
    info!(date = %today, users_with_tests = users.len(), "checking for test day messages");

    let mut sent = 0;
    for (index, user) in users.iter().enumerate() {
        let text = replies::good_luck(today, index);
        info!(user_id = %user.user_id, message = %preview(&text), "good luck message generated");

        let details = json!({ "testDate": today, "grade": user.grade });
        match store
            .record_event(&user.user_id, "good_luck_message_sent", details)
            .await
        {
            Ok(()) => sent += 1,
            Err(err) => {
                warn!(user_id = %user.user_id, error = %err, "failed to record good luck message")
            }
        }
    }

    info!(messages_sent = sent, "good luck messages completed");
    Ok(sent)
}

/// Recomputes every user's current streak; returns how many changed.
pub async fn update_user_streaks(
    store: &dyn ProfileStore,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> AppResult<usize> {
    let users = store.all_users().await?;
    info!(total_users = users.len(), "starting streak calculation");

    let mut updated = 0;
    for user in &users {
        let current = match current_streak_for(store, &user.user_id, now, offset).await {
            Ok(current) => current,
            Err(err) => {
                warn!(user_id = %user.user_id, error = %err, "streak calculation failed");
                continue;
            }
        };
        let new_streak = i32::try_from(current).unwrap_or(i32::MAX);
        if new_streak == user.daily_streak {
            continue;
        }

        let update = UserUpdate {
            daily_streak: Some(new_streak),
            ..UserUpdate::default()
        };
        if let Err(err) = store.update_user(&user.user_id, &update).await {
            warn!(user_id = %user.user_id, error = %err, "failed to store streak");
            continue;
        }
        // The year-long scan only runs for users whose streak moved.
        let longest = match streak_stats(store, &user.user_id, now, offset).await {
            Ok(stats) => Some(stats.longest_streak),
            Err(err) => {
                warn!(user_id = %user.user_id, error = %err, "longest streak calculation failed");
                None
            }
        };
        let details = json!({
            "oldStreak": user.daily_streak,
            "newStreak": new_streak,
            "longestStreak": longest,
        });
        if let Err(err) = store
            .record_event(&user.user_id, "streak_updated", details)
            .await
        {
            warn!(user_id = %user.user_id, error = %err, "failed to record streak update");
        }
        updated += 1;
    }

    info!(total_users = users.len(), streaks_updated = updated, "streak calculation completed");
    Ok(updated)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub events_deleted: u64,
    pub sessions_purged: usize,
}

pub async fn perform_daily_maintenance(
    store: &dyn ProfileStore,
    sessions: &dyn SessionStore,
    now: DateTime<Utc>,
    environment: &str,
) -> AppResult<MaintenanceReport> {
    let cutoff = now - Duration::days(ANALYTICS_RETENTION_DAYS);
    let events_deleted = store.delete_events_before(cutoff).await?;
    info!(cutoff = %cutoff.to_rfc3339(), events_deleted, "old analytics events cleaned up");

    let sessions_purged = sessions.purge_expired();

    let details = json!({
        "timestamp": now.to_rfc3339(),
        "environment": environment,
        "eventsDeleted": events_deleted,
        "sessionsPurged": sessions_purged,
    });
    store
        .record_event(SYSTEM_USER, "daily_health_check", details)
        .await?;

    info!(sessions_purged, "daily maintenance completed");
    Ok(MaintenanceReport {
        events_deleted,
        sessions_purged,
    })
}

pub fn spawn_scheduled_jobs(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    Job::ALL
        .into_iter()
        .map(|job| {
            let state = state.clone();
            tokio::spawn(async move { run_daily(job, state).await })
        })
        .collect()
}

async fn run_daily(job: Job, state: Arc<AppState>) {
    let (hour, minute) = job.schedule(&state.config.jobs);
    let offset = utc_offset(state.config.jobs.utc_offset_hours);
    loop {
        let now = Utc::now();
        let next = next_run_after(now, hour, minute, offset);
        info!(job = job.name(), next_run = %next.to_rfc3339(), "job scheduled");
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        match job.run(&state, Utc::now()).await {
            Ok(count) => info!(job = job.name(), count, "job finished"),
            Err(err) => error!(job = job.name(), error = %err, "job failed"),
        }
    }
}

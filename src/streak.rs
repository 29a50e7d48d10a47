use std::collections::HashSet;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::{db::ProfileStore, error::AppResult};

/// Event kinds that count as a day of study.
pub const ACTIVITY_KINDS: &[&str] = &[
    "feature_usage",
    "homework_explained",
    "question_difficulty",
    "explanation_delivered",
    "study_plan_generated",
];

pub const CURRENT_LOOKBACK_DAYS: u32 = 30;
pub const LONGEST_LOOKBACK_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStats {
    pub current_streak: u32,
    pub longest_streak: u32,
}

/// Consecutive active days ending at `today`. A quiet `today` means no streak.
pub fn current_streak(active: &HashSet<NaiveDate>, today: NaiveDate, max_days: u32) -> u32 {
    let mut streak = 0;
    for offset in 0..max_days {
        let day = today - Duration::days(i64::from(offset));
        if !active.contains(&day) {
            break;
        }
        streak += 1;
    }
    streak
}

pub fn longest_streak(active: &HashSet<NaiveDate>, today: NaiveDate, max_days: u32) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    for offset in 0..max_days {
        let day = today - Duration::days(i64::from(offset));
        if active.contains(&day) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

async fn active_day_set(
    store: &dyn ProfileStore,
    user_id: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
    lookback_days: u32,
) -> AppResult<HashSet<NaiveDate>> {
    let since = now - Duration::days(i64::from(lookback_days));
    let days = store
        .active_days(user_id, ACTIVITY_KINDS, since, offset)
        .await?;
    Ok(days.into_iter().collect())
}

/// Current streak only; reads the last 30 days of events.
pub async fn current_streak_for(
    store: &dyn ProfileStore,
    user_id: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> AppResult<u32> {
    let today = now.with_timezone(&offset).date_naive();
    let active = active_day_set(store, user_id, now, offset, CURRENT_LOOKBACK_DAYS).await?;
    Ok(current_streak(&active, today, CURRENT_LOOKBACK_DAYS))
}

pub async fn streak_stats(
    store: &dyn ProfileStore,
    user_id: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> AppResult<StreakStats> {
    let today = now.with_timezone(&offset).date_naive();
    let active = active_day_set(store, user_id, now, offset, LONGEST_LOOKBACK_DAYS).await?;

    Ok(StreakStats {
        current_streak: current_streak(&active, today, CURRENT_LOOKBACK_DAYS),
        longest_streak: longest_streak(&active, today, LONGEST_LOOKBACK_DAYS),
    })
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    error::AppResult,
    types::{AnalyticsEvent, UserProfile, UserUpdate},
};

const USER_COLUMNS: &str =
    "user_id, grade, goal, daily_streak, opt_in, test_date, study_plan, created_at, updated_at";

/// Durable per-user profile fields and the analytics event log.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> AppResult<()>;

    /// Creates the profile if it does not exist yet and returns the stored row.
    async fn create_user(&self, user_id: &str) -> AppResult<UserProfile>;

    async fn get_user(&self, user_id: &str) -> AppResult<Option<UserProfile>>;

    /// `Ok(None)` when the user does not exist.
    async fn update_user(&self, user_id: &str, update: &UserUpdate)
        -> AppResult<Option<UserProfile>>;

    async fn all_users(&self) -> AppResult<Vec<UserProfile>>;

    async fn opted_in_users(&self) -> AppResult<Vec<UserProfile>>;

    async fn users_with_test_on(&self, date: NaiveDate) -> AppResult<Vec<UserProfile>>;

    async fn record_event(&self, user_id: &str, kind: &str, details: Value) -> AppResult<()>;

    /// Timestamps of events of the given kinds at or after `since`.
    async fn event_times(
        &self,
        user_id: &str,
        kinds: &[&str],
        since: DateTime<Utc>,
    ) -> AppResult<Vec<DateTime<Utc>>>;

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;

    /// Distinct local calendar days with at least one matching event, newest first.
    async fn active_days(
        &self,
        user_id: &str,
        kinds: &[&str],
        since: DateTime<Utc>,
        offset: FixedOffset,
    ) -> AppResult<Vec<NaiveDate>> {
        let mut days = self
            .event_times(user_id, kinds, since)
            .await?
            .into_iter()
            .map(|ts| ts.with_timezone(&offset).date_naive())
            .collect::<Vec<_>>();
        days.sort_by(|a, b| b.cmp(a));
        days.dedup();
        Ok(days)
    }

    async fn user_exists(&self, user_id: &str) -> bool {
        match self.get_user(user_id).await {
            Ok(user) => user.is_some(),
            Err(err) => {
                warn!(user_id, error = %err, "failed to check user existence");
                false
            }
        }
    }
}

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("postgres profile store ready");
        Ok(Self { pool })
    }

    async fn fetch_users(&self, sql: &str) -> AppResult<Vec<UserProfile>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(parse_user_row).collect())
    }
}

fn parse_user_row(row: sqlx::postgres::PgRow) -> UserProfile {
    UserProfile {
        user_id: row.get("user_id"),
        grade: row.get("grade"),
        goal: row.get("goal"),
        daily_streak: row.get("daily_streak"),
        opt_in: row.get("opt_in"),
        test_date: row.get("test_date"),
        study_plan: row.get("study_plan"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, user_id: &str) -> AppResult<UserProfile> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        info!(user_id, "user profile ensured");
        Ok(parse_user_row(row))
    }

    async fn get_user(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(parse_user_row))
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!(
            "UPDATE users SET \
                grade = COALESCE($2, grade), \
                goal = COALESCE($3, goal), \
                daily_streak = COALESCE($4, daily_streak), \
                opt_in = COALESCE($5, opt_in), \
                test_date = COALESCE($6, test_date), \
                study_plan = COALESCE($7, study_plan), \
                updated_at = NOW() \
             WHERE user_id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(update.grade)
        .bind(update.goal.as_deref())
        .bind(update.daily_streak)
        .bind(update.opt_in)
        .bind(update.test_date)
        .bind(update.study_plan.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(parse_user_row))
    }

    async fn all_users(&self) -> AppResult<Vec<UserProfile>> {
        self.fetch_users(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY user_id"))
            .await
    }

    async fn opted_in_users(&self) -> AppResult<Vec<UserProfile>> {
        self.fetch_users(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE opt_in ORDER BY user_id"
        ))
        .await
    }

    async fn users_with_test_on(&self, date: NaiveDate) -> AppResult<Vec<UserProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE test_date = $1 ORDER BY user_id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(parse_user_row).collect())
    }

    async fn record_event(&self, user_id: &str, kind: &str, details: Value) -> AppResult<()> {
        sqlx::query("INSERT INTO analytics_events (user_id, kind, details) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(kind)
            .bind(details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn event_times(
        &self,
        user_id: &str,
        kinds: &[&str],
        since: DateTime<Utc>,
    ) -> AppResult<Vec<DateTime<Utc>>> {
        let kinds = kinds.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        let times = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT ts FROM analytics_events \
             WHERE user_id = $1 AND ts >= $2 AND kind = ANY($3) \
             ORDER BY ts DESC",
        )
        .bind(user_id)
        .bind(since)
        .bind(&kinds)
        .fetch_all(&self.pool)
        .await?;
        Ok(times)
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM analytics_events WHERE ts < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Process-local stand-in used when no database is configured.
#[derive(Default)]
pub struct MemoryProfileStore {
    users: RwLock<HashMap<String, UserProfile>>,
    events: RwLock<Vec<AnalyticsEvent>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().await.clone()
    }

    /// Appends an event with an explicit timestamp.
    pub async fn push_event_at(&self, user_id: &str, kind: &str, ts: DateTime<Utc>) {
        self.events.write().await.push(AnalyticsEvent {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            details: Value::Object(Default::default()),
            ts,
        });
    }

    async fn filter_users<F>(&self, keep: F) -> Vec<UserProfile>
    where
        F: Fn(&UserProfile) -> bool,
    {
        let users = self.users.read().await;
        let mut list = users.values().filter(|u| keep(u)).cloned().collect::<Vec<_>>();
        list.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        list
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn create_user(&self, user_id: &str) -> AppResult<UserProfile> {
        let mut users = self.users.write().await;
        let profile = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));
        Ok(profile.clone())
    }

    async fn get_user(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> AppResult<Option<UserProfile>> {
        let mut users = self.users.write().await;
        let Some(profile) = users.get_mut(user_id) else {
            return Ok(None);
        };
        profile.apply(update);
        Ok(Some(profile.clone()))
    }

    async fn all_users(&self) -> AppResult<Vec<UserProfile>> {
        Ok(self.filter_users(|_| true).await)
    }

    async fn opted_in_users(&self) -> AppResult<Vec<UserProfile>> {
        Ok(self.filter_users(|u| u.opt_in).await)
    }

    async fn users_with_test_on(&self, date: NaiveDate) -> AppResult<Vec<UserProfile>> {
        Ok(self.filter_users(|u| u.test_date == Some(date)).await)
    }

    async fn record_event(&self, user_id: &str, kind: &str, details: Value) -> AppResult<()> {
        self.events.write().await.push(AnalyticsEvent {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            details,
            ts: Utc::now(),
        });
        Ok(())
    }

    async fn event_times(
        &self,
        user_id: &str,
        kinds: &[&str],
        since: DateTime<Utc>,
    ) -> AppResult<Vec<DateTime<Utc>>> {
        let events = self.events.read().await;
        let mut times = events
            .iter()
            .filter(|e| e.user_id == user_id && e.ts >= since && kinds.contains(&e.kind.as_str()))
            .map(|e| e.ts)
            .collect::<Vec<_>>();
        times.sort_by(|a, b| b.cmp(a));
        Ok(times)
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.ts >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

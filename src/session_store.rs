use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub type SessionContext = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    ExamPrep,
    HomeworkHelp,
    PracticeMode,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::ExamPrep => "exam_prep",
            Mode::HomeworkHelp => "homework_help",
            Mode::PracticeMode => "practice_mode",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub mode: Mode,
    pub context: SessionContext,
    /// Time of the last write; expiry is measured from here.
    pub created_at: DateTime<Utc>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-user conversation mode storage.
///
/// Writes replace the whole entry and reset its timestamp. Reads never renew
/// an entry: it expires a fixed window after the last write.
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<Session>;
    fn set(&self, user_id: &str, mode: Mode, context: SessionContext);
    fn clear(&self, user_id: &str);
    fn len(&self) -> usize;
    fn purge_expired(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
    /// Unix seconds of the last sweep done by `set`.
    last_sweep: AtomicI64,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let last_sweep = AtomicI64::new(clock.now().timestamp());
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(1)),
            clock,
            last_sweep,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        // A panic while holding the lock cannot leave a half-written entry,
        // so a poisoned map is still consistent.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.created_at > self.ttl
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user_id: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let expired = sessions
            .get(user_id)
            .map(|session| self.is_expired(session, now))?;
        if expired {
            sessions.remove(user_id);
            debug!(user_id, "session expired");
            return None;
        }
        sessions.get(user_id).cloned()
    }

    fn set(&self, user_id: &str, mode: Mode, context: SessionContext) {
        let session = Session {
            user_id: user_id.to_string(),
            mode,
            context,
            created_at: self.clock.now(),
        };
        let now = session.created_at;
        let mut sessions = self.lock();
        sessions.insert(user_id.to_string(), session);

        // Sweep at most once per window.
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.timestamp() - last >= self.ttl.num_seconds()
            && self
                .last_sweep
                .compare_exchange(last, now.timestamp(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let before = sessions.len();
            sessions.retain(|_, session| !self.is_expired(session, now));
            let swept = before - sessions.len();
            if swept > 0 {
                debug!(swept, "expired sessions swept on write");
            }
        }
    }

    fn clear(&self, user_id: &str) {
        self.lock().remove(user_id);
    }

    fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|session| !self.is_expired(session, now))
            .count()
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::TimeZone;

    use super::*;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        seconds: AtomicI64,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                seconds: AtomicI64::new(1_700_000_000),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.seconds.fetch_add(by.as_secs() as i64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(self.seconds.load(Ordering::SeqCst), 0)
                .single()
                .unwrap_or_else(Utc::now)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_clock::ManualClock;
    use super::*;

    fn store_with_clock() -> (MemorySessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = MemorySessionStore::with_clock(Duration::from_secs(3600), clock.clone());
        (store, clock)
    }

    fn context(pairs: &[(&str, Value)]) -> SessionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn read_after_write_returns_mode_and_context() {
        let (store, _) = store_with_clock();
        let ctx = context(&[("subject", json!("math")), ("examDate", json!("2026-11-02"))]);
        store.set("user-1", Mode::ExamPrep, ctx.clone());

        let session = store.get("user-1").expect("session present");
        assert_eq!(session.mode, Mode::ExamPrep);
        assert_eq!(session.context, ctx);
        assert_eq!(session.user_id, "user-1");
    }

    #[test]
    fn clear_removes_session_and_tolerates_absence() {
        let (store, _) = store_with_clock();
        store.set("user-1", Mode::HomeworkHelp, SessionContext::new());
        store.clear("user-1");
        assert!(store.get("user-1").is_none());

        store.clear("never-seen");
        assert!(store.get("never-seen").is_none());
    }

    #[test]
    fn sessions_expire_after_window_without_clear() {
        let (store, clock) = store_with_clock();
        store.set("user-1", Mode::PracticeMode, SessionContext::new());

        clock.advance(Duration::from_secs(3600));
        assert!(store.get("user-1").is_some(), "exactly at the window is still live");

        clock.advance(Duration::from_secs(1));
        assert!(store.get("user-1").is_none());
        assert_eq!(store.len(), 0, "expired entry is purged on read");
    }

    #[test]
    fn reads_do_not_extend_the_window() {
        let (store, clock) = store_with_clock();
        store.set("user-1", Mode::ExamPrep, SessionContext::new());

        clock.advance(Duration::from_secs(3000));
        assert!(store.get("user-1").is_some());
        clock.advance(Duration::from_secs(601));
        assert!(store.get("user-1").is_none());
    }

    #[test]
    fn writes_reset_the_window() {
        let (store, clock) = store_with_clock();
        store.set("user-1", Mode::ExamPrep, SessionContext::new());
        clock.advance(Duration::from_secs(3000));
        store.set("user-1", Mode::ExamPrep, context(&[("turns", json!(1))]));
        clock.advance(Duration::from_secs(3000));
        assert!(store.get("user-1").is_some());
    }

    #[test]
    fn writes_sweep_abandoned_sessions_once_per_window() {
        let (store, clock) = store_with_clock();
        for i in 0..100 {
            store.set(&format!("gone-{i}"), Mode::PracticeMode, SessionContext::new());
        }
        clock.advance(Duration::from_secs(3601));

        store.set("active", Mode::ExamPrep, SessionContext::new());
        assert_eq!(store.purge_expired(), 0, "abandoned entries already swept");
        assert_eq!(store.len(), 1);
        assert!(store.get("active").is_some());
    }

    #[test]
    fn purge_expired_sweeps_only_stale_entries() {
        let (store, clock) = store_with_clock();
        store.set("old", Mode::ExamPrep, SessionContext::new());
        clock.advance(Duration::from_secs(3500));
        store.set("fresh", Mode::HomeworkHelp, SessionContext::new());
        clock.advance(Duration::from_secs(200));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").is_some());
    }

    #[tokio::test]
    async fn concurrent_writes_for_one_user_are_last_write_wins() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
        let modes = [Mode::ExamPrep, Mode::HomeworkHelp, Mode::PracticeMode];

        let mut handles = Vec::new();
        for i in 0..64usize {
            let store = store.clone();
            let mode = modes[i % modes.len()];
            handles.push(tokio::spawn(async move {
                let ctx = context(&[("writer", json!(i)), ("mode", json!(mode.as_str()))]);
                store.set("shared", mode, ctx);
                store.get("shared")
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        let session = store.get("shared").expect("session present");
        let recorded_mode = session.context.get("mode").and_then(Value::as_str);
        assert_eq!(recorded_mode, Some(session.mode.as_str()));
        let writer = session
            .context
            .get("writer")
            .and_then(Value::as_u64)
            .expect("writer recorded") as usize;
        assert_eq!(modes[writer % modes.len()], session.mode);
        assert_eq!(store.len(), 1);
    }
}

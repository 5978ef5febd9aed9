//! When extraction fires.
//!
//! [`ExtractionTrigger`] owns the per-(owner, session) table of message counts
//! and idle timers. Counters are updated under a short synchronous lock before
//! any extraction is awaited, so a burst of appends can never double-count.
//! Extraction itself is idempotent at the turn level, so a timer and a count
//! trigger racing each other only costs a wasted call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::extraction::ExtractionStats;

/// What the trigger drives. Implemented by the memory engine.
#[async_trait]
pub trait ExtractionBackend: Send + Sync + 'static {
    /// Extract the session's unextracted turns.
    async fn extract_session(&self, owner: &str, session_id: &str) -> Result<ExtractionStats>;

    /// Follow-on reflection once enough extractions have run.
    async fn reflect(&self, owner: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    owner: String,
    session_id: String,
}

#[derive(Default)]
struct SessionState {
    message_count: usize,
    /// Bumped on every reschedule; a timer only fires if it still holds the latest value.
    idle_generation: u64,
    idle_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn cancel_timer(&mut self) {
        if let Some(task) = self.idle_task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct TriggerState {
    sessions: HashMap<SessionKey, SessionState>,
    /// Successful extractions per owner since the last reflection.
    extractions_since_reflection: HashMap<String, usize>,
}

struct Inner {
    backend: Arc<dyn ExtractionBackend>,
    config: ExtractionConfig,
    state: Mutex<TriggerState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        // The table holds plain counters; a panic elsewhere cannot leave it half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_extraction(&self, owner: &str, session_id: &str, cause: &'static str) -> Option<ExtractionStats> {
        tracing::debug!(owner = %owner, session = %session_id, cause, "extraction triggered");
        let stats = match self.backend.extract_session(owner, session_id).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(owner = %owner, session = %session_id, cause, error = %e, "extraction failed");
                return None;
            }
        };

        if stats.messages_processed > 0 && self.reflection_due(owner) {
            if let Err(e) = self.backend.reflect(owner).await {
                tracing::warn!(owner = %owner, error = %e, "follow-on reflection failed");
            }
        }
        Some(stats)
    }

    fn reflection_due(&self, owner: &str) -> bool {
        let interval = self.config.reflection_interval;
        if interval == 0 {
            return false;
        }
        let mut state = self.lock();
        let count = state.extractions_since_reflection.entry(owner.to_string()).or_default();
        *count += 1;
        if *count >= interval {
            *count = 0;
            true
        } else {
            false
        }
    }
}

/// Per-session extraction scheduling with count, idle, close and shutdown triggers.
#[derive(Clone)]
pub struct ExtractionTrigger {
    inner: Arc<Inner>,
}

impl ExtractionTrigger {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: ExtractionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                state: Mutex::new(TriggerState::default()),
            }),
        }
    }

    /// Record one appended turn.
    ///
    /// When the count reaches `message_interval` the extraction runs before
    /// this returns and its stats are handed back. The idle timer is
    /// rescheduled on every call.
    pub async fn on_message(&self, owner: &str, session_id: &str) -> Option<ExtractionStats> {
        let key = SessionKey {
            owner: owner.to_string(),
            session_id: session_id.to_string(),
        };
        let interval = self.inner.config.message_interval;
        let idle = self.inner.config.idle_timeout();

        let fire = {
            let mut state = self.inner.lock();
            let session = state.sessions.entry(key.clone()).or_default();
            session.message_count += 1;
            let fire = interval > 0 && session.message_count >= interval;
            if fire {
                session.message_count = 0;
            }
            if let Some(timeout) = idle {
                session.cancel_timer();
                session.idle_generation += 1;
                session.idle_task = Some(self.spawn_idle_timer(key, session.idle_generation, timeout));
            }
            fire
        };

        if fire {
            self.inner.run_extraction(owner, session_id, "message_interval").await
        } else {
            None
        }
    }

    fn spawn_idle_timer(&self, key: SessionKey, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.lock();
                let Some(session) = state.sessions.get_mut(&key) else {
                    return;
                };
                if session.idle_generation != generation {
                    return;
                }
                // Detach so a later append cannot abort the extraction below.
                session.idle_task = None;
                session.message_count = 0;
            }
            inner.run_extraction(&key.owner, &key.session_id, "idle_timeout").await;
        })
    }

    /// Stop tracking a session, extracting its remainder if configured.
    pub async fn on_session_close(&self, owner: &str, session_id: &str) -> Option<ExtractionStats> {
        let key = SessionKey {
            owner: owner.to_string(),
            session_id: session_id.to_string(),
        };
        if let Some(mut session) = self.inner.lock().sessions.remove(&key) {
            session.cancel_timer();
        }
        if self.inner.config.extract_on_session_close {
            self.inner.run_extraction(owner, session_id, "session_close").await
        } else {
            None
        }
    }

    /// Cancel every timer and, if configured, extract each tracked session.
    /// Returns how many sessions were extracted.
    pub async fn shutdown(&self) -> usize {
        let sessions: Vec<SessionKey> = {
            let mut state = self.inner.lock();
            state
                .sessions
                .drain()
                .map(|(key, mut session)| {
                    session.cancel_timer();
                    key
                })
                .collect()
        };
        if !self.inner.config.extract_on_shutdown {
            return 0;
        }

        let mut extracted = 0;
        for key in &sessions {
            if self
                .inner
                .run_extraction(&key.owner, &key.session_id, "shutdown")
                .await
                .is_some()
            {
                extracted += 1;
            }
        }
        tracing::info!(sessions = sessions.len(), extracted, "extraction trigger shut down");
        extracted
    }

    /// Messages counted since the session's last extraction, if it is tracked.
    pub fn pending_count(&self, owner: &str, session_id: &str) -> Option<usize> {
        let key = SessionKey {
            owner: owner.to_string(),
            session_id: session_id.to_string(),
        };
        self.inner.lock().sessions.get(&key).map(|s| s.message_count)
    }

    /// `(owner, session)` pairs currently tracked.
    pub fn active_sessions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .inner
            .lock()
            .sessions
            .keys()
            .map(|k| (k.owner.clone(), k.session_id.clone()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        extractions: AtomicUsize,
        reflections: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionBackend for Counting {
        async fn extract_session(&self, _owner: &str, _session_id: &str) -> Result<ExtractionStats> {
            self.extractions.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractionStats {
                messages_processed: 1,
                ..Default::default()
            })
        }

        async fn reflect(&self, _owner: &str) -> Result<()> {
            self.reflections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(interval: usize, idle_secs: u64) -> ExtractionConfig {
        ExtractionConfig {
            message_interval: interval,
            idle_timeout_secs: idle_secs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn interval_fires_once_and_resets() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(backend.clone(), config(3, 0));

        assert!(trigger.on_message("alice", "s1").await.is_none());
        assert!(trigger.on_message("alice", "s1").await.is_none());
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 0);
        assert_eq!(trigger.pending_count("alice", "s1"), Some(2));

        assert!(trigger.on_message("alice", "s1").await.is_some());
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.pending_count("alice", "s1"), Some(0));
    }

    #[tokio::test]
    async fn sessions_count_independently() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(backend.clone(), config(2, 0));

        trigger.on_message("alice", "s1").await;
        trigger.on_message("alice", "s2").await;
        trigger.on_message("bob", "s1").await;
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 0);
        assert_eq!(trigger.active_sessions().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_debounces() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(backend.clone(), config(0, 60));

        trigger.on_message("alice", "s1").await;
        tokio::time::sleep(Duration::from_secs(45)).await;
        trigger.on_message("alice", "s1").await;
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.pending_count("alice", "s1"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_timer_and_extracts() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(backend.clone(), config(0, 60));

        trigger.on_message("alice", "s1").await;
        assert!(trigger.on_session_close("alice", "s1").await.is_some());
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 1);
        assert!(trigger.active_sessions().is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_extracts_every_tracked_session() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(backend.clone(), config(0, 0));

        trigger.on_message("alice", "s1").await;
        trigger.on_message("bob", "s2").await;
        assert_eq!(trigger.shutdown().await, 2);
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 2);
        assert!(trigger.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn reflection_follows_every_nth_extraction() {
        let backend = Arc::new(Counting::default());
        let trigger = ExtractionTrigger::new(
            backend.clone(),
            ExtractionConfig {
                reflection_interval: 2,
                ..config(1, 0)
            },
        );

        for _ in 0..5 {
            trigger.on_message("alice", "s1").await;
        }
        assert_eq!(backend.extractions.load(Ordering::SeqCst), 5);
        assert_eq!(backend.reflections.load(Ordering::SeqCst), 2);
    }
}

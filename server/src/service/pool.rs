use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::database::credential::UpstreamCredential;

const SCORE_CEILING: i32 = 100;
const SCORE_SUCCESS_BONUS: i32 = 1;
const SCORE_FAILURE_PENALTY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    RateLimited,
    ServerError,
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    Unauthorized,
    Forbidden,
    PermanentlyInvalid,
}

/// The orchestrator reports exactly one of these per lease.
#[derive(Debug, Clone, Copy)]
pub enum SettleOutcome {
    Ok {
        tokens_in: i64,
        tokens_out: i64,
    },
    Retryable {
        kind: RetryKind,
        status_code: Option<u16>,
    },
    Fatal {
        kind: FatalKind,
    },
}

/// Persists settle bookkeeping outside the pool's lock. The production sink
/// writes through the store; tests record calls.
pub trait StatsSink: Send + Sync + 'static {
    fn on_success(&self, credential_id: i64, tokens: i64);
    fn on_retryable(&self, credential_id: i64, status_label: &str);
    fn on_fatal(&self, credential_id: i64);
}

/// Store-backed sink. Writes happen on a spawned task so `settle` stays
/// wait-free from the orchestrator's viewpoint.
pub struct DbStatsSink;

impl StatsSink for DbStatsSink {
    fn on_success(&self, credential_id: i64, tokens: i64) {
        tokio::spawn(async move {
            if let Err(e) = UpstreamCredential::record_success(credential_id, tokens) {
                error!("failed to persist success for credential {}: {:?}", credential_id, e);
            }
        });
    }

    fn on_retryable(&self, credential_id: i64, status_label: &str) {
        let status_label = status_label.to_string();
        tokio::spawn(async move {
            if let Err(e) = UpstreamCredential::record_failure(credential_id, &status_label) {
                error!("failed to persist failure for credential {}: {:?}", credential_id, e);
            }
        });
    }

    fn on_fatal(&self, credential_id: i64) {
        tokio::spawn(async move {
            if let Err(e) = UpstreamCredential::auto_disable(credential_id) {
                error!("failed to auto-disable credential {}: {:?}", credential_id, e);
            }
        });
    }
}

/// A credential as the pool sees it.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub id: i64,
    pub secret: String,
}

impl From<&UpstreamCredential> for PoolCandidate {
    fn from(credential: &UpstreamCredential) -> Self {
        Self {
            id: credential.id,
            secret: credential.secret.clone(),
        }
    }
}

/// An exclusive hold on one credential for the duration of one upstream
/// attempt. Settle it exactly once; a lease dropped without settling counts
/// as a transport failure so the credential always returns to rotation.
pub struct Lease {
    pub credential_id: i64,
    pub secret: String,
    pool: CredentialPool,
    settled: bool,
}

impl Lease {
    pub fn settle(mut self, outcome: SettleOutcome) {
        self.settled = true;
        self.pool.finish(self.credential_id, outcome);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "lease for credential {} dropped without settling",
                self.credential_id
            );
            self.pool.finish(
                self.credential_id,
                SettleOutcome::Retryable {
                    kind: RetryKind::Transport,
                    status_code: None,
                },
            );
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no enabled upstream credentials")]
    Empty,
    #[error("all enabled upstream credentials are unavailable")]
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct CredentialState {
    score: i32,
    cooldown_until: Instant,
    leased: bool,
    last_used: Option<Instant>,
}

impl CredentialState {
    fn fresh() -> Self {
        Self {
            score: SCORE_CEILING,
            cooldown_until: Instant::now(),
            leased: false,
            last_used: None,
        }
    }
}

struct PoolState {
    credentials: HashMap<i64, CredentialState>,
    disabled: HashSet<i64>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    notify: Notify,
    lease_wait: Duration,
    sink: Arc<dyn StatsSink>,
}

/// Selects, leases, and scores upstream credentials. Cheap to clone; all
/// clones share one pool.
///
/// Volatile state only: scores, cooldowns, and in-flight lease marks live
/// here; durable counters go through the `StatsSink`. Candidates are supplied
/// per call so the pool always works against the store's current view of
/// enabled credentials, with one exception: a credential settled as fatal is
/// remembered as disabled so a stale candidate list cannot resurrect it
/// before the store catches up.
#[derive(Clone)]
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    pub fn new(lease_wait: Duration, sink: Arc<dyn StatsSink>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    credentials: HashMap::new(),
                    disabled: HashSet::new(),
                }),
                notify: Notify::new(),
                lease_wait,
                sink,
            }),
        }
    }

    /// Picks one credential with an expired cooldown, preferring the highest
    /// score, then the least recently used, then the smallest id. Within a
    /// single client request the caller passes the ids it already attempted
    /// in `exclude`, so successive leases return distinct credentials.
    ///
    /// When every candidate is cooling down, the call blocks up to the
    /// configured wait; on timeout it hands out the unleased credential whose
    /// cooldown expires soonest. A credential held by another in-flight
    /// request is never handed out twice.
    pub async fn lease(
        &self,
        candidates: &[PoolCandidate],
        exclude: &HashSet<i64>,
    ) -> Result<Lease, PoolError> {
        if candidates.is_empty() {
            return Err(PoolError::Empty);
        }

        let deadline = Instant::now() + self.inner.lease_wait;

        loop {
            let wait_hint = {
                let mut state = self.inner.state.lock().unwrap();

                let usable: Vec<&PoolCandidate> = candidates
                    .iter()
                    .filter(|candidate| {
                        !exclude.contains(&candidate.id) && !state.disabled.contains(&candidate.id)
                    })
                    .collect();
                if usable.is_empty() {
                    return Err(PoolError::Exhausted);
                }

                for candidate in &usable {
                    state
                        .credentials
                        .entry(candidate.id)
                        .or_insert_with(CredentialState::fresh);
                }

                let now = Instant::now();
                let mut ready: Vec<(i64, CredentialState)> = usable
                    .iter()
                    .map(|candidate| (candidate.id, state.credentials[&candidate.id]))
                    .filter(|(_, cred)| !cred.leased && cred.cooldown_until <= now)
                    .collect();

                if !ready.is_empty() {
                    ready.sort_by(|(a_id, a), (b_id, b)| {
                        b.score
                            .cmp(&a.score)
                            .then_with(|| match (a.last_used, b.last_used) {
                                (None, None) => std::cmp::Ordering::Equal,
                                (None, Some(_)) => std::cmp::Ordering::Less,
                                (Some(_), None) => std::cmp::Ordering::Greater,
                                (Some(a_ts), Some(b_ts)) => a_ts.cmp(&b_ts),
                            })
                            .then_with(|| a_id.cmp(b_id))
                    });
                    let chosen = ready[0].0;
                    return Ok(self.take(&mut state, chosen, candidates));
                }

                // Nothing ready. Past the deadline, fall back to the unleased
                // credential whose cooldown expires soonest.
                if now >= deadline {
                    let soonest = usable
                        .iter()
                        .map(|candidate| (candidate.id, state.credentials[&candidate.id]))
                        .filter(|(_, cred)| !cred.leased)
                        .min_by_key(|(id, cred)| (cred.cooldown_until, *id))
                        .map(|(id, _)| id);
                    return match soonest {
                        Some(id) => Ok(self.take(&mut state, id, candidates)),
                        None => Err(PoolError::Exhausted),
                    };
                }

                // Sleep until either the deadline or the earliest pending
                // cooldown expiry, whichever comes first; settles wake us
                // earlier. Leased credentials contribute no expiry.
                usable
                    .iter()
                    .map(|candidate| state.credentials[&candidate.id].cooldown_until)
                    .filter(|expiry| *expiry > now)
                    .min()
                    .map(|earliest| earliest.min(deadline))
                    .unwrap_or(deadline)
            };

            let sleep_target = wait_hint.max(Instant::now());
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(sleep_target)) => {}
            }
        }
    }

    fn take(&self, state: &mut PoolState, id: i64, candidates: &[PoolCandidate]) -> Lease {
        let cred = state.credentials.get_mut(&id).expect("candidate state exists");
        cred.leased = true;
        let secret = candidates
            .iter()
            .find(|candidate| candidate.id == id)
            .map(|candidate| candidate.secret.clone())
            .unwrap_or_default();
        debug!("leased upstream credential {}", id);
        Lease {
            credential_id: id,
            secret,
            pool: self.clone(),
            settled: false,
        }
    }

    fn finish(&self, id: i64, outcome: SettleOutcome) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let now = Instant::now();
            match outcome {
                SettleOutcome::Ok { .. } => {
                    if let Some(cred) = state.credentials.get_mut(&id) {
                        cred.leased = false;
                        cred.score = (cred.score + SCORE_SUCCESS_BONUS).min(SCORE_CEILING);
                        cred.last_used = Some(now);
                    }
                }
                SettleOutcome::Retryable { kind, .. } => {
                    if let Some(cred) = state.credentials.get_mut(&id) {
                        cred.leased = false;
                        cred.score = (cred.score - SCORE_FAILURE_PENALTY).max(0);
                        cred.cooldown_until = now + backoff(kind);
                        cred.last_used = Some(now);
                    }
                }
                SettleOutcome::Fatal { .. } => {
                    state.credentials.remove(&id);
                    state.disabled.insert(id);
                }
            }
        }
        self.inner.notify.notify_waiters();

        match outcome {
            SettleOutcome::Ok {
                tokens_in,
                tokens_out,
            } => self.inner.sink.on_success(id, tokens_in + tokens_out),
            SettleOutcome::Retryable { kind, status_code } => {
                let label = match status_code {
                    Some(code) => code.to_string(),
                    None => match kind {
                        RetryKind::Transport => "transport".to_string(),
                        RetryKind::RateLimited => "429".to_string(),
                        RetryKind::ServerError => "500".to_string(),
                    },
                };
                self.inner.sink.on_retryable(id, &label);
            }
            SettleOutcome::Fatal { .. } => self.inner.sink.on_fatal(id),
        }
    }

    /// Clears the volatile disabled mark, used when an administrator
    /// re-enables a credential.
    pub fn reinstate(&self, credential_id: i64) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.disabled.remove(&credential_id);
        }
        self.inner.notify.notify_waiters();
    }
}

fn backoff(kind: RetryKind) -> Duration {
    let mut rng = rand::rng();
    match kind {
        RetryKind::RateLimited => Duration::from_secs(60),
        RetryKind::ServerError => Duration::from_millis(10_000 + rng.random_range(0..3_000)),
        RetryKind::Transport => Duration::from_millis(5_000 + rng.random_range(0..2_000)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        successes: StdMutex<Vec<(i64, i64)>>,
        retryables: StdMutex<Vec<(i64, String)>>,
        fatals: StdMutex<Vec<i64>>,
    }

    impl StatsSink for RecordingSink {
        fn on_success(&self, credential_id: i64, tokens: i64) {
            self.successes.lock().unwrap().push((credential_id, tokens));
        }
        fn on_retryable(&self, credential_id: i64, status_label: &str) {
            self.retryables
                .lock()
                .unwrap()
                .push((credential_id, status_label.to_string()));
        }
        fn on_fatal(&self, credential_id: i64) {
            self.fatals.lock().unwrap().push(credential_id);
        }
    }

    fn candidates(ids: &[i64]) -> Vec<PoolCandidate> {
        ids.iter()
            .map(|id| PoolCandidate {
                id: *id,
                secret: format!("secret-{}", id),
            })
            .collect()
    }

    fn pool_with_sink(wait: Duration) -> (CredentialPool, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (CredentialPool::new(wait, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_lease_empty_pool() {
        let (pool, _) = pool_with_sink(Duration::from_millis(10));
        let result = pool.lease(&[], &HashSet::new()).await;
        assert!(matches!(result, Err(PoolError::Empty)));
    }

    #[tokio::test]
    async fn test_successive_leases_are_distinct() {
        let (pool, _) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1, 2]);
        let mut exclude = HashSet::new();

        let first = pool.lease(&all, &exclude).await.unwrap();
        exclude.insert(first.credential_id);
        first.settle(SettleOutcome::Retryable {
            kind: RetryKind::RateLimited,
            status_code: Some(429),
        });

        let second = pool.lease(&all, &exclude).await.unwrap();
        assert!(!exclude.contains(&second.credential_id));
        exclude.insert(second.credential_id);

        let third = pool.lease(&all, &exclude).await;
        assert!(matches!(third, Err(PoolError::Exhausted)));
    }

    #[tokio::test]
    async fn test_concurrent_leases_never_share_a_credential() {
        let (pool, _) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1, 2]);

        let first = pool.lease(&all, &HashSet::new()).await.unwrap();
        let second = pool.lease(&all, &HashSet::new()).await.unwrap();
        assert_ne!(first.credential_id, second.credential_id);

        // Both held: a third caller has nothing to take and times out empty.
        let third = pool.lease(&all, &HashSet::new()).await;
        assert!(matches!(third, Err(PoolError::Exhausted)));

        first.settle(SettleOutcome::Ok { tokens_in: 1, tokens_out: 1 });
        second.settle(SettleOutcome::Ok { tokens_in: 1, tokens_out: 1 });
    }

    #[tokio::test]
    async fn test_lease_unblocks_when_settled() {
        let (pool, _) = pool_with_sink(Duration::from_secs(2));
        let all = candidates(&[1]);

        let held = pool.lease(&all, &HashSet::new()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let all = all.clone();
            tokio::spawn(async move { pool.lease(&all, &HashSet::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.settle(SettleOutcome::Ok { tokens_in: 0, tokens_out: 0 });

        let released = waiter.await.unwrap().unwrap();
        assert_eq!(released.credential_id, 1);
    }

    #[tokio::test]
    async fn test_timeout_returns_soonest_cooldown() {
        let (pool, _) = pool_with_sink(Duration::from_millis(50));
        let all = candidates(&[1]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        lease.settle(SettleOutcome::Retryable {
            kind: RetryKind::RateLimited,
            status_code: Some(429),
        });

        // The only credential is under a 60s cooldown; the bounded wait
        // expires and hands it back best-effort.
        let start = Instant::now();
        let fallback = pool.lease(&all, &HashSet::new()).await.unwrap();
        assert_eq!(fallback.credential_id, 1);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_fatal_settle_removes_from_rotation() {
        let (pool, sink) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        lease.settle(SettleOutcome::Fatal {
            kind: FatalKind::Forbidden,
        });

        let result = pool.lease(&all, &HashSet::new()).await;
        assert!(matches!(result, Err(PoolError::Exhausted)));
        assert_eq!(*sink.fatals.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_reinstate_after_fatal() {
        let (pool, _) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        lease.settle(SettleOutcome::Fatal {
            kind: FatalKind::Unauthorized,
        });
        pool.reinstate(1);

        let again = pool.lease(&all, &HashSet::new()).await.unwrap();
        assert_eq!(again.credential_id, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_settles_as_transport_failure() {
        let (pool, sink) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        drop(lease);

        assert_eq!(
            *sink.retryables.lock().unwrap(),
            vec![(1, "transport".to_string())]
        );
    }

    #[tokio::test]
    async fn test_scores_prefer_healthy_credentials() {
        let (pool, _) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[1, 2]);

        let mut exclude = HashSet::new();
        let first = pool.lease(&all, &exclude).await.unwrap();
        assert_eq!(first.credential_id, 1);
        exclude.insert(1);
        first.settle(SettleOutcome::Retryable {
            kind: RetryKind::Transport,
            status_code: None,
        });

        let second = pool.lease(&all, &exclude).await.unwrap();
        assert_eq!(second.credential_id, 2);
        second.settle(SettleOutcome::Ok { tokens_in: 1, tokens_out: 1 });

        // Fresh request: credential 2 (score 100) outranks credential 1 (90),
        // which is cooling down anyway.
        let preferred = pool.lease(&all, &HashSet::new()).await.unwrap();
        assert_eq!(preferred.credential_id, 2);
        preferred.settle(SettleOutcome::Ok { tokens_in: 1, tokens_out: 1 });
    }

    #[tokio::test]
    async fn test_sink_receives_counters() {
        let (pool, sink) = pool_with_sink(Duration::from_millis(10));
        let all = candidates(&[7]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        lease.settle(SettleOutcome::Ok { tokens_in: 6, tokens_out: 2 });
        assert_eq!(*sink.successes.lock().unwrap(), vec![(7, 8)]);

        let lease = pool.lease(&all, &HashSet::new()).await.unwrap();
        lease.settle(SettleOutcome::Retryable {
            kind: RetryKind::ServerError,
            status_code: Some(503),
        });
        assert_eq!(*sink.retryables.lock().unwrap(), vec![(7, "503".to_string())]);
    }
}

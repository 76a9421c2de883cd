//! Async execution shim for the correlation pipeline.
//!
//! The pipeline is synchronous and CPU-bound. `CorrelationRuntime` runs it on
//! a small bounded pool of OS threads so async callers only suspend while
//! waiting for the reply. Identical requests share one computation, and
//! successful bundles are cached by content.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::cache::{CacheKey, CacheStats, CorrelationCache};
use crate::config::CorrelationConfig;
use crate::error::{CorrelateError, CorrelateResult, ExecutionError};
use crate::extract::{KeywordExtractor, PatternExtractor};
use crate::input::EngineResult;
use crate::pipeline::{into_canonical, Pipeline};

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 4;

type Reply = oneshot::Sender<CorrelateResult<Arc<Bundle>>>;
type Pending = oneshot::Receiver<CorrelateResult<Arc<Bundle>>>;

/// Where a bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeSource {
    /// Computed by a worker for this caller.
    Computed,
    /// Computed by a worker for an identical concurrent request.
    Shared,
    /// Served from the cache.
    Cached,
    /// Fewer than two engines; nothing to correlate.
    Trivial,
}

/// A bundle plus how it was obtained.
#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    /// The correlation bundle.
    pub bundle: Arc<Bundle>,
    /// Where the bundle came from.
    pub source: OutcomeSource,
    /// Cache counters at the time the outcome was produced.
    pub stats: CacheStats,
}

/// State shared between the runtime handle and its workers.
struct Shared<X: PatternExtractor> {
    pipeline: Pipeline<X>,
    cache: Option<CorrelationCache>,
    inflight: Mutex<HashMap<CacheKey, Vec<Reply>>>,
    computations: AtomicU64,
}

impl<X: PatternExtractor> Shared<X> {
    fn inflight(&self) -> MutexGuard<'_, HashMap<CacheKey, Vec<Reply>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn compute(&self, results: &[EngineResult]) -> CorrelateResult<Arc<Bundle>> {
        self.computations.fetch_add(1, Ordering::Relaxed);
        match panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run_canonical(results))) {
            Ok(result) => result.map(Arc::new),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "correlation worker panicked");
                Err(CorrelateError::worker(message))
            }
        }
    }

    /// Caches a success, then wakes every follower of `key`.
    fn finish(&self, key: &CacheKey, result: &CorrelateResult<Arc<Bundle>>) {
        if let (Some(cache), Ok(bundle)) = (&self.cache, result) {
            cache.insert(key.clone(), Arc::clone(bundle));
        }
        let followers = self.inflight().remove(key).unwrap_or_default();
        if !followers.is_empty() {
            debug!(key = %key, followers = followers.len(), "sharing bundle with followers");
        }
        for follower in followers {
            let _ = follower.send(result.clone());
        }
    }

    fn stats(&self) -> CacheStats {
        self.cache.as_ref().map(CorrelationCache::stats).unwrap_or_default()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

enum Job {
    Correlate {
        key: CacheKey,
        results: Arc<[EngineResult]>,
        reply: Reply,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start<X: PatternExtractor + 'static>(
        workers: usize,
        queue_capacity: usize,
        shared: &Arc<Shared<X>>,
    ) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let shared = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name(format!("crosscheck-worker-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Correlate { key, results, reply }) => {
                            let result = shared.compute(&results);
                            shared.finish(&key, &result);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .expect("failed to spawn crosscheck worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn try_submit(&self, job: Job) -> CorrelateResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.queue_capacity, "correlation queue is full");
                Err(ExecutionError::QueueFull {
                    capacity: self.queue_capacity,
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

enum Ticket {
    Ready(CorrelationOutcome),
    Leader(Pending),
    Follower(Pending),
}

/// Runs correlation off the caller's thread with caching and request
/// deduplication.
pub struct CorrelationRuntime<X: PatternExtractor + 'static = KeywordExtractor> {
    shared: Arc<Shared<X>>,
    pool: WorkerPool,
}

impl CorrelationRuntime<KeywordExtractor> {
    /// Create a runtime with the keyword extractor.
    pub fn new(config: CorrelationConfig) -> CorrelateResult<Self> {
        Self::with_extractor(config, KeywordExtractor::new())
    }
}

impl<X: PatternExtractor + 'static> CorrelationRuntime<X> {
    /// Create a runtime with a custom extractor.
    ///
    /// # Errors
    /// Returns a configuration error if `config` does not validate.
    pub fn with_extractor(config: CorrelationConfig, extractor: X) -> CorrelateResult<Self> {
        config.validate()?;
        let cache = config
            .cache_enabled
            .then(|| CorrelationCache::new(config.cache_capacity, config.cache_ttl()));
        let workers = config.workers;
        let queue_capacity = config.queue_capacity;
        let shared = Arc::new(Shared {
            pipeline: Pipeline::with_extractor(Arc::new(config), extractor),
            cache,
            inflight: Mutex::new(HashMap::new()),
            computations: AtomicU64::new(0),
        });
        let pool = WorkerPool::start(workers, queue_capacity, &shared);
        info!(workers = pool.workers.len(), queue_capacity, "correlation runtime started");
        Ok(Self { shared, pool })
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &CorrelationConfig {
        self.shared.pipeline.config()
    }

    /// The cache, if enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&CorrelationCache> {
        self.shared.cache.as_ref()
    }

    /// Cache counters; all zero when caching is disabled.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.shared.stats()
    }

    /// Number of pipeline runs started by workers.
    #[must_use]
    pub fn computations(&self) -> u64 {
        self.shared.computations.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.workers.len()
    }

    /// Correlates engine results on the worker pool.
    ///
    /// # Errors
    /// Fails when the pipeline deadline expires, the worker fails, or the
    /// queue is full.
    pub async fn correlate(
        &self,
        results: impl IntoIterator<Item = EngineResult>,
    ) -> CorrelateResult<CorrelationOutcome> {
        self.correlate_inner(results.into_iter().collect(), None).await
    }

    /// Like [`correlate`](Self::correlate), but stops waiting after `timeout`.
    ///
    /// The computation itself is not cancelled; it still completes and
    /// populates the cache.
    ///
    /// # Errors
    /// Returns a timeout if no bundle arrived in time.
    pub async fn correlate_with_timeout(
        &self,
        results: impl IntoIterator<Item = EngineResult>,
        timeout: Duration,
    ) -> CorrelateResult<CorrelationOutcome> {
        self.correlate_inner(results.into_iter().collect(), Some(timeout))
            .await
    }

    /// Blocking variant for synchronous callers.
    ///
    /// Must not be called from inside an async task.
    ///
    /// # Errors
    /// Same as [`correlate`](Self::correlate).
    pub fn correlate_blocking(
        &self,
        results: impl IntoIterator<Item = EngineResult>,
    ) -> CorrelateResult<CorrelationOutcome> {
        let results: Arc<[EngineResult]> = into_canonical(results.into_iter().collect()).into();
        let mut retried = false;
        loop {
            match self.begin(&results)? {
                Ticket::Ready(outcome) => return Ok(outcome),
                Ticket::Leader(rx) => {
                    let bundle = rx.blocking_recv().map_err(|_| disconnected())??;
                    return Ok(self.outcome(bundle, OutcomeSource::Computed));
                }
                Ticket::Follower(rx) => match rx.blocking_recv().map_err(|_| disconnected())? {
                    Ok(bundle) => return Ok(self.outcome(bundle, OutcomeSource::Shared)),
                    Err(err) if retried => return Err(err),
                    Err(err) => {
                        debug!(error = %err, "shared computation failed; recomputing");
                        retried = true;
                    }
                },
            }
        }
    }

    /// Stops the workers after queued jobs drain.
    pub fn shutdown(self) {
        drop(self);
    }

    async fn correlate_inner(
        &self,
        results: Vec<EngineResult>,
        timeout: Option<Duration>,
    ) -> CorrelateResult<CorrelationOutcome> {
        let started = tokio::time::Instant::now();
        let results: Arc<[EngineResult]> = into_canonical(results).into();
        let mut retried = false;
        loop {
            match self.begin(&results)? {
                Ticket::Ready(outcome) => return Ok(outcome),
                Ticket::Leader(rx) => {
                    let bundle = wait(rx, started, timeout).await??;
                    return Ok(self.outcome(bundle, OutcomeSource::Computed));
                }
                Ticket::Follower(rx) => match wait(rx, started, timeout).await? {
                    Ok(bundle) => return Ok(self.outcome(bundle, OutcomeSource::Shared)),
                    Err(err) if retried => return Err(err),
                    Err(err) => {
                        debug!(error = %err, "shared computation failed; recomputing");
                        retried = true;
                    }
                },
            }
        }
    }

    /// Resolves trivial inputs and cache hits immediately; otherwise joins an
    /// in-flight computation or submits a new one.
    ///
    /// `results` must already be in canonical order.
    fn begin(&self, results: &Arc<[EngineResult]>) -> CorrelateResult<Ticket> {
        let engines = results.len();
        if engines <= 1 {
            return Ok(Ticket::Ready(self.outcome(
                Arc::new(Bundle::empty(engines)),
                OutcomeSource::Trivial,
            )));
        }

        let key = CacheKey::of_canonical(results.iter());
        if let Some(cache) = &self.shared.cache {
            if let Some(bundle) = cache.get(&key) {
                info!(key = %key, "correlation cache hit");
                return Ok(Ticket::Ready(self.outcome(bundle, OutcomeSource::Cached)));
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut inflight = self.shared.inflight();
            if let Some(followers) = inflight.get_mut(&key) {
                followers.push(tx);
                return Ok(Ticket::Follower(rx));
            }
            inflight.insert(key.clone(), Vec::new());
        }

        info!(key = %key, engines, "computing correlation bundle");
        let job = Job::Correlate {
            key: key.clone(),
            results: Arc::clone(results),
            reply: tx,
        };
        if let Err(err) = self.pool.try_submit(job) {
            self.shared.finish(&key, &Err(err.clone()));
            return Err(err);
        }
        Ok(Ticket::Leader(rx))
    }

    fn outcome(&self, bundle: Arc<Bundle>, source: OutcomeSource) -> CorrelationOutcome {
        CorrelationOutcome {
            bundle,
            source,
            stats: self.shared.stats(),
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> CorrelateResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl<X: PatternExtractor + 'static> Drop for CorrelationRuntime<X> {
    fn drop(&mut self) {
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}

fn disconnected() -> CorrelateError {
    ExecutionError::Disconnected.into()
}

/// Awaits a reply, bounded by the caller's timeout measured from `started`.
async fn wait(
    rx: Pending,
    started: tokio::time::Instant,
    timeout: Option<Duration>,
) -> CorrelateResult<CorrelateResult<Arc<Bundle>>> {
    match timeout {
        None => rx.await.map_err(|_| disconnected()),
        Some(budget) => match tokio::time::timeout_at(started + budget, rx).await {
            Ok(reply) => reply.map_err(|_| disconnected()),
            Err(_) => Err(CorrelateError::timeout("wait", started.elapsed())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(workers: usize, queue_capacity: usize) -> CorrelationRuntime {
        CorrelationRuntime::new(CorrelationConfig {
            workers,
            queue_capacity,
            ..CorrelationConfig::default()
        })
        .unwrap()
    }

    fn pair() -> Vec<EngineResult> {
        vec![
            EngineResult::text("a", "coverage: 85%"),
            EngineResult::text("b", "coverage: 40%"),
        ]
    }

    #[test]
    fn workers_are_clamped() {
        assert_eq!(runtime(1, 4).workers(), 1);
        assert_eq!(runtime(16, 4).workers(), MAX_WORKERS);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = CorrelationRuntime::new(CorrelationConfig {
            similarity_threshold: 1.5,
            ..CorrelationConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn blocking_computes_then_hits_cache() {
        let rt = runtime(1, 4);
        let first = rt.correlate_blocking(pair()).unwrap();
        assert_eq!(first.source, OutcomeSource::Computed);
        assert_eq!(first.bundle.conflicts.len(), 1);

        let second = rt.correlate_blocking(pair()).unwrap();
        assert_eq!(second.source, OutcomeSource::Cached);
        assert!(Arc::ptr_eq(&first.bundle, &second.bundle));
        assert_eq!(rt.computations(), 1);
    }

    #[test]
    fn single_engine_is_trivial() {
        let rt = runtime(1, 4);
        let outcome = rt
            .correlate_blocking(vec![EngineResult::text("a", "coverage: 85%")])
            .unwrap();
        assert_eq!(outcome.source, OutcomeSource::Trivial);
        assert!(outcome.bundle.is_empty());
        assert_eq!(rt.computations(), 0);
        assert_eq!(rt.stats().entries, 0);
    }

    #[test]
    fn full_queue_is_reported() {
        let rt = runtime(1, 1);
        // Occupy the worker, then fill the single queue slot.
        let busy = rt.submit_sleep(Duration::from_millis(300)).unwrap();
        thread::sleep(Duration::from_millis(50));
        let queued = rt.submit_sleep(Duration::from_millis(1)).unwrap();

        let err = rt.correlate_blocking(pair()).unwrap_err();
        assert!(matches!(
            err,
            CorrelateError::Execution(ExecutionError::QueueFull { capacity: 1 })
        ));
        assert!(rt.shared.inflight().is_empty());

        busy.recv().unwrap();
        queued.recv().unwrap();
    }

    #[test]
    fn panic_message_is_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}

//! Worker pool scheduler.
//!
//! The scheduler drives every code in the universe through the data source
//! and the analyzer with at most `concurrency` fetches in flight. A single
//! dispatcher loop owns the pending queue, the backoff timers and the
//! aggregator, so outcomes are recorded by one writer only.

pub mod retry;

pub use retry::{RetryDecision, RetryPolicy};

use crate::aggregator::Aggregator;
use crate::analysis::Analyzer;
use crate::error::{AnalysisError, FetchError, OrchestratorError};
use crate::models::{FailureReason, Outcome, Report, ReportMetadata, SkipReason, WorkItem};
use crate::source::DataSource;
use crate::universe::Universe;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler settings fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    /// Upper bound on a single adapter call.
    pub per_call_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            per_call_timeout: Duration::from_secs(10),
        }
    }
}

type Observer = Arc<dyn Fn(&Outcome) + Send + Sync>;

/// How one slot execution ended.
enum SlotResult {
    /// Terminal outcome for the code.
    Done(Outcome),
    /// The fetch failed; the retry policy decides what happens next.
    FetchFailed { item: WorkItem, error: FetchError },
    /// The run was cancelled while the fetch was in flight.
    Cancelled(WorkItem),
}

/// Bounded worker pool over a data source and an analyzer.
pub struct Scheduler {
    source: Arc<dyn DataSource>,
    analyzer: Arc<dyn Analyzer>,
    config: SchedulerConfig,
    observer: Option<Observer>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn DataSource>,
        analyzer: Arc<dyn Analyzer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            analyzer,
            config,
            observer: None,
        }
    }

    /// Register a callback invoked once for every outcome the run records.
    pub fn on_outcome(mut self, observer: impl Fn(&Outcome) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Analyze every code in `universe` and return the ordered report.
    ///
    /// Per-code failures end up in the report. The only errors are a zero
    /// concurrency budget and broken internal bookkeeping.
    pub async fn run(
        &self,
        universe: &Universe,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Report, OrchestratorError> {
        if concurrency == 0 {
            return Err(OrchestratorError::InvalidConcurrency(concurrency));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let concurrency = concurrency.min(universe.len());
        let mut aggregator = Aggregator::new(universe);

        if universe.is_empty() {
            info!("Universe is empty, nothing to analyze");
            return aggregator.finalize(self.metadata(started_at, 0, false), clock.elapsed());
        }

        info!(
            "Analyzing {} codes with {} slots using {} via {}",
            universe.len(),
            concurrency,
            self.analyzer.name(),
            self.source.name()
        );

        let mut queue: VecDeque<WorkItem> =
            universe.codes().iter().cloned().map(WorkItem::first).collect();
        let mut slots: JoinSet<SlotResult> = JoinSet::new();
        let mut backoffs: FuturesUnordered<BoxFuture<'static, WorkItem>> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
            }

            if cancelled {
                // Queued and backing-off codes are reported as skipped.
                queue.clear();
                backoffs.clear();
            } else {
                while slots.len() < concurrency {
                    let Some(item) = queue.pop_front() else {
                        break;
                    };
                    self.dispatch(&mut slots, item, cancel);
                }
            }

            if aggregator.is_complete() || (cancelled && slots.is_empty()) {
                break;
            }

            tokio::select! {
                Some(joined) = slots.join_next() => {
                    let result = joined.map_err(|e| {
                        OrchestratorError::InvariantViolation(format!("slot task failed: {}", e))
                    })?;
                    self.settle(result, cancelled, &mut aggregator, &mut backoffs)?;
                }
                Some(item) = backoffs.next() => {
                    debug!("Backoff elapsed for {} (attempt {})", item.code, item.attempt);
                    queue.push_back(item);
                }
                _ = cancel.cancelled(), if !cancelled => {
                    warn!("Cancellation requested, {} codes unresolved", aggregator.pending());
                    cancelled = true;
                }
                else => {
                    return Err(OrchestratorError::InvariantViolation(format!(
                        "scheduler stalled with {} unresolved codes",
                        aggregator.pending()
                    )));
                }
            }
        }

        let elapsed = clock.elapsed();
        let cancelled = cancelled && !aggregator.is_complete();
        let report = aggregator.finalize(self.metadata(started_at, concurrency, cancelled), elapsed)?;

        info!(
            "Batch finished in {:.2}s: {} succeeded, {} failed, {} skipped",
            elapsed.as_secs_f64(),
            report.summary.succeeded,
            report.summary.failed,
            report.summary.skipped
        );

        Ok(report)
    }

    fn dispatch(
        &self,
        slots: &mut JoinSet<SlotResult>,
        item: WorkItem,
        cancel: &CancellationToken,
    ) {
        debug!("Dispatching {} (attempt {})", item.code, item.attempt);
        slots.spawn(execute_slot(
            Arc::clone(&self.source),
            Arc::clone(&self.analyzer),
            item,
            self.config.per_call_timeout,
            cancel.clone(),
        ));
    }

    /// Turn a finished slot into a recorded outcome or a scheduled retry.
    fn settle(
        &self,
        result: SlotResult,
        cancelled: bool,
        aggregator: &mut Aggregator,
        backoffs: &mut FuturesUnordered<BoxFuture<'static, WorkItem>>,
    ) -> Result<(), OrchestratorError> {
        match result {
            SlotResult::Done(outcome) => self.commit(aggregator, outcome),
            SlotResult::Cancelled(item) => self.commit(
                aggregator,
                Outcome::Skipped {
                    code: item.code,
                    reason: SkipReason::Cancelled,
                },
            ),
            SlotResult::FetchFailed { item, error } => {
                match self.config.retry.decide(&error, item.attempt) {
                    RetryDecision::GiveUp(reason) => {
                        warn!(
                            "{} failed after {} attempt(s): {}",
                            item.code, item.attempt, error
                        );
                        self.commit(
                            aggregator,
                            Outcome::Failure {
                                code: item.code,
                                reason,
                                detail: error.detail().to_string(),
                                attempts_used: item.attempt,
                            },
                        )
                    }
                    // Left unresolved; finalize reports it as cancelled.
                    RetryDecision::Retry(_) if cancelled => Ok(()),
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "Attempt {} for {} failed ({}), retrying in {}ms",
                            item.attempt,
                            item.code,
                            error,
                            delay.as_millis()
                        );
                        let next = item.next();
                        backoffs.push(
                            async move {
                                tokio::time::sleep(delay).await;
                                next
                            }
                            .boxed(),
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    fn commit(&self, aggregator: &mut Aggregator, outcome: Outcome) -> Result<(), OrchestratorError> {
        if let Some(observer) = &self.observer {
            observer(&outcome);
        }
        aggregator.record(outcome)
    }

    fn metadata(
        &self,
        started_at: chrono::DateTime<Utc>,
        concurrency: usize,
        cancelled: bool,
    ) -> ReportMetadata {
        ReportMetadata {
            started_at,
            strategy: self.analyzer.name().to_string(),
            source: self.source.name().to_string(),
            concurrency,
            max_attempts: self.config.retry.max_attempts,
            cancelled,
        }
    }
}

/// Run one attempt for one code: fetch under a timeout, then analyze.
async fn execute_slot(
    source: Arc<dyn DataSource>,
    analyzer: Arc<dyn Analyzer>,
    item: WorkItem,
    timeout: Duration,
    cancel: CancellationToken,
) -> SlotResult {
    let code = item.code.clone();
    let fetch = async {
        match tokio::time::timeout(timeout, AssertUnwindSafe(source.fetch(&code)).catch_unwind())
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(FetchError::Transient(format!(
                "data source panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(FetchError::Transient(format!(
                "no response within {}ms",
                timeout.as_millis()
            ))),
        }
    };

    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return SlotResult::Cancelled(item),
        fetched = fetch => fetched,
    };

    let data = match fetched {
        Ok(data) => data,
        Err(error) => return SlotResult::FetchFailed { item, error },
    };

    let analyzed = std::panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&item.code, &data)))
        .unwrap_or_else(|panic| Err(AnalysisError::Panicked(panic_message(panic.as_ref()))));

    let outcome = match analyzed {
        Ok(signal) => Outcome::Success {
            code: item.code,
            signal,
        },
        Err(error) => {
            warn!("Analysis of {} failed: {}", item.code, error);
            Outcome::Failure {
                code: item.code,
                reason: FailureReason::AnalysisError,
                detail: error.to_string(),
                attempts_used: item.attempt,
            }
        }
    };

    SlotResult::Done(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classic::ClassicAnalyzer;
    use crate::analysis::test_support::market_data;
    use crate::models::{RawMarketData, SecurityCode, Signal};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Step {
        Ok,
        Transient,
        Permanent,
        Malformed,
        Hang,
        Panic,
    }

    /// In-memory source replaying a per-code script. The last step repeats.
    struct ScriptedSource {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: Mutex<HashMap<String, u32>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(scripts: &[(&str, &[Step])]) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .iter()
                        .map(|(code, steps)| (code.to_string(), steps.iter().copied().collect()))
                        .collect(),
                ),
                calls: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self, code: &str) -> u32 {
            self.calls.lock().unwrap().get(code).copied().unwrap_or(0)
        }

        fn next_step(&self, code: &str) -> Step {
            *self.calls.lock().unwrap().entry(code.to_string()).or_insert(0) += 1;
            let mut scripts = self.scripts.lock().unwrap();
            let steps = scripts.entry(code.to_string()).or_default();
            if steps.len() > 1 {
                steps.pop_front().unwrap_or(Step::Ok)
            } else {
                steps.front().copied().unwrap_or(Step::Ok)
            }
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, code: &SecurityCode) -> Result<RawMarketData, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let step = self.next_step(code.as_str());
            if step == Step::Hang {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match step {
                Step::Ok => {
                    let closes: Vec<f64> = (0..80).map(|i| 10.0 + i as f64 * 0.1).collect();
                    Ok(market_data(code.as_str(), &closes, None))
                }
                Step::Transient => Err(FetchError::Transient("connection reset".into())),
                Step::Permanent => Err(FetchError::Permanent("unknown code".into())),
                Step::Malformed => Err(FetchError::Malformed("truncated body".into())),
                Step::Panic => panic!("adapter bug"),
                Step::Hang => unreachable!(),
            }
        }
    }

    /// Panics for one code, delegates to the classic analyzer otherwise.
    struct PanickyAnalyzer(&'static str);

    impl Analyzer for PanickyAnalyzer {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn analyze(&self, code: &SecurityCode, data: &RawMarketData) -> Result<Signal, AnalysisError> {
            if code.as_str() == self.0 {
                panic!("index out of range");
            }
            ClassicAnalyzer.analyze(code, data)
        }
    }

    fn config(max_attempts: u32) -> SchedulerConfig {
        SchedulerConfig {
            retry: RetryPolicy::fast(max_attempts),
            per_call_timeout: Duration::from_millis(500),
        }
    }

    fn scheduler(source: Arc<ScriptedSource>, max_attempts: u32) -> Scheduler {
        Scheduler::new(source, Arc::new(ClassicAnalyzer), config(max_attempts))
    }

    fn statuses(report: &Report) -> Vec<(String, String)> {
        report
            .outcomes
            .iter()
            .map(|o| {
                let detail = match o {
                    Outcome::Success { .. } => "ok".to_string(),
                    Outcome::Failure { reason, .. } => reason.to_string(),
                    Outcome::Skipped { reason, .. } => reason.to_string(),
                };
                (o.code().to_string(), detail)
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_universe_keeps_order() {
        let source = Arc::new(ScriptedSource::new(&[("INVALID1", &[Step::Permanent])]));
        let universe = Universe::from_tokens(["000001", "INVALID1", "000002"]);

        let report = scheduler(source.clone(), 3)
            .run(&universe, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].is_success());
        assert!(report.outcomes[2].is_success());
        match &report.outcomes[1] {
            Outcome::Failure {
                code,
                reason,
                attempts_used,
                ..
            } => {
                assert_eq!(code.as_str(), "INVALID1");
                assert_eq!(*reason, FailureReason::Permanent);
                assert_eq!(*attempts_used, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 0);
        assert!(!report.metadata.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_retry_budget() {
        let source = Arc::new(ScriptedSource::new(&[("000003", &[Step::Transient])]));
        let universe = Universe::from_tokens(["000003"]);

        let report = scheduler(source.clone(), 3)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("000003"), 3);
        assert_eq!(
            report.outcomes,
            vec![Outcome::Failure {
                code: SecurityCode::new("000003").unwrap(),
                reason: FailureReason::TransientExhausted,
                detail: "connection reset".to_string(),
                attempts_used: 3,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_ignores_retry_budget() {
        let source = Arc::new(ScriptedSource::new(&[("600000", &[Step::Permanent])]));
        let universe = Universe::from_tokens(["600000"]);

        let report = scheduler(source.clone(), 5)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("600000"), 1);
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let source = Arc::new(ScriptedSource::new(&[(
            "000001",
            &[Step::Transient, Step::Transient, Step::Ok],
        )]));
        let universe = Universe::from_tokens(["000001"]);

        let report = scheduler(source.clone(), 3)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("000001"), 3);
        assert!(report.outcomes[0].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_is_capped_below_budget() {
        let source = Arc::new(ScriptedSource::new(&[("000001", &[Step::Malformed])]));
        let universe = Universe::from_tokens(["000001"]);

        let report = scheduler(source.clone(), 5)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("000001"), 2);
        assert_eq!(
            statuses(&report),
            vec![("000001".to_string(), "malformed-exhausted".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyzer_panic_is_analysis_error() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let universe = Universe::from_tokens(["000001", "000002"]);
        let scheduler = Scheduler::new(
            source.clone(),
            Arc::new(PanickyAnalyzer("000002")),
            config(3),
        );

        let report = scheduler
            .run(&universe, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.outcomes[0].is_success());
        match &report.outcomes[1] {
            Outcome::Failure {
                reason,
                attempts_used,
                detail,
                ..
            } => {
                assert_eq!(*reason, FailureReason::AnalysisError);
                assert_eq!(*attempts_used, 1);
                assert!(detail.contains("index out of range"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // Never retried
        assert_eq!(source.calls("000002"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_history_is_analysis_error() {
        struct ShortSource;

        #[async_trait]
        impl DataSource for ShortSource {
            fn name(&self) -> &str {
                "short"
            }

            async fn fetch(&self, code: &SecurityCode) -> Result<RawMarketData, FetchError> {
                Ok(market_data(code.as_str(), &[10.0, 10.1], None))
            }
        }

        let scheduler = Scheduler::new(Arc::new(ShortSource), Arc::new(ClassicAnalyzer), config(3));
        let report = scheduler
            .run(&Universe::from_tokens(["000001"]), 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            statuses(&report),
            vec![("000001".to_string(), "analysis-error".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_panic_is_transient() {
        let source = Arc::new(ScriptedSource::new(&[("000001", &[Step::Panic, Step::Ok])]));
        let universe = Universe::from_tokens(["000001"]);

        let report = scheduler(source.clone(), 3)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("000001"), 2);
        assert!(report.outcomes[0].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let source = Arc::new(ScriptedSource::new(&[("000001", &[Step::Hang])]));
        let universe = Universe::from_tokens(["000001"]);

        let report = scheduler(source.clone(), 2)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls("000001"), 2);
        match &report.outcomes[0] {
            Outcome::Failure { reason, detail, .. } => {
                assert_eq!(*reason, FailureReason::TransientExhausted);
                assert!(detail.contains("500ms"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_universe() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let report = scheduler(source, 3)
            .run(&Universe::default(), 4, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary.total(), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let err = scheduler(source, 3)
            .run(&Universe::from_tokens(["000001"]), 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConcurrency(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_bounded_by_concurrency() {
        let source =
            Arc::new(ScriptedSource::new(&[]).with_delay(Duration::from_millis(20)));
        let codes: Vec<String> = (1..=20).map(|i| format!("{:06}", i)).collect();
        let universe = Universe::from_tokens(codes.iter().map(String::as_str));

        let report = scheduler(source.clone(), 3)
            .run(&universe, 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.succeeded, 20);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_clamped_to_universe() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let universe = Universe::from_tokens(["000001", "000002"]);

        let report = scheduler(source, 3)
            .run(&universe, 80, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.metadata.concurrency, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_independent_of_concurrency() {
        let script: &[(&str, &[Step])] = &[
            ("000002", &[Step::Transient, Step::Ok]),
            ("000003", &[Step::Permanent]),
            ("000005", &[Step::Malformed]),
            ("000006", &[Step::Transient]),
        ];
        let codes: Vec<String> = (1..=8).map(|i| format!("{:06}", i)).collect();
        let universe = Universe::from_tokens(codes.iter().map(String::as_str));

        let serial = scheduler(Arc::new(ScriptedSource::new(script)), 3)
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();
        let parallel = scheduler(Arc::new(ScriptedSource::new(script)), 3)
            .run(&universe, 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(serial.outcomes, parallel.outcomes);
        assert_eq!(serial.summary.succeeded, 5);
        assert_eq!(serial.summary.failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_block_other_codes() {
        let source = Arc::new(ScriptedSource::new(&[(
            "000001",
            &[Step::Transient, Step::Ok],
        )]));
        let universe = Universe::from_tokens(["000001", "000002", "000003"]);
        let completed = Arc::new(Mutex::new(Vec::new()));

        let scheduler = {
            let completed = Arc::clone(&completed);
            Scheduler::new(
                source,
                Arc::new(ClassicAnalyzer),
                SchedulerConfig {
                    retry: RetryPolicy {
                        backoff_base: Duration::from_secs(1),
                        ..RetryPolicy::default()
                    },
                    per_call_timeout: Duration::from_secs(5),
                },
            )
            .on_outcome(move |outcome| {
                completed.lock().unwrap().push(outcome.code().to_string());
            })
        };

        let report = scheduler
            .run(&universe, 1, &CancellationToken::new())
            .await
            .unwrap();

        // The single slot keeps working while 000001 waits out its backoff
        assert_eq!(
            *completed.lock().unwrap(),
            vec!["000002", "000003", "000001"]
        );
        assert_eq!(report.outcomes[0].code().as_str(), "000001");
        assert_eq!(report.summary.succeeded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_code_once() {
        let source = Arc::new(ScriptedSource::new(&[
            ("000001", &[Step::Transient, Step::Transient, Step::Ok]),
            ("000002", &[Step::Permanent]),
        ]));
        let universe = Universe::from_tokens(["000001", "000002", "000003"]);
        let seen = Arc::new(AtomicUsize::new(0));

        let scheduler = {
            let seen = Arc::clone(&seen);
            scheduler(source, 3).on_outcome(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };
        scheduler
            .run(&universe, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_covers_every_code() {
        let source = Arc::new(ScriptedSource::new(&[
            ("000001", &[Step::Ok]),
            ("000002", &[Step::Hang]),
            ("000003", &[Step::Hang]),
        ]));
        let universe = Universe::from_tokens(["000001", "000002", "000003", "000004", "000005"]);
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            source,
            Arc::new(ClassicAnalyzer),
            SchedulerConfig {
                retry: RetryPolicy::default(),
                per_call_timeout: Duration::from_secs(60),
            },
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = scheduler.run(&universe, 2, &cancel).await.unwrap();

        assert!(report.metadata.cancelled);
        assert_eq!(
            statuses(&report),
            vec![
                ("000001".to_string(), "ok".to_string()),
                ("000002".to_string(), "cancelled".to_string()),
                ("000003".to_string(), "cancelled".to_string()),
                ("000004".to_string(), "cancelled".to_string()),
                ("000005".to_string(), "cancelled".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_skips_waiting_code() {
        let source = Arc::new(ScriptedSource::new(&[(
            "000001",
            &[Step::Transient, Step::Ok],
        )]));
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            source.clone(),
            Arc::new(ClassicAnalyzer),
            SchedulerConfig {
                retry: RetryPolicy {
                    backoff_base: Duration::from_secs(1),
                    ..RetryPolicy::default()
                },
                per_call_timeout: Duration::from_millis(500),
            },
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = scheduler
            .run(&Universe::from_tokens(["000001", "000002"]), 2, &cancel)
            .await
            .unwrap();

        assert!(report.metadata.cancelled);
        assert_eq!(
            statuses(&report),
            vec![
                ("000001".to_string(), "cancelled".to_string()),
                ("000002".to_string(), "ok".to_string()),
            ]
        );
        // The retry never fired
        assert_eq!(source.calls("000001"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_skips_all() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scheduler(source.clone(), 3)
            .run(&Universe::from_tokens(["000001", "000002"]), 2, &cancel)
            .await
            .unwrap();

        assert_eq!(report.summary.skipped, 2);
        assert_eq!(source.calls("000001"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_idempotent() {
        let universe = Universe::from_tokens(["000001", "000002", "000003"]);
        let script: &[(&str, &[Step])] = &[("000002", &[Step::Permanent])];

        let first = scheduler(Arc::new(ScriptedSource::new(script)), 3)
            .run(&universe, 3, &CancellationToken::new())
            .await
            .unwrap();
        let second = scheduler(Arc::new(ScriptedSource::new(script)), 3)
            .run(&universe, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.outcomes, second.outcomes);
    }
}

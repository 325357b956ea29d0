// src/pipeline/probe.rs

//! Probe pipeline: a bounded worker pool over the normalized target stream.
//!
//! Per target: resume check → circuit breaker → prober → redirect follower
//! → classifier → match/filter → sink → checkpoint.

use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeSettings;
use crate::error::Result;
use crate::models::{ProbeResult, Scheme, Target};
use crate::pipeline::{
    BreakerState, HostCircuitBreaker, ProbeStats, RateLimiter, ResumeCheckpoint, StatsSnapshot,
};
use crate::services::{
    DumpingTransport, Prober, RawTransport, RedirectFollower, ReqwestTransport, Resolver,
    ResponseClassifier, TargetInput, TargetNormalizer, Transport,
};
use crate::storage::ResultSink;
use crate::utils::http::create_async_client;

/// Targets buffered between the normalizer and the pool, per worker.
const QUEUE_PER_WORKER: usize = 4;

/// Outcome of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    /// Cancelled before the input was exhausted
    pub interrupted: bool,
}

/// Probing engine.
pub struct ProbeEngine {
    settings: Arc<ProbeSettings>,
    transport: Arc<dyn Transport>,
    resolver: Arc<Resolver>,
}

impl ProbeEngine {
    /// Build an engine with the transport selected by the settings.
    pub fn new(settings: ProbeSettings) -> Result<Self> {
        let transport: Arc<dyn Transport> = if settings.unsafe_mode {
            Arc::new(RawTransport::new(settings.timeout, settings.max_body_read)?)
        } else {
            let client = create_async_client(settings.timeout, settings.proxy.as_deref())?;
            Arc::new(ReqwestTransport::new(client, settings.max_body_read))
        };
        Ok(Self::with_transport(settings, transport))
    }

    /// Build an engine over `transport`, logging traffic when request or
    /// response dumps are enabled.
    pub fn with_transport(settings: ProbeSettings, transport: Arc<dyn Transport>) -> Self {
        let transport: Arc<dyn Transport> = if settings.debug_request || settings.debug_response {
            Arc::new(DumpingTransport::new(
                transport,
                settings.debug_request,
                settings.debug_response,
            ))
        } else {
            transport
        };
        Self {
            settings: Arc::new(settings),
            transport,
            resolver: Arc::new(Resolver::new()),
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probe every target from `input`, emitting results to `sink`.
    ///
    /// Cancelling `cancel` stops dispatch; in-flight probes finish and the
    /// checkpoint is flushed before returning.
    pub async fn run(
        &self,
        input: TargetInput,
        sink: &dyn ResultSink,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let settings = &self.settings;
        let started = Instant::now();

        let checkpoint = self.open_checkpoint().await?;
        let stats = Arc::new(ProbeStats::new());
        let limiter = Arc::new(RateLimiter::new(settings.rate));

        log::info!(
            "Probing with {} workers, rate {:?}, transport {}",
            settings.threads,
            limiter.spec(),
            if settings.unsafe_mode { "raw" } else { "standard" }
        );

        let worker = Worker {
            settings,
            sink,
            checkpoint: &checkpoint,
            stats: &stats,
            breaker: HostCircuitBreaker::new(settings.host_max_errors),
            prober: Prober::new(
                Arc::clone(settings),
                Arc::clone(&self.transport),
                Arc::clone(&limiter),
                cancel.clone(),
            ),
            follower: RedirectFollower::new(
                settings.redirect_policy,
                settings.max_redirects,
                Arc::clone(&self.transport),
                Arc::clone(&limiter),
                cancel.clone(),
            ),
            classifier: ResponseClassifier::new(Arc::clone(settings), Arc::clone(&self.resolver)),
            resolver: Arc::clone(&self.resolver),
            reported: DashSet::new(),
            cancel: cancel.clone(),
        };

        let ticker = settings
            .stats_interval
            .map(|every| spawn_stats_ticker(Arc::clone(&stats), every, started, cancel.child_token()));

        let (tx, rx) = mpsc::channel(settings.threads.max(1) * QUEUE_PER_WORKER);
        let normalizer = Arc::new(TargetNormalizer::new(
            Arc::clone(settings),
            Arc::clone(&self.resolver),
        ));
        let producer = normalizer.spawn_stream(input, tx, cancel.clone());

        let pool_result = {
            let targets = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|target| (target, rx))
            });
            let results = targets
                .take_until(cancel.clone().cancelled_owned())
                .map(|target| worker.process(target))
                .buffer_unordered(settings.threads.max(1));
            let mut results = pin!(results);

            let mut failure = None;
            while let Some(done) = results.next().await {
                if let Err(e) = done {
                    log::error!("Stopping: {}", e);
                    cancel.cancel();
                    failure = Some(e);
                }
            }
            failure.map_or(Ok(()), Err)
        };

        if let Some((token, handle)) = ticker {
            token.cancel();
            let _ = handle.await;
        }

        let interrupted = cancel.is_cancelled();
        match producer.await {
            Ok(produced) => {
                let produced = produced?;
                log::debug!("Input produced {} targets", produced);
            }
            Err(e) => log::warn!("Target producer task failed: {}", e),
        }
        pool_result?;

        sink.finish().await?;

        if interrupted && checkpoint.is_tracking() {
            checkpoint.flush().await?;
            log::warn!(
                "Interrupted; progress saved to {}",
                checkpoint.path().display()
            );
        } else if interrupted {
            log::warn!("Interrupted");
        } else if settings.resume.enabled {
            checkpoint.discard().await?;
        }

        let summary = RunSummary {
            stats: stats.snapshot(),
            interrupted,
        };
        log::info!(
            "Done in {:.1}s: {} ok, {} failed, {} skipped, {} resumed, {} filtered, {} requests",
            started.elapsed().as_secs_f64(),
            summary.stats.succeeded,
            summary.stats.failed,
            summary.stats.skipped,
            summary.stats.resumed,
            summary.stats.filtered,
            summary.stats.requests
        );
        Ok(summary)
    }

    /// Checkpoint for this run, restored from disk when resuming.
    async fn open_checkpoint(&self) -> Result<ResumeCheckpoint> {
        let resume = &self.settings.resume;
        if !resume.enabled {
            return Ok(if resume.save_on_interrupt {
                ResumeCheckpoint::new(&resume.file, None, None)
            } else {
                ResumeCheckpoint::disabled(&resume.file)
            });
        }

        let previous = ResumeCheckpoint::load(&resume.file).await?;
        if let Some(state) = &previous {
            log::info!(
                "Resuming from {}: {} targets already completed",
                resume.file.display(),
                state.completed.len()
            );
        }
        Ok(ResumeCheckpoint::new(
            &resume.file,
            Some(resume.flush_every),
            previous,
        ))
    }
}

/// Per-run state shared by every in-flight probe.
struct Worker<'a> {
    settings: &'a ProbeSettings,
    sink: &'a dyn ResultSink,
    checkpoint: &'a ResumeCheckpoint,
    stats: &'a ProbeStats,
    breaker: HostCircuitBreaker,
    prober: Prober,
    follower: RedirectFollower,
    classifier: ResponseClassifier,
    resolver: Arc<Resolver>,
    /// Identities already written to the sink
    reported: DashSet<String>,
    cancel: CancellationToken,
}

impl Worker<'_> {
    async fn process(&self, target: Target) -> Result<()> {
        let settings = self.settings;
        let ldp = settings.leave_default_ports;
        let key = target.identity_key(self.primary(&target), ldp);

        if self.checkpoint.is_complete(&key) {
            self.stats.record_resumed();
            return Ok(());
        }
        self.stats.record_queued();

        let host = target.host_key();
        if let BreakerState::Open { errors, .. } = self.breaker.check(&host) {
            log::debug!("Skipping {}: host has {} errors", target.url(self.primary(&target), ldp), errors);
            self.stats.record_skip();
            let result = ProbeResult::skipped(&target, self.primary(&target), ldp, errors);
            self.emit(result).await?;
            return self.checkpoint.mark_complete(&key).await;
        }

        let outcomes = self.prober.probe(&target).await;
        self.stats
            .record_requests(outcomes.iter().map(|o| o.attempts as usize).sum());

        let any_success = outcomes.iter().any(|o| o.is_success());
        if outcomes.is_empty() || (!any_success && self.cancel.is_cancelled()) {
            // Cut short by cancellation; probed again on resume
            return Ok(());
        }

        if any_success {
            self.stats.record_success();
        } else {
            self.stats.record_failure();
            let network = outcomes
                .last()
                .and_then(|o| o.result.as_ref().err())
                .is_some_and(|e| e.is_network());
            if network {
                self.breaker.record_failure(&host);
            }
        }

        let report = if settings.no_fallback {
            outcomes
        } else {
            outcomes.into_iter().last().into_iter().collect()
        };

        for outcome in report {
            let mut result = match outcome.result {
                Ok(response) => {
                    let follow = self.follower.follow(response, &outcome.request).await;
                    self.stats.record_requests(follow.requests as usize);
                    self.classifier
                        .classify(&target, outcome.scheme, outcome.attempts, follow)
                }
                Err(error) => {
                    ProbeResult::failed(&target, outcome.scheme, ldp, &error, outcome.attempts)
                }
            };

            if self.classifier.accepts(&result) {
                if settings.display.cname && result.is_success() {
                    result.cname = self.resolver.cname(&target.host).await;
                }
                self.emit(result).await?;
            } else {
                self.stats.record_filtered();
            }
        }

        self.checkpoint.mark_complete(&key).await
    }

    /// Write `result` unless an equivalent one was already reported.
    ///
    /// Input dedup keys unpinned targets by their first scheme; a fallback
    /// can still land on a URL another input pinned, which is caught here.
    async fn emit(&self, result: ProbeResult) -> Result<()> {
        if self.settings.dedupe() {
            let key = result
                .target
                .clone()
                .with_scheme(Some(result.scheme))
                .identity_key(result.scheme, self.settings.leave_default_ports);
            if !self.reported.insert(key) {
                log::debug!("{} already reported", result.url);
                return Ok(());
            }
        }
        self.sink.emit(&result).await
    }

    fn primary(&self, target: &Target) -> Scheme {
        target.scheme.unwrap_or(self.settings.preferred_scheme)
    }
}

fn spawn_stats_ticker(
    stats: Arc<ProbeStats>,
    every: Duration,
    started: Instant,
    token: CancellationToken,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let stop = token.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => stats.log_progress(started.elapsed()),
            }
        }
    });
    (token, handle)
}

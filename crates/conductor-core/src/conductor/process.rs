//! Conductor play loop
//!
//! Contains `play` - resolve, admit, then walk movements and beats in order.

use crate::client::ConductorClient;
use crate::error::{Error, Result};
use crate::event_bus::{describe_panic, ConductorEvent, WaitError};
use crate::plugin::{BeatOutput, PluginMount};
use crate::sequence::{Beat, MusicalSequence, SequencePriority, Timing};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::config::ErrorPolicy;
use super::context::{BeatContext, DeferredWork, PlayScope};
use super::core::{ActivePlayEntry, Conductor};
use super::helpers::{
    bounded, cancelled, duration_ms, elapsed_ms, initial_payload, merge_output, ActivePlayGuard,
};
use super::types::{ActivePlay, BeatRecord, BeatStatus, PlayResult, PlayState, PlayStatus};

/// What the beat loop produced
struct Performance {
    records: Vec<BeatRecord>,
    /// Failures tolerated under continue-and-report
    failures: Vec<Error>,
    /// Error that stopped the play
    halted: Option<Error>,
}

impl Conductor {
    /// Play `sequence_id` against `plugin_id`'s handlers.
    ///
    /// Fails before any beat runs when the plugin is not mounted or the
    /// sequence is unknown. Under the default abort policy the first beat
    /// failure is returned as `Err` after `sequence:failed` was published.
    pub async fn play(
        self: &Arc<Self>,
        plugin_id: &str,
        sequence_id: &str,
        context: Value,
        priority: SequencePriority,
    ) -> Result<PlayResult> {
        self.play_scoped(plugin_id, sequence_id, context, priority, None)
            .await
    }

    /// Play with an optional parent; nested plays share the parent's
    /// admission slot and cancellation.
    #[tracing::instrument(skip_all, fields(
        plugin = %plugin_id,
        sequence = %sequence_id,
        priority = %priority
    ))]
    pub(crate) async fn play_scoped(
        self: &Arc<Self>,
        plugin_id: &str,
        sequence_id: &str,
        context: Value,
        priority: SequencePriority,
        parent: Option<Uuid>,
    ) -> Result<PlayResult> {
        let mount = self
            .mounts
            .get(plugin_id)
            .ok_or_else(|| Error::PluginNotMounted {
                plugin_id: plugin_id.to_string(),
            })?;
        let sequence = self
            .registry
            .get(sequence_id)
            .ok_or_else(|| Error::SequenceNotFound {
                sequence_id: sequence_id.to_string(),
            })?;

        let play_id = Uuid::new_v4();
        let cancel = parent
            .and_then(|p| self.active_plays.get(&p).map(|e| e.cancel.child_token()))
            .unwrap_or_else(|| self.shutdown.child_token());

        // Register cancellation token for this play
        self.active_plays.insert(
            play_id,
            ActivePlayEntry {
                info: ActivePlay {
                    play_id,
                    plugin_id: plugin_id.to_string(),
                    sequence_id: sequence_id.to_string(),
                    priority,
                    state: PlayState::Queued,
                    current_beat: None,
                    parent,
                    started_at: Utc::now(),
                },
                cancel: cancel.clone(),
            },
        );
        let _active = ActivePlayGuard {
            plays: Arc::clone(&self.active_plays),
            play_id,
        };

        let scope = Arc::new(PlayScope {
            play_id,
            plugin_id: plugin_id.to_string(),
            sequence_id: sequence_id.to_string(),
            payload: Mutex::new(initial_payload(context)),
            deferred: Mutex::new(Vec::new()),
            cancel,
            client: ConductorClient::nested(Arc::clone(self), play_id),
            adapters: Arc::clone(&self.adapters),
        });

        // Nested plays already run inside the parent's slot
        let _permit = if parent.is_none() {
            let admission = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => None,
                permit = self.queue.acquire(plugin_id, priority) => Some(permit),
            };
            let Some(permit) = admission else {
                info!(play_id = %play_id, "Play cancelled while queued");
                self.emit(ConductorEvent::SequenceCancelled {
                    play_id,
                    plugin_id: plugin_id.to_string(),
                    sequence_id: sequence_id.to_string(),
                });
                return Err(cancelled(&scope, None));
            };
            Some(permit?)
        } else {
            None
        };

        self.mark_running(play_id);
        self.stats.record_play_started();
        let start_time = Instant::now();

        info!(
            play_id = %play_id,
            parent = ?parent,
            beats = sequence.beat_count(),
            "Starting play"
        );
        self.emit(ConductorEvent::SequenceStarted {
            play_id,
            plugin_id: plugin_id.to_string(),
            sequence_id: sequence_id.to_string(),
            priority,
        });

        let performance = self.perform(&scope, &sequence, &mount).await;
        self.finish(&scope, performance, start_time)
    }

    /// Walk movements and beats in declared order
    async fn perform(
        &self,
        scope: &Arc<PlayScope>,
        sequence: &MusicalSequence,
        mount: &PluginMount,
    ) -> Performance {
        let policy = self.config.conductor.error_policy;
        let mut records = Vec::with_capacity(sequence.beat_count());
        let mut failures = Vec::new();
        let mut halted = None;

        'movements: for movement in &sequence.movements {
            for beat in &movement.beats {
                if beat.timing == Timing::AfterBeat {
                    let limit = self.beat_limit(beat);
                    if let Err(error) = self.settle_deferred(scope, limit, Some(beat.beat)).await
                    {
                        let stop = matches!(error, Error::Cancelled { .. })
                            || policy == ErrorPolicy::AbortOnFirstError;
                        self.fail_deferred(scope, &mut records, &error);
                        if stop {
                            halted = Some(error);
                            break 'movements;
                        }
                        failures.push(error);
                    }
                }

                let (record, result) = self.run_beat(scope, mount, &movement.id, beat).await;
                records.push(record);
                if let Err(error) = result {
                    if matches!(error, Error::Cancelled { .. })
                        || policy == ErrorPolicy::AbortOnFirstError
                    {
                        halted = Some(error);
                        break 'movements;
                    }
                    failures.push(error);
                }
            }
        }

        if halted.is_none() {
            let limit = self.config.conductor.beat_timeout();
            if let Err(error) = self.settle_deferred(scope, limit, None).await {
                self.fail_deferred(scope, &mut records, &error);
                if matches!(error, Error::Cancelled { .. })
                    || policy == ErrorPolicy::AbortOnFirstError
                {
                    halted = Some(error);
                } else {
                    failures.push(error);
                }
            }
        }

        if halted.is_some() {
            scope.abort_deferred();
        }

        Performance {
            records,
            failures,
            halted,
        }
    }

    /// Publish the final event exactly once and build the result
    fn finish(
        &self,
        scope: &PlayScope,
        performance: Performance,
        start_time: Instant,
    ) -> Result<PlayResult> {
        let Performance {
            records,
            failures,
            halted,
        } = performance;
        let duration_ms = elapsed_ms(start_time);
        let play_id = scope.play_id;
        let plugin_id = scope.plugin_id.clone();
        let sequence_id = scope.sequence_id.clone();
        let failed_beats: Vec<u32> = records
            .iter()
            .filter(|r| r.status == BeatStatus::Failed)
            .map(|r| r.beat)
            .collect();

        if let Some(error) = halted {
            if matches!(error, Error::Cancelled { .. }) {
                info!(play_id = %play_id, beat = ?error.beat(), "Play cancelled");
                self.stats
                    .record_play_finished(&sequence_id, PlayStatus::Cancelled, duration_ms);
                self.emit(ConductorEvent::SequenceCancelled {
                    play_id,
                    plugin_id,
                    sequence_id,
                });
            } else {
                error!(play_id = %play_id, error = %error, "Play failed");
                self.stats
                    .record_play_finished(&sequence_id, PlayStatus::Failed, duration_ms);
                self.emit(ConductorEvent::SequenceFailed {
                    play_id,
                    plugin_id,
                    sequence_id,
                    failed_beats,
                    error: error.to_detail(),
                    duration_ms,
                });
            }
            return Err(error);
        }

        let executed = records.len();
        let status = if failures.is_empty() {
            PlayStatus::Completed
        } else if failed_beats.len() == executed {
            PlayStatus::Failed
        } else {
            PlayStatus::PartiallyFailed
        };

        self.stats
            .record_play_finished(&sequence_id, status, duration_ms);

        match (status, failures.first()) {
            (PlayStatus::Failed, Some(first)) => {
                error!(play_id = %play_id, failures = failures.len(), "Play failed");
                self.emit(ConductorEvent::SequenceFailed {
                    play_id,
                    plugin_id: plugin_id.clone(),
                    sequence_id: sequence_id.clone(),
                    failed_beats,
                    error: first.to_detail(),
                    duration_ms,
                });
            }
            _ => {
                info!(
                    play_id = %play_id,
                    status = %status,
                    beats = executed,
                    duration_ms,
                    "Play completed"
                );
                self.emit(ConductorEvent::SequenceCompleted {
                    play_id,
                    plugin_id: plugin_id.clone(),
                    sequence_id: sequence_id.clone(),
                    status,
                    beats_executed: executed,
                    duration_ms,
                });
            }
        }

        Ok(PlayResult {
            play_id,
            plugin_id,
            sequence_id,
            status,
            payload: scope.payload_snapshot(),
            beats: records,
            duration_ms,
        })
    }

    /// Run one beat and publish its outcome
    async fn run_beat(
        &self,
        scope: &Arc<PlayScope>,
        mount: &PluginMount,
        movement: &str,
        beat: &Beat,
    ) -> (BeatRecord, Result<()>) {
        let start_time = Instant::now();
        self.mark_beat(scope.play_id, beat.beat);
        self.emit(ConductorEvent::BeatStarted {
            play_id: scope.play_id,
            plugin_id: scope.plugin_id.clone(),
            sequence_id: scope.sequence_id.clone(),
            movement: movement.to_string(),
            beat: beat.beat,
            event: beat.event.clone(),
            handler: beat.handler.clone(),
        });

        let span = tracing::debug_span!(
            "beat",
            play_id = %scope.play_id,
            beat = beat.beat,
            handler = %beat.handler
        );
        let result = self.perform_beat(scope, mount, movement, beat, span).await;
        let duration_ms = elapsed_ms(start_time);

        let mut record = BeatRecord {
            movement: movement.to_string(),
            beat: beat.beat,
            event: beat.event.clone(),
            handler: beat.handler.clone(),
            timing: beat.timing,
            status: BeatStatus::Completed,
            duration_ms,
            error: None,
        };

        match result {
            Ok(output) => {
                debug!(
                    play_id = %scope.play_id,
                    beat = beat.beat,
                    event = %beat.event,
                    duration_ms,
                    "Beat completed"
                );
                self.stats.record_beat(true);
                self.event_bus
                    .publish(&beat.event, output.unwrap_or(Value::Null));
                self.emit(ConductorEvent::BeatCompleted {
                    play_id: scope.play_id,
                    plugin_id: scope.plugin_id.clone(),
                    sequence_id: scope.sequence_id.clone(),
                    beat: beat.beat,
                    event: beat.event.clone(),
                    handler: beat.handler.clone(),
                    duration_ms,
                });
                (record, Ok(()))
            }
            Err(error) => {
                record.status = BeatStatus::Failed;
                record.error = Some(error.to_detail());
                if !matches!(error, Error::Cancelled { .. }) {
                    self.report_beat_failure_at(scope, beat.beat, &beat.handler, &error);
                }
                (record, Err(error))
            }
        }
    }

    /// Charge a deferred-work failure to the beat that deferred it
    fn fail_deferred(&self, scope: &PlayScope, records: &mut [BeatRecord], error: &Error) {
        if matches!(error, Error::Cancelled { .. }) {
            return;
        }
        let beat = error.beat().unwrap_or_default();
        let mut handler = match error {
            Error::HandlerExecution { handler, .. } => handler.clone(),
            _ => String::new(),
        };
        if let Some(record) = records.iter_mut().rev().find(|r| r.beat == beat) {
            record.status = BeatStatus::Failed;
            record.error = Some(error.to_detail());
            if handler.is_empty() {
                handler = record.handler.clone();
            }
        }
        self.stats.record_late_beat_failure();
        self.publish_beat_failure(scope, beat, &handler, error);
    }

    fn report_beat_failure_at(&self, scope: &PlayScope, beat: u32, handler: &str, error: &Error) {
        self.stats.record_beat(false);
        self.publish_beat_failure(scope, beat, handler, error);
    }

    fn publish_beat_failure(&self, scope: &PlayScope, beat: u32, handler: &str, error: &Error) {
        warn!(
            play_id = %scope.play_id,
            beat,
            handler = %handler,
            error = %error,
            "Beat failed"
        );
        self.emit(ConductorEvent::BeatFailed {
            play_id: scope.play_id,
            plugin_id: scope.plugin_id.clone(),
            sequence_id: scope.sequence_id.clone(),
            beat,
            handler: handler.to_string(),
            error: error.to_detail(),
        });
    }

    /// Resolve, apply timing, invoke and merge
    async fn perform_beat(
        &self,
        scope: &Arc<PlayScope>,
        mount: &PluginMount,
        movement: &str,
        beat: &Beat,
        span: tracing::Span,
    ) -> Result<BeatOutput> {
        if scope.cancel.is_cancelled() {
            return Err(cancelled(scope, Some(beat.beat)));
        }

        let handler = mount.resolve(&scope.sequence_id, beat)?;
        let limit = self.beat_limit(beat);

        // After-beat settlement already happened in `perform`
        let signal = match beat.timing {
            Timing::Immediate | Timing::AfterBeat => None,
            Timing::Synchronized => Some(self.await_signal(scope, beat).await?),
        };

        let mut data = scope.payload_snapshot();
        if let Some(signal) = &signal {
            data.insert("signal".to_string(), signal.clone());
        }
        let ctx = BeatContext::new(Arc::clone(scope), movement, beat, signal, span.clone());

        let invocation = AssertUnwindSafe(handler.handle(Value::Object(data), ctx))
            .catch_unwind()
            .instrument(span);
        let outcome = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => return Err(cancelled(scope, Some(beat.beat))),
            outcome = bounded(invocation, limit) => outcome,
        };

        let execution_error = |message: String| Error::HandlerExecution {
            plugin_id: scope.plugin_id.clone(),
            sequence_id: scope.sequence_id.clone(),
            beat: beat.beat,
            handler: beat.handler.clone(),
            message,
        };
        let output = match outcome {
            None => {
                return Err(Error::BeatTimeout {
                    plugin_id: scope.plugin_id.clone(),
                    sequence_id: scope.sequence_id.clone(),
                    beat: beat.beat,
                    timeout_ms: duration_ms(limit),
                })
            }
            Some(Ok(Ok(output))) => output,
            Some(Ok(Err(e))) => return Err(execution_error(format!("{e:#}"))),
            Some(Err(panic)) => {
                return Err(execution_error(format!(
                    "handler panicked: {}",
                    describe_panic(panic.as_ref())
                )))
            }
        };

        merge_output(&scope.payload, &beat.handler, &output);
        Ok(output)
    }

    fn beat_limit(&self, beat: &Beat) -> Option<Duration> {
        beat.timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.config.conductor.beat_timeout())
    }

    /// Wait for a synchronized beat's signal
    async fn await_signal(&self, scope: &PlayScope, beat: &Beat) -> Result<Value> {
        let signal = beat.signal_name().to_string();
        // Subscribe before announcing, so a signal sent in reaction to
        // `beat:waiting` is not missed.
        let waiter = self.event_bus.prepare_wait(signal.clone());
        debug!(play_id = %scope.play_id, beat = beat.beat, signal = %signal, "Waiting for signal");
        self.emit(ConductorEvent::BeatWaiting {
            play_id: scope.play_id,
            plugin_id: scope.plugin_id.clone(),
            sequence_id: scope.sequence_id.clone(),
            beat: beat.beat,
            signal: signal.clone(),
        });

        let limit = beat
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.config.conductor.signal_timeout());
        waiter
            .wait(&scope.cancel, limit)
            .await
            .map_err(|e| match e {
                WaitError::Cancelled => cancelled(scope, Some(beat.beat)),
                WaitError::TimedOut(limit) => Error::BeatTimeout {
                    plugin_id: scope.plugin_id.clone(),
                    sequence_id: scope.sequence_id.clone(),
                    beat: beat.beat,
                    timeout_ms: duration_ms(Some(limit)),
                },
                WaitError::Closed => Error::Internal(format!(
                    "event bus closed while waiting for '{signal}'"
                )),
            })
    }

    /// Await work deferred by earlier beats, oldest first
    async fn settle_deferred(
        &self,
        scope: &PlayScope,
        limit: Option<Duration>,
        current: Option<u32>,
    ) -> Result<()> {
        let mut pending = scope.take_deferred().into_iter();
        while let Some(work) = pending.next() {
            if let Err(error) = self.join_deferred(scope, work, limit, current).await {
                for rest in pending {
                    rest.handle.abort();
                }
                return Err(error);
            }
        }
        Ok(())
    }

    async fn join_deferred(
        &self,
        scope: &PlayScope,
        mut work: DeferredWork,
        limit: Option<Duration>,
        current: Option<u32>,
    ) -> Result<()> {
        let joined = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => None,
            joined = bounded(&mut work.handle, limit) => Some(joined),
        };
        let Some(joined) = joined else {
            work.handle.abort();
            return Err(cancelled(scope, current));
        };

        let failure = |message: String| Error::HandlerExecution {
            plugin_id: scope.plugin_id.clone(),
            sequence_id: scope.sequence_id.clone(),
            beat: work.beat,
            handler: work.handler.clone(),
            message,
        };
        match joined {
            None => {
                work.handle.abort();
                Err(Error::BeatTimeout {
                    plugin_id: scope.plugin_id.clone(),
                    sequence_id: scope.sequence_id.clone(),
                    beat: work.beat,
                    timeout_ms: duration_ms(limit),
                })
            }
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(failure(format!("deferred work failed: {e:#}"))),
            Some(Err(join_error)) if join_error.is_panic() => Err(failure(format!(
                "deferred work panicked: {}",
                describe_panic(join_error.into_panic().as_ref())
            ))),
            Some(Err(_)) => Err(failure("deferred work was aborted".to_string())),
        }
    }
}

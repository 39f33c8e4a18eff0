use crate::ramp::Ramp;
use crate::vu::{IterationContext, VirtualUser};
use crate::RunError;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use surge_http::ExecutionPlan;
use surge_thresholds::ThresholdEvaluator;
use tokio::time::{Instant, MissedTickBehavior};

/// How a run that didn't fail came to an end
#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Went through the whole plan
    Completed,
    /// Cancelled from outside
    Stopped,
    /// Cancelled by a failing abort-on-fail threshold
    Aborted,
}

/// Keeps the number of running virtual users in line with the ramp
pub(crate) struct Controller {
    plan: ExecutionPlan,
    ctx: Arc<IterationContext>,
    evaluator: Arc<ThresholdEvaluator>,
    control_interval: Duration,
    max_vus: u32,
    live: Vec<VirtualUser>,
    next_id: u32,
}

impl Controller {
    pub(crate) fn new(
        plan: ExecutionPlan,
        ctx: Arc<IterationContext>,
        evaluator: Arc<ThresholdEvaluator>,
        control_interval: Duration,
        max_vus: u32,
    ) -> Self {
        Self {
            plan,
            ctx,
            evaluator,
            control_interval,
            max_vus,
            live: vec![],
            next_id: 0,
        }
    }

    pub(crate) async fn run(mut self) -> Result<RunOutcome, RunError> {
        let job_id = self.ctx.job_id.clone();
        let total = self.plan.total();
        let abort_on_fail = self.evaluator.has_abort_on_fail();
        info!(
            "[run] - [{}] - starting, plan takes {:?}, {} stages",
            &job_id,
            total,
            self.plan.stages().len()
        );
        let started = Instant::now();
        let mut interval = tokio::time::interval(self.control_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = self.ctx.cancel.cancelled() => {},
            }
            if self.ctx.cancel.is_cancelled() {
                info!("[run] - [{}] - cancelled", &job_id);
                self.shutdown().await;
                return Ok(RunOutcome::Stopped);
            }

            let elapsed = started.elapsed();
            if elapsed >= total {
                debug!("[run] - [{}] - end of plan, draining", &job_id);
                self.ctx.metrics.vu_target(0);
                self.shutdown().await;
                info!("[run] - [{}] - completed", &job_id);
                return Ok(RunOutcome::Completed);
            }

            let desired = self.plan.target_at(elapsed);
            self.ctx.metrics.vu_target(desired);
            if desired > self.max_vus {
                warn!(
                    "[run] - [{}] - ramp asks for {} virtual users, ceiling is {}",
                    &job_id, desired, self.max_vus
                );
                self.ctx.cancel.cancel();
                self.shutdown().await;
                return Err(RunError::ResourceExhausted {
                    desired,
                    ceiling: self.max_vus,
                });
            }
            self.reconcile(desired);

            if abort_on_fail {
                let verdict = self.evaluator.evaluate(&self.ctx.metrics.snapshot());
                if verdict.should_abort() {
                    info!(
                        "[run] - [{}] - aborting, failed thresholds: {:?}",
                        &job_id,
                        verdict.failed().collect::<Vec<_>>()
                    );
                    self.ctx.cancel.cancel();
                    self.shutdown().await;
                    return Ok(RunOutcome::Aborted);
                }
            }
        }
    }

    /// Spawn or drain users so that `desired` of them are running.
    ///
    /// Draining users still hold a slot until their task ends, so spawns that would push the live
    /// task count past the ceiling are held back to a later tick.
    fn reconcile(&mut self, desired: u32) {
        self.live.retain(|vu| !vu.is_finished());
        let mut running = self.live.iter().filter(|vu| !vu.is_draining()).count();
        let desired = desired as usize;
        if desired > running {
            let free = (self.max_vus as usize).saturating_sub(self.live.len());
            let spawn = (desired - running).min(free);
            if spawn < desired - running {
                debug!(
                    "[reconcile] - [{}] - {} users still draining, holding back {} spawns",
                    &self.ctx.job_id,
                    self.live.len() - running,
                    desired - running - spawn
                );
            }
            for _ in 0..spawn {
                self.next_id += 1;
                self.live
                    .push(VirtualUser::spawn(self.next_id, self.ctx.clone()));
            }
            running += spawn;
        } else if desired < running {
            let mut to_drain = running - desired;
            for vu in self.live.iter() {
                if to_drain == 0 {
                    break;
                }
                if vu.drain() {
                    to_drain -= 1;
                }
            }
            running = desired;
        }
        trace!(
            "[reconcile] - [{}] - desired: {}, running: {}, live: {}",
            &self.ctx.job_id,
            desired,
            running,
            self.live.len()
        );
        self.ctx.metrics.vu_active(running);
    }

    /// Drain every user and wait for all of them to stop
    async fn shutdown(&mut self) {
        for vu in self.live.iter() {
            vu.drain();
        }
        for vu in self.live.drain(..) {
            vu.join().await;
        }
        self.ctx.metrics.vu_active(0);
    }
}

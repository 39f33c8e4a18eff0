use crate::client::HttpClient;
use crate::selector::EndpointSelector;
use common_types::VuState;
use log::{debug, trace};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use surge_metrics::{Metrics, RequestOutcome};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything an iteration needs, shared read-only by every virtual user of a run
pub(crate) struct IterationContext {
    pub(crate) job_id: String,
    pub(crate) selector: EndpointSelector,
    pub(crate) client: Arc<dyn HttpClient>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) request_timeout: Duration,
    pub(crate) pacing: Duration,
    pub(crate) expected_status: u16,
    pub(crate) cancel: CancellationToken,
}

/// Controller side of a virtual user
pub(crate) struct VirtualUser {
    pub(crate) id: u32,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    pub(crate) fn spawn(id: u32, ctx: Arc<IterationContext>) -> Self {
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let handle = tokio::spawn(iteration_loop(id, state.clone(), ctx));
        Self { id, state, handle }
    }

    pub(crate) fn state(&self) -> VuState {
        VuState::from(self.state.load(Ordering::Acquire))
    }

    /// Ask the user to stop after its current iteration. false if it was already draining or
    /// stopped.
    pub(crate) fn drain(&self) -> bool {
        for from in [VuState::Running, VuState::Idle] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    VuState::Draining as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    pub(crate) fn is_draining(&self) -> bool {
        matches!(self.state(), VuState::Draining | VuState::Stopped)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) async fn join(self) {
        if let Err(e) = self.handle.await {
            log::error!("[join] - virtual user {} - {}", self.id, e);
        }
    }
}

async fn iteration_loop(id: u32, state: Arc<AtomicU8>, ctx: Arc<IterationContext>) {
    // drained before it got a chance to start
    if state
        .compare_exchange(
            VuState::Idle as u8,
            VuState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        state.store(VuState::Stopped as u8, Ordering::Release);
        return;
    }
    trace!("[iteration_loop] - [{}] - vu {} started", &ctx.job_id, id);
    let mut iterations = 0u64;
    loop {
        iterate(&ctx).await;
        iterations += 1;

        if !ctx.pacing.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(ctx.pacing) => {},
                _ = ctx.cancel.cancelled() => {},
            }
        }

        if ctx.cancel.is_cancelled()
            || VuState::from(state.load(Ordering::Acquire)) == VuState::Draining
        {
            break;
        }
    }
    state.store(VuState::Stopped as u8, Ordering::Release);
    debug!(
        "[iteration_loop] - [{}] - vu {} stopped after {} iterations",
        &ctx.job_id, id, iterations
    );
}

/// select, request, record
async fn iterate(ctx: &IterationContext) {
    let endpoint = ctx.selector.select();
    let timestamp = SystemTime::now();
    let response = ctx.client.request(&endpoint.uri, ctx.request_timeout).await;
    let status = response.status.map(|s| s.as_u16());
    let outcome = RequestOutcome {
        timestamp,
        endpoint: endpoint.template.clone(),
        status,
        latency: response.latency,
        success: response.success(),
        timed_out: response.timed_out(),
    };
    ctx.metrics.record(&outcome);
    ctx.metrics.check(status == Some(ctx.expected_status));
    ctx.metrics.iteration_completed();
}

use std::time::Duration;
use surge_http::ExecutionPlan;

/// Continuous target concurrency over time, built from a stage list.
///
/// Stage `i` owns the window `[start_i, start_i + duration_i)` and moves linearly from the
/// previous stage's target (0 before the first stage) to its own target, reaching it at the end
/// of the window. A zero length stage has an empty window, its target becomes the starting point
/// of the next stage. Past the end of the plan the target is 0.
pub trait Ramp {
    /// Floor of [`Ramp::exact_target_at`], computed on whole milliseconds so stage boundaries
    /// land exactly on the configured targets.
    fn target_at(&self, elapsed: Duration) -> u32;

    fn exact_target_at(&self, elapsed: Duration) -> f64;

    fn total(&self) -> Duration;
}

impl Ramp for ExecutionPlan {
    fn target_at(&self, elapsed: Duration) -> u32 {
        let t = elapsed.as_millis() as i128;
        let mut start = 0i128;
        let mut previous = 0i128;
        for stage in self.stages() {
            let duration = stage.duration.as_millis() as i128;
            let target = stage.target as i128;
            if t < start + duration {
                // both terms are non-negative, integer division floors
                let value = previous * duration + (target - previous) * (t - start);
                return (value / duration) as u32;
            }
            start += duration;
            previous = target;
        }
        0
    }

    fn exact_target_at(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        let mut start = 0f64;
        let mut previous = 0f64;
        for stage in self.stages() {
            let duration = stage.duration.as_secs_f64();
            let target = stage.target as f64;
            if t < start + duration {
                return previous + (target - previous) * (t - start) / duration;
            }
            start += duration;
            previous = target;
        }
        0f64
    }

    fn total(&self) -> Duration {
        self.total_duration()
    }
}

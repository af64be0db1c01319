use std::fmt::Display;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};

use crate::utils::format_duration;

/// Below this many items the ETA uses the caller's per-item guess.
const ETA_WARMUP_ITEMS: usize = 50;

/// Loop policy shared by every stage: pause between items, failure budget, item ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RunPolicy {
    pub pause: Duration,
    pub jitter: Duration,
    pub max_failures: Option<usize>,
    pub max_items: Option<usize>,
}

impl RunPolicy {
    /// No pause, no budget, no ceiling.
    pub fn unpaced() -> Self {
        RunPolicy {
            pause: Duration::ZERO,
            jitter: Duration::ZERO,
            max_failures: None,
            max_items: None,
        }
    }

    /// Uniform draw from `[pause - jitter, pause + jitter]`, floored at zero.
    pub fn jittered_pause<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.pause.saturating_sub(self.jitter);
        let hi = self.pause + self.jitter;
        if hi <= lo {
            return lo;
        }
        Duration::from_secs_f64(rng.random_range(lo.as_secs_f64()..=hi.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cumulative failures reached the configured budget.
    FailureBudget,
    /// Processed-item (or page) ceiling reached.
    ItemLimit,
    /// The source reported nothing further to process.
    EndOfListing,
    /// The last item made no progress and the next one would repeat it.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stage: &'static str,
    pub processed: usize,
    pub succeeded: usize,
    pub failures: usize,
    pub stop: Option<StopReason>,
    pub elapsed: Duration,
    pub failure_messages: Vec<String>,
}

impl RunSummary {
    pub fn log(&self) {
        info!("---- {} finished ----", self.stage);
        info!("Run time: {}", format_duration(self.elapsed));
        info!(
            "{} processed, {} succeeded, {} failed",
            self.processed, self.succeeded, self.failures
        );
        match self.stop {
            Some(StopReason::FailureBudget) => info!("Stopped early: failure budget exhausted"),
            Some(StopReason::ItemLimit) => info!("Stopped early: item limit reached"),
            Some(StopReason::EndOfListing) => info!("Stopped: source has no more listings"),
            Some(StopReason::Stalled) => info!("Stopped early: no progress on a repeated batch"),
            None => {}
        }
        for (i, m) in self.failure_messages.iter().enumerate() {
            error!("Error {} - {}", i + 1, m);
        }
    }
}

/// Book-keeping for one stage run. Stages call `record_*` once per item,
/// then `check_stop` and `pause` before moving on.
pub struct RunLoop {
    stage: &'static str,
    policy: RunPolicy,
    started: Instant,
    processed: usize,
    succeeded: usize,
    failure_messages: Vec<String>,
    stop: Option<StopReason>,
}

impl RunLoop {
    pub fn new(stage: &'static str, policy: RunPolicy) -> Self {
        RunLoop {
            stage,
            policy,
            started: Instant::now(),
            processed: 0,
            succeeded: 0,
            failure_messages: Vec::new(),
            stop: None,
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, context: impl Display, err: impl Display) {
        self.processed += 1;
        let message = format!("{} - {}", context, err);
        warn!(stage = self.stage, "{}", message);
        self.failure_messages.push(message);
    }

    pub fn failures(&self) -> usize {
        self.failure_messages.len()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Returns the reason the loop must end now, if any. Budget takes precedence.
    pub fn check_stop(&mut self) -> Option<StopReason> {
        if self.stop.is_some() {
            return self.stop;
        }
        if let Some(budget) = self.policy.max_failures {
            if self.failures() >= budget {
                info!("Failed {} times. Stopping {}", self.failures(), self.stage);
                self.stop = Some(StopReason::FailureBudget);
                return self.stop;
            }
        }
        if let Some(limit) = self.policy.max_items {
            if self.processed >= limit {
                info!("Processed limit of {} reached", limit);
                self.stop = Some(StopReason::ItemLimit);
                return self.stop;
            }
        }
        None
    }

    pub fn stop(&mut self, reason: StopReason) {
        self.stop.get_or_insert(reason);
    }

    pub async fn pause(&self) {
        let wait = self.policy.jittered_pause(&mut rand::rng());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Remaining-time estimate for `total` items.
    pub fn eta(&self, total: usize, guess_per_item: Duration) -> Duration {
        let remaining = total.saturating_sub(self.processed) as u32;
        if self.processed <= ETA_WARMUP_ITEMS {
            guess_per_item * remaining
        } else {
            self.started.elapsed() / self.processed as u32 * remaining
        }
    }

    pub fn log_progress(&self, total: usize, guess_per_item: Duration) {
        info!(
            "Finished {} of {}. Estimated time remaining: {}",
            self.processed,
            total,
            format_duration(self.eta(total, guess_per_item))
        );
    }

    pub fn finish(self) -> RunSummary {
        RunSummary {
            stage: self.stage,
            processed: self.processed,
            succeeded: self.succeeded,
            failures: self.failure_messages.len(),
            stop: self.stop,
            elapsed: self.started.elapsed(),
            failure_messages: self.failure_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(max_failures: Option<usize>, max_items: Option<usize>) -> RunPolicy {
        RunPolicy {
            max_failures,
            max_items,
            ..RunPolicy::unpaced()
        }
    }

    #[test]
    fn jitter_stays_in_window() {
        let p = RunPolicy {
            pause: Duration::from_secs(10),
            jitter: Duration::from_secs(3),
            ..RunPolicy::unpaced()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let d = p.jittered_pause(&mut rng);
            assert!(d >= Duration::from_secs(7) && d <= Duration::from_secs(13), "{:?}", d);
        }
    }

    #[test]
    fn jitter_larger_than_pause_floors_at_zero() {
        let p = RunPolicy {
            pause: Duration::from_secs(1),
            jitter: Duration::from_secs(5),
            ..RunPolicy::unpaced()
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert!(p.jittered_pause(&mut rng) <= Duration::from_secs(6));
        }
        assert_eq!(RunPolicy::unpaced().jittered_pause(&mut rng), Duration::ZERO);
    }

    #[test]
    fn budget_stops_at_exact_count() {
        let mut run = RunLoop::new("test", policy(Some(3), None));
        run.record_failure("a", "boom");
        run.record_success();
        run.record_failure("b", "boom");
        assert_eq!(run.check_stop(), None);
        run.record_failure("c", "boom");
        assert_eq!(run.check_stop(), Some(StopReason::FailureBudget));

        let summary = run.finish();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.failure_messages[0], "a - boom");
    }

    #[test]
    fn item_limit_and_no_budget() {
        let mut run = RunLoop::new("test", policy(None, Some(2)));
        for _ in 0..10 {
            run.record_failure("x", "y");
            if run.check_stop().is_some() {
                break;
            }
        }
        assert_eq!(run.processed(), 2);
        assert_eq!(run.finish().stop, Some(StopReason::ItemLimit));
    }

    #[test]
    fn first_stop_reason_is_kept() {
        let mut run = RunLoop::new("test", policy(Some(1), None));
        run.stop(StopReason::EndOfListing);
        run.record_failure("x", "y");
        assert_eq!(run.check_stop(), Some(StopReason::EndOfListing));
    }

    #[test]
    fn eta_uses_guess_during_warmup() {
        let mut run = RunLoop::new("test", RunPolicy::unpaced());
        run.record_success();
        assert_eq!(run.eta(11, Duration::from_secs(2)), Duration::from_secs(20));
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One unit of periodic work, e.g. aggregate + broadcast.
#[async_trait]
pub trait BroadcastCycle: Send + Sync {
    /// How many receivers the cycle would reach right now. `0` skips the tick.
    fn audience(&self) -> usize;

    /// Run the cycle to completion. Must handle its own errors.
    async fn run_cycle(&self);
}

/// Counters reported when the scheduler loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub cycles: u64,
    pub skipped: u64,
    /// The in-flight cycle outlived the shutdown grace period.
    pub abandoned: bool,
}

/// Fixed-period, non-overlapping cycle driver.
pub struct Scheduler {
    period: Duration,
    grace: Duration,
}

impl Scheduler {
    /// `period` must be non-zero; `grace` bounds how long shutdown waits
    /// for a running cycle.
    pub fn new(period: Duration, grace: Duration) -> Self {
        Self { period, grace }
    }

    /// Main loop. Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// The first tick fires one period after the call. Ticks are spaced from
    /// the previous tick's deadline, so cycle run time does not accumulate
    /// drift; a tick missed because a cycle overran fires when that cycle
    /// returns and the schedule restarts from there.
    pub async fn run<C>(self, cycle: Arc<C>, mut shutdown: watch::Receiver<bool>) -> SchedulerStats
    where
        C: BroadcastCycle + ?Sized,
    {
        info!(period_ms = self.period.as_millis() as u64, "scheduler started");
        let mut stats = SchedulerStats::default();

        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    stats.ticks += 1;
                    let audience = cycle.audience();
                    if audience == 0 {
                        stats.skipped += 1;
                        debug!(tick = stats.ticks, "no clients connected, cycle skipped");
                        continue;
                    }

                    let running = cycle.run_cycle();
                    tokio::pin!(running);

                    tokio::select! {
                        _ = &mut running => {
                            stats.cycles += 1;
                        }
                        _ = shutdown_requested(&mut shutdown) => {
                            info!(
                                grace_ms = self.grace.as_millis() as u64,
                                "shutdown during cycle, waiting for it to finish"
                            );
                            match tokio::time::timeout(self.grace, &mut running).await {
                                Ok(()) => stats.cycles += 1,
                                Err(_) => {
                                    warn!("cycle exceeded shutdown grace period, abandoned");
                                    stats.abandoned = true;
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!(
            ticks = stats.ticks,
            cycles = stats.cycles,
            skipped = stats.skipped,
            "scheduler stopped"
        );
        stats
    }
}

/// Resolves once shutdown is signalled (or can no longer be signalled).
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PERIOD: Duration = Duration::from_secs(5);

    /// Cycle that records its start/end instants and takes `work` to finish.
    struct Recorder {
        audience: AtomicUsize,
        work: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    impl Recorder {
        fn new(audience: usize, work: Duration) -> Arc<Self> {
            Arc::new(Self {
                audience: AtomicUsize::new(audience),
                work,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                spans: Mutex::new(Vec::new()),
            })
        }

        fn starts(&self) -> Vec<Instant> {
            self.spans.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    #[async_trait]
    impl BroadcastCycle for Recorder {
        fn audience(&self) -> usize {
            self.audience.load(Ordering::SeqCst)
        }

        async fn run_cycle(&self) {
            let start = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.spans.lock().unwrap().push((start, Instant::now()));
        }
    }

    fn spawn(
        recorder: Arc<Recorder>,
        grace: Duration,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<SchedulerStats>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Scheduler::new(PERIOD, grace).run(recorder, rx));
        (tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_audience_never_runs_a_cycle() {
        let recorder = Recorder::new(0, Duration::ZERO);
        let (tx, handle) = spawn(recorder.clone(), PERIOD);

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(recorder.completed.load(Ordering::SeqCst), 0);
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_do_not_drift_with_cycle_duration() {
        let recorder = Recorder::new(2, PERIOD * 3 / 10);
        let (tx, handle) = spawn(recorder.clone(), PERIOD);

        tokio::time::sleep(PERIOD * 6 + Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        let starts = recorder.starts();
        assert_eq!(stats.cycles, 6);
        assert!(starts.windows(2).all(|w| w[1] - w[0] == PERIOD));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_defers_the_next_tick() {
        let recorder = Recorder::new(1, PERIOD * 5 / 2);
        let (tx, handle) = spawn(recorder.clone(), PERIOD);

        tokio::time::sleep(PERIOD * 10).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
        let spans = recorder.spans.lock().unwrap().clone();
        assert!(spans.len() >= 2);
        assert!(spans.windows(2).all(|w| w[1].0 >= w[0].1));
    }

    #[tokio::test(start_paused = true)]
    async fn audience_is_checked_every_tick() {
        let recorder = Recorder::new(0, Duration::ZERO);
        let (tx, handle) = spawn(recorder.clone(), PERIOD);

        tokio::time::sleep(PERIOD + Duration::from_millis(100)).await;
        recorder.audience.store(3, Ordering::SeqCst);
        tokio::time::sleep(PERIOD).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_cycle() {
        let recorder = Recorder::new(1, Duration::from_secs(2));
        let (tx, handle) = spawn(recorder.clone(), Duration::from_secs(5));

        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.cycles, 1);
        assert!(!stats.abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_cycle_is_abandoned_after_grace() {
        let recorder = Recorder::new(1, Duration::from_secs(600));
        let (tx, handle) = spawn(recorder.clone(), Duration::from_secs(1));

        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        let asked = Instant::now();
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert!(stats.abandoned);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 0);
        assert!(Instant::now() - asked <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_the_loop() {
        let recorder = Recorder::new(1, Duration::ZERO);
        let (tx, handle) = spawn(recorder, PERIOD);
        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.ticks, 0);
    }
}

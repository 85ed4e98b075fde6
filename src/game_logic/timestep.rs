use crate::game_logic::constants::MAX_FRAME_TIME;
use bevy::log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// Tolerance for accumulated float error when draining whole ticks
const TICK_EPSILON: f64 = 1e-9;

/// Monotonic time source, in seconds since an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by `Instant`
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and replays. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now = t;
        }
    }

    pub fn advance(&self, dt: f64) -> f64 {
        match self.now.lock() {
            Ok(mut now) => {
                *now += dt;
                *now
            }
            Err(_) => 0.0,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.lock().map(|t| *t).unwrap_or(0.0)
    }
}

/// The two callbacks a [`FixedTimestep`] drives.
pub trait LoopHandler {
    /// One fixed step. `dt` is always `1 / tick_rate`.
    fn update(&mut self, dt: f64);
    /// Called once per wake-up with progress toward the next tick, in [0, 1).
    fn render(&mut self, alpha: f64);
}

impl<U, R> LoopHandler for (U, R)
where
    U: FnMut(f64),
    R: FnMut(f64),
{
    fn update(&mut self, dt: f64) {
        (self.0)(dt)
    }

    fn render(&mut self, alpha: f64) {
        (self.1)(alpha)
    }
}

/// Runs `update` at a constant rate regardless of how irregularly it is woken.
///
/// Elapsed wall time per wake-up is clamped to `max_frame_time` so a long
/// stall cannot queue an unbounded number of catch-up ticks.
pub struct FixedTimestep<H> {
    handler: H,
    tick_rate: f64,
    dt: f64,
    max_frame_time: f64,
    accumulator: f64,
    last_wake: f64,
    running: bool,
    ticks: u64,
}

impl<H: LoopHandler> FixedTimestep<H> {
    pub fn new(handler: H, tick_rate: f64) -> Self {
        let tick_rate = if tick_rate.is_finite() && tick_rate > 0.0 {
            tick_rate
        } else {
            warn!("invalid tick rate {tick_rate}, falling back to 60 Hz");
            60.0
        };
        Self {
            handler,
            tick_rate,
            dt: 1.0 / tick_rate,
            max_frame_time: MAX_FRAME_TIME,
            accumulator: 0.0,
            last_wake: 0.0,
            running: false,
            ticks: 0,
        }
    }

    pub fn with_max_frame_time(mut self, seconds: f64) -> Self {
        self.max_frame_time = seconds.max(self.dt);
        self
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Total `update` calls since construction
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn start(&mut self, now: f64) {
        if self.running {
            return;
        }
        self.running = true;
        self.last_wake = now;
        self.accumulator = 0.0;
        debug!("loop started at {:.1} Hz", self.tick_rate);
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        debug!("loop stopped after {} ticks", self.ticks);
    }

    /// Consume elapsed time, run zero or more updates, then render once.
    /// Returns how many updates ran. Does nothing while stopped.
    pub fn wake(&mut self, now: f64) -> usize {
        if !self.running {
            return 0;
        }
        let elapsed = (now - self.last_wake).clamp(0.0, self.max_frame_time);
        self.last_wake = now;
        self.accumulator += elapsed;

        let mut steps = 0;
        while self.accumulator + TICK_EPSILON >= self.dt {
            self.handler.update(self.dt);
            self.accumulator = (self.accumulator - self.dt).max(0.0);
            self.ticks += 1;
            steps += 1;
        }

        let alpha = (self.accumulator / self.dt).clamp(0.0, 1.0);
        self.handler.render(alpha);
        steps
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        updates: Vec<f64>,
        renders: Vec<f64>,
    }

    impl LoopHandler for Recorder {
        fn update(&mut self, dt: f64) {
            self.updates.push(dt);
        }
        fn render(&mut self, alpha: f64) {
            self.renders.push(alpha);
        }
    }

    #[test]
    fn test_stopped_loop_does_nothing() {
        let mut lp = FixedTimestep::new(Recorder::default(), 10.0);
        assert_eq!(lp.wake(5.0), 0);
        assert!(lp.handler().renders.is_empty());
    }

    #[test]
    fn test_whole_ticks_and_alpha() {
        let mut lp = FixedTimestep::new(Recorder::default(), 10.0);
        lp.start(0.0);

        assert_eq!(lp.wake(0.05), 0);
        assert_eq!(lp.wake(0.25), 2);
        assert_eq!(lp.ticks(), 2);

        let rec = lp.handler();
        assert!(rec.updates.iter().all(|dt| *dt == 0.1));
        assert_eq!(rec.renders.len(), 2);
        assert!((rec.renders[0] - 0.5).abs() < 1e-9);
        assert!((rec.renders[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_render_once_per_wake() {
        let mut lp = FixedTimestep::new(Recorder::default(), 30.0);
        lp.start(0.0);
        let wakes = [0.001, 0.002, 0.1, 0.1, 0.35, 0.36, 2.0];
        for now in wakes {
            lp.wake(now);
        }
        let rec = lp.handler();
        assert_eq!(rec.renders.len(), wakes.len());
        assert!(rec.renders.iter().all(|a| (0.0..1.0).contains(a)));
    }

    #[test]
    fn test_stall_is_clamped() {
        let mut lp = FixedTimestep::new(Recorder::default(), 60.0);
        lp.start(0.0);
        let steps = lp.wake(30.0);
        assert_eq!(steps, 15, "0.25s of catch-up at 60 Hz");
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut lp = FixedTimestep::new(Recorder::default(), 10.0);
        lp.start(0.0);
        lp.wake(0.1);
        lp.start(100.0); // ignored while running
        assert_eq!(lp.wake(0.2), 1);

        lp.stop();
        lp.stop();
        assert!(!lp.is_running());
        assert_eq!(lp.wake(1.0), 0);
    }

    #[test]
    fn test_closure_pair_handler() {
        let mut updates = 0;
        let mut last_alpha = -1.0;
        {
            let mut lp = FixedTimestep::new((|_dt: f64| updates += 1, |a: f64| last_alpha = a), 4.0)
                .with_max_frame_time(2.0);
            lp.start(0.0);
            lp.wake(1.1);
        }
        assert_eq!(updates, 4);
        assert!((last_alpha - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(1.0);
        let other = clock.clone();
        clock.advance(0.5);
        assert_eq!(other.now(), 1.5);
        other.set(3.0);
        assert_eq!(clock.now(), 3.0);
    }
}

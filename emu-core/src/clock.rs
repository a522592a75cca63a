use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Every canonical machine cycle goes through one `tick` call. The CPU
/// itself never ticks for an opcode fetch; the memory access that performs
/// the fetch does.
pub trait Clock {
    /// Advance the cycle counter by one, pacing against wall time if the
    /// implementation does that.
    fn tick(&mut self);

    /// Zero the counter and rebase any wall-time bookkeeping.
    fn reset(&mut self);

    fn current_cycle(&self) -> u64;

    fn frequency(&self) -> u64 {
        0
    }

    /// Cycles where the pacing deadline was already past when `tick` ran.
    fn lost_cycles(&self) -> u64 {
        0
    }

    /// Seconds since the last `reset`.
    fn time(&self) -> f64 {
        0.0
    }
}

pub type SharedClock = Rc<RefCell<dyn Clock>>;

#[derive(Debug, Error)]
#[error("clock frequency {frequency} Hz is above the supported maximum {max} Hz")]
pub struct ClockFrequencyError {
    pub frequency: u64,
    pub max: u64,
}

/// Free-running cycle counter. `time` is derived from the cycle count when a
/// nominal frequency is known, so device models that sample `time` still see
/// it advance.
#[derive(Debug, Default)]
pub struct SimpleClock {
    current_cycle: u64,
    frequency: u64,
}

impl SimpleClock {
    pub fn new() -> SimpleClock {
        SimpleClock::default()
    }

    pub fn with_frequency(frequency: u64) -> SimpleClock {
        SimpleClock {
            current_cycle: 0,
            frequency,
        }
    }
}

impl Clock for SimpleClock {
    fn tick(&mut self) {
        self.current_cycle += 1;
    }

    fn reset(&mut self) {
        self.current_cycle = 0;
    }

    fn current_cycle(&self) -> u64 {
        self.current_cycle
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn time(&self) -> f64 {
        if self.frequency == 0 {
            return 0.0;
        }
        self.current_cycle as f64 / self.frequency as f64
    }
}

/// Wall-clock paced cycle counter. `tick` busy-waits until the next cycle
/// deadline; sleeping is not precise enough near 1 MHz.
pub struct SteadyClock {
    frequency: u64,
    tick: Duration,
    current_cycle: u64,
    lost_cycles: u64,
    start_time: Instant,
    next_cycle: Instant,
}

impl SteadyClock {
    pub const MAX_FREQUENCY: u64 = 100_000_000;
    const NANOS_PER_SECOND: u64 = 1_000_000_000;

    pub fn new(frequency: u64) -> Result<SteadyClock, ClockFrequencyError> {
        if frequency == 0 || frequency > Self::MAX_FREQUENCY {
            return Err(ClockFrequencyError {
                frequency,
                max: Self::MAX_FREQUENCY,
            });
        }
        let tick = Duration::from_nanos(Self::NANOS_PER_SECOND / frequency);
        let start_time = Instant::now();
        Ok(SteadyClock {
            frequency,
            tick,
            current_cycle: 0,
            lost_cycles: 0,
            start_time,
            next_cycle: start_time + tick,
        })
    }
}

impl Clock for SteadyClock {
    fn tick(&mut self) {
        self.current_cycle += 1;

        if Instant::now() > self.next_cycle {
            // Already past the deadline, don't make things worse by waiting.
            self.next_cycle += self.tick;
            self.lost_cycles += 1;
            return;
        }

        while self.next_cycle > Instant::now() {
            std::hint::spin_loop();
        }

        self.next_cycle += self.tick;
    }

    fn reset(&mut self) {
        self.current_cycle = 0;
        self.start_time = Instant::now();
        self.next_cycle = self.start_time + self.tick;
    }

    fn current_cycle(&self) -> u64 {
        self.current_cycle
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn lost_cycles(&self) -> u64 {
        self.lost_cycles
    }

    fn time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

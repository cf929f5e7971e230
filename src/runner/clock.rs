use std::time::Instant;

/// 当前时间（秒），用于记录入队时刻和检测数据流停止
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// 进程启动后的单调时间
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// 手动推进的时钟
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualClock(parking_lot::Mutex<f64>);

#[cfg(test)]
impl ManualClock {
    pub fn set(&self, now: f64) {
        *self.0.lock() = now;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.0.lock()
    }
}

#[test]
fn monotonic_clock_advances() {
    let clock = MonotonicClock::new();
    let a = clock.now();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(clock.now() > a);
}

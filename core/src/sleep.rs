/*
 * sleep.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a terminal email client.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Wall-clock watchdog. A laptop resuming from sleep has stale TCP
//! connections; a jump in elapsed wall time beyond twice the tick interval
//! fires the wake-up callback so the engine can exit IDLE and reconnect.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::info;

pub struct SleepDetector {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SleepDetector {
    /// Start the watchdog. `on_wake` runs on the watchdog thread whenever a
    /// wall-clock jump greater than twice `interval` is seen.
    pub fn start(interval: Duration, on_wake: impl Fn() + Send + 'static) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_thread = stop.clone();
        let handle = thread::Builder::new()
            .name("sleep-detector".to_string())
            .spawn(move || {
                let threshold = interval * 2;
                let (lock, condvar) = &*stop_thread;
                let mut last_tick = SystemTime::now();
                loop {
                    let stopped = lock.lock().unwrap();
                    let (stopped, _) = condvar.wait_timeout(stopped, interval).unwrap();
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    let now = SystemTime::now();
                    if let Ok(elapsed) = now.duration_since(last_tick) {
                        if elapsed > threshold {
                            info!(
                                elapsed_secs = elapsed.as_secs(),
                                "wall clock jump, firing wake-up"
                            );
                            on_wake();
                        }
                    }
                    last_tick = now;
                }
            })
            .expect("spawn sleep detector thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        {
            let (lock, condvar) = &*self.stop;
            *lock.lock().unwrap() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SleepDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn no_fire_without_jump() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = fired.clone();
        let mut det = SleepDetector::start(Duration::from_millis(20), move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        det.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_is_prompt_and_idempotent() {
        let mut det = SleepDetector::start(Duration::from_secs(3600), || {});
        let started = std::time::Instant::now();
        det.stop();
        det.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

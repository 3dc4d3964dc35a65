/*
 * status.rs
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

//! Thread-safe summary of engine state: a flag word plus per-flag progress.
//! Producers apply diff updates; observers get exactly one callback per
//! observable change and must only signal a redraw, never do work.

use std::collections::HashMap;
use std::sync::Mutex;

pub mod flags {
    pub const CONNECTING: u32 = 1 << 0;
    pub const CONNECTED: u32 = 1 << 1;
    pub const DISCONNECTING: u32 = 1 << 2;
    pub const IDLE: u32 = 1 << 3;
    pub const FETCHING: u32 = 1 << 4;
    pub const SENDING: u32 = 1 << 5;
    pub const PREFETCHING: u32 = 1 << 6;
    pub const SEARCHING: u32 = 1 << 7;
    pub const INDEXING: u32 = 1 << 8;
    pub const EXITING: u32 = 1 << 9;
}

/// Diff-encoded update from a producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusUpdate {
    pub set_flags: u32,
    pub clear_flags: u32,
    /// Progress percentage for one flag (e.g. FETCHING), 0.0..=100.0.
    pub progress: Option<(u32, f32)>,
}

impl StatusUpdate {
    pub fn set(flags: u32) -> Self {
        Self {
            set_flags: flags,
            ..Self::default()
        }
    }

    pub fn clear(flags: u32) -> Self {
        Self {
            clear_flags: flags,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, flag: u32, percent: f32) -> Self {
        self.progress = Some((flag, percent));
        self
    }
}

/// Snapshot handed to observers.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub flags: u32,
    pub progress: HashMap<u32, f32>,
}

impl StatusSnapshot {
    pub fn is_set(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

type Observer = Box<dyn Fn(&StatusSnapshot) + Send + Sync>;

#[derive(Default)]
pub struct StatusAggregator {
    state: Mutex<StatusSnapshot>,
    observers: Mutex<Vec<Observer>>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Called synchronously under the update boundary;
    /// keep it to enqueueing a redraw signal.
    pub fn observe(&self, observer: impl Fn(&StatusSnapshot) + Send + Sync + 'static) {
        self.observers.lock().unwrap().push(Box::new(observer));
    }

    /// Apply a diff. Observers fire only when the visible state changed.
    pub fn apply(&self, update: StatusUpdate) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let new_flags = (state.flags | update.set_flags) & !update.clear_flags;
            let mut changed = new_flags != state.flags;
            state.flags = new_flags;
            if let Some((flag, percent)) = update.progress {
                let prev = state.progress.insert(flag, percent);
                if prev != Some(percent) {
                    changed = true;
                }
            }
            // progress for a cleared flag is dropped
            if update.clear_flags != 0 {
                state.progress.retain(|flag, _| new_flags & flag != 0);
            }
            if !changed {
                return;
            }
            state.clone()
        };
        for observer in self.observers.lock().unwrap().iter() {
            observer(&snapshot);
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn is_set(&self, flag: u32) -> bool {
        self.state.lock().unwrap().is_set(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn set_and_clear() {
        let agg = StatusAggregator::new();
        agg.apply(StatusUpdate::set(flags::CONNECTING));
        assert!(agg.is_set(flags::CONNECTING));
        agg.apply(StatusUpdate {
            set_flags: flags::CONNECTED,
            clear_flags: flags::CONNECTING,
            progress: None,
        });
        assert!(agg.is_set(flags::CONNECTED));
        assert!(!agg.is_set(flags::CONNECTING));
    }

    #[test]
    fn one_event_per_transition() {
        let agg = StatusAggregator::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = count.clone();
        agg.observe(move |_| {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });
        agg.apply(StatusUpdate::set(flags::CONNECTED));
        agg.apply(StatusUpdate::set(flags::CONNECTED));
        agg.apply(StatusUpdate::set(flags::CONNECTED));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        agg.apply(StatusUpdate::clear(flags::CONNECTED));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn progress_tracked_per_flag() {
        let agg = StatusAggregator::new();
        agg.apply(StatusUpdate::set(flags::FETCHING).with_progress(flags::FETCHING, 25.0));
        assert_eq!(
            agg.snapshot().progress.get(&flags::FETCHING).copied(),
            Some(25.0)
        );
        // clearing the flag drops its progress
        agg.apply(StatusUpdate::clear(flags::FETCHING));
        assert!(agg.snapshot().progress.is_empty());
    }
}

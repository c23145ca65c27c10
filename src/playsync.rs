// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A cancel handle is shared between an output device's threads and whoever owns the
/// output. It's the threads' responsibility to respect a cancel request.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(false)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Blocks until the handle is cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            self.condvar.wait(&mut cancelled);
        }
    }

    /// Blocks until the handle is cancelled or the timeout elapses. Returns true if
    /// cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            let _ = self.condvar.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }

    /// Cancels and wakes every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

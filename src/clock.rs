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

/// The clock notes are scheduled against. Time is in seconds and only moves forward
/// while audio is being rendered, so it is unaffected by timer jitter.
pub trait AudioClock: Send + Sync {
    /// The current audio time in seconds.
    fn now(&self) -> f64;
}

/// A clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    bits: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: f64) -> ManualClock {
        ManualClock {
            bits: std::sync::atomic::AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, time: f64) {
        self.bits
            .store(time.to_bits(), std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

#[cfg(test)]
impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(std::sync::atomic::Ordering::SeqCst))
    }
}

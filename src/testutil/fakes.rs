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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::samples::{DecodeError, DecodedSample, FetchError, SampleDecoder, SampleFetcher};

/// Frames produced by the fake fetcher and decoder for every sample, 100ms at 44.1kHz.
pub const FAKE_SAMPLE_FRAMES: usize = 4410;

/// A fetcher that counts calls and can be told to fail or stall.
pub struct FakeFetcher {
    calls: AtomicUsize,
    delay: Duration,
    pub fail: AtomicBool,
    pub empty: AtomicBool,
}

impl FakeFetcher {
    pub fn new() -> FakeFetcher {
        FakeFetcher::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> FakeFetcher {
        FakeFetcher {
            calls: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
            empty: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SampleFetcher for FakeFetcher {
    fn fetch(&self, _source: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Io(std::io::Error::other("network unreachable")));
        }
        if self.empty.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(vec![255u8; FAKE_SAMPLE_FRAMES])
    }
}

/// Turns each byte into one mono frame of `byte / 255`. Empty payloads don't decode.
pub struct FakeDecoder {}

impl SampleDecoder for FakeDecoder {
    fn decode(&self, bytes: Vec<u8>, _hint: Option<&str>) -> Result<DecodedSample, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Invalid("empty payload".to_string()));
        }
        Ok(DecodedSample::from_interleaved(
            bytes.iter().map(|b| *b as f32 / 255.0).collect(),
            1,
            44100,
        ))
    }
}

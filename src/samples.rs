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

//! Sample loading and caching.
//!
//! This module provides:
//! - Fetching sample bytes from a source reference
//! - Decoding to in-memory PCM at the output sample rate
//! - A bounded, deduplicating LRU cache of decoded samples
//! - Waveform summaries for display

mod cache;
mod decode;
mod fetch;
mod waveform;

pub use cache::{
    LoadResult, LoadState, SampleCache, SampleLoadError, SampleStatus, DEFAULT_MAX_CACHE_SIZE,
};
pub use decode::{transcode_samples, DecodeError, DecodedSample, SampleDecoder, SymphoniaDecoder};
pub use fetch::{extension_hint, FetchError, FileFetcher, SampleFetcher};
pub use waveform::{generate_waveform_data, DEFAULT_WAVEFORM_POINTS};

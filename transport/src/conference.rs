//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Audio mixing for conference calls. Every output (one per participant)
//! gets the sum of all inputs except the one that participant sends, so
//! nobody hears themselves.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::*;
use media_common::Instant;
use parking_lot::Mutex;
use thiserror::Error;

use crate::capture::CaptureError;

mod input_stream_desc;

pub use input_stream_desc::InputStreamDesc;

const BYTES_PER_SAMPLE: usize = 2;

#[derive(Error, Debug)]
pub enum MixerError {
    #[error("no data available")]
    NoData,
    #[error("input stream is not part of the mix")]
    UnknownInput,
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Set on buffers whose timestamp was taken from the local clock at capture.
pub const FLAG_SYSTEM_TIME: u32 = 1 << 7;

/// The unit of media handed between stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaBuffer {
    pub data: Vec<u8>,
    /// How much of `data` is valid.
    pub length: usize,
    pub sequence_number: u64,
    pub timestamp: Option<Instant>,
    pub flags: u32,
}

impl MediaBuffer {
    /// The valid bytes. A `length` past the end of `data` is cut short.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length.min(self.data.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Copies `bytes` in, reusing the allocation when it's big enough.
    pub fn set_data(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.length = bytes.len();
    }

    pub fn clear(&mut self) {
        self.length = 0;
    }
}

/// Something the mixer can pull audio from.
pub trait SourceStream: Send + Sync {
    /// Reads the next chunk of 16-bit little-endian PCM into `buffer`.
    fn read(&self, buffer: &mut MediaBuffer) -> Result<(), MixerError>;
}

/// One mixed output. Compared by identity.
#[derive(Debug)]
pub struct OutputDataSource {
    name: String,
}

impl OutputDataSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Where an input comes from. Immutable once the input is added.
#[derive(Debug)]
pub struct InputDataSourceDesc {
    pub name: String,
    /// The mix this input must not be part of, usually the output going back
    /// to the same participant.
    pub output_data_source: Option<Arc<OutputDataSource>>,
}

impl InputDataSourceDesc {
    pub fn new(name: impl Into<String>, output_data_source: Option<Arc<OutputDataSource>>) -> Self {
        Self {
            name: name.into(),
            output_data_source,
        }
    }
}

/// A finished mix for one output.
#[derive(Debug)]
pub struct Mix {
    pub output: Arc<OutputDataSource>,
    pub buffer: MediaBuffer,
    /// Number of inputs that made it into this mix.
    pub contributors: usize,
}

#[derive(Default)]
struct MixerState {
    outputs: Vec<Arc<OutputDataSource>>,
    inputs: Vec<InputStreamDesc>,
    next_sequence_number: u64,
}

#[derive(Default)]
pub struct AudioMixer {
    state: Mutex<MixerState>,
}

impl AudioMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&self, output: Arc<OutputDataSource>) {
        let mut state = self.state.lock();
        if !state.outputs.iter().any(|o| Arc::ptr_eq(o, &output)) {
            state.outputs.push(output);
        }
    }

    pub fn remove_output(&self, output: &Arc<OutputDataSource>) {
        self.state.lock().outputs.retain(|o| !Arc::ptr_eq(o, output));
    }

    pub fn add_input(&self, input: InputStreamDesc) {
        debug!("adding mixer input {}", input.input_data_source_desc().name);
        self.state.lock().inputs.push(input);
    }

    pub fn remove_input(
        &self,
        stream: &Arc<dyn SourceStream>,
    ) -> Result<InputStreamDesc, MixerError> {
        let mut state = self.state.lock();
        let index = state
            .inputs
            .iter()
            .position(|input| input_stream_desc::same_stream(input.input_stream(), stream))
            .ok_or(MixerError::UnknownInput)?;
        Ok(state.inputs.remove(index))
    }

    pub fn input_count(&self) -> usize {
        self.state.lock().inputs.len()
    }

    pub fn non_contributing_read_count(
        &self,
        stream: &Arc<dyn SourceStream>,
    ) -> Result<u64, MixerError> {
        self.state
            .lock()
            .inputs
            .iter()
            .find(|input| input_stream_desc::same_stream(input.input_stream(), stream))
            .map(InputStreamDesc::non_contributing_read_count)
            .ok_or(MixerError::UnknownInput)
    }

    /// Reads every input once and builds one mix per output.
    pub fn mix(&self) -> Vec<Mix> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let contributed: Vec<bool> = state.inputs.iter_mut().map(read_input).collect();

        let sequence_number = state.next_sequence_number;
        state.next_sequence_number += 1;
        let timestamp = Instant::now();

        state
            .outputs
            .iter()
            .map(|output| {
                let mut mixed: Vec<i16> = Vec::new();
                let mut contributors = 0;
                for (input, _) in state
                    .inputs
                    .iter()
                    .zip(&contributed)
                    .filter(|(input, contributed)| **contributed && !input.is_excluded_from(output))
                {
                    if let Some(buffer) = input.cached_buffer() {
                        add_samples(&mut mixed, buffer.as_slice());
                        contributors += 1;
                    }
                }

                let mut data = vec![0u8; mixed.len() * BYTES_PER_SAMPLE];
                LittleEndian::write_i16_into(&mixed, &mut data);
                Mix {
                    output: output.clone(),
                    buffer: MediaBuffer {
                        length: data.len(),
                        data,
                        sequence_number,
                        timestamp: Some(timestamp),
                        flags: 0,
                    },
                    contributors,
                }
            })
            .collect()
    }

    /// Lets go of every input's scratch buffer. Returns how many were freed.
    pub fn reclaim_scratch_buffers(&self) -> usize {
        let mut state = self.state.lock();
        let reclaimed = state
            .inputs
            .iter_mut()
            .filter_map(InputStreamDesc::reclaim_buffer)
            .count();
        trace!("reclaimed {} mixer scratch buffers", reclaimed);
        reclaimed
    }
}

// Returns whether the input had any samples to give.
fn read_input(input: &mut InputStreamDesc) -> bool {
    let stream = input.input_stream().clone();
    let contributed = match input.buffer(true) {
        Some(buffer) => {
            buffer.clear();
            match stream.read(buffer) {
                Ok(()) => buffer.as_slice().len() >= BYTES_PER_SAMPLE,
                Err(MixerError::NoData) => false,
                Err(err) => {
                    warn!(
                        "failed to read mixer input {}: {}",
                        input.input_data_source_desc().name,
                        err
                    );
                    false
                }
            }
        }
        None => false,
    };
    if !contributed {
        input.increment_non_contributing_read_count();
    }
    contributed
}

fn add_samples(mixed: &mut Vec<i16>, pcm: &[u8]) {
    let count = pcm.len() / BYTES_PER_SAMPLE;
    if mixed.len() < count {
        mixed.resize(count, 0);
    }
    for (i, sample) in mixed.iter_mut().take(count).enumerate() {
        let addend = LittleEndian::read_i16(&pcm[i * BYTES_PER_SAMPLE..]);
        *sample = sample.saturating_add(addend);
    }
}

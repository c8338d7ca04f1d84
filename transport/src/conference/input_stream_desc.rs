//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::sync::Arc;

use super::{InputDataSourceDesc, MediaBuffer, OutputDataSource, SourceStream};

/// What the mixer keeps per input stream: where the stream came from, which
/// mix it must stay out of, and a scratch buffer to read it into.
///
/// The scratch buffer is a cache. [`InputStreamDesc::reclaim_buffer`] may throw
/// it away between mixer ticks, and [`InputStreamDesc::buffer`] makes a new one
/// on demand.
pub struct InputStreamDesc {
    input_data_source_desc: Arc<InputDataSourceDesc>,
    input_stream: Arc<dyn SourceStream>,
    buffer: Option<MediaBuffer>,
    non_contributing_read_count: u64,
}

impl InputStreamDesc {
    pub fn new(
        input_stream: Arc<dyn SourceStream>,
        input_data_source_desc: Arc<InputDataSourceDesc>,
    ) -> Self {
        Self {
            input_data_source_desc,
            input_stream,
            buffer: None,
            non_contributing_read_count: 0,
        }
    }

    /// The scratch buffer, made fresh if there isn't one and `create` is set.
    pub fn buffer(&mut self, create: bool) -> Option<&mut MediaBuffer> {
        if create && self.buffer.is_none() {
            self.buffer = Some(MediaBuffer::default());
        }
        self.buffer.as_mut()
    }

    pub fn cached_buffer(&self) -> Option<&MediaBuffer> {
        self.buffer.as_ref()
    }

    pub fn set_buffer(&mut self, buffer: Option<MediaBuffer>) {
        self.buffer = buffer;
    }

    /// Drops the scratch buffer to free its memory, handing it back if there
    /// was one.
    pub fn reclaim_buffer(&mut self) -> Option<MediaBuffer> {
        self.buffer.take()
    }

    pub fn input_stream(&self) -> &Arc<dyn SourceStream> {
        &self.input_stream
    }

    /// A buffer sized and stamped for one stream is never reused for another,
    /// so switching to a different stream drops it.
    pub fn set_input_stream(&mut self, input_stream: Arc<dyn SourceStream>) {
        if !same_stream(&self.input_stream, &input_stream) {
            self.input_stream = input_stream;
            self.buffer = None;
        }
    }

    pub fn input_data_source_desc(&self) -> &Arc<InputDataSourceDesc> {
        &self.input_data_source_desc
    }

    /// The mix this input must not contribute to.
    pub fn output_data_source(&self) -> Option<&Arc<OutputDataSource>> {
        self.input_data_source_desc.output_data_source.as_ref()
    }

    pub fn is_excluded_from(&self, output: &Arc<OutputDataSource>) -> bool {
        self.output_data_source()
            .map_or(false, |excluded| Arc::ptr_eq(excluded, output))
    }

    pub fn non_contributing_read_count(&self) -> u64 {
        self.non_contributing_read_count
    }

    pub fn increment_non_contributing_read_count(&mut self) {
        self.non_contributing_read_count += 1;
    }
}

// Compares the data pointers only; the same stream can have different vtables
// when it's coerced in different codegen units.
pub(super) fn same_stream(a: &Arc<dyn SourceStream>, b: &Arc<dyn SourceStream>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

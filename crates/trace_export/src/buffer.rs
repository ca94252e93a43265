//! Payload accumulators.
//!
//! [`AppendBuffer`] is the transactional byte store both exporters write
//! into: take a [`Mark`] before a tentative write, then either keep the
//! bytes or [`rollback`](AppendBuffer::rollback) to the mark.
//!
//! [`Buffer`] is the network-path accumulator contract and
//! [`MsgpackBuffer`] its MessagePack implementation.

use crate::error::{DropReason, EncodingError};
use crate::span::Span;
use std::io;

/// Hard ceiling for one collector request body (9.5 MiB).
pub const PAYLOAD_MAX_SIZE: usize = 9_961_472;

/// Rollback point inside an [`AppendBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

impl Mark {
    /// Byte offset this mark points at
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Growable byte buffer with mark/rollback.
#[derive(Debug, Default, Clone)]
pub struct AppendBuffer {
    bytes: Vec<u8>,
}

impl AppendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Records the current length as a rollback point.
    pub fn mark(&self) -> Mark {
        Mark(self.bytes.len())
    }

    /// Discards everything written after `mark`.
    pub fn rollback(&mut self, mark: Mark) {
        debug_assert!(
            mark.0 <= self.bytes.len(),
            "rollback mark {} is past the end of a {} byte buffer",
            mark.0,
            self.bytes.len()
        );
        self.bytes.truncate(mark.0);
    }

    /// Number of bytes written since `mark`.
    pub fn written_since(&self, mark: Mark) -> usize {
        self.bytes.len() - mark.0
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl io::Write for AppendBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A finished network payload, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: Vec<u8>,
    trace_count: usize,
}

impl Payload {
    pub fn new(body: Vec<u8>, trace_count: usize) -> Self {
        Self { body, trace_count }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Number of traces encoded in the body
    pub fn trace_count(&self) -> usize {
        self.trace_count
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_count == 0
    }
}

/// Accumulator for the network path.
///
/// `Default` must produce an empty buffer; the push exporter swaps in a
/// default value when it detaches a batch for delivery.
///
/// A failed [`push`](Buffer::push) must leave size, count and contents
/// exactly as they were before the call.
pub trait Buffer: Default + Send + 'static {
    /// Appends one trace.
    fn push(&mut self, trace: &[Span]) -> Result<(), EncodingError>;

    /// Encoded size in bytes, as it would be sent.
    fn size(&self) -> usize;

    /// Number of traces appended so far
    fn trace_count(&self) -> usize;

    /// Seals the buffer into a payload.
    fn finish(self) -> Payload;
}

/// MessagePack payload: an array of traces, each an array of span maps.
///
/// Traces are encoded as they arrive; the outer array header is only written
/// by [`finish`](Buffer::finish) once the final count is known.
#[derive(Debug, Default)]
pub struct MsgpackBuffer {
    traces: AppendBuffer,
    count: usize,
}

impl MsgpackBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Buffer for MsgpackBuffer {
    fn push(&mut self, trace: &[Span]) -> Result<(), EncodingError> {
        let mark = self.traces.mark();
        if let Err(e) = rmp_serde::encode::write_named(&mut self.traces, trace) {
            self.traces.rollback(mark);
            return Err(EncodingError::new(DropReason::EncodingError, e));
        }

        let encoded = self.traces.written_since(mark);
        if encoded > PAYLOAD_MAX_SIZE {
            self.traces.rollback(mark);
            return Err(EncodingError::too_large(encoded, PAYLOAD_MAX_SIZE));
        }

        self.count += 1;
        Ok(())
    }

    fn size(&self) -> usize {
        array_header_len(self.count) + self.traces.len()
    }

    fn trace_count(&self) -> usize {
        self.count
    }

    fn finish(self) -> Payload {
        let mut body = Vec::with_capacity(self.size());
        write_array_header(&mut body, self.count);
        body.extend_from_slice(self.traces.as_bytes());
        Payload::new(body, self.count)
    }
}

fn array_header_len(len: usize) -> usize {
    match len {
        0..=15 => 1,
        16..=0xffff => 3,
        _ => 5,
    }
}

fn write_array_header(out: &mut Vec<u8>, len: usize) {
    match len {
        0..=15 => out.push(0x90 | len as u8),
        16..=0xffff => {
            out.push(0xdc);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(0xdd);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

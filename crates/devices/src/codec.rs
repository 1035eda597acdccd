//! Binary frame codec for the data socket.
//!
//! The data stream carries no delimiters: every frame is `channel_count`
//! little-endian IEEE-754 floats back to back, so frame boundaries are purely
//! positional. TCP may split or merge frames arbitrarily, which is why
//! [`FrameReader`] keeps accumulating until a whole frame is buffered.

use std::io::{ErrorKind, Read};

use biosig_types::Frame;
use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::error::{is_timeout, DeviceError};

/// Width of one sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Number of bytes occupied by one frame of `channel_count` samples.
pub fn frame_size(channel_count: usize) -> usize {
    channel_count * BYTES_PER_SAMPLE
}

/// Decode one frame already held in memory.
pub fn decode_frame(bytes: &[u8], channel_count: usize) -> Result<Vec<f32>, DeviceError> {
    if bytes.len() != frame_size(channel_count) {
        return Err(DeviceError::Protocol(format!(
            "frame of {} channels needs {} bytes, got {}",
            channel_count,
            frame_size(channel_count),
            bytes.len()
        )));
    }
    let mut values = vec![0.0f32; channel_count];
    LittleEndian::read_f32_into(bytes, &mut values);
    Ok(values)
}

/// Anything the acquisition worker can pull frames from.
pub trait FrameSource: Send {
    /// Block until one full frame is available.
    ///
    /// `DeviceError::ReadTimeout` means no complete frame arrived before the
    /// read deadline; the caller may simply call again.
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;
}

/// Accumulating frame decoder over a byte source.
pub struct FrameReader<R> {
    inner: R,
    channel_count: usize,
    buf: Vec<u8>,
    filled: usize,
    /// Bytes to drop before the first frame boundary
    skip: usize,
    next_sequence: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, channel_count: usize) -> Self {
        Self {
            inner,
            channel_count,
            buf: vec![0u8; frame_size(channel_count)],
            filled: 0,
            skip: 0,
            next_sequence: 0,
        }
    }

    /// A reader joining a continuous stream of which `offset` bytes have
    /// already been consumed. Bytes up to the next frame boundary are skipped.
    pub fn resuming(inner: R, channel_count: usize, offset: u64) -> Self {
        let mut reader = Self::new(inner, channel_count);
        let size = reader.buf.len() as u64;
        if size > 0 {
            reader.skip = ((size - offset % size) % size) as usize;
        }
        reader
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes of the next frame received so far.
    pub fn pending_bytes(&self) -> usize {
        self.filled
    }

    /// Read exactly one frame.
    ///
    /// A partial frame is kept across a read timeout, so the next call resumes
    /// the same frame instead of losing alignment with the stream.
    pub fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.channel_count == 0 {
            return Err(DeviceError::Protocol(
                "cannot decode frames with zero channels".to_string(),
            ));
        }

        while self.skip > 0 {
            let n = self.skip.min(self.buf.len());
            match self.inner.read(&mut self.buf[..n]) {
                Ok(0) => {
                    return Err(DeviceError::ShortRead {
                        expected: self.buf.len(),
                        received: 0,
                    })
                }
                Ok(n) => self.skip -= n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(DeviceError::ReadTimeout(format!(
                        "frame boundary ({} bytes to skip)",
                        self.skip
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }

        while self.filled < self.buf.len() {
            match self.inner.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    return Err(DeviceError::ShortRead {
                        expected: self.buf.len(),
                        received: self.filled,
                    })
                }
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(DeviceError::ReadTimeout(format!(
                        "frame data ({} of {} bytes received)",
                        self.filled,
                        self.buf.len()
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.filled = 0;

        let values = decode_frame(&self.buf, self.channel_count)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!("Decoded frame {} ({} channels)", sequence, self.channel_count);
        Ok(Frame::new(sequence, values))
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> FrameSource for FrameReader<R> {
    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        self.read_frame()
    }
}

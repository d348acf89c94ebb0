// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Fixed-size frame assembly for analysis.
//!
//! Decoded PCM arrives from the gateway in arbitrarily sized chunks. The
//! [`FrameBuffer`] accumulates those bytes and hands back complete analysis
//! frames, retaining any partial remainder for the next extraction. No frame
//! is ever emitted partially.

/// Accumulates raw bytes and cuts them into fixed-size frames.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_size: usize,
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Create a buffer producing frames of `frame_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `frame_size` is zero.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be non-zero");
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size * 4),
        }
    }

    /// Append raw bytes to the internal buffer.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract every complete frame currently buffered.
    ///
    /// Consumes exactly `floor(buffered / frame_size)` frames and retains the
    /// remainder. The returned iterator is lazy and finite.
    pub fn extract_frames(&mut self) -> ExtractedFrames {
        let complete = self.buffer.len() / self.frame_size * self.frame_size;
        let remainder = self.buffer.split_off(complete);
        let bytes = std::mem::replace(&mut self.buffer, remainder);
        ExtractedFrames {
            bytes,
            frame_size: self.frame_size,
            offset: 0,
        }
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes currently buffered (complete frames plus remainder).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Iterator over the complete frames drained from a [`FrameBuffer`].
#[derive(Debug)]
pub struct ExtractedFrames {
    bytes: Vec<u8>,
    frame_size: usize,
    offset: usize,
}

impl Iterator for ExtractedFrames {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.offset + self.frame_size > self.bytes.len() {
            return None;
        }
        let frame = self.bytes[self.offset..self.offset + self.frame_size].to_vec();
        self.offset += self.frame_size;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.bytes.len() - self.offset) / self.frame_size;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ExtractedFrames {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_partial_frames() {
        let mut fb = FrameBuffer::new(4);
        fb.add_data(&[1, 2, 3]);
        assert_eq!(fb.extract_frames().count(), 0);
        assert_eq!(fb.len(), 3);
    }

    #[test]
    fn extracts_complete_frames_and_keeps_remainder() {
        let mut fb = FrameBuffer::new(4);
        fb.add_data(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        let frames: Vec<Vec<u8>> = fb.extract_frames().collect();
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(fb.len(), 2);

        // Remainder completes with the next chunk.
        fb.add_data(&[11, 12]);
        let frames: Vec<Vec<u8>> = fb.extract_frames().collect();
        assert_eq!(frames, vec![vec![9, 10, 11, 12]]);
        assert!(fb.is_empty());
    }

    #[test]
    fn extraction_count_is_floor_of_buffered() {
        let mut fb = FrameBuffer::new(3);
        fb.add_data(&[0; 11]);
        let mut iter = fb.extract_frames();
        assert_eq!(iter.len(), 3);
        assert_eq!(iter.by_ref().count(), 3);
        assert_eq!(fb.len(), 2);
    }

    #[test]
    fn clear_discards_everything() {
        let mut fb = FrameBuffer::new(4);
        fb.add_data(&[1, 2, 3, 4, 5]);
        fb.clear();
        assert!(fb.is_empty());
        assert_eq!(fb.extract_frames().count(), 0);
    }

    #[test]
    #[should_panic(expected = "frame_size")]
    fn zero_frame_size_panics() {
        FrameBuffer::new(0);
    }
}

//! The synthetic payload sent by every transfer strategy
// (c) 2024 Ross Younger

use std::io::IoSlice;

use crate::error::AllocationError;

/// Number of segments in every [`SyntheticMessage`]
pub const SEGMENT_COUNT: usize = 8;

/// Segment `i` is filled with `FIRST_FILL + i`.
pub const FIRST_FILL: u8 = b'A';

static_assertions::const_assert!(SEGMENT_COUNT <= (u8::MAX - FIRST_FILL) as usize);

/// The fill byte for a given segment
#[must_use]
#[allow(clippy::cast_possible_truncation)] // bounded by SEGMENT_COUNT, see assertion above
pub fn fill_byte(segment: usize) -> u8 {
    FIRST_FILL + (segment % SEGMENT_COUNT) as u8
}

/// The lengths of the segments making up a payload of `total` bytes.
///
/// Segments 0 to 6 are `total / 8` bytes long; the last segment absorbs the remainder.
#[must_use]
pub fn segment_lengths(total: usize) -> [usize; SEGMENT_COUNT] {
    let base = total / SEGMENT_COUNT;
    let mut lengths = [base; SEGMENT_COUNT];
    lengths[SEGMENT_COUNT - 1] = total - base * (SEGMENT_COUNT - 1);
    lengths
}

/// Which segment the byte at `offset` of a `total`-byte payload belongs to.
///
/// Offsets past the end are attributed to the last segment.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // the quotient is clamped to SEGMENT_COUNT
pub fn segment_index(total: u64, offset: u64) -> usize {
    let base = total / SEGMENT_COUNT as u64;
    if base == 0 {
        return SEGMENT_COUNT - 1;
    }
    (offset / base).min(SEGMENT_COUNT as u64 - 1) as usize
}

/// The byte value found at `offset` within a `total`-byte payload
#[must_use]
pub fn expected_byte(total: u64, offset: u64) -> u8 {
    fill_byte(segment_index(total, offset))
}

/// A payload made up of [`SEGMENT_COUNT`] independently allocated segments.
///
/// The message is exclusively owned by the connection that built it.
/// Its buffers are released by [`release`](Self::release) or on drop.
#[derive(Debug, Default)]
pub struct SyntheticMessage {
    /// Empty once released
    segments: Vec<Vec<u8>>,
}

impl SyntheticMessage {
    /// Builds a message of exactly `total_size` bytes.
    ///
    /// Construction is all-or-nothing. If any segment cannot be allocated, the segments
    /// already built are released before the error is returned.
    pub fn build(total_size: u64) -> Result<Self, AllocationError> {
        let total =
            usize::try_from(total_size).map_err(|_| AllocationError::Unaddressable(total_size))?;
        let mut segments = Vec::with_capacity(SEGMENT_COUNT);
        for (index, len) in segment_lengths(total).into_iter().enumerate() {
            let mut segment = Vec::new();
            // On failure `segments` is dropped here, releasing everything built so far.
            segment
                .try_reserve_exact(len)
                .map_err(|source| AllocationError::Segment {
                    segment: index,
                    len,
                    source,
                })?;
            segment.resize(len, fill_byte(index));
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Releases every segment buffer.
    ///
    /// Idempotent: calling this on an already released message does nothing.
    pub fn release(&mut self) {
        drop(std::mem::take(&mut self.segments));
    }

    /// Total payload length in bytes (0 once released)
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Read-only view of the segments, in order
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        self.segments.iter().map(Vec::as_slice)
    }

    /// Copies the segments, in order and without gaps, to the start of `dest`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Panics
    /// If `dest` is shorter than [`total_len`](Self::total_len).
    pub fn flatten_into(&self, dest: &mut [u8]) -> usize {
        let mut offset = 0;
        for segment in &self.segments {
            dest[offset..offset + segment.len()].copy_from_slice(segment);
            offset += segment.len();
        }
        offset
    }

    /// Borrows the segments as a gather list for vectored sends.
    ///
    /// The list cannot outlive the message it points into.
    #[must_use]
    pub fn gather(&self) -> GatherList<'_> {
        GatherList {
            slices: std::array::from_fn(|i| {
                IoSlice::new(self.segments.get(i).map_or(&[][..], Vec::as_slice))
            }),
        }
    }
}

/// Exactly [`SEGMENT_COUNT`] non-owning descriptors into a [`SyntheticMessage`]
#[derive(Debug, Clone, Copy)]
pub struct GatherList<'msg> {
    slices: [IoSlice<'msg>; SEGMENT_COUNT],
}

impl<'msg> GatherList<'msg> {
    /// A fresh copy of the descriptors, suitable for advancing past a partial send
    #[must_use]
    pub fn slices(&self) -> [IoSlice<'msg>; SEGMENT_COUNT] {
        self.slices
    }
}

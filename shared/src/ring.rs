//! # Circular Frame Buffers
//!
//! This module provides the two single-producer single-consumer rings that
//! move raw 802.11 frames between the processors.
//!
//! ## Design
//!
//! 1. **Arena plus cursors**: the storage is a fixed halfword arena
//!    ([HalfwordMemory]); the cursors live in the shared state and each one
//!    is stored by exactly one side.
//!
//! 2. **Halfword granularity**: the hardware window only supports halfword
//!    access, so all cursors are halfword indices and odd trailing bytes are
//!    handled explicitly.
//!
//! 3. **No length prefix**: the length of each frame comes from the fixed
//!    hardware header in front of it.
//!
//! ## Cursor Layout
//!
//! ```text
//! ┌──────────┬───────────────────────┬──────────────────────────┐
//! │   free   │  unconsumed (queued)  │           free           │
//! └──────────┴───────────────────────┴──────────────────────────┘
//!            ▲                       ▲
//!       consumer cursor         producer cursor
//! ```
//!
//! One halfword always stays free so that equal cursors mean "empty".
//!
//! | ring | producer (cursor)      | consumer (cursor)      |
//! |------|------------------------|------------------------|
//! | TX   | host (`tx_out`)        | controller (`tx_in`)   |
//! | RX   | controller (`rx_out`)  | host (`rx_in`)         |

use core::sync::atomic::{AtomicU16, Ordering};

use crate::ieee::{RxHeader, TxHeader, FCS_SIZE, RX_HEADER_SIZE, RX_LENGTH_OFFSET, TX_HEADER_SIZE};
use crate::traits::HalfwordMemory;

/// TX arena size in bytes.
pub const TX_BUFFER_SIZE: usize = 24 * 1024;
/// RX arena size in bytes.
pub const RX_BUFFER_SIZE: usize = 12 * 1024;

pub const TX_HALFWORDS: usize = TX_BUFFER_SIZE / 2;
pub const RX_HALFWORDS: usize = RX_BUFFER_SIZE / 2;

/// The producer tried to use space that still holds unconsumed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingFull;

impl core::fmt::Display for RingFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ring buffer full")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RingFull {}

/// Fixed-size halfword arena, shareable between processors.
pub struct RingArena<const N: usize> {
    cells: [AtomicU16; N],
}

impl<const N: usize> RingArena<N> {
    pub const fn new() -> Self {
        Self {
            cells: [const { AtomicU16::new(0) }; N],
        }
    }
}

impl<const N: usize> Default for RingArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HalfwordMemory for RingArena<N> {
    fn halfwords(&self) -> usize {
        N
    }

    fn read_halfword(&self, index: usize) -> u16 {
        self.cells[index].load(Ordering::Relaxed)
    }

    fn write_halfword(&self, index: usize, value: u16) {
        self.cells[index].store(value, Ordering::Relaxed)
    }
}

/// Cursor arithmetic for a ring of `halfwords` entries.
///
/// Every wraparound goes through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    halfwords: usize,
}

impl Geometry {
    pub const fn new(halfwords: usize) -> Self {
        assert!(halfwords > 1 && halfwords <= u16::MAX as usize + 1);
        Self { halfwords }
    }

    pub const fn halfwords(&self) -> usize {
        self.halfwords
    }

    /// Usable bytes: the arena minus the halfword that separates full from
    /// empty.
    pub const fn capacity(&self) -> usize {
        (self.halfwords - 1) * 2
    }

    /// Halfwords needed to hold `bytes`, rounded up.
    pub const fn halfwords_for(bytes: usize) -> usize {
        (bytes + 1) / 2
    }

    /// Move `cursor` forward by `bytes` (rounded up to a halfword).
    pub fn advance(&self, cursor: u16, bytes: usize) -> u16 {
        ((cursor as usize + Self::halfwords_for(bytes)) % self.halfwords) as u16
    }

    /// Halfwords from `from` forward to `to`.
    pub fn distance(&self, from: u16, to: u16) -> usize {
        (to as usize + self.halfwords - from as usize) % self.halfwords
    }
}

/// Arena plus the two cursors of one ring, seen from one side.
struct Ring<'a, M: ?Sized> {
    mem: &'a M,
    geometry: Geometry,
    /// Cursor stored by this side.
    own: &'a AtomicU16,
    /// Cursor stored by the other side; only ever loaded here.
    peer: &'a AtomicU16,
}

impl<'a, M: HalfwordMemory + ?Sized> Ring<'a, M> {
    fn new(mem: &'a M, own: &'a AtomicU16, peer: &'a AtomicU16) -> Self {
        Self {
            mem,
            geometry: Geometry::new(mem.halfwords()),
            own,
            peer,
        }
    }

    fn own(&self) -> u16 {
        self.own.load(Ordering::Relaxed)
    }

    fn peer(&self) -> u16 {
        self.peer.load(Ordering::Relaxed)
    }

    fn index(&self, at: u16, halfword: usize) -> usize {
        (at as usize + halfword) % self.geometry.halfwords()
    }

    /// Bytes between the consumer and producer cursors.
    fn queued(&self, consumer: u16, producer: u16) -> usize {
        self.geometry.distance(consumer, producer) * 2
    }

    fn copy_in(&self, at: u16, data: &[u8]) {
        for (i, chunk) in data.chunks(2).enumerate() {
            let value = match *chunk {
                [lo, hi] => u16::from_le_bytes([lo, hi]),
                [lo] => lo as u16,
                _ => unreachable!(),
            };
            self.mem.write_halfword(self.index(at, i), value);
        }
    }

    fn copy_out(&self, at: u16, dest: &mut [u8]) {
        let even = dest.len() & !1;
        for i in 0..even / 2 {
            let [lo, hi] = self.mem.read_halfword(self.index(at, i)).to_le_bytes();
            dest[2 * i] = lo;
            dest[2 * i + 1] = hi;
        }
        if dest.len() & 1 != 0 {
            // The last byte lives in the low half of the trailing halfword.
            let [lo, _] = self.mem.read_halfword(self.index(at, even / 2)).to_le_bytes();
            dest[even] = lo;
        }
    }
}

/// Host-side producer of the TX ring.
pub struct TxRing<'a, M: ?Sized> {
    ring: Ring<'a, M>,
}

impl<'a, M: HalfwordMemory + ?Sized> TxRing<'a, M> {
    pub(crate) fn new(mem: &'a M, tx_out: &'a AtomicU16, tx_in: &'a AtomicU16) -> Self {
        Self {
            ring: Ring::new(mem, tx_out, tx_in),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.ring.geometry
    }

    /// Current producer cursor (next writable halfword).
    pub fn cursor(&self) -> u16 {
        self.ring.own()
    }

    pub fn bytes_available(&self) -> usize {
        let used = self.ring.queued(self.ring.peer(), self.ring.own());
        self.ring.geometry.capacity() - used
    }

    /// Copy `data` to halfword `offset` without committing it.
    ///
    /// `offset` may be the producer cursor or any position inside the free
    /// region after it, which allows assembling a frame from several parts.
    pub fn write(&self, offset: u16, data: &[u8]) -> Result<(), RingFull> {
        let offset = (offset as usize % self.ring.geometry.halfwords()) as u16;
        let skip = self.ring.geometry.distance(self.cursor(), offset) * 2;
        let needed = Geometry::halfwords_for(data.len()) * 2;
        if skip + needed > self.bytes_available() {
            return Err(RingFull);
        }
        self.ring.copy_in(offset, data);
        Ok(())
    }

    /// Commit `bytes` (rounded up to a halfword) to the consumer.
    pub fn advance(&self, bytes: usize) -> Result<(), RingFull> {
        if Geometry::halfwords_for(bytes) * 2 > self.bytes_available() {
            return Err(RingFull);
        }
        let next = self.ring.geometry.advance(self.cursor(), bytes);
        self.ring.own.store(next, Ordering::Relaxed);
        Ok(())
    }
}

/// Controller-side consumer of the TX ring.
pub struct TxDrain<'a, M: ?Sized> {
    ring: Ring<'a, M>,
}

impl<'a, M: HalfwordMemory + ?Sized> TxDrain<'a, M> {
    pub(crate) fn new(mem: &'a M, tx_in: &'a AtomicU16, tx_out: &'a AtomicU16) -> Self {
        Self {
            ring: Ring::new(mem, tx_in, tx_out),
        }
    }

    pub fn pending(&self) -> bool {
        self.ring.own() != self.ring.peer()
    }

    pub fn queued_bytes(&self) -> usize {
        self.ring.queued(self.ring.own(), self.ring.peer())
    }

    /// Hardware header of the oldest queued frame.
    pub fn peek_header(&self) -> Option<TxHeader> {
        if self.queued_bytes() < TX_HEADER_SIZE {
            return None;
        }
        let mut raw = [0u8; TX_HEADER_SIZE];
        self.ring.copy_out(self.ring.own(), &mut raw);
        TxHeader::decode(&raw)
    }

    /// Bytes a queued frame occupies in the ring (TX header and IEEE frame,
    /// without the FCS the MAC appends).
    pub fn frame_span(header: &TxHeader) -> usize {
        TX_HEADER_SIZE + (header.length as usize).saturating_sub(FCS_SIZE)
    }

    /// Copy the oldest queued frame into `buf`. Returns its span, or `None`
    /// when the header is inconsistent with the queued bytes or `buf` is too
    /// small.
    pub fn read_frame(&self, buf: &mut [u8]) -> Option<usize> {
        let header = self.peek_header()?;
        let span = Self::frame_span(&header);
        if span > self.queued_bytes() || span > buf.len() {
            return None;
        }
        self.ring.copy_out(self.ring.own(), &mut buf[..span]);
        Some(span)
    }

    /// Release `bytes` (rounded up) back to the producer.
    pub fn advance(&self, bytes: usize) {
        let bytes = bytes.min(self.queued_bytes());
        let next = self.ring.geometry.advance(self.ring.own(), bytes);
        self.ring.own.store(next, Ordering::Relaxed);
    }

    /// Drop everything queued.
    pub fn discard_all(&self) {
        self.ring.own.store(self.ring.peer(), Ordering::Relaxed);
    }
}

/// Length of a received frame, as stored in its hardware RX header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameLength(pub u16);

impl FrameLength {
    pub fn bytes(self) -> usize {
        self.0 as usize
    }

    /// Ring bytes used by the frame: RX header plus the frame padded to a
    /// word.
    pub fn span(self) -> usize {
        RX_HEADER_SIZE + ((self.bytes() + 3) & !3)
    }
}

/// Controller-side producer of the RX ring.
pub struct RxFill<'a, M: ?Sized> {
    ring: Ring<'a, M>,
}

impl<'a, M: HalfwordMemory + ?Sized> RxFill<'a, M> {
    pub(crate) fn new(mem: &'a M, rx_out: &'a AtomicU16, rx_in: &'a AtomicU16) -> Self {
        Self {
            ring: Ring::new(mem, rx_out, rx_in),
        }
    }

    pub fn bytes_available(&self) -> usize {
        let used = self.ring.queued(self.ring.peer(), self.ring.own());
        self.ring.geometry.capacity() - used
    }

    /// Append one received frame behind its hardware header.
    pub fn push(&self, rate_quality: u16, frame: &[u8]) -> Result<(), RingFull> {
        let length = u16::try_from(frame.len()).map_err(|_| RingFull)?;
        let span = FrameLength(length).span();
        if span > self.bytes_available() {
            return Err(RingFull);
        }
        let at = self.ring.own();
        let header = RxHeader {
            length,
            rate_quality,
        };
        self.ring.copy_in(at, &header.encode());
        self.ring.copy_in(self.ring.geometry.advance(at, RX_HEADER_SIZE), frame);
        self.ring
            .own
            .store(self.ring.geometry.advance(at, span), Ordering::Relaxed);
        Ok(())
    }
}

/// Host-side consumer of the RX ring.
pub struct RxRing<'a, M: ?Sized> {
    ring: Ring<'a, M>,
}

impl<'a, M: HalfwordMemory + ?Sized> RxRing<'a, M> {
    pub(crate) fn new(mem: &'a M, rx_in: &'a AtomicU16, rx_out: &'a AtomicU16) -> Self {
        Self {
            ring: Ring::new(mem, rx_in, rx_out),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.ring.own() != self.ring.peer()
    }

    /// Consumer cursor: position of the next frame's RX header.
    pub fn cursor(&self) -> u16 {
        self.ring.own()
    }

    /// Position `bytes` after `at`, wrapped.
    pub fn offset(&self, at: u16, bytes: usize) -> u16 {
        self.ring.geometry.advance(at, bytes)
    }

    /// Read the length from the RX header at `at` without consuming it.
    pub fn peek_header(&self, at: u16) -> FrameLength {
        let index = self.ring.index(at, RX_LENGTH_OFFSET / 2);
        FrameLength(self.ring.mem.read_halfword(index))
    }

    /// Copy `length` bytes starting at halfword `at` into `scratch`.
    /// Returns the number of bytes copied.
    pub fn read_into(&self, scratch: &mut [u8], at: u16, length: usize) -> usize {
        let n = length.min(scratch.len());
        self.ring.copy_out(at, &mut scratch[..n]);
        n
    }

    /// Consume the frame at the cursor.
    ///
    /// A length that runs past the producer means the header is corrupt;
    /// everything queued is dropped in that case.
    pub fn advance(&self, frame_len: FrameLength) {
        let queued = self.ring.queued(self.ring.own(), self.ring.peer());
        let next = if frame_len.span() > queued {
            self.ring.peer()
        } else {
            self.ring.geometry.advance(self.ring.own(), frame_len.span())
        };
        self.ring.own.store(next, Ordering::Relaxed);
    }
}

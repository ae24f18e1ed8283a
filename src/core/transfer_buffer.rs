//! # Shared Transfer Buffer
//!
//! One contiguous, fixed-capacity block shared by the orchestrator and the
//! compute backend. It carries one frame's glyph pixels to the backend and
//! the adjusted colours back. Nothing is copied through channels; the
//! flags word in the header is the only synchronisation between the two
//! sides.
//!
//! ## Layout
//!
//! All header fields are little-endian `u32`. Section offsets are 4-byte
//! aligned and sized from the declared pixel capacity. A capacity whose
//! total size does not fit a `u32` is rejected ([`Layout::checked`]).
//!
//! ```text
//! 0   magic "ESDT"        36  flags (atomic only)
//! 4   version (1)         40..64 reserved
//! 8   pixel count
//! 12  region count        [64..]  coords     u32 x, u32 y   per pixel
//! 16  coords offset               coverage   u8             per pixel
//! 20  coverage offset             region id  u16            per pixel
//! 24  region-id offset            colours    u8 x 3         per region (<= 256)
//! 28  colours offset              output     u8 x 3         per pixel
//! 32  output offset
//! ```
//!
//! ## Handshake
//!
//! ```text
//! populate -> 0 --submit--> READY --begin_compute--> IN_PROGRESS --complete--> COMPLETE
//!                                                                 \--fail-----> ERROR
//! ```
//!
//! The orchestrator clears the flags word last when populating; the backend
//! stores COMPLETE last after writing output. Both stores use `Release` and
//! every observer loads with `Acquire`, so section bytes written before a
//! flag change are visible to whoever sees the new flag. There is one writer
//! per phase: the orchestrator while nothing is in flight, the backend while
//! it holds the [`ComputeGuard`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use contrast_kernel::MAX_REGIONS;
use log::debug;
use memmap2::{MmapMut, MmapOptions};

use crate::error::{RemediationError, RemediationResult};

pub const HEADER_SIZE: usize = 64;
pub const MAGIC: u32 = u32::from_le_bytes(*b"ESDT");
pub const VERSION: u32 = 1;

pub const READY_FOR_COMPUTE: u32 = 0x01;
pub const COMPUTE_IN_PROGRESS: u32 = 0x02;
pub const COMPUTE_COMPLETE: u32 = 0x04;
pub const ERROR: u32 = 0x08;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_PIXEL_COUNT: usize = 8;
const OFF_REGION_COUNT: usize = 12;
const OFF_COORDS: usize = 16;
const OFF_COVERAGE: usize = 20;
const OFF_REGION_IDS: usize = 24;
const OFF_COLOURS: usize = 28;
const OFF_OUTPUT: usize = 32;
const OFF_FLAGS: usize = 36;

/// Value of the flags word. Exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransferState {
    Idle = 0,
    Ready = READY_FOR_COMPUTE,
    InProgress = COMPUTE_IN_PROGRESS,
    Complete = COMPUTE_COMPLETE,
    Error = ERROR,
}

impl TransferState {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Idle),
            READY_FOR_COMPUTE => Some(Self::Ready),
            COMPUTE_IN_PROGRESS => Some(Self::InProgress),
            COMPUTE_COMPLETE => Some(Self::Complete),
            ERROR => Some(Self::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Ready => "READY_FOR_COMPUTE",
            Self::InProgress => "COMPUTE_IN_PROGRESS",
            Self::Complete => "COMPUTE_COMPLETE",
            Self::Error => "ERROR",
        }
    }

    /// A computation has been handed to the backend and not yet finished.
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Ready | Self::InProgress)
    }
}

/// Byte offsets of every section for a given pixel capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub pixel_capacity: usize,
    pub region_capacity: usize,
    pub coords: usize,
    pub coverage: usize,
    pub region_ids: usize,
    pub colours: usize,
    pub output: usize,
    pub total: usize,
}

impl Layout {
    /// Section offsets for `pixel_capacity`, or `None` when the mapping would
    /// outgrow the u32 offset fields of the header.
    fn try_new(pixel_capacity: usize) -> Option<Self> {
        let region_capacity = MAX_REGIONS;
        let section = |start: usize, items: usize, size: usize| -> Option<usize> {
            let end = items.checked_mul(size)?.checked_add(start)?;
            end.checked_add(3).map(|n| n & !3)
        };
        let coords = HEADER_SIZE;
        let coverage = section(coords, pixel_capacity, 8)?;
        let region_ids = section(coverage, pixel_capacity, 1)?;
        let colours = section(region_ids, pixel_capacity, 2)?;
        let output = section(colours, region_capacity, 3)?;
        let total = section(output, pixel_capacity, 3)?;
        u32::try_from(total).ok()?;
        Some(Self {
            pixel_capacity,
            region_capacity,
            coords,
            coverage,
            region_ids,
            colours,
            output,
            total,
        })
    }

    /// Layout for `pixel_capacity`. Every section offset and the total size
    /// must be expressible as a u32 header field.
    pub fn checked(pixel_capacity: usize) -> RemediationResult<Self> {
        if pixel_capacity == 0 {
            return Err(RemediationError::validation(
                "pixel_capacity",
                "must be greater than 0",
                "0",
            ));
        }
        Self::try_new(pixel_capacity).ok_or_else(|| {
            RemediationError::validation(
                "pixel_capacity",
                format!(
                    "must be at most {} so section offsets fit the u32 header",
                    Self::max_pixel_capacity()
                ),
                pixel_capacity.to_string(),
            )
        })
    }

    /// Largest capacity whose layout fits the header.
    pub fn max_pixel_capacity() -> usize {
        let (mut lo, mut hi) = (1usize, u32::MAX as usize);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if Self::try_new(mid).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHeader {
    pub magic: u32,
    pub version: u32,
    pub pixel_count: u32,
    pub region_count: u32,
    pub coords_offset: u32,
    pub coverage_offset: u32,
    pub region_ids_offset: u32,
    pub colours_offset: u32,
    pub output_offset: u32,
    pub flags: u32,
}

/// Fixed-capacity shared block. Share it as `Arc<TransferBuffer>`.
#[derive(Debug)]
pub struct TransferBuffer {
    /// Keeps the mapping alive; all access goes through `base`.
    _map: MmapMut,
    base: *mut u8,
    layout: Layout,
}

// SAFETY: `base` points into `_map`, which lives as long as `self` and never
// moves. Section bytes are only written by the side that owns the current
// handshake state (orchestrator while not in flight, backend while
// IN_PROGRESS through its `ComputeGuard`), and ownership changes hands only
// through Release/Acquire operations on the flags word.
unsafe impl Send for TransferBuffer {}
unsafe impl Sync for TransferBuffer {}

impl TransferBuffer {
    /// Allocate a buffer for up to `pixel_capacity` glyph pixels.
    pub fn new(pixel_capacity: usize) -> RemediationResult<Self> {
        let layout = Layout::checked(pixel_capacity)?;
        let mut map = MmapOptions::new()
            .len(layout.total)
            .map_anon()
            .map_err(|e| RemediationError::io("map transfer buffer", e))?;
        let base = map.as_mut_ptr();

        let buffer = Self {
            _map: map,
            base,
            layout,
        };
        buffer.write_u32(OFF_MAGIC, MAGIC);
        buffer.write_u32(OFF_VERSION, VERSION);
        buffer.write_u32(OFF_PIXEL_COUNT, 0);
        buffer.write_u32(OFF_REGION_COUNT, 0);
        buffer.write_u32(OFF_COORDS, layout.coords as u32);
        buffer.write_u32(OFF_COVERAGE, layout.coverage as u32);
        buffer.write_u32(OFF_REGION_IDS, layout.region_ids as u32);
        buffer.write_u32(OFF_COLOURS, layout.colours as u32);
        buffer.write_u32(OFF_OUTPUT, layout.output as u32);
        buffer.flags().store(0, Ordering::Release);

        debug!(
            "transfer buffer: {} pixels, {} bytes",
            pixel_capacity, layout.total
        );
        Ok(buffer)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn pixel_capacity(&self) -> usize {
        self.layout.pixel_capacity
    }

    pub fn region_capacity(&self) -> usize {
        self.layout.region_capacity
    }

    pub fn size_bytes(&self) -> usize {
        self.layout.total
    }

    #[inline]
    fn flags(&self) -> &AtomicU32 {
        // SAFETY: offset 36 is inside the header and 4-byte aligned (the
        // mapping is page aligned). The word is never accessed non-atomically.
        unsafe { &*(self.base.add(OFF_FLAGS) as *const AtomicU32) }
    }

    /// Current handshake state. Unknown bit patterns read as `Error`.
    pub fn state(&self) -> TransferState {
        TransferState::from_bits(self.flags().load(Ordering::Acquire)).unwrap_or(TransferState::Error)
    }

    pub fn header(&self) -> BufferHeader {
        BufferHeader {
            magic: self.read_u32(OFF_MAGIC),
            version: self.read_u32(OFF_VERSION),
            pixel_count: self.read_u32(OFF_PIXEL_COUNT),
            region_count: self.read_u32(OFF_REGION_COUNT),
            coords_offset: self.read_u32(OFF_COORDS),
            coverage_offset: self.read_u32(OFF_COVERAGE),
            region_ids_offset: self.read_u32(OFF_REGION_IDS),
            colours_offset: self.read_u32(OFF_COLOURS),
            output_offset: self.read_u32(OFF_OUTPUT),
            flags: self.flags().load(Ordering::Acquire),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.read_u32(OFF_PIXEL_COUNT) as usize
    }

    pub fn region_count(&self) -> usize {
        self.read_u32(OFF_REGION_COUNT) as usize
    }

    /// Write one frame's inputs and clear the flags word.
    ///
    /// Capacity is checked before any byte is written, so an overflowing
    /// call leaves the previous contents intact.
    pub fn populate(
        &self,
        coords: &[(u32, u32)],
        coverage: &[u8],
        region_ids: &[u16],
        colours: &[[u8; 3]],
    ) -> RemediationResult<()> {
        let state = self.state();
        if state.in_flight() {
            return Err(RemediationError::state(
                state.name(),
                "populate",
                "a computation is in flight",
            ));
        }
        if coords.len() > self.layout.pixel_capacity {
            return Err(RemediationError::capacity_overflow(
                "pixel capacity",
                coords.len(),
                self.layout.pixel_capacity,
            ));
        }
        if colours.len() > self.layout.region_capacity {
            return Err(RemediationError::capacity_overflow(
                "region capacity",
                colours.len(),
                self.layout.region_capacity,
            ));
        }
        for (what, len) in [("coverage", coverage.len()), ("region_ids", region_ids.len())] {
            if len != coords.len() {
                return Err(RemediationError::validation(
                    what,
                    format!("length must equal pixel count {}", coords.len()),
                    len.to_string(),
                ));
            }
        }
        if let Some(bad) = region_ids.iter().find(|&&r| r as usize >= colours.len()) {
            return Err(RemediationError::validation(
                "region_ids",
                format!("must be below region count {}", colours.len()),
                bad.to_string(),
            ));
        }

        self.write_u32(OFF_PIXEL_COUNT, coords.len() as u32);
        self.write_u32(OFF_REGION_COUNT, colours.len() as u32);

        let mut bytes = Vec::with_capacity(coords.len() * 8);
        for &(x, y) in coords {
            bytes.extend_from_slice(&x.to_le_bytes());
            bytes.extend_from_slice(&y.to_le_bytes());
        }
        self.write_bytes(self.layout.coords, &bytes);

        self.write_bytes(self.layout.coverage, coverage);

        bytes.clear();
        for &r in region_ids {
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        self.write_bytes(self.layout.region_ids, &bytes);

        bytes.clear();
        for c in colours {
            bytes.extend_from_slice(c);
        }
        self.write_bytes(self.layout.colours, &bytes);

        self.flags().store(0, Ordering::Release);
        Ok(())
    }

    /// Hand the populated frame to the backend.
    pub fn submit(&self) -> RemediationResult<()> {
        self.transition(TransferState::Idle, TransferState::Ready, "submit")
    }

    /// Backend side: take the submitted frame.
    pub fn begin_compute(self: &Arc<Self>) -> RemediationResult<ComputeGuard> {
        self.transition(TransferState::Ready, TransferState::InProgress, "begin_compute")?;
        Ok(ComputeGuard {
            buffer: Arc::clone(self),
            finished: false,
        })
    }

    /// Poll the flags word until COMPLETE or ERROR, or until `timeout`.
    ///
    /// Timeout means the computation may still be running; ERROR means it
    /// finished and failed.
    pub async fn wait_for_completion(&self, timeout: Duration, poll: Duration) -> RemediationResult<()> {
        let start = tokio::time::Instant::now();
        loop {
            match self.state() {
                TransferState::Complete => return Ok(()),
                TransferState::Error => {
                    return Err(RemediationError::compute_failed(
                        "transfer buffer",
                        "backend raised the ERROR flag",
                    ));
                }
                TransferState::Idle => {
                    return Err(RemediationError::state(
                        "IDLE",
                        "wait_for_completion",
                        "nothing was submitted",
                    ));
                }
                TransferState::Ready | TransferState::InProgress => {}
            }
            if start.elapsed() >= timeout {
                return Err(RemediationError::timeout(
                    "wait_for_completion",
                    timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Adjusted colours, one per populated pixel. Only valid after COMPLETE.
    pub fn read_output(&self) -> RemediationResult<Vec<[u8; 3]>> {
        let state = self.state();
        if state != TransferState::Complete {
            return Err(RemediationError::state(
                state.name(),
                "read_output",
                "output is only readable after COMPUTE_COMPLETE",
            ));
        }
        Ok(self.read_rgb(self.layout.output, self.pixel_count()))
    }

    pub fn read_coords(&self) -> Vec<(u32, u32)> {
        self.read_bytes(self.layout.coords, self.pixel_count() * 8)
            .chunks_exact(8)
            .map(|c| {
                (
                    u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                    u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect()
    }

    pub fn read_coverage(&self) -> Vec<u8> {
        self.read_bytes(self.layout.coverage, self.pixel_count())
    }

    pub fn read_region_ids(&self) -> Vec<u16> {
        self.read_bytes(self.layout.region_ids, self.pixel_count() * 2)
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    pub fn read_colours(&self) -> Vec<[u8; 3]> {
        self.read_rgb(self.layout.colours, self.region_count())
    }

    /// Zero the counts and return to IDLE. Capacity is kept.
    pub fn reset(&self) -> RemediationResult<()> {
        let state = self.state();
        if state.in_flight() {
            return Err(RemediationError::state(
                state.name(),
                "reset",
                "a computation is in flight",
            ));
        }
        self.write_u32(OFF_PIXEL_COUNT, 0);
        self.write_u32(OFF_REGION_COUNT, 0);
        self.flags().store(0, Ordering::Release);
        Ok(())
    }

    fn transition(&self, from: TransferState, to: TransferState, op: &str) -> RemediationResult<()> {
        self.flags()
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                let current = TransferState::from_bits(actual).map_or("UNKNOWN", TransferState::name);
                RemediationError::state(current, op, format!("expected {}", from.name()))
            })
    }

    fn read_rgb(&self, offset: usize, count: usize) -> Vec<[u8; 3]> {
        self.read_bytes(offset, count * 3)
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.layout.total);
        let mut out = vec![0u8; len];
        // SAFETY: range checked above; the writer of this section is not
        // active under the handshake rules.
        unsafe { std::ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), len) };
        out
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.layout.total);
        // SAFETY: range checked above; the caller owns this section under
        // the handshake rules.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset), bytes.len()) };
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let b = self.read_bytes(offset, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }
}

/// Backend access to a buffer in COMPUTE_IN_PROGRESS.
///
/// Dropping the guard without calling [`complete`](Self::complete) raises
/// the ERROR flag, so a panicking backend never leaves the orchestrator
/// waiting for its timeout.
#[derive(Debug)]
pub struct ComputeGuard {
    buffer: Arc<TransferBuffer>,
    finished: bool,
}

impl ComputeGuard {
    pub fn pixel_count(&self) -> usize {
        self.buffer.pixel_count()
    }

    pub fn region_count(&self) -> usize {
        self.buffer.region_count()
    }

    pub fn coords(&self) -> Vec<(u32, u32)> {
        self.buffer.read_coords()
    }

    pub fn coverage(&self) -> Vec<u8> {
        self.buffer.read_coverage()
    }

    pub fn region_ids(&self) -> Vec<u16> {
        self.buffer.read_region_ids()
    }

    pub fn colours(&self) -> Vec<[u8; 3]> {
        self.buffer.read_colours()
    }

    pub fn write_output(&mut self, colours: &[[u8; 3]]) -> RemediationResult<()> {
        let expected = self.pixel_count();
        if colours.len() != expected {
            return Err(RemediationError::validation(
                "output",
                format!("length must equal pixel count {}", expected),
                colours.len().to_string(),
            ));
        }
        let bytes: Vec<u8> = colours.iter().flatten().copied().collect();
        self.buffer.write_bytes(self.buffer.layout.output, &bytes);
        Ok(())
    }

    /// Publish the output. COMPLETE is the last store of the backend.
    pub fn complete(mut self) {
        self.finished = true;
        self.buffer
            .flags()
            .store(TransferState::Complete as u32, Ordering::Release);
    }

    pub fn fail(mut self, reason: &str) {
        debug!("compute failed: {}", reason);
        self.finished = true;
        self.buffer
            .flags()
            .store(TransferState::Error as u32, Ordering::Release);
    }
}

impl Drop for ComputeGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.buffer
                .flags()
                .store(TransferState::Error as u32, Ordering::Release);
        }
    }
}

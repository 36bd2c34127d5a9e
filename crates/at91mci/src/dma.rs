//! Single-buffer DMA mapping for the PDC channels, and the bounce buffer
//! staging that write transfers go through.
//!
//! The PDC has no scatter/gather: one pointer, one word count per direction.
//! Reads land directly in the caller's buffer. Writes are always staged in
//! the controller-owned bounce buffer because the caller's buffer may
//! straddle discontiguous pages, some controllers need the words
//! byte-swapped, and MCI1 rev2xx parts mis-handle writes under 12 bytes.

use crate::error::DmaError;
use std::ptr::NonNull;
use tracing::{trace, warn};

/// Direction of a mapped transfer, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Card → memory
    FromDevice,
    /// Memory → card
    ToDevice,
}

/// Cache maintenance points around a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    PreRead,
    PreWrite,
    PostRead,
    PostWrite,
}

/// Platform DMA engine: turns a CPU buffer into a bus address the PDC can use
pub trait BusDma: Send {
    /// Map `len` bytes at `buf` and return the bus address of the first byte.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes of `len` bytes and must not
    /// be accessed through any other path until the matching [`BusDma::unload`].
    unsafe fn load(
        &mut self,
        buf: NonNull<u8>,
        len: usize,
        dir: DmaDirection,
    ) -> Result<u32, DmaError>;

    fn sync(&mut self, op: SyncOp);

    /// Release the current mapping
    fn unload(&mut self);
}

/// Identity-mapped engine for 32-bit targets where CPU and bus addresses
/// coincide and the PDC is cache coherent with the buffers handed to it
#[derive(Debug, Default)]
pub struct IdentityDma;

impl BusDma for IdentityDma {
    unsafe fn load(
        &mut self,
        buf: NonNull<u8>,
        len: usize,
        _dir: DmaDirection,
    ) -> Result<u32, DmaError> {
        let addr = u32::try_from(buf.as_ptr() as usize).map_err(|_| DmaError::Exhausted)?;
        if addr.checked_add(len as u32).is_none() {
            return Err(DmaError::TooLarge {
                len,
                max: (u32::MAX - addr) as usize,
            });
        }
        Ok(addr)
    }

    fn sync(&mut self, _op: SyncOp) {}

    fn unload(&mut self) {}
}

/// The controller's one reusable mapping, with load/unload balance tracking
#[derive(Debug)]
pub(crate) struct DmaMap<D> {
    engine: D,
    mapped: u32,
}

impl<D: BusDma> DmaMap<D> {
    pub(crate) fn new(engine: D) -> Self {
        Self { engine, mapped: 0 }
    }

    /// Outstanding loads; 0 or 1
    pub(crate) fn mapped(&self) -> u32 {
        self.mapped
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.mapped > 0
    }

    /// Map `buf`; the caller keeps the memory untouched until [`Self::unload`]
    pub(crate) fn load(&mut self, buf: &mut [u8], dir: DmaDirection) -> Result<u32, DmaError> {
        if self.is_mapped() {
            return Err(DmaError::AlreadyMapped);
        }
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling());
        // SAFETY: `buf` lives in the in-flight request or the controller's
        // bounce buffer, neither of which is touched until unload
        let addr = unsafe { self.engine.load(ptr, buf.len(), dir)? };
        self.mapped += 1;
        trace!("DMA load: {} bytes at bus {:#X} ({:?})", buf.len(), addr, dir);
        Ok(addr)
    }

    pub(crate) fn sync(&mut self, op: SyncOp) {
        self.engine.sync(op);
    }

    pub(crate) fn unload(&mut self) {
        if !self.is_mapped() {
            warn!("DMA unload without an active mapping");
            return;
        }
        self.engine.unload();
        self.mapped -= 1;
        trace!("DMA unload");
    }

    pub(crate) fn into_inner(self) -> D {
        self.engine
    }
}

/// Reverse the byte order of every whole 32-bit word in `buf`
pub fn swap_words(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
}

/// Copy a write payload into `bounce` and return the DMA length to program.
///
/// With `pad_short`, payloads under `min_len` bytes are zero-padded to
/// exactly `min_len`. With `byteswap`, whole words are reversed on the way in.
pub fn stage_write(
    bounce: &mut [u8],
    src: &[u8],
    pad_short: bool,
    min_len: usize,
    byteswap: bool,
) -> Result<usize, DmaError> {
    let dma_len = if pad_short && src.len() < min_len {
        min_len
    } else {
        src.len()
    };
    if dma_len > bounce.len() {
        return Err(DmaError::TooLarge {
            len: dma_len,
            max: bounce.len(),
        });
    }

    let staged = &mut bounce[..dma_len];
    staged[..src.len()].copy_from_slice(src);
    staged[src.len()..].fill(0);
    if byteswap {
        swap_words(&mut staged[..src.len()]);
    }
    Ok(dma_len)
}

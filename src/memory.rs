//! Read-only access to foreign memory
//!
//! The object graph lives in kernel memory that this crate has no way to map
//! by itself. Callers inject a [`MemoryReader`]; decoders copy what they need
//! into a local buffer in one read and then parse it through [`ByteView`].

use crate::error::{RmError, RmResult};
use bytes::Buf;
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Source of foreign memory
#[cfg_attr(test, mockall::automock)]
pub trait MemoryReader {
    /// Fill `buf` with the bytes starting at `address`
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> RmResult<()>;
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> RmResult<()> {
        (**self).read_bytes(address, buf)
    }
}

/// Read `len` bytes into a fresh buffer
pub fn read_vec<M: MemoryReader + ?Sized>(mem: &M, address: u64, len: usize) -> RmResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    mem.read_bytes(address, &mut buf)?;
    Ok(buf)
}

/// Read a native-endian 64-bit pointer
pub fn read_pointer<M: MemoryReader + ?Sized>(mem: &M, address: u64) -> RmResult<u64> {
    let mut buf = [0u8; 8];
    mem.read_bytes(address, &mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Bounds-checked typed accessor over a captured byte buffer
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    /// Wrap a buffer
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Underlying bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Buffer length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Sub-view of `len` bytes at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> RmResult<ByteView<'a>> {
        self.span(offset, len).map(ByteView::new)
    }

    fn span(&self, offset: usize, width: usize) -> RmResult<&'a [u8]> {
        offset
            .checked_add(width)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(RmError::OutOfBounds {
                offset,
                width,
                len: self.bytes.len(),
            })
    }

    /// `u32` at `offset`
    pub fn read_u32(&self, offset: usize) -> RmResult<u32> {
        Ok(self.span(offset, 4)?.get_u32_ne())
    }

    /// `i32` at `offset`
    pub fn read_i32(&self, offset: usize) -> RmResult<i32> {
        Ok(self.span(offset, 4)?.get_i32_ne())
    }

    /// `u64` at `offset`
    pub fn read_u64(&self, offset: usize) -> RmResult<u64> {
        Ok(self.span(offset, 8)?.get_u64_ne())
    }
}

/// Sparse set of captured memory regions keyed by start address
///
/// Used by tracers that copy driver memory out-of-band, and by tests.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl RegionMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a region starting at `address`
    pub fn insert(&mut self, address: u64, bytes: Vec<u8>) -> &mut Self {
        self.regions.insert(address, bytes);
        self
    }

    /// Overwrite bytes inside an existing region
    ///
    /// Returns `false` when no single region covers the range.
    pub fn write(&mut self, address: u64, bytes: &[u8]) -> bool {
        let Some((&start, region)) = self.regions.range_mut(..=address).next_back() else {
            return false;
        };
        let offset = (address - start) as usize;
        match region.get_mut(offset..offset + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the map holds no region
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl MemoryReader for RegionMap {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> RmResult<()> {
        let unmapped = |reason: &str| RmError::MemoryRead {
            address,
            len: buf.len(),
            reason: reason.to_string(),
        };
        let (&start, region) = self
            .regions
            .range(..=address)
            .next_back()
            .ok_or_else(|| unmapped("unmapped address"))?;
        let offset = (address - start) as usize;
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| region.get(offset..end))
            .ok_or_else(|| unmapped("read crosses the end of the captured region"))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Positional reads from a file or device node whose offsets map to addresses
///
/// `base` is the address stored at file offset 0, so a dump of kernel memory
/// taken at `0xffff_8880_0000_0000` can be read with the addresses found
/// inside it.
#[derive(Debug)]
pub struct FileMemory {
    file: File,
    base: u64,
}

impl FileMemory {
    /// Open `path` read-only
    pub fn open<P: AsRef<Path>>(path: P, base: u64) -> RmResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| RmError::opening(&path.display().to_string(), e))?;
        Ok(Self { file, base })
    }
}

impl MemoryReader for FileMemory {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> RmResult<()> {
        let offset = address.checked_sub(self.base).ok_or_else(|| RmError::MemoryRead {
            address,
            len: buf.len(),
            reason: format!("below mapping base 0x{:016x}", self.base),
        })?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| RmError::MemoryRead {
                address,
                len: buf.len(),
                reason: e.to_string(),
            })
    }
}

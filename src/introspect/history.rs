//! GSP RPC history ring decoding
//!
//! `OBJRPC.rpcHistory` is a fixed array of [`RPC_ENTRY_SIZE`]-byte slots
//! followed by `rpcHistoryCurrent`, the slot the driver writes next. Reading
//! `depth` slots from there with wrap-around yields the calls oldest first.
//! Timestamps are GSP clock ticks and are passed through untouched.

use crate::error::RmResult;
use crate::introspect::walker::RpcLocation;
use crate::memory::{read_vec, ByteView, MemoryReader};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Size of one `RpcHistoryEntry` slot
pub const RPC_ENTRY_SIZE: usize = 40;

/// One recorded RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcHistoryEntry {
    /// Ring slot the entry was read from
    pub slot: u32,
    /// RPC function number
    pub function: u32,
    /// Function-specific payload words
    pub data: [u64; 2],
    /// Tick at which the call was issued
    pub ts_start: u64,
    /// Tick at which the reply arrived; behind `ts_start` while in flight
    pub ts_end: u64,
}

impl RpcHistoryEntry {
    /// Ticks between issue and reply, `None` while the call is in flight
    pub fn duration(&self) -> Option<u64> {
        self.ts_end.checked_sub(self.ts_start)
    }

    /// Whether the reply has not been recorded yet
    pub fn in_flight(&self) -> bool {
        self.ts_end < self.ts_start
    }

    /// Symbolic name of the RPC function, when known
    pub fn function_name(&self) -> Option<&'static str> {
        rpc_function_name(self.function)
    }
}

/// Decoded ring contents from a single read pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBufferSnapshot {
    /// Populated entries, oldest first
    pub entries: Vec<RpcHistoryEntry>,
    /// Slot the driver will overwrite next, as read
    pub current_index: u32,
    /// Number of slots
    pub depth: u32,
    /// Wall-clock time of the capture
    pub captured_at: DateTime<Utc>,
}

impl RingBufferSnapshot {
    /// Entries issued inside the inclusive tick window `[start, end]`
    pub fn within(&self, start: u64, end: u64) -> Vec<RpcHistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.ts_start >= start && e.ts_start <= end)
            .copied()
            .collect()
    }

    /// Most recently issued entry
    pub fn latest(&self) -> Option<&RpcHistoryEntry> {
        self.entries.last()
    }
}

/// Bytes covering the ring and its trailing current-index counter
pub fn ring_len(depth: u32) -> usize {
    depth as usize * RPC_ENTRY_SIZE + 4
}

fn decode_entry(view: &ByteView<'_>, slot: u32) -> RmResult<RpcHistoryEntry> {
    let at = slot as usize * RPC_ENTRY_SIZE;
    Ok(RpcHistoryEntry {
        slot,
        function: view.read_u32(at)?,
        data: [view.read_u64(at + 8)?, view.read_u64(at + 16)?],
        ts_start: view.read_u64(at + 24)?,
        ts_end: view.read_u64(at + 32)?,
    })
}

/// Decode `depth` slots of `ring` in chronological order
///
/// Slots whose start tick is zero were never written and are skipped. A
/// `current_index` past the end is what a torn read of the counter looks
/// like; it is wrapped rather than rejected.
pub fn decode_history(ring: &[u8], depth: u32, current_index: u32) -> RmResult<Vec<RpcHistoryEntry>> {
    if depth == 0 {
        return Ok(Vec::new());
    }
    if current_index >= depth {
        warn!(
            "rpcHistoryCurrent {} outside ring of depth {}; wrapping",
            current_index, depth
        );
    }
    let view = ByteView::new(ring);
    let mut entries = Vec::with_capacity(depth as usize);
    for i in 0..depth {
        let slot = ((current_index % depth) + i) % depth;
        let entry = decode_entry(&view, slot)?;
        if entry.ts_start != 0 {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Capture and decode the ring at `location`
pub fn read_history<M: MemoryReader + ?Sized>(
    mem: &M,
    location: &RpcLocation,
) -> RmResult<RingBufferSnapshot> {
    let raw = read_vec(mem, location.history, ring_len(location.depth))?;
    let captured_at = Utc::now();
    let current_index =
        ByteView::new(&raw).read_u32(location.depth as usize * RPC_ENTRY_SIZE)?;
    let entries = decode_history(&raw, location.depth, current_index)?;
    Ok(RingBufferSnapshot {
        entries,
        current_index,
        depth: location.depth,
        captured_at,
    })
}

/// Name of a GSP RPC function number
pub fn rpc_function_name(function: u32) -> Option<&'static str> {
    let name = match function {
        0 => "NOP",
        1 => "SET_GUEST_SYSTEM_INFO",
        2 => "ALLOC_ROOT",
        3 => "ALLOC_DEVICE",
        4 => "ALLOC_MEMORY",
        9 => "ALLOC_OBJECT",
        10 => "FREE",
        11 => "LOG",
        19 => "ALLOC_SUBDEVICE",
        21 => "DUP_OBJECT",
        76 => "GSP_RM_CONTROL",
        103 => "GSP_RM_ALLOC",
        _ => return None,
    };
    Some(name)
}

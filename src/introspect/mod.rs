//! Read-only introspection of driver memory
//!
//! Nothing here issues ioctls. Every function works over a
//! [`MemoryReader`](crate::memory::MemoryReader) and the base address of the
//! driver's `OBJSYS`; how that address and the reader are obtained is up to
//! the caller.

pub mod history;
pub mod telemetry;
pub mod walker;

pub use history::{read_history, RingBufferSnapshot, RpcHistoryEntry};
pub use telemetry::{read_telemetry, TelemetryRegion, TemperatureReading, TemperatureSensor};
pub use walker::{find_gpu, resolve_rpc, resolve_telemetry, Miss, Resolution, RpcLocation};

use crate::error::RmResult;
use crate::memory::MemoryReader;
use crate::offsets::OffsetTable;

/// Resolve and capture GPU `gpu_instance`'s RPC history in one call
pub fn snapshot_history<M: MemoryReader + ?Sized>(
    mem: &M,
    root_base: u64,
    table: &OffsetTable,
    gpu_instance: u32,
) -> RmResult<Resolution<RingBufferSnapshot>> {
    Ok(match resolve_rpc(mem, root_base, table, gpu_instance)? {
        Resolution::Found(location) => Resolution::Found(read_history(mem, &location)?),
        Resolution::NotFound(miss) => Resolution::NotFound(miss),
    })
}

/// Resolve and decode GPU `gpu_instance`'s RUSD region in one call
pub fn snapshot_telemetry<M: MemoryReader + ?Sized>(
    mem: &M,
    root_base: u64,
    table: &OffsetTable,
    gpu_instance: u32,
) -> RmResult<Resolution<TelemetryRegion>> {
    Ok(match resolve_telemetry(mem, root_base, table, gpu_instance)? {
        Resolution::Found(region) => Resolution::Found(read_telemetry(mem, region, table)?),
        Resolution::NotFound(miss) => Resolution::NotFound(miss),
    })
}

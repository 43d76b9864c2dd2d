//! Pointer chase through the driver's object graph
//!
//! `OBJSYS -> OBJGPUMGR -> OBJGPU -> KernelGsp -> OBJRPC`, with every hop
//! taken through the active [`OffsetTable`]. The graph belongs to the driver
//! and changes underneath us, so any hop may legitimately be empty; that is a
//! [`Miss`], not an error. Only a failing memory read is an error.

use crate::error::{RmError, RmResult};
use crate::introspect::history::RPC_ENTRY_SIZE;
use crate::memory::{read_pointer, read_vec, ByteView, MemoryReader};
use crate::offsets::{Field, OffsetTable};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capacity of `OBJGPUMGR.gpuHandleIDList`
pub const GPU_HANDLE_SLOTS: usize = 32;
/// Stride of one `{OBJGPU *pGpu; NvU32 gpuInstance;}` slot
pub const GPU_HANDLE_STRIDE: usize = 16;

/// Where the walk stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Miss {
    /// `OBJSYS.pGpuMgr` is null
    NullGpuManager,
    /// No slot of the handle list holds this instance
    GpuInstanceAbsent(u32),
    /// `OBJGPU.pKernelGsp` is null (no GSP, or not initialized yet)
    NullKernelGsp,
    /// `KernelGsp.pRpc` is null
    NullRpc,
    /// The release has no known `OBJGPU.pUserSharedData`
    TelemetryUnsupported,
    /// `OBJGPU.pUserSharedData` is null (RUSD never allocated)
    NullSharedData,
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::NullGpuManager => write!(f, "{} is null", Field::SysGpuMgr),
            Miss::GpuInstanceAbsent(i) => write!(f, "GPU instance {} not registered", i),
            Miss::NullKernelGsp => write!(f, "{} is null", Field::GpuKernelGsp),
            Miss::NullRpc => write!(f, "{} is null", Field::KernelGspRpc),
            Miss::TelemetryUnsupported => write!(f, "{} unknown for this driver", Field::GpuUserSharedData),
            Miss::NullSharedData => write!(f, "{} is null", Field::GpuUserSharedData),
        }
    }
}

/// Outcome of a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution<T> {
    /// Every hop resolved
    Found(T),
    /// A hop was empty
    NotFound(Miss),
}

impl<T> Resolution<T> {
    /// Resolved value, if any
    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(value) => Some(value),
            Resolution::NotFound(_) => None,
        }
    }

    /// Whether every hop resolved
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Addresses of one GPU's RPC history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcLocation {
    /// `OBJGPU`
    pub gpu: u64,
    /// `KernelGsp`
    pub kernel_gsp: u64,
    /// `OBJRPC`
    pub rpc: u64,
    /// First slot of `OBJRPC.rpcHistory`
    pub history: u64,
    /// `OBJRPC.rpcHistoryCurrent`, right after the last slot
    pub current_index: u64,
    /// Number of slots
    pub depth: u32,
}

/// Whether a pointer read from the graph may be followed
///
/// Null, anything in the first page, and the all-ones poison value are not.
pub fn is_valid_pointer(pointer: u64) -> bool {
    pointer >= 0x1000 && pointer != u64::MAX
}

fn field_address(base: u64, offset: usize) -> RmResult<u64> {
    base.checked_add(offset as u64).ok_or(RmError::MemoryRead {
        address: base,
        len: offset,
        reason: "field address overflows".to_string(),
    })
}

/// Read the pointer stored at `base + offset`; `None` when it cannot be followed
fn follow<M: MemoryReader + ?Sized>(mem: &M, base: u64, offset: usize) -> RmResult<Option<u64>> {
    let pointer = read_pointer(mem, field_address(base, offset)?)?;
    trace!("0x{:016x}+{} -> 0x{:016x}", base, offset, pointer);
    Ok(Some(pointer).filter(|&p| is_valid_pointer(p)))
}

/// Find the `OBJGPU` registered for `gpu_instance`
///
/// The handle list is captured in one read; slots are scanned linearly since
/// the driver does not keep slot index and instance number in step.
pub fn find_gpu<M: MemoryReader + ?Sized>(
    mem: &M,
    root_base: u64,
    table: &OffsetTable,
    gpu_instance: u32,
) -> RmResult<Resolution<u64>> {
    let Some(gpu_mgr) = follow(mem, root_base, table.sys_gpu_mgr)? else {
        return Ok(Resolution::NotFound(Miss::NullGpuManager));
    };
    let list = read_vec(
        mem,
        field_address(gpu_mgr, table.gpu_mgr_handle_id_list)?,
        GPU_HANDLE_SLOTS * GPU_HANDLE_STRIDE,
    )?;
    let view = ByteView::new(&list);
    for slot in 0..GPU_HANDLE_SLOTS {
        let offset = slot * GPU_HANDLE_STRIDE;
        let gpu = view.read_u64(offset)?;
        let instance = view.read_u32(offset + 8)?;
        if instance == gpu_instance && is_valid_pointer(gpu) {
            trace!("GPU instance {} in slot {} at 0x{:016x}", instance, slot, gpu);
            return Ok(Resolution::Found(gpu));
        }
    }
    Ok(Resolution::NotFound(Miss::GpuInstanceAbsent(gpu_instance)))
}

/// Resolve the RPC history of GPU `gpu_instance`
pub fn resolve_rpc<M: MemoryReader + ?Sized>(
    mem: &M,
    root_base: u64,
    table: &OffsetTable,
    gpu_instance: u32,
) -> RmResult<Resolution<RpcLocation>> {
    let gpu = match find_gpu(mem, root_base, table, gpu_instance)? {
        Resolution::Found(gpu) => gpu,
        Resolution::NotFound(miss) => return Ok(Resolution::NotFound(miss)),
    };
    let Some(kernel_gsp) = follow(mem, gpu, table.gpu_kernel_gsp)? else {
        return Ok(Resolution::NotFound(Miss::NullKernelGsp));
    };
    let Some(rpc) = follow(mem, kernel_gsp, table.kernel_gsp_rpc)? else {
        return Ok(Resolution::NotFound(Miss::NullRpc));
    };
    let history = field_address(rpc, table.rpc_history)?;
    let current_index = field_address(history, table.ring_depth as usize * RPC_ENTRY_SIZE)?;
    Ok(Resolution::Found(RpcLocation {
        gpu,
        kernel_gsp,
        rpc,
        history,
        current_index,
        depth: table.ring_depth,
    }))
}

/// Resolve the address of GPU `gpu_instance`'s RUSD region
pub fn resolve_telemetry<M: MemoryReader + ?Sized>(
    mem: &M,
    root_base: u64,
    table: &OffsetTable,
    gpu_instance: u32,
) -> RmResult<Resolution<u64>> {
    let Some(offset) = table.offset_of(Field::GpuUserSharedData) else {
        return Ok(Resolution::NotFound(Miss::TelemetryUnsupported));
    };
    let gpu = match find_gpu(mem, root_base, table, gpu_instance)? {
        Resolution::Found(gpu) => gpu,
        Resolution::NotFound(miss) => return Ok(Resolution::NotFound(miss)),
    };
    Ok(match follow(mem, gpu, offset)? {
        Some(region) => Resolution::Found(region),
        None => Resolution::NotFound(Miss::NullSharedData),
    })
}

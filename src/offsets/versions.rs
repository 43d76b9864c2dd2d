//! Offset tables of every supported driver release
//!
//! `OBJSYS.pGpuMgr`, `OBJGPUMGR.gpuHandleIDList`, `OBJGPU.pKernelGsp`,
//! `KernelGsp.pRpc`, `OBJRPC.rpcHistory` and the ring depth come from the
//! per-release RPC structure headers the tracer is built against.
//!
//! `OBJGPU.pUserSharedData` and the `RUSD_*` sub-record layouts are
//! reconstructed and have not been checked against a live driver. Treat
//! telemetry decoded through them as unverified.

use super::{DriverVersion, OffsetTable, TelemetryLayout, TemperatureLayout};

/// RUSD layout of 555.58.02: single combined temperature record
const RUSD_555: TelemetryLayout = TelemetryLayout {
    temperature_layout: TemperatureLayout::Combined,
    bar1_memory: 0,
    pma_memory: 24,
    clocks: 48,
    perf: 72,
    power: 88,
    temperature: 104,
    ecc: 120,
    pci: 144,
    region_size: 160,
};

/// RUSD layout of 560.x and 565.x
const RUSD_560: TelemetryLayout = TelemetryLayout {
    temperature_layout: TemperatureLayout::PerSensor,
    bar1_memory: 0,
    pma_memory: 24,
    clocks: 48,
    ecc: 72,
    perf: 96,
    power: 112,
    temperature: 128,
    pci: 160,
    region_size: 176,
};

/// RUSD layout of 570.x: ECC counters moved ahead of the clocks
const RUSD_570: TelemetryLayout = TelemetryLayout {
    temperature_layout: TemperatureLayout::PerSensor,
    bar1_memory: 0,
    pma_memory: 24,
    ecc: 48,
    clocks: 72,
    perf: 96,
    power: 112,
    temperature: 128,
    pci: 160,
    region_size: 176,
};

/// Every compiled-in table, oldest release first
pub const OFFSET_TABLES: &[OffsetTable] = &[
    OffsetTable {
        version: DriverVersion::V555_42_02,
        sys_gpu_mgr: 496,
        gpu_mgr_handle_id_list: 255568,
        gpu_kernel_gsp: 5816,
        gpu_user_shared_data: None,
        kernel_gsp_rpc: 2920,
        rpc_history: 1168,
        ring_depth: 8,
        telemetry: None,
    },
    OffsetTable {
        version: DriverVersion::V555_58_02,
        sys_gpu_mgr: 496,
        gpu_mgr_handle_id_list: 255568,
        gpu_kernel_gsp: 5816,
        gpu_user_shared_data: Some(6040),
        kernel_gsp_rpc: 2920,
        rpc_history: 1168,
        ring_depth: 128,
        telemetry: Some(RUSD_555),
    },
    OffsetTable {
        version: DriverVersion::V560_28_03,
        sys_gpu_mgr: 488,
        gpu_mgr_handle_id_list: 255568,
        gpu_kernel_gsp: 6024,
        gpu_user_shared_data: Some(6256),
        kernel_gsp_rpc: 2920,
        rpc_history: 1184,
        ring_depth: 128,
        telemetry: Some(RUSD_560),
    },
    OffsetTable {
        version: DriverVersion::V565_57_01,
        sys_gpu_mgr: 488,
        gpu_mgr_handle_id_list: 257360,
        gpu_kernel_gsp: 6168,
        gpu_user_shared_data: Some(6400),
        kernel_gsp_rpc: 2344,
        rpc_history: 1192,
        ring_depth: 128,
        telemetry: Some(RUSD_560),
    },
    OffsetTable {
        version: DriverVersion::V570_124_04,
        sys_gpu_mgr: 480,
        gpu_mgr_handle_id_list: 257360,
        gpu_kernel_gsp: 6216,
        gpu_user_shared_data: Some(6448),
        kernel_gsp_rpc: 2368,
        rpc_history: 1272,
        ring_depth: 128,
        telemetry: Some(RUSD_570),
    },
    // Same kernel objects as 570.124.04
    OffsetTable {
        version: DriverVersion::V570_124_06,
        sys_gpu_mgr: 480,
        gpu_mgr_handle_id_list: 257360,
        gpu_kernel_gsp: 6216,
        gpu_user_shared_data: Some(6448),
        kernel_gsp_rpc: 2368,
        rpc_history: 1272,
        ring_depth: 128,
        telemetry: Some(RUSD_570),
    },
];

/// Table of a release
///
/// Indexing mirrors [`DriverVersion::ALL`]; the exhaustive match keeps a new
/// enum variant from compiling until its table is added.
pub(crate) fn table_for(version: DriverVersion) -> &'static OffsetTable {
    let index = match version {
        DriverVersion::V555_42_02 => 0,
        DriverVersion::V555_58_02 => 1,
        DriverVersion::V560_28_03 => 2,
        DriverVersion::V565_57_01 => 3,
        DriverVersion::V570_124_04 => 4,
        DriverVersion::V570_124_06 => 5,
    };
    &OFFSET_TABLES[index]
}

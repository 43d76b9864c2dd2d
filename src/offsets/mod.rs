//! Per-release offset tables for the driver's private object layouts
//!
//! The kernel objects walked by [`crate::introspect`] are closed-source and
//! change shape between driver releases. Every release we understand gets one
//! [`OffsetTable`] in [`versions`]; decode logic only ever asks the table.

pub mod versions;

use crate::error::{RmError, RmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use versions::OFFSET_TABLES;

/// Driver release with a compiled-in offset table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverVersion {
    /// 555.42.02
    V555_42_02,
    /// 555.58.02
    V555_58_02,
    /// 560.28.03
    V560_28_03,
    /// 565.57.01
    V565_57_01,
    /// 570.124.04
    V570_124_04,
    /// 570.124.06
    V570_124_06,
}

#[cfg(not(any(
    feature = "driver-555-42-02",
    feature = "driver-555-58-02",
    feature = "driver-560-28-03",
    feature = "driver-565-57-01",
    feature = "driver-570-124-04",
    feature = "driver-570-124-06",
)))]
compile_error!("Unknown driver version: enable exactly one `driver-*` feature");

impl DriverVersion {
    /// Every release this build knows about, oldest first
    pub const ALL: [DriverVersion; 6] = [
        DriverVersion::V555_42_02,
        DriverVersion::V555_58_02,
        DriverVersion::V560_28_03,
        DriverVersion::V565_57_01,
        DriverVersion::V570_124_04,
        DriverVersion::V570_124_06,
    ];

    /// Release selected for this build through the `driver-*` features
    #[cfg(feature = "driver-570-124-06")]
    pub const ACTIVE: DriverVersion = DriverVersion::V570_124_06;
    #[cfg(all(feature = "driver-570-124-04", not(feature = "driver-570-124-06")))]
    pub const ACTIVE: DriverVersion = DriverVersion::V570_124_04;
    #[cfg(all(
        feature = "driver-565-57-01",
        not(any(feature = "driver-570-124-04", feature = "driver-570-124-06"))
    ))]
    pub const ACTIVE: DriverVersion = DriverVersion::V565_57_01;
    #[cfg(all(
        feature = "driver-560-28-03",
        not(any(
            feature = "driver-565-57-01",
            feature = "driver-570-124-04",
            feature = "driver-570-124-06"
        ))
    ))]
    pub const ACTIVE: DriverVersion = DriverVersion::V560_28_03;
    #[cfg(all(
        feature = "driver-555-58-02",
        not(any(
            feature = "driver-560-28-03",
            feature = "driver-565-57-01",
            feature = "driver-570-124-04",
            feature = "driver-570-124-06"
        ))
    ))]
    pub const ACTIVE: DriverVersion = DriverVersion::V555_58_02;
    #[cfg(all(
        feature = "driver-555-42-02",
        not(any(
            feature = "driver-555-58-02",
            feature = "driver-560-28-03",
            feature = "driver-565-57-01",
            feature = "driver-570-124-04",
            feature = "driver-570-124-06"
        ))
    ))]
    pub const ACTIVE: DriverVersion = DriverVersion::V555_42_02;

    /// `(major, minor, patch)` triple
    pub const fn triple(self) -> (u32, u32, u32) {
        match self {
            DriverVersion::V555_42_02 => (555, 42, 2),
            DriverVersion::V555_58_02 => (555, 58, 2),
            DriverVersion::V560_28_03 => (560, 28, 3),
            DriverVersion::V565_57_01 => (565, 57, 1),
            DriverVersion::V570_124_04 => (570, 124, 4),
            DriverVersion::V570_124_06 => (570, 124, 6),
        }
    }

    /// Find the release matching a version triple
    pub fn from_triple(major: u32, minor: u32, patch: u32) -> RmResult<Self> {
        DriverVersion::ALL
            .into_iter()
            .find(|v| v.triple() == (major, minor, patch))
            .ok_or_else(|| {
                RmError::UnsupportedDriver(format!("{}.{:02}.{:02}", major, minor, patch))
            })
    }

    /// Offset table of this release
    pub fn offsets(self) -> &'static OffsetTable {
        versions::table_for(self)
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.triple();
        write!(f, "{}.{:02}.{:02}", major, minor, patch)
    }
}

impl FromStr for DriverVersion {
    type Err = RmError;

    fn from_str(s: &str) -> RmResult<Self> {
        let unsupported = || RmError::UnsupportedDriver(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> RmResult<u32> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(unsupported)
        };
        let (major, minor, patch) = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(unsupported());
        }
        DriverVersion::from_triple(major, minor, patch)
    }
}

/// Look up the offset table of a release given as `major.minor.patch`
pub fn lookup(version: &str) -> RmResult<&'static OffsetTable> {
    version.parse::<DriverVersion>().map(DriverVersion::offsets)
}

/// Symbolic field of a driver object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    /// `OBJSYS.pGpuMgr`
    SysGpuMgr,
    /// `OBJGPUMGR.gpuHandleIDList`
    GpuMgrHandleIdList,
    /// `OBJGPU.pKernelGsp`
    GpuKernelGsp,
    /// `OBJGPU.pUserSharedData`
    GpuUserSharedData,
    /// `KernelGsp.pRpc`
    KernelGspRpc,
    /// `OBJRPC.rpcHistory`
    RpcHistory,
}

impl Field {
    /// All symbolic fields
    pub const ALL: [Field; 6] = [
        Field::SysGpuMgr,
        Field::GpuMgrHandleIdList,
        Field::GpuKernelGsp,
        Field::GpuUserSharedData,
        Field::KernelGspRpc,
        Field::RpcHistory,
    ];

    /// Dotted path as it appears in the driver sources
    pub const fn path(self) -> &'static str {
        match self {
            Field::SysGpuMgr => "OBJSYS.pGpuMgr",
            Field::GpuMgrHandleIdList => "OBJGPUMGR.gpuHandleIDList",
            Field::GpuKernelGsp => "OBJGPU.pKernelGsp",
            Field::GpuUserSharedData => "OBJGPU.pUserSharedData",
            Field::KernelGspRpc => "KernelGsp.pRpc",
            Field::RpcHistory => "OBJRPC.rpcHistory",
        }
    }

    /// Parse a dotted path
    pub fn from_path(path: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.path() == path)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Shape of the RUSD temperature sub-record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureLayout {
    /// One record holding both GPU and memory temperature under a single timestamp
    Combined,
    /// Array of two independent `{timestamp, temperature}` records (GPU, memory)
    PerSensor,
}

/// Byte offsets of the RUSD sub-records inside the shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryLayout {
    /// Temperature record shape
    pub temperature_layout: TemperatureLayout,
    /// BAR1 memory info
    pub bar1_memory: usize,
    /// PMA memory info
    pub pma_memory: usize,
    /// ECC error counters
    pub ecc: usize,
    /// Public clock domains
    pub clocks: usize,
    /// Device utilization
    pub perf: usize,
    /// GPU power limits
    pub power: usize,
    /// Temperatures
    pub temperature: usize,
    /// PCIe link state
    pub pci: usize,
    /// Total bytes to capture for one decode pass
    pub region_size: usize,
}

/// Offsets and sizes of one driver release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTable {
    /// Release this table describes
    pub version: DriverVersion,
    /// `OBJSYS.pGpuMgr`
    pub sys_gpu_mgr: usize,
    /// `OBJGPUMGR.gpuHandleIDList`
    pub gpu_mgr_handle_id_list: usize,
    /// `OBJGPU.pKernelGsp`
    pub gpu_kernel_gsp: usize,
    /// `OBJGPU.pUserSharedData`, when known
    pub gpu_user_shared_data: Option<usize>,
    /// `KernelGsp.pRpc`
    pub kernel_gsp_rpc: usize,
    /// `OBJRPC.rpcHistory`
    pub rpc_history: usize,
    /// Number of slots in the RPC history ring
    pub ring_depth: u32,
    /// RUSD layout, when known
    pub telemetry: Option<TelemetryLayout>,
}

impl OffsetTable {
    /// Table of the release selected for this build
    pub fn active() -> &'static OffsetTable {
        DriverVersion::ACTIVE.offsets()
    }

    /// Byte offset of a symbolic field, if the release has it
    pub fn offset_of(&self, field: Field) -> Option<usize> {
        match field {
            Field::SysGpuMgr => Some(self.sys_gpu_mgr),
            Field::GpuMgrHandleIdList => Some(self.gpu_mgr_handle_id_list),
            Field::GpuKernelGsp => Some(self.gpu_kernel_gsp),
            Field::GpuUserSharedData => self.gpu_user_shared_data,
            Field::KernelGspRpc => Some(self.kernel_gsp_rpc),
            Field::RpcHistory => Some(self.rpc_history),
        }
    }

    /// Byte offset of a field given by its dotted path
    pub fn offset_of_path(&self, path: &str) -> Option<usize> {
        Field::from_path(path).and_then(|f| self.offset_of(f))
    }

    /// Whether the RUSD region can be decoded on this release
    pub fn has_telemetry(&self) -> bool {
        self.telemetry.is_some()
    }

    /// RUSD layout or [`RmError::TelemetryUnsupported`]
    pub fn telemetry_layout(&self) -> RmResult<&TelemetryLayout> {
        self.telemetry
            .as_ref()
            .ok_or_else(|| RmError::TelemetryUnsupported(self.version.to_string()))
    }

    /// Serialize the table for diagnostics
    pub fn to_json(&self) -> RmResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(DriverVersion::V555_42_02)]
    #[case(DriverVersion::V555_58_02)]
    #[case(DriverVersion::V560_28_03)]
    #[case(DriverVersion::V565_57_01)]
    #[case(DriverVersion::V570_124_04)]
    #[case(DriverVersion::V570_124_06)]
    fn test_every_release_has_a_table(#[case] version: DriverVersion) {
        let table = lookup(&version.to_string()).unwrap();
        assert_eq!(table.version, version);
        assert!(table.ring_depth > 0);
        for field in Field::ALL {
            if field != Field::GpuUserSharedData {
                assert!(table.offset_of(field).is_some(), "{} missing", field);
            }
        }
        if let Some(layout) = table.telemetry {
            assert!(layout.region_size > layout.temperature);
            assert_eq!(table.offset_of(Field::GpuUserSharedData).is_some(), true);
        }
    }

    #[test]
    fn test_ring_depth_grows_at_555_58() {
        assert_eq!(DriverVersion::V555_42_02.offsets().ring_depth, 8);
        assert_eq!(DriverVersion::V555_58_02.offsets().ring_depth, 128);
        assert_eq!(DriverVersion::V570_124_06.offsets().ring_depth, 128);
    }

    #[test]
    fn test_temperature_tags() {
        let combined = DriverVersion::V555_58_02.offsets().telemetry.unwrap();
        assert_eq!(combined.temperature_layout, TemperatureLayout::Combined);
        let per_sensor = DriverVersion::V565_57_01.offsets().telemetry.unwrap();
        assert_eq!(per_sensor.temperature_layout, TemperatureLayout::PerSensor);
    }

    #[test]
    fn test_lookup_by_path() {
        let table = DriverVersion::V560_28_03.offsets();
        assert_eq!(table.offset_of_path("OBJSYS.pGpuMgr"), Some(488));
        assert_eq!(table.offset_of_path("OBJRPC.rpcHistory"), Some(1184));
        assert_eq!(table.offset_of_path("OBJRPC.nothing"), None);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        assert!(matches!(lookup("550.54.14"), Err(RmError::UnsupportedDriver(_))));
        assert!(matches!(lookup("570.124"), Err(RmError::UnsupportedDriver(_))));
        assert!(matches!(lookup("570.124.06.1"), Err(RmError::UnsupportedDriver(_))));
        assert_eq!(
            "570.124.6".parse::<DriverVersion>().unwrap(),
            DriverVersion::V570_124_06
        );
    }

    #[test]
    fn test_active_table_matches_active_version() {
        assert_eq!(OffsetTable::active().version, DriverVersion::ACTIVE);
        let json = OffsetTable::active().to_json().unwrap();
        assert!(json.contains("ring_depth"));
    }
}

//! Integration tests for rmscope

use pretty_assertions::assert_eq;
use rmscope::introspect::{snapshot_history, snapshot_telemetry, Miss, Resolution};
use rmscope::memory::RegionMap;
use rmscope::offsets::DriverVersion;
use rmscope::rm::params::{
    Nv00deAllocParams, ParamBlock, RmMsgCtrlParams, RMMSG_CTRL_CMD_GET, RMMSG_SIZE,
};
use rmscope::rm::{AllocRequest, ControlRequest, RmDriver};
use rmscope::{
    enable_telemetry, DebugFilter, FilterString, PollMask, RmError, RmHandle, RmSession,
    SessionConfig,
};
use serial_test::serial;
use std::io;

/// Driver stand-in that logs every request it sees
struct Recorder {
    log: Vec<String>,
    rmmsg: [u8; RMMSG_SIZE],
    reject_class: Option<u32>,
}

impl Recorder {
    fn new(initial: &str) -> Self {
        let mut rmmsg = [0u8; RMMSG_SIZE];
        rmmsg[..initial.len()].copy_from_slice(initial.as_bytes());
        Self {
            log: Vec::new(),
            rmmsg,
            reject_class: None,
        }
    }
}

impl RmDriver for Recorder {
    fn alloc(&mut self, request: &mut AllocRequest<'_>) -> io::Result<()> {
        if request.class == 0 {
            request.new = RmHandle(0xc1d0_0042);
        }
        self.log.push(format!("alloc 0x{:04x} under {}", request.class, request.parent));
        if Some(request.class) == self.reject_class {
            request.status = 0x57;
        }
        Ok(())
    }

    fn control(&mut self, request: &mut ControlRequest<'_>) -> io::Result<()> {
        let params = RmMsgCtrlParams::decode(request.params).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
        })?;
        if params.cmd == RMMSG_CTRL_CMD_GET {
            self.log.push("rmmsg get".to_string());
            let reply = RmMsgCtrlParams {
                data: self.rmmsg,
                ..params
            };
            request.params.copy_from_slice(&reply.encode());
        } else {
            self.log.push("rmmsg set".to_string());
            self.rmmsg = params.data;
        }
        Ok(())
    }
}

#[test]
fn test_filter_and_telemetry_session() {
    let mut session = RmSession::with_driver(Recorder::new("1"), &SessionConfig::default()).unwrap();
    let mut filter = DebugFilter::new();

    let change = filter
        .replace(&mut session, &"(comm==\"cuda\")".parse().unwrap())
        .unwrap();
    assert_eq!(change.previous.to_string(), "1");

    enable_telemetry(&mut session, RmHandle(0xabcd_00de), PollMask::ALL).unwrap();

    let restored = filter.restore(&mut session).unwrap().unwrap();
    assert_eq!(restored.to_string(), "1");
    assert_eq!(&session.driver().rmmsg[..2], b"1\0");

    assert_eq!(
        session.driver().log,
        vec![
            "alloc 0x0000 under 0x00000000",
            "alloc 0x0080 under 0xc1d00042",
            "alloc 0x2080 under 0xabcd0080",
            "rmmsg get",
            "rmmsg set",
            "alloc 0x00de under 0xabcd2080",
            "rmmsg set",
        ]
    );
}

#[test]
fn test_rejected_subdevice_stops_startup() {
    let mut driver = Recorder::new("");
    driver.reject_class = Some(0x2080);
    let err = RmSession::with_driver(driver, &SessionConfig::default())
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "NvRmAlloc (hClass=0x2080) failed in RM: 0x00000057"
    );
}

#[test]
fn test_rejected_telemetry_leaves_filter_restorable() {
    let mut driver = Recorder::new("keep");
    driver.reject_class = Some(0x00de);
    let mut session = RmSession::with_driver(driver, &SessionConfig::default()).unwrap();
    let mut filter = DebugFilter::new();
    filter
        .replace(&mut session, &FilterString::from_bytes(b"x").unwrap())
        .unwrap();

    let err = enable_telemetry(&mut session, RmHandle(0xabcd_00de), PollMask(1)).unwrap_err();
    assert!(matches!(err, RmError::RmStatus { status: 0x57, .. }));

    filter.restore(&mut session).unwrap();
    assert_eq!(&session.driver().rmmsg[..5], b"keep\0");
}

/// Lay out OBJSYS -> OBJGPUMGR -> OBJGPU -> KernelGsp -> OBJRPC plus a RUSD region
fn driver_image(version: DriverVersion) -> (RegionMap, u64) {
    let table = version.offsets();
    let sys = 0xffff_8880_0000_0000u64;
    let mgr = 0xffff_8880_0010_0000u64;
    let gpu = 0xffff_8880_0020_0000u64;
    let gsp = 0xffff_8880_0030_0000u64;
    let rpc = 0xffff_8880_0040_0000u64;
    let rusd = 0xffff_8880_0050_0000u64;

    let mut sys_obj = vec![0u8; table.sys_gpu_mgr + 8];
    sys_obj[table.sys_gpu_mgr..].copy_from_slice(&mgr.to_ne_bytes());

    let mut mgr_obj = vec![0u8; table.gpu_mgr_handle_id_list + 32 * 16];
    // slot 0 is another GPU, slot 1 is instance 0
    let list = table.gpu_mgr_handle_id_list;
    mgr_obj[list..list + 8].copy_from_slice(&0xffff_8880_0090_0000u64.to_ne_bytes());
    mgr_obj[list + 8..list + 12].copy_from_slice(&1u32.to_ne_bytes());
    mgr_obj[list + 16..list + 24].copy_from_slice(&gpu.to_ne_bytes());

    let shared = table.gpu_user_shared_data.unwrap_or(0);
    let mut gpu_obj = vec![0u8; table.gpu_kernel_gsp.max(shared) + 8];
    gpu_obj[table.gpu_kernel_gsp..table.gpu_kernel_gsp + 8].copy_from_slice(&gsp.to_ne_bytes());
    if let Some(offset) = table.gpu_user_shared_data {
        gpu_obj[offset..offset + 8].copy_from_slice(&rusd.to_ne_bytes());
    }

    let mut gsp_obj = vec![0u8; table.kernel_gsp_rpc + 8];
    gsp_obj[table.kernel_gsp_rpc..].copy_from_slice(&rpc.to_ne_bytes());

    let depth = table.ring_depth as usize;
    let mut rpc_obj = vec![0u8; table.rpc_history + depth * 40 + 4];
    for (i, slot) in [1usize, 2, 0].into_iter().enumerate() {
        let at = table.rpc_history + slot * 40;
        rpc_obj[at..at + 4].copy_from_slice(&76u32.to_ne_bytes());
        let start = 100 + i as u64 * 100;
        rpc_obj[at + 24..at + 32].copy_from_slice(&start.to_ne_bytes());
        rpc_obj[at + 32..at + 40].copy_from_slice(&(start + 7).to_ne_bytes());
    }
    let tail = table.rpc_history + depth * 40;
    rpc_obj[tail..tail + 4].copy_from_slice(&1u32.to_ne_bytes());

    let mut mem = RegionMap::new();
    mem.insert(sys, sys_obj)
        .insert(mgr, mgr_obj)
        .insert(gpu, gpu_obj)
        .insert(gsp, gsp_obj)
        .insert(rpc, rpc_obj);
    if let Some(layout) = table.telemetry {
        let mut region = vec![0u8; layout.region_size];
        region[layout.power..layout.power + 8].copy_from_slice(&11u64.to_ne_bytes());
        region[layout.power + 12..layout.power + 16].copy_from_slice(&300_000u32.to_ne_bytes());
        mem.insert(rusd, region);
    }
    (mem, sys)
}

#[test]
fn test_history_through_object_graph() {
    for version in DriverVersion::ALL {
        let (mem, sys) = driver_image(version);
        let snapshot = snapshot_history(&mem, sys, version.offsets(), 0)
            .unwrap()
            .found()
            .unwrap();
        let starts: Vec<u64> = snapshot.entries.iter().map(|e| e.ts_start).collect();
        assert_eq!(starts, vec![100, 200, 300], "{}", version);
        assert_eq!(snapshot.depth, version.offsets().ring_depth);
        assert_eq!(snapshot.within(150, 300).len(), 2);
    }
}

#[test]
fn test_missing_instance_is_a_miss() {
    let version = DriverVersion::V565_57_01;
    let (mem, sys) = driver_image(version);
    let resolution = snapshot_history(&mem, sys, version.offsets(), 3).unwrap();
    assert!(matches!(resolution, Resolution::NotFound(Miss::GpuInstanceAbsent(3))));
}

#[test]
fn test_telemetry_through_object_graph() {
    let version = DriverVersion::V570_124_06;
    let (mem, sys) = driver_image(version);
    let region = snapshot_telemetry(&mem, sys, version.offsets(), 0)
        .unwrap()
        .found()
        .unwrap();
    let power = region.power.unwrap();
    assert_eq!(power.last_modified, 11);
    assert_eq!(power.value.enforced_mw, 300_000);
    assert!(region.clocks.is_none());

    let old = DriverVersion::V555_42_02;
    let (mem, sys) = driver_image(old);
    assert!(matches!(
        snapshot_telemetry(&mem, sys, old.offsets(), 0).unwrap(),
        Resolution::NotFound(Miss::TelemetryUnsupported)
    ));
}

#[test]
fn test_rusd_params_carry_mask() {
    let block = Nv00deAllocParams {
        polled_data_mask: PollMask::ALL.bits(),
    }
    .encode();
    assert_eq!(block.len(), 8);
    assert_eq!(Nv00deAllocParams::decode(&block).unwrap().polled_data_mask, 0x3f);
}

#[test]
#[ignore = "needs an NVIDIA GPU and access to /dev/nvidiactl"]
#[serial]
fn test_hardware_filter_round_trip() {
    let mut session = RmSession::open(&SessionConfig::default()).unwrap();
    let before = DebugFilter::read(&mut session).unwrap();
    let mut filter = DebugFilter::new();
    filter
        .replace(&mut session, &FilterString::from_bytes(b"").unwrap())
        .unwrap();
    filter.restore(&mut session).unwrap();
    assert_eq!(DebugFilter::read(&mut session).unwrap(), before);
}

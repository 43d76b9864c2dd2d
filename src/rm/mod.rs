//! Resource Manager session
//!
//! An [`RmSession`] owns the driver transport and the handles of the objects
//! every RM client needs: the client itself, a device and a subdevice. They
//! are allocated in that order when the session is created; the driver
//! rejects any other order.

pub mod filter;
pub mod ioctl;
pub mod params;
pub mod telemetry;

use crate::error::{RmError, RmOperation, RmResult};
use log::{debug, info};
use params::{Nv0080AllocParams, Nv2080AllocParams, ParamBlock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

pub use ioctl::DeviceDriver;

/// `NV01_ROOT`: the client object
pub const NV01_ROOT: u32 = 0x0000;
/// `NV01_DEVICE_0`
pub const NV01_DEVICE_0: u32 = 0x0080;
/// `NV20_SUBDEVICE_0`
pub const NV20_SUBDEVICE_0: u32 = 0x2080;

/// Name of a driver-side object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RmHandle(pub u32);

impl RmHandle {
    /// No object; used as parent when allocating a client
    pub const NONE: RmHandle = RmHandle(0);

    /// Raw handle value
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Whether the driver may write the parameter block back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsDirection {
    /// Driver reads the block; the caller's buffer is left untouched
    In,
    /// Driver reads and overwrites the block in place
    InOut,
}

/// Two-handle allocation request (`NVOS21_PARAMETERS`)
#[derive(Debug)]
pub struct AllocRequest<'a> {
    /// Client owning the new object
    pub root: RmHandle,
    /// Parent object
    pub parent: RmHandle,
    /// Handle for the new object; the driver fills it in for clients
    pub new: RmHandle,
    /// Class identifier
    pub class: u32,
    /// Class-specific parameter block
    pub params: &'a mut [u8],
    /// RM status written by the driver
    pub status: u32,
}

/// Control request against an existing object (`NVOS54_PARAMETERS`)
#[derive(Debug)]
pub struct ControlRequest<'a> {
    /// Client owning the object
    pub client: RmHandle,
    /// Target object
    pub object: RmHandle,
    /// Command code
    pub cmd: u32,
    /// Call flags
    pub flags: u32,
    /// Command-specific parameter block
    pub params: &'a mut [u8],
    /// RM status written by the driver
    pub status: u32,
}

/// Transport carrying RM requests to the driver
///
/// An `Err` means the request never reached RM (the OS-level ioctl failed);
/// RM's own verdict is left in the request's `status`.
pub trait RmDriver {
    /// Issue NV_ESC_RM_ALLOC
    fn alloc(&mut self, request: &mut AllocRequest<'_>) -> io::Result<()>;

    /// Issue NV_ESC_RM_CONTROL
    fn control(&mut self, request: &mut ControlRequest<'_>) -> io::Result<()>;
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Control node
    pub control_path: String,
    /// Accelerator device node
    pub device_path: String,
    /// Device instance passed to the device allocation
    pub device_instance: u32,
    /// Handle chosen for the device object
    pub device_handle: RmHandle,
    /// Handle chosen for the subdevice object
    pub subdevice_handle: RmHandle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_path: "/dev/nvidiactl".to_string(),
            device_path: "/dev/nvidia0".to_string(),
            device_instance: 0,
            device_handle: RmHandle(0xabcd_0080),
            subdevice_handle: RmHandle(0xabcd_2080),
        }
    }
}

impl SessionConfig {
    /// Configuration for accelerator `instance` (`/dev/nvidia<instance>`)
    pub fn for_instance(instance: u32) -> Self {
        Self {
            device_path: format!("/dev/nvidia{}", instance),
            device_instance: instance,
            ..Self::default()
        }
    }
}

/// Live RM client with its device and subdevice
pub struct RmSession<D: RmDriver = DeviceDriver> {
    driver: D,
    client: RmHandle,
    device: RmHandle,
    subdevice: RmHandle,
}

impl RmSession<DeviceDriver> {
    /// Open the driver nodes and allocate client, device and subdevice
    pub fn open(config: &SessionConfig) -> RmResult<Self> {
        let driver = DeviceDriver::open(&config.control_path, &config.device_path)?;
        Self::with_driver(driver, config)
    }
}

impl<D: RmDriver> RmSession<D> {
    /// Run the startup sequence over an arbitrary transport
    pub fn with_driver(mut driver: D, config: &SessionConfig) -> RmResult<Self> {
        let client = issue_alloc(
            &mut driver,
            RmHandle::NONE,
            RmHandle::NONE,
            RmHandle::NONE,
            NV01_ROOT,
            &mut [],
        )?;
        info!("allocated RM client {}", client);

        let mut session = Self {
            driver,
            client,
            device: config.device_handle,
            subdevice: config.subdevice_handle,
        };

        let mut device_params = Nv0080AllocParams {
            device_id: config.device_instance,
            ..Default::default()
        }
        .encode();
        session.allocate(client, config.device_handle, NV01_DEVICE_0, &mut device_params)?;

        let mut subdevice_params = Nv2080AllocParams { sub_device_id: 0 }.encode();
        session.allocate(
            config.device_handle,
            config.subdevice_handle,
            NV20_SUBDEVICE_0,
            &mut subdevice_params,
        )?;
        info!(
            "allocated device {} and subdevice {}",
            session.device, session.subdevice
        );

        Ok(session)
    }

    /// Client handle assigned by the driver
    pub fn client(&self) -> RmHandle {
        self.client
    }

    /// Device handle
    pub fn device(&self) -> RmHandle {
        self.device
    }

    /// Subdevice handle
    pub fn subdevice(&self) -> RmHandle {
        self.subdevice
    }

    /// Underlying transport
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Allocate `new_handle` of `class` under `parent`
    pub fn allocate(
        &mut self,
        parent: RmHandle,
        new_handle: RmHandle,
        class: u32,
        params: &mut [u8],
    ) -> RmResult<()> {
        issue_alloc(&mut self.driver, self.client, parent, new_handle, class, params).map(|_| ())
    }

    /// Issue control command `cmd` against `object`
    pub fn control(
        &mut self,
        object: RmHandle,
        cmd: u32,
        params: &mut [u8],
        direction: ParamsDirection,
    ) -> RmResult<()> {
        let op = RmOperation::Control { cmd };
        let mut scratch;
        let params = match direction {
            ParamsDirection::InOut => params,
            ParamsDirection::In => {
                scratch = params.to_vec();
                scratch.as_mut_slice()
            }
        };
        let mut request = ControlRequest {
            client: self.client,
            object,
            cmd,
            flags: 0,
            params,
            status: 0,
        };
        self.driver
            .control(&mut request)
            .map_err(|source| RmError::Ioctl { op, source })?;
        debug!(
            "NvRmControl object={} cmd=0x{:08x} status=0x{:08x}",
            object, cmd, request.status
        );
        if request.status != 0 {
            return Err(RmError::RmStatus {
                op,
                status: request.status,
            });
        }
        Ok(())
    }
}

fn issue_alloc<D: RmDriver>(
    driver: &mut D,
    root: RmHandle,
    parent: RmHandle,
    new: RmHandle,
    class: u32,
    params: &mut [u8],
) -> RmResult<RmHandle> {
    let op = RmOperation::Alloc { class };
    let mut request = AllocRequest {
        root,
        parent,
        new,
        class,
        params,
        status: 0,
    };
    driver
        .alloc(&mut request)
        .map_err(|source| RmError::Ioctl { op, source })?;
    debug!(
        "NvRmAlloc parent={} new={} class=0x{:04x} status=0x{:08x}",
        parent, request.new, class, request.status
    );
    if request.status != 0 {
        return Err(RmError::RmStatus {
            op,
            status: request.status,
        });
    }
    Ok(request.new)
}

//! ioctl transport to the NVIDIA control node

use super::{AllocRequest, ControlRequest, RmDriver};
use crate::error::{RmError, RmResult};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

/// ioctl type byte of the NVIDIA escape calls
pub const NV_IOCTL_MAGIC: u8 = b'F';

/// `NVOS21_PARAMETERS`
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Nvos21Parameters {
    /// Owning client
    pub h_root: u32,
    /// Parent object
    pub h_object_parent: u32,
    /// Requested handle, or the driver-assigned client handle
    pub h_object_new: u32,
    /// Class to instantiate
    pub h_class: u32,
    /// User pointer to the parameter block, null when empty
    pub p_alloc_parms: u64,
    /// Parameter block length in bytes
    pub params_size: u32,
    /// RM status written back by the driver
    pub status: u32,
}

/// `NVOS54_PARAMETERS`
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Nvos54Parameters {
    /// Owning client
    pub h_client: u32,
    /// Target object
    pub h_object: u32,
    /// Control command
    pub cmd: u32,
    /// Call flags
    pub flags: u32,
    /// User pointer to the parameter block, null when empty
    pub params: u64,
    /// Parameter block length in bytes
    pub params_size: u32,
    /// RM status written back by the driver
    pub status: u32,
}

/// Encode a read/write ioctl request number
pub const fn iowr(ty: u8, nr: u8, size: usize) -> u32 {
    (3u32 << 30) | ((size as u32) << 16) | ((ty as u32) << 8) | (nr as u32)
}

/// NV_ESC_RM_CONTROL
pub const NV_ESC_RM_CONTROL: u32 =
    iowr(NV_IOCTL_MAGIC, 0x2A, std::mem::size_of::<Nvos54Parameters>());
/// NV_ESC_RM_ALLOC
pub const NV_ESC_RM_ALLOC: u32 =
    iowr(NV_IOCTL_MAGIC, 0x2B, std::mem::size_of::<Nvos21Parameters>());

/// Driver transport over `/dev/nvidiactl`
///
/// The accelerator node is held open for the lifetime of the transport: RM
/// only accepts device allocations for GPUs that have an open file.
#[derive(Debug)]
pub struct DeviceDriver {
    control: File,
    _device: File,
}

impl DeviceDriver {
    /// Open the control and device nodes read-write
    pub fn open(control_path: &str, device_path: &str) -> RmResult<Self> {
        let control = open_node(control_path)?;
        let device = open_node(device_path)?;
        debug!("opened {} and {}", control_path, device_path);
        Ok(Self {
            control,
            _device: device,
        })
    }

    fn ioctl<T>(&self, request: u32, arg: &mut T) -> io::Result<()> {
        let result = unsafe {
            libc::ioctl(
                self.control.as_raw_fd(),
                request as _,
                arg as *mut T as *mut libc::c_void,
            )
        };
        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn open_node(path: &str) -> RmResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| RmError::opening(path, e))
}

/// Pointer argument for a parameter block; empty blocks are passed as null
fn block_pointer(params: &mut [u8]) -> u64 {
    if params.is_empty() {
        0
    } else {
        params.as_mut_ptr() as u64
    }
}

impl RmDriver for DeviceDriver {
    fn alloc(&mut self, request: &mut AllocRequest<'_>) -> io::Result<()> {
        let mut raw = Nvos21Parameters {
            h_root: request.root.0,
            h_object_parent: request.parent.0,
            h_object_new: request.new.0,
            h_class: request.class,
            p_alloc_parms: block_pointer(request.params),
            params_size: request.params.len() as u32,
            status: 0,
        };
        self.ioctl(NV_ESC_RM_ALLOC, &mut raw)?;
        request.new.0 = raw.h_object_new;
        request.status = raw.status;
        Ok(())
    }

    fn control(&mut self, request: &mut ControlRequest<'_>) -> io::Result<()> {
        let mut raw = Nvos54Parameters {
            h_client: request.client.0,
            h_object: request.object.0,
            cmd: request.cmd,
            flags: request.flags,
            params: block_pointer(request.params),
            params_size: request.params.len() as u32,
            status: 0,
        };
        self.ioctl(NV_ESC_RM_CONTROL, &mut raw)?;
        request.status = raw.status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_numbers() {
        assert_eq!(std::mem::size_of::<Nvos21Parameters>(), 32);
        assert_eq!(std::mem::size_of::<Nvos54Parameters>(), 32);
        assert_eq!(NV_ESC_RM_ALLOC, 0xC020_462B);
        assert_eq!(NV_ESC_RM_CONTROL, 0xC020_462A);
    }

    #[test]
    fn test_missing_nodes_fail_before_any_ioctl() {
        let err = DeviceDriver::open("/nonexistent/nvidiactl", "/nonexistent/nvidia0").unwrap_err();
        assert!(matches!(err, RmError::NoDevice(ref p) if p == "/nonexistent/nvidiactl"));
    }
}

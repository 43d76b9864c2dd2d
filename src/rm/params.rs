//! Class and command parameter blocks
//!
//! Blocks are encoded explicitly into native-endian byte buffers instead of
//! being passed as `repr(C)` structs, so the session layer only ever sees
//! `&mut [u8]`. Field names follow the driver headers.

#![allow(missing_docs)]

use crate::error::RmResult;
use crate::memory::ByteView;
use bytes::BufMut;

/// `NV0000_CTRL_CMD_SYSTEM_DEBUG_RMMSG_CTRL`
pub const NV0000_CTRL_CMD_SYSTEM_DEBUG_RMMSG_CTRL: u32 = 0x121;
/// Capacity of the RmMsg filter buffer
pub const RMMSG_SIZE: usize = 512;
/// RmMsg sub-command: read the current filter
pub const RMMSG_CTRL_CMD_GET: u32 = 0;
/// RmMsg sub-command: replace the filter
pub const RMMSG_CTRL_CMD_SET: u32 = 1;

/// Fixed-size parameter block
pub trait ParamBlock: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into a buffer of exactly [`Self::SIZE`] bytes
    fn encode(&self) -> Vec<u8>;

    /// Decode from a buffer of at least [`Self::SIZE`] bytes
    fn decode(bytes: &[u8]) -> RmResult<Self>;
}

/// `NV0080_ALLOC_PARAMETERS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nv0080AllocParams {
    pub device_id: u32,
    pub h_client_share: u32,
    pub h_target_client: u32,
    pub h_target_device: u32,
    pub flags: u32,
    pub va_space_size: u64,
    pub va_start_internal: u64,
    pub va_limit_internal: u64,
    pub va_mode: u32,
}

impl ParamBlock for Nv0080AllocParams {
    const SIZE: usize = 56;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u32_ne(self.device_id);
        buf.put_u32_ne(self.h_client_share);
        buf.put_u32_ne(self.h_target_client);
        buf.put_u32_ne(self.h_target_device);
        buf.put_u32_ne(self.flags);
        buf.put_bytes(0, 4);
        buf.put_u64_ne(self.va_space_size);
        buf.put_u64_ne(self.va_start_internal);
        buf.put_u64_ne(self.va_limit_internal);
        buf.put_u32_ne(self.va_mode);
        buf.put_bytes(0, 4);
        buf
    }

    fn decode(bytes: &[u8]) -> RmResult<Self> {
        let view = ByteView::new(bytes);
        Ok(Self {
            device_id: view.read_u32(0)?,
            h_client_share: view.read_u32(4)?,
            h_target_client: view.read_u32(8)?,
            h_target_device: view.read_u32(12)?,
            flags: view.read_u32(16)?,
            va_space_size: view.read_u64(24)?,
            va_start_internal: view.read_u64(32)?,
            va_limit_internal: view.read_u64(40)?,
            va_mode: view.read_u32(48)?,
        })
    }
}

/// `NV2080_ALLOC_PARAMETERS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nv2080AllocParams {
    pub sub_device_id: u32,
}

impl ParamBlock for Nv2080AllocParams {
    const SIZE: usize = 4;

    fn encode(&self) -> Vec<u8> {
        self.sub_device_id.to_ne_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> RmResult<Self> {
        Ok(Self {
            sub_device_id: ByteView::new(bytes).read_u32(0)?,
        })
    }
}

/// `NV00DE_ALLOC_PARAMETERS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nv00deAllocParams {
    pub polled_data_mask: u64,
}

impl ParamBlock for Nv00deAllocParams {
    const SIZE: usize = 8;

    fn encode(&self) -> Vec<u8> {
        self.polled_data_mask.to_ne_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> RmResult<Self> {
        Ok(Self {
            polled_data_mask: ByteView::new(bytes).read_u64(0)?,
        })
    }
}

/// `NV0000_CTRL_SYSTEM_DEBUG_RMMSG_CTRL_PARAMS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmMsgCtrlParams {
    pub cmd: u32,
    pub count: u32,
    pub data: [u8; RMMSG_SIZE],
}

impl RmMsgCtrlParams {
    /// GET request with an empty buffer
    pub fn get() -> Self {
        Self {
            cmd: RMMSG_CTRL_CMD_GET,
            count: 0,
            data: [0u8; RMMSG_SIZE],
        }
    }

    /// SET request carrying `data`
    pub fn set(data: [u8; RMMSG_SIZE]) -> Self {
        Self {
            cmd: RMMSG_CTRL_CMD_SET,
            count: 0,
            data,
        }
    }
}

impl ParamBlock for RmMsgCtrlParams {
    const SIZE: usize = 8 + RMMSG_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u32_ne(self.cmd);
        buf.put_u32_ne(self.count);
        buf.put_slice(&self.data);
        buf
    }

    fn decode(bytes: &[u8]) -> RmResult<Self> {
        let view = ByteView::new(bytes);
        let mut data = [0u8; RMMSG_SIZE];
        data.copy_from_slice(view.slice(8, RMMSG_SIZE)?.as_bytes());
        Ok(Self {
            cmd: view.read_u32(0)?,
            count: view.read_u32(4)?,
            data,
        })
    }
}

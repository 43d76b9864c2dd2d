//! RUSD (user shared data) enablement

use super::params::{Nv00deAllocParams, ParamBlock};
use super::{RmDriver, RmHandle, RmSession};
use crate::error::RmResult;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `NV01_RM_USER_SHARED_DATA`
pub const NV01_RM_USER_SHARED_DATA: u32 = 0x00DE;

/// Default handle for the telemetry object
pub const DEFAULT_RUSD_HANDLE: RmHandle = RmHandle(0xabcd_00de);

/// Categories the driver keeps refreshed in the RUSD region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PollMask(pub u64);

impl PollMask {
    /// Clock domains
    pub const CLOCK: PollMask = PollMask(0x1);
    /// Performance / utilization
    pub const PERF: PollMask = PollMask(0x2);
    /// Memory info
    pub const MEMORY: PollMask = PollMask(0x4);
    /// Power limits
    pub const POWER: PollMask = PollMask(0x8);
    /// Temperatures
    pub const THERMAL: PollMask = PollMask(0x10);
    /// PCIe link
    pub const PCI: PollMask = PollMask(0x20);
    /// Every known category
    pub const ALL: PollMask = PollMask(0x3f);

    const NAMES: [(u64, &'static str); 6] = [
        (0x1, "CLOCK"),
        (0x2, "PERF"),
        (0x4, "MEMORY"),
        (0x8, "POWER"),
        (0x10, "THERMAL"),
        (0x20, "PCI"),
    ];

    /// Raw bitmask
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: PollMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the set bits; bits without a name come out as `BIT_<n>`
    pub fn categories(self) -> Vec<String> {
        (0..64)
            .filter(|bit| self.0 & (1u64 << bit) != 0)
            .map(|bit| {
                let flag = 1u64 << bit;
                Self::NAMES
                    .iter()
                    .find(|(value, _)| *value == flag)
                    .map(|(_, name)| name.to_string())
                    .unwrap_or_else(|| format!("BIT_{}", bit))
            })
            .collect()
    }
}

impl std::ops::BitOr for PollMask {
    type Output = PollMask;

    fn bitor(self, rhs: PollMask) -> PollMask {
        PollMask(self.0 | rhs.0)
    }
}

impl fmt::Display for PollMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Allocate a RUSD object under the session's subdevice polling `mask`
///
/// The object lives until the session's file descriptors are closed.
pub fn enable_telemetry<D: RmDriver>(
    session: &mut RmSession<D>,
    new_handle: RmHandle,
    mask: PollMask,
) -> RmResult<()> {
    let mut params = Nv00deAllocParams {
        polled_data_mask: mask.bits(),
    }
    .encode();
    let subdevice = session.subdevice();
    session.allocate(subdevice, new_handle, NV01_RM_USER_SHARED_DATA, &mut params)?;
    info!(
        "RUSD object {} polling {} [{}]",
        new_handle,
        mask,
        mask.categories().join(", ")
    );
    Ok(())
}

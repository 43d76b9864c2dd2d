//! # rmscope - NVIDIA Resource Manager introspection
//!
//! Userspace plumbing for poking at the NVIDIA kernel driver's Resource
//! Manager (RM) through its own ioctl interface, plus decoders for the
//! driver-internal structures that record what the GPU System Processor
//! (GSP) has been asked to do.
//!
//! ## Features
//!
//! - **RM sessions** over `/dev/nvidiactl` and `/dev/nvidiaN`
//! - **RmMsg debug filter** replace and byte-exact restore
//! - **RUSD telemetry** enablement and region decoding
//! - **GSP RPC history** ring decoding in chronological order
//! - **Per-release offset tables** selected at compile time
//!
//! ## Quick Start
//!
//! ```no_run
//! use rmscope::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = RmSession::open(&SessionConfig::default())?;
//!     let mut filter = DebugFilter::new();
//!     let change = filter.replace(&mut session, &"gsp".parse()?)?;
//!     println!("was '{}'", change.previous);
//!     filter.restore(&mut session)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod introspect;
pub mod memory;
pub mod offsets;
pub mod rm;
pub mod shutdown;

// Re-export main API for easy access
pub use error::{RmError, RmOperation, RmResult};
pub use introspect::{RingBufferSnapshot, RpcHistoryEntry, TelemetryRegion};
pub use memory::MemoryReader;
pub use offsets::{DriverVersion, OffsetTable};
pub use rm::filter::{DebugFilter, FilterString};
pub use rm::telemetry::{enable_telemetry, PollMask};
pub use rm::{RmDriver, RmHandle, RmSession, SessionConfig};
pub use shutdown::ShutdownSignal;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
///
/// # Example
///
/// ```no_run
/// println!("Using rmscope v{} for driver {}", rmscope::version(), rmscope::driver_version());
/// ```
pub fn version() -> &'static str {
    VERSION
}

/// Driver release the offset table was built for
pub fn driver_version() -> DriverVersion {
    DriverVersion::ACTIVE
}


/// Prelude module for convenient imports
///
/// # Example
///
/// ```no_run
/// use rmscope::prelude::*;
///
/// let table = OffsetTable::active();
/// println!("{}", table.version);
/// ```
pub mod prelude {
    pub use crate::error::{RmError, RmResult};
    pub use crate::introspect::{snapshot_history, snapshot_telemetry, Resolution};
    pub use crate::offsets::{DriverVersion, OffsetTable};
    pub use crate::rm::filter::{DebugFilter, FilterString};
    pub use crate::rm::telemetry::{enable_telemetry, PollMask, DEFAULT_RUSD_HANDLE};
    pub use crate::rm::{RmHandle, RmSession, SessionConfig};
    pub use crate::{driver_version, version};
}

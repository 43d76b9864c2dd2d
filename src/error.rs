//! Error types for the rmscope library

use std::io;
use thiserror::Error;

/// Driver operation that produced a protocol error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmOperation {
    /// NV_ESC_RM_ALLOC for the given class
    Alloc {
        /// Class identifier passed to the driver
        class: u32,
    },
    /// NV_ESC_RM_CONTROL with the given command
    Control {
        /// Control command code
        cmd: u32,
    },
}

impl std::fmt::Display for RmOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RmOperation::Alloc { class } => write!(f, "NvRmAlloc (hClass=0x{:04x})", class),
            RmOperation::Control { cmd } => write!(f, "NvRmControl 0x{:08x}", cmd),
        }
    }
}

/// Main error type for rmscope operations
#[derive(Error, Debug)]
pub enum RmError {
    /// Driver device node does not exist
    #[error("Device node not found: {0}")]
    NoDevice(String),

    /// Failed to open a device node
    #[error("Failed to open {path}")]
    DeviceOpen {
        /// Node that could not be opened
        path: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// System permission error
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The ioctl itself failed in the OS
    #[error("{op} failed in OS")]
    Ioctl {
        /// Failing request
        op: RmOperation,
        /// Underlying OS error
        source: io::Error,
    },

    /// The ioctl reached the driver but RM returned a non-zero status
    #[error("{op} failed in RM: 0x{status:08x}")]
    RmStatus {
        /// Failing request
        op: RmOperation,
        /// Embedded RM status code
        status: u32,
    },

    /// Debug filter string does not fit the driver's buffer
    #[error("RmMsg filter is {len} bytes, the driver accepts at most {max}")]
    FilterTooLong {
        /// Supplied length
        len: usize,
        /// Buffer capacity
        max: usize,
    },

    /// Driver release without a compiled-in offset table
    #[error("Unsupported driver version: {0}")]
    UnsupportedDriver(String),

    /// The active offset table carries no telemetry layout
    #[error("Driver {0} has no known RUSD layout")]
    TelemetryUnsupported(String),

    /// Foreign memory could not be read
    #[error("Failed to read {len} bytes at 0x{address:016x}: {reason}")]
    MemoryRead {
        /// Start address of the read
        address: u64,
        /// Requested length
        len: usize,
        /// What went wrong
        reason: String,
    },

    /// A typed access fell outside a captured buffer
    #[error("Offset {offset} + {width} exceeds buffer of {len} bytes")]
    OutOfBounds {
        /// Requested offset
        offset: usize,
        /// Width of the access
        width: usize,
        /// Buffer length
        len: usize,
    },

    /// Signal handler could not be installed
    #[error("Failed to install signal handler: {0}")]
    Signal(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<io::Error> for RmError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => RmError::Permission(err.to_string()),
            io::ErrorKind::NotFound => RmError::NoDevice(err.to_string()),
            _ => RmError::DeviceOpen {
                path: String::from("<unknown>"),
                source: err,
            },
        }
    }
}

impl RmError {
    /// Attach the node path to an error raised while opening it
    pub(crate) fn opening(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => RmError::Permission(format!("{}: {}", path, err)),
            io::ErrorKind::NotFound => RmError::NoDevice(path.to_string()),
            _ => RmError::DeviceOpen {
                path: path.to_string(),
                source: err,
            },
        }
    }

    /// Whether the error came from the environment rather than the protocol
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            RmError::NoDevice(_) | RmError::DeviceOpen { .. } | RmError::Permission(_)
        )
    }
}

/// Result type for rmscope operations
pub type RmResult<T> = std::result::Result<T, RmError>;

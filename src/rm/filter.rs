//! RmMsg debug filter controller
//!
//! The driver keeps a single process-wide filter string deciding which
//! internal debug prints reach the kernel log. [`DebugFilter`] swaps it for
//! the caller's value and puts the captured one back exactly once.

use super::params::{
    ParamBlock, RmMsgCtrlParams, NV0000_CTRL_CMD_SYSTEM_DEBUG_RMMSG_CTRL, RMMSG_SIZE,
};
use super::{ParamsDirection, RmDriver, RmSession};
use crate::error::{RmError, RmResult};
use log::{info, warn};
use std::fmt;
use std::str::FromStr;

/// Contents of the driver's RmMsg buffer
///
/// Always the full fixed-size buffer, zero padded, so a captured value can be
/// written back byte for byte.
#[derive(Clone, PartialEq, Eq)]
pub struct FilterString {
    data: [u8; RMMSG_SIZE],
}

impl FilterString {
    /// Filter from raw bytes; at most [`RMMSG_SIZE`] bytes, any content
    pub fn from_bytes(bytes: &[u8]) -> RmResult<Self> {
        if bytes.len() > RMMSG_SIZE {
            return Err(RmError::FilterTooLong {
                len: bytes.len(),
                max: RMMSG_SIZE,
            });
        }
        let mut data = [0u8; RMMSG_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { data })
    }

    /// Wrap a buffer read from the driver
    pub fn from_wire(data: [u8; RMMSG_SIZE]) -> Self {
        Self { data }
    }

    /// Full wire buffer
    pub fn as_wire(&self) -> &[u8; RMMSG_SIZE] {
        &self.data
    }

    /// Bytes up to the first NUL, as the driver interprets them
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.data.iter().position(|&b| b == 0).unwrap_or(RMMSG_SIZE);
        &self.data[..end]
    }

    /// Whether the filter is empty (all rules disabled)
    pub fn is_empty(&self) -> bool {
        self.data[0] == 0
    }
}

impl Default for FilterString {
    fn default() -> Self {
        Self {
            data: [0u8; RMMSG_SIZE],
        }
    }
}

impl FromStr for FilterString {
    type Err = RmError;

    fn from_str(s: &str) -> RmResult<Self> {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Display for FilterString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for FilterString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterString({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Previous and new filter after a replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChange {
    /// Filter active before the replacement
    pub previous: FilterString,
    /// Filter now active
    pub applied: FilterString,
}

/// Controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterState {
    /// Driver filter untouched
    Idle,
    /// Driver filter replaced; `previous` must be written back
    Replaced {
        /// Captured filter
        previous: FilterString,
    },
    /// Captured filter written back
    Restored,
}

/// Replace-and-restore controller for the driver's RmMsg filter
#[derive(Debug)]
pub struct DebugFilter {
    state: FilterState,
}

impl Default for DebugFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugFilter {
    /// Controller in the `Idle` state
    pub fn new() -> Self {
        Self {
            state: FilterState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> &FilterState {
        &self.state
    }

    /// Read the driver's current filter
    pub fn read<D: RmDriver>(session: &mut RmSession<D>) -> RmResult<FilterString> {
        let mut block = RmMsgCtrlParams::get().encode();
        let client = session.client();
        session.control(
            client,
            NV0000_CTRL_CMD_SYSTEM_DEBUG_RMMSG_CTRL,
            &mut block,
            ParamsDirection::InOut,
        )?;
        Ok(FilterString::from_wire(RmMsgCtrlParams::decode(&block)?.data))
    }

    fn write<D: RmDriver>(session: &mut RmSession<D>, filter: &FilterString) -> RmResult<()> {
        let mut block = RmMsgCtrlParams::set(*filter.as_wire()).encode();
        let client = session.client();
        session.control(
            client,
            NV0000_CTRL_CMD_SYSTEM_DEBUG_RMMSG_CTRL,
            &mut block,
            ParamsDirection::In,
        )
    }

    /// Capture the current filter and install `filter`
    ///
    /// Replacing again while already `Replaced` keeps the first capture, so a
    /// later [`restore`](Self::restore) always returns to the original value.
    pub fn replace<D: RmDriver>(
        &mut self,
        session: &mut RmSession<D>,
        filter: &FilterString,
    ) -> RmResult<FilterChange> {
        let previous = match &self.state {
            FilterState::Replaced { previous } => previous.clone(),
            FilterState::Idle | FilterState::Restored => Self::read(session)?,
        };
        Self::write(session, filter)?;
        info!("RmMsg filter '{}' -> '{}'", previous, filter);
        self.state = FilterState::Replaced {
            previous: previous.clone(),
        };
        Ok(FilterChange {
            previous,
            applied: filter.clone(),
        })
    }

    /// Write the captured filter back
    ///
    /// Returns the restored filter, or `None` when nothing was replaced. The
    /// state leaves `Replaced` before the driver call, so a failed restore is
    /// reported once and never retried.
    pub fn restore<D: RmDriver>(
        &mut self,
        session: &mut RmSession<D>,
    ) -> RmResult<Option<FilterString>> {
        let previous = match std::mem::replace(&mut self.state, FilterState::Restored) {
            FilterState::Replaced { previous } => previous,
            other => {
                self.state = other;
                return Ok(None);
            }
        };
        Self::write(session, &previous)?;
        info!("RmMsg filter restored to '{}'", previous);
        Ok(Some(previous))
    }
}

impl Drop for DebugFilter {
    fn drop(&mut self) {
        if let FilterState::Replaced { previous } = &self.state {
            warn!(
                "RmMsg filter dropped without restore; driver keeps the replacement instead of '{}'",
                previous
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rm::fake::FakeDriver;
    use crate::rm::SessionConfig;
    use pretty_assertions::assert_eq;

    fn session_with(initial: &[u8]) -> RmSession<FakeDriver> {
        RmSession::with_driver(FakeDriver::with_rmmsg(initial), &SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_replace_then_restore() {
        let mut session = session_with(b"1");
        let mut filter = DebugFilter::new();

        let wanted: FilterString = "(comm==\"nvidia-smi\")".parse().unwrap();
        let change = filter.replace(&mut session, &wanted).unwrap();
        assert_eq!(change.previous.to_string(), "1");
        assert_eq!(change.applied, wanted);
        assert_eq!(&session.driver().rmmsg[..], &wanted.as_wire()[..]);

        let restored = filter.restore(&mut session).unwrap();
        assert_eq!(restored.map(|f| f.to_string()), Some("1".to_string()));
        assert_eq!(&session.driver().rmmsg[..2], b"1\0");
        assert_eq!(filter.state(), &FilterState::Restored);
    }

    #[test]
    fn test_restore_is_byte_exact_for_any_content() {
        let mut original = [0u8; RMMSG_SIZE];
        for (i, b) in original.iter_mut().enumerate() {
            *b = (i * 7 % 256) as u8;
        }
        let lengths = [0usize, 1, 17, RMMSG_SIZE - 1, RMMSG_SIZE];
        for len in lengths {
            let mut session = session_with(&original);
            let mut filter = DebugFilter::new();
            let replacement: Vec<u8> = (0..len).map(|i| (i % 3) as u8 | 0x80).collect();
            let replacement = FilterString::from_bytes(&replacement).unwrap();

            filter.replace(&mut session, &replacement).unwrap();
            filter.restore(&mut session).unwrap();
            assert_eq!(&session.driver().rmmsg[..], &original[..], "length {}", len);
        }
    }

    #[test]
    fn test_restore_runs_once() {
        let mut session = session_with(b"2");
        let mut filter = DebugFilter::new();
        filter
            .replace(&mut session, &FilterString::from_bytes(b"").unwrap())
            .unwrap();
        let calls = session.driver().control_calls;

        assert!(filter.restore(&mut session).unwrap().is_some());
        assert!(filter.restore(&mut session).unwrap().is_none());
        assert_eq!(session.driver().control_calls, calls + 1);
    }

    #[test]
    fn test_restore_without_replace_touches_nothing() {
        let mut session = session_with(b"1");
        let mut filter = DebugFilter::new();
        assert!(filter.restore(&mut session).unwrap().is_none());
        assert_eq!(filter.state(), &FilterState::Idle);
        assert_eq!(session.driver().control_calls, 0);
    }

    #[test]
    fn test_second_replace_keeps_first_capture() {
        let mut session = session_with(b"orig");
        let mut filter = DebugFilter::new();
        filter.replace(&mut session, &"a".parse().unwrap()).unwrap();
        let change = filter.replace(&mut session, &"b".parse().unwrap()).unwrap();
        assert_eq!(change.previous.to_string(), "orig");
        filter.restore(&mut session).unwrap();
        assert_eq!(&session.driver().rmmsg[..5], b"orig\0");
    }

    #[test]
    fn test_filter_length_limit() {
        assert!(FilterString::from_bytes(&[b'x'; RMMSG_SIZE]).is_ok());
        assert!(matches!(
            FilterString::from_bytes(&[b'x'; RMMSG_SIZE + 1]),
            Err(RmError::FilterTooLong { len: 513, max: 512 })
        ));
    }
}

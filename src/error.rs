// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Failures visible to application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A blocking send made no progress before `SEND_TIMEOUT_MS` elapsed.
    /// Whatever that call had queued but not yet handed to hardware is gone.
    Timeout,
    /// Endpoint number out of range.
    InvalidEndpoint,
    /// Endpoint 0 belongs to the control engine and can't be used as a
    /// byte stream.
    ControlEndpoint,
    /// The host hasn't raised DTR, so nobody is listening.
    LineInactive,
    /// The host hasn't selected a configuration yet.
    NotConfigured,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "send timed out"),
            Error::InvalidEndpoint => write!(f, "no such endpoint"),
            Error::ControlEndpoint => write!(f, "endpoint 0 is reserved for control transfers"),
            Error::LineInactive => write!(f, "line inactive (DTR clear)"),
            Error::NotConfigured => write!(f, "device not configured"),
        }
    }
}

/// Reasons endpoint 0 stalls. These never reach application code; the
/// control engine logs them and answers the host with STALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The hardware reported a SETUP packet that wasn't 8 bytes.
    BadSetupLength(usize),
    /// Nobody recognized the request.
    Unsupported,
    /// A control write longer than the static control buffer.
    PayloadTooLarge(u16),
    /// A class driver looked at the data stage and refused it.
    Rejected,
    /// The configuration descriptor didn't fit the control buffer; this
    /// many bytes were asked for.
    DescriptorTooLarge(u16),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::BadSetupLength(n) => write!(f, "SETUP packet of {} bytes", n),
            ControlError::Unsupported => write!(f, "unsupported request"),
            ControlError::PayloadTooLarge(n) => write!(f, "control write of {} bytes too large", n),
            ControlError::Rejected => write!(f, "request rejected"),
            ControlError::DescriptorTooLarge(n) => {
                write!(f, "configuration descriptor of {} bytes doesn't fit", n)
            }
        }
    }
}

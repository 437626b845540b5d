/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

use std::fmt;

/// The value a transport is allowed to put on the wire when it has no status
/// of its own to report. Maps to `RpcStatusCode::Unspecified` and back.
pub const WIRE_STATUS_SENTINEL: i32 = -1;

/// Status codes delivered on the error channel of every sender produced by
/// the runtime. The first seventeen match the transport's wire codes one to
/// one; `LogicError` and `Unspecified` exist only on this side of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcStatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    LogicError,
    Unspecified,
}

// Implementation of methods on RpcStatusCode.
impl RpcStatusCode {
    /// Converts a wire status code into a runtime status code. This
    /// conversion is total: the sentinel becomes `Unspecified`, and any
    /// value the runtime does not recognize becomes `Unknown`.
    ///
    /// # Arguments
    ///
    /// * `code`: The signed status code as carried on the wire.
    ///
    /// # Return
    ///
    /// The equivalent `RpcStatusCode`.
    pub fn from_wire(code: i32) -> RpcStatusCode {
        match code {
            0 => RpcStatusCode::Ok,
            1 => RpcStatusCode::Cancelled,
            2 => RpcStatusCode::Unknown,
            3 => RpcStatusCode::InvalidArgument,
            4 => RpcStatusCode::DeadlineExceeded,
            5 => RpcStatusCode::NotFound,
            6 => RpcStatusCode::AlreadyExists,
            7 => RpcStatusCode::PermissionDenied,
            8 => RpcStatusCode::ResourceExhausted,
            9 => RpcStatusCode::FailedPrecondition,
            10 => RpcStatusCode::Aborted,
            11 => RpcStatusCode::OutOfRange,
            12 => RpcStatusCode::Unimplemented,
            13 => RpcStatusCode::Internal,
            14 => RpcStatusCode::Unavailable,
            15 => RpcStatusCode::DataLoss,
            16 => RpcStatusCode::Unauthenticated,
            WIRE_STATUS_SENTINEL => RpcStatusCode::Unspecified,
            _ => RpcStatusCode::Unknown,
        }
    }

    /// Converts this code into its wire representation. `Unspecified` maps
    /// to the sentinel; `LogicError` has no wire equivalent and travels as
    /// `Internal`.
    pub fn to_wire(self) -> i32 {
        match self {
            RpcStatusCode::Ok => 0,
            RpcStatusCode::Cancelled => 1,
            RpcStatusCode::Unknown => 2,
            RpcStatusCode::InvalidArgument => 3,
            RpcStatusCode::DeadlineExceeded => 4,
            RpcStatusCode::NotFound => 5,
            RpcStatusCode::AlreadyExists => 6,
            RpcStatusCode::PermissionDenied => 7,
            RpcStatusCode::ResourceExhausted => 8,
            RpcStatusCode::FailedPrecondition => 9,
            RpcStatusCode::Aborted => 10,
            RpcStatusCode::OutOfRange => 11,
            RpcStatusCode::Unimplemented => 12,
            RpcStatusCode::Internal => 13,
            RpcStatusCode::Unavailable => 14,
            RpcStatusCode::DataLoss => 15,
            RpcStatusCode::Unauthenticated => 16,
            RpcStatusCode::LogicError => 13,
            RpcStatusCode::Unspecified => WIRE_STATUS_SENTINEL,
        }
    }

    /// Returns the canonical human-readable description of this code.
    pub fn message(self) -> &'static str {
        match self {
            RpcStatusCode::Ok => "Success",
            RpcStatusCode::Cancelled => "The operation was cancelled, typically by the caller",
            RpcStatusCode::Unknown => "Unknown error",
            RpcStatusCode::InvalidArgument => "The client specified an invalid argument",
            RpcStatusCode::DeadlineExceeded => {
                "The deadline expired before the operation could complete"
            }
            RpcStatusCode::NotFound => "Some requested entity was not found",
            RpcStatusCode::AlreadyExists => {
                "The entity that the client attempted to create already exists"
            }
            RpcStatusCode::PermissionDenied => "Permission denied",
            RpcStatusCode::ResourceExhausted => {
                "Some resource has been exhausted, perhaps a per-user quota"
            }
            RpcStatusCode::FailedPrecondition => {
                "The operation was rejected because the system is not in a state required for \
                 the operation's execution"
            }
            RpcStatusCode::Aborted => "The operation was aborted",
            RpcStatusCode::OutOfRange => {
                "The operation was attempted past a valid range of some kind"
            }
            RpcStatusCode::Unimplemented => {
                "The operation is not implemented or is not supported/enabled in this service"
            }
            RpcStatusCode::Internal => {
                "Internal error; some invariants expected by the underlying system have been \
                 broken"
            }
            RpcStatusCode::Unavailable => "The service is currently unavailable",
            RpcStatusCode::DataLoss => "Unrecoverable data loss or corruption",
            RpcStatusCode::Unauthenticated => "Unauthenticated access",
            RpcStatusCode::LogicError => "A user-supplied function failed",
            RpcStatusCode::Unspecified => "Some unspecified error",
        }
    }
}

/// The status delivered on the error channel of every sender the runtime
/// produces. A plain value type; cheap to clone and move across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    // The status code. `Ok` statuses are never delivered as errors; they
    // exist so that a status can also describe a successful completion.
    code: RpcStatusCode,

    // Free-form details attached at the point the error was raised. May be
    // empty, in which case the canonical code message stands alone.
    details: String,
}

// Implementation of methods on RpcStatus.
impl RpcStatus {
    /// Returns a status carrying `code` and no details.
    pub fn new(code: RpcStatusCode) -> RpcStatus {
        RpcStatus {
            code: code,
            details: String::new(),
        }
    }

    /// Returns a status carrying `code` and the supplied details.
    ///
    /// # Arguments
    ///
    /// * `code`:    The status code.
    /// * `details`: Free-form human-readable details describing the cause.
    pub fn with_details<S: Into<String>>(code: RpcStatusCode, details: S) -> RpcStatus {
        RpcStatus {
            code: code,
            details: details.into(),
        }
    }

    /// Returns the `Ok` status.
    pub fn ok() -> RpcStatus {
        RpcStatus::new(RpcStatusCode::Ok)
    }

    /// Returns the status code.
    #[inline]
    pub fn code(&self) -> RpcStatusCode {
        self.code
    }

    /// Returns true if this status represents success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == RpcStatusCode::Ok
    }

    /// Returns the details attached to this status. May be empty.
    #[inline]
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Returns the canonical description of this status' code.
    #[inline]
    pub fn error_message(&self) -> &'static str {
        self.code.message()
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{:?}: {}", self.code, self.code.message())
        } else {
            write!(f, "{:?}: {}", self.code, self.details)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every wire code except the sentinel must survive a round trip through
    // the runtime taxonomy unchanged.
    #[test]
    fn wire_codes_round_trip() {
        for code in 0..=16 {
            assert_eq!(RpcStatusCode::from_wire(code).to_wire(), code);
        }
    }

    #[test]
    fn sentinel_maps_to_unspecified_and_back() {
        assert_eq!(
            RpcStatusCode::from_wire(WIRE_STATUS_SENTINEL),
            RpcStatusCode::Unspecified
        );
        assert_eq!(RpcStatusCode::Unspecified.to_wire(), WIRE_STATUS_SENTINEL);
    }

    #[test]
    fn unrecognized_wire_codes_become_unknown() {
        assert_eq!(RpcStatusCode::from_wire(17), RpcStatusCode::Unknown);
        assert_eq!(RpcStatusCode::from_wire(9999), RpcStatusCode::Unknown);
        assert_eq!(RpcStatusCode::from_wire(-2), RpcStatusCode::Unknown);
    }

    #[test]
    fn logic_error_travels_as_internal() {
        assert_eq!(
            RpcStatusCode::LogicError.to_wire(),
            RpcStatusCode::Internal.to_wire()
        );
    }

    #[test]
    fn status_accessors() {
        let status = RpcStatus::with_details(RpcStatusCode::NotFound, "no such key");
        assert!(!status.is_ok());
        assert_eq!(status.code(), RpcStatusCode::NotFound);
        assert_eq!(status.details(), "no such key");
        assert!(RpcStatus::ok().is_ok());
    }
}

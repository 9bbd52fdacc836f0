//! Closed result taxonomy shared by every fallible operation.
//!
//! Success is `Ok(..)`; every other outcome is a [`ReplyCode`]. Each code has a
//! stable nonzero integer used at the C boundary, where `0` means success.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Reply<T> = Result<T, ReplyCode>;

/// Numeric value reported for success at the C boundary.
pub const REPLY_OK: i32 = 0;

/// Non-success outcome of an operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    /// The backend cannot service this size; the router falls back.
    #[error("size class not serviceable")]
    RangeFail,
    /// The pointer was not produced by the allocator that was asked.
    #[error("pointer not owned by this allocator")]
    NotFound,
    #[error("component used before initialization")]
    Uninitialized,
    /// A bootstrap precondition was violated by the caller.
    #[error("inconsistent state")]
    Inconsistent,
    #[error("unsupported operation or platform")]
    Unsupported,
    /// An underlying platform primitive failed or is missing.
    #[error("platform primitive failed")]
    CrtFail,
    #[error("internal structure failed a validity check")]
    Corrupt,
    /// Memory could not be obtained.
    #[error("resource allocation failed")]
    ResourceFail,
    #[error("insane state")]
    Insane,
    #[error("disallowed argument or state")]
    Disallowed,
}

impl ReplyCode {
    pub const ALL: [ReplyCode; 10] = [
        ReplyCode::RangeFail,
        ReplyCode::NotFound,
        ReplyCode::Uninitialized,
        ReplyCode::Inconsistent,
        ReplyCode::Unsupported,
        ReplyCode::CrtFail,
        ReplyCode::Corrupt,
        ReplyCode::ResourceFail,
        ReplyCode::Insane,
        ReplyCode::Disallowed,
    ];

    /// Stable integer surfaced through errno and C return values.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            ReplyCode::RangeFail => 1,
            ReplyCode::NotFound => 2,
            ReplyCode::Uninitialized => 3,
            ReplyCode::Inconsistent => 4,
            ReplyCode::Unsupported => 5,
            ReplyCode::CrtFail => 6,
            ReplyCode::Corrupt => 7,
            ReplyCode::ResourceFail => 8,
            ReplyCode::Insane => 9,
            ReplyCode::Disallowed => 10,
        }
    }

    /// Inverse of [`ReplyCode::code`]. Returns `None` for `0` and unknown values.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Short stable identifier, used in structured logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ReplyCode::RangeFail => "range_fail",
            ReplyCode::NotFound => "not_found",
            ReplyCode::Uninitialized => "uninitialized",
            ReplyCode::Inconsistent => "inconsistent",
            ReplyCode::Unsupported => "unsupported",
            ReplyCode::CrtFail => "crt_fail",
            ReplyCode::Corrupt => "corrupt",
            ReplyCode::ResourceFail => "resource_fail",
            ReplyCode::Insane => "insane",
            ReplyCode::Disallowed => "disallowed",
        }
    }
}

/// Collapse a reply into its C integer form.
#[must_use]
pub fn reply_to_code<T>(reply: &Reply<T>) -> i32 {
    match reply {
        Ok(_) => REPLY_OK,
        Err(code) => code.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_nonzero() {
        for (i, a) in ReplyCode::ALL.iter().enumerate() {
            assert_ne!(a.code(), REPLY_OK);
            for b in &ReplyCode::ALL[i + 1..] {
                assert_ne!(a.code(), b.code(), "{a:?} and {b:?} share a code");
            }
        }
    }

    #[test]
    fn from_code_inverts_code() {
        for c in ReplyCode::ALL {
            assert_eq!(ReplyCode::from_code(c.code()), Some(c));
        }
        assert_eq!(ReplyCode::from_code(REPLY_OK), None);
        assert_eq!(ReplyCode::from_code(-1), None);
    }

    #[test]
    fn reply_to_code_maps_ok_to_zero() {
        assert_eq!(reply_to_code(&Ok::<u8, ReplyCode>(3)), 0);
        assert_eq!(reply_to_code::<()>(&Err(ReplyCode::CrtFail)), 6);
    }
}

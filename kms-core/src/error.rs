/*
 * Copyright (C) 2021-2024 The KMS Core Developers.
 *
 * This file is part of KMS Core.
 *
 * KMS Core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * KMS Core is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with KMS Core. If not, see <https://www.gnu.org/licenses/>.
 */

use std::fmt;

use kms_uapi::WireError;

/// Crate-wide error type. Every fallible core operation returns this; the lane server
/// translates it to a [`WireError`] for the `error` field of a response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Property validation failure, malformed request flags, out-of-range `pollWait`
    /// sequence, bad bpp/depth pair in legacy format conversion.
    InvalidArgument(&'static str),
    /// Object, blob, handle, or credential lookup miss.
    NotFound(&'static str),
    /// Non-blocking read against an empty event queue.
    WouldBlock,
    /// Unknown request or truncated buffer at the lane-protocol layer.
    Protocol(&'static str),
    /// Invariant violation. Only ever raised over data the crate itself produced; never
    /// for client input.
    Fatal(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::WouldBlock => write!(f, "would block"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<&Error> for WireError {
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidArgument(_) => WireError::InvalidArgument,
            Error::NotFound(_) => WireError::NotFound,
            Error::WouldBlock => WireError::WouldBlock,
            Error::Protocol(_) => WireError::Protocol,
            Error::Fatal(_) => WireError::Fatal,
        }
    }
}

impl From<Error> for WireError {
    fn from(error: Error) -> Self {
        WireError::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_converts_to_a_distinct_wire_error() {
        let kinds = [
            Error::InvalidArgument("x"),
            Error::NotFound("x"),
            Error::WouldBlock,
            Error::Protocol("x"),
            Error::Fatal("x"),
        ];
        let wire: Vec<WireError> = kinds.iter().map(WireError::from).collect();
        assert_eq!(wire, vec![
            WireError::InvalidArgument,
            WireError::NotFound,
            WireError::WouldBlock,
            WireError::Protocol,
            WireError::Fatal,
        ]);
    }
}

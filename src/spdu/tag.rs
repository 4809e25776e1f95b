// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Helpers for encoding / decoding the first byte of every **Session
//! Protocol Data Unit** (SPDU).
//!
//! The byte layout is defined by EN 50221 § 8.4:
//!
//! ```text
//! +-----------+-----------+----------------------+
//! |  tag (1)  |  len (1)  |  body (len bytes)    |
//! +-----------+-----------+----------------------+
//! ```
//!
//! The length field is the ASN.1 short form only; EN 50221 never uses the
//! long form at the session layer, so one byte is all there is.

use std::convert::TryFrom;

use thiserror::Error;

/// All session-layer tags defined by EN 50221 § 8.4.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SpduTag {
    /// Data SPDU carrying an APDU for an open session.
    #[default]
    SessionNumber = 0x90,
    /// Module asks the host to open a session to a resource.
    OpenSessionRequest = 0x91,
    /// Host answers an `OpenSessionRequest`.
    OpenSessionResponse = 0x92,
    /// Host asks the module to create a session.
    CreateSession = 0x93,
    /// Module answers a `CreateSession`.
    CreateSessionResponse = 0x94,
    /// Either side asks to close a session.
    CloseSessionRequest = 0x95,
    /// Answer to a `CloseSessionRequest`.
    CloseSessionResponse = 0x96,
}

impl SpduTag {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x90 => Self::SessionNumber,
            0x91 => Self::OpenSessionRequest,
            0x92 => Self::OpenSessionResponse,
            0x93 => Self::CreateSession,
            0x94 => Self::CreateSessionResponse,
            0x95 => Self::CloseSessionRequest,
            0x96 => Self::CloseSessionResponse,
            _ => return None,
        })
    }

    /// Length-field value for the fixed-size tags.
    ///
    /// `SessionNumber` also reports 2: its length byte covers only the
    /// session number, the APDU runs to the end of the transport payload.
    #[inline]
    pub const fn body_len(&self) -> usize {
        match self {
            Self::SessionNumber => 2,
            Self::OpenSessionRequest => 4,
            Self::OpenSessionResponse => 7,
            Self::CreateSession => 6,
            Self::CreateSessionResponse => 7,
            Self::CloseSessionRequest => 2,
            Self::CloseSessionResponse => 3,
        }
    }
}

/// Returned when the first byte holds an undefined tag.
#[derive(Debug, Error)]
#[error("invalid spdu tag: 0x{0:02x}")]
pub struct UnknownTag(pub u8);

impl TryFrom<u8> for SpduTag {
    type Error = UnknownTag;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_u8(byte).ok_or(UnknownTag(byte))
    }
}

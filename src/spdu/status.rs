// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session status byte carried by `OpenSessionResponse`,
//! `CreateSessionResponse` and `CloseSessionResponse`.

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Session status values defined by EN 50221 § 8.4.1.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session opened.
    #[default]
    Open = 0x00,
    /// Closed: the requested resource does not exist.
    CloseNoResource = 0xF0,
    /// Closed: the resource exists but is unavailable.
    CloseResourceUnavailable = 0xF1,
    /// Closed: the resource exists only in a lower version.
    CloseResourceLowVersion = 0xF2,
    /// Closed: the resource is busy.
    CloseResourceBusy = 0xF3,
}

impl SessionStatus {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Open,
            0xF0 => Self::CloseNoResource,
            0xF1 => Self::CloseResourceUnavailable,
            0xF2 => Self::CloseResourceLowVersion,
            0xF3 => Self::CloseResourceBusy,
            _ => return None,
        })
    }

    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Wire-safe status octet. Transparent over `u8`, so it can live inside a
/// zerocopy SPDU body struct even when a module sends a value we do not
/// know.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawStatus(u8);

impl RawStatus {
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn known(&self) -> Option<SessionStatus> {
        SessionStatus::from_u8(self.0)
    }
}

impl From<SessionStatus> for RawStatus {
    fn from(s: SessionStatus) -> Self {
        Self(s as u8)
    }
}

impl fmt::Debug for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(s) => write!(f, "{s:?}"),
            None => write!(f, "RawStatus(0x{:02X})", self.0),
        }
    }
}

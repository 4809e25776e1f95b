// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session lifecycle states.

/// State of one session slot.
///
/// Transitions are exclusive; a slot is in exactly one state at a time:
///
/// ```text
/// Idle ── allocate ──► InCreation ── peer confirms ──► Active
/// Active ── destroy_session ──► InDeletion ── peer confirms ──► Idle
/// Active ── peer close request ──► Idle
/// any    ── connection / slot close ──► Idle
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Slot is free; no field of the session is meaningful.
    #[default]
    Idle,
    /// Allocated, waiting for the peer to confirm creation.
    InCreation,
    /// Open for data in both directions.
    Active,
    /// Close requested, waiting for the peer to confirm.
    InDeletion,
}

impl SessionState {
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// States a `CloseSessionRequest` (ours or the peer's) may act on.
    #[inline]
    pub const fn is_closable(&self) -> bool {
        matches!(self, Self::Active | Self::InDeletion)
    }
}

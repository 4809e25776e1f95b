// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-size pool of session slots.
//!
//! The table is plain data: all locking lives in the session layer, which
//! guards the whole table with one mutex. A session's number is its index
//! in the pool and never changes.

use std::sync::Arc;

use crate::{
    resource::ResourceId,
    session::{callbacks::ResourceHandler, state::SessionState},
};

/// One slot of the session pool.
pub struct Session {
    pub state: SessionState,
    /// Resource the session is bound to. Meaningful only when non-Idle.
    pub resource_id: ResourceId,
    /// Physical CI slot the session lives on.
    pub slot: u8,
    /// Logical transport connection within that slot.
    pub connection: u8,
    /// Sink for inbound APDUs on this session.
    pub handler: Option<Arc<dyn ResourceHandler>>,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            resource_id: ResourceId::default(),
            slot: 0,
            connection: 0,
            handler: None,
        }
    }

    /// Return the slot to Idle, clearing every field so a stale identity
    /// can never satisfy a later match.
    pub fn reset(&mut self) {
        *self = Self::idle();
    }

    /// Non-Idle and bound to the given transport connection.
    pub fn on_connection(&self, slot: u8, connection: u8) -> bool {
        !self.state.is_idle() && self.slot == slot && self.connection == connection
    }

    /// Non-Idle and bound to the given CI slot.
    pub fn on_slot(&self, slot: u8) -> bool {
        !self.state.is_idle() && self.slot == slot
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("resource_id", &self.resource_id)
            .field("slot", &self.slot)
            .field("connection", &self.connection)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// The session pool. Size is fixed at construction; the wire carries
/// 16-bit session numbers, so it can never exceed 65 535 entries (and
/// index `0xFFFF` stays reserved for "no session").
#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Session>,
}

impl SessionTable {
    pub fn new(max_sessions: u16) -> Self {
        let mut slots = Vec::with_capacity(max_sessions as usize);
        slots.resize_with(max_sessions as usize, Session::idle);
        Self { slots }
    }

    #[inline]
    pub fn len(&self) -> u16 {
        self.slots.len() as u16
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Claim the lowest-numbered Idle slot, moving it to `InCreation`.
    /// Returns `None` when every slot is taken.
    pub fn allocate(&mut self) -> Option<u16> {
        let n = self.slots.iter().position(|s| s.state.is_idle())?;
        self.slots[n].state = SessionState::InCreation;
        Some(n as u16)
    }

    #[inline]
    pub fn get(&self, session_number: u16) -> Option<&Session> {
        self.slots.get(session_number as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, session_number: u16) -> Option<&mut Session> {
        self.slots.get_mut(session_number as usize)
    }

    /// Return a slot to Idle. Safe in any state; out-of-range numbers are
    /// ignored.
    pub fn release(&mut self, session_number: u16) {
        if let Some(s) = self.slots.get_mut(session_number as usize) {
            s.reset();
        }
    }

    /// All non-Idle sessions bound to `(slot, connection)`, ascending by
    /// session number.
    pub fn iter_connection(
        &self,
        slot: u8,
        connection: u8,
    ) -> impl Iterator<Item = (u16, &Session)> {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.on_connection(slot, connection))
            .map(|(n, s)| (n as u16, s))
    }

    /// All non-Idle sessions bound to `slot`, ascending by session number.
    pub fn iter_slot(&self, slot: u8) -> impl Iterator<Item = (u16, &Session)> {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.on_slot(slot))
            .map(|(n, s)| (n as u16, s))
    }
}

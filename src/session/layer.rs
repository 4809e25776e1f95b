// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session layer proper: host-side protocol engine plus the dispatch
//! of transport lifecycle events.
//!
//! One `parking_lot::Mutex` guards the whole session table. The lock is
//! held only to read or write slot fields, never across a transport send
//! or an upward callback, both of which may block and may re-enter the
//! layer. Every path therefore snapshots what it needs inside a short
//! critical section and consumes the snapshot after the guard is gone.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    resource::ResourceId,
    session::{
        callbacks::{
            LookupResult, ResourceHandler, ResourceLookup, SessionEvent, SessionEventHandler,
            SessionEventKind, SessionVerdict,
        },
        state::SessionState,
        table::SessionTable,
    },
    spdu::{
        spdu::{
            CloseSessionRequest, CloseSessionResponse, CreateSession, CreateSessionResponse,
            OpenSessionResponse, SESSION_NUMBER_NONE, SessionData, Spdu, SpduEncode,
        },
        status::SessionStatus,
    },
    transport::{Transport, TransportEvent},
};

/// Failures surfaced by the public session-layer API.
///
/// Inbound protocol violations are never fatal and never appear here;
/// they are logged and the offending SPDU is dropped.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Out-of-range session number, or a session in the wrong state for
    /// the requested operation (including "no free slot" on create).
    #[error("bad session number")]
    BadSessionNumber,
    /// `send_datav` was handed more chunks than the configured ceiling.
    #[error("iov count {got} exceeds the limit of {limit}")]
    IovLimit { got: usize, limit: usize },
    /// The transport layer refused the send. Session state is not rolled
    /// back; tear the session down or wait for the connection close.
    #[error("transport send failed: {0}")]
    Transport(anyhow::Error),
}

/// Point-in-time view of one session slot, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub state: SessionState,
    pub resource_id: ResourceId,
    pub slot: u8,
    pub connection: u8,
}

/// One EN 50221 session layer instance.
///
/// Multiplexes up to `max_sessions` resource sessions over the logical
/// connections of a [`Transport`]. Public methods may be called from any
/// number of application threads concurrently with the transport thread
/// feeding [`SessionLayer::handle_transport_event`].
pub struct SessionLayer {
    transport: Arc<dyn Transport>,
    lookup: Arc<dyn ResourceLookup>,
    events: Arc<dyn SessionEventHandler>,
    table: Mutex<SessionTable>,
    max_sessions: u16,
    max_send_iov: usize,
}

impl SessionLayer {
    pub fn new(
        cfg: &Config,
        transport: Arc<dyn Transport>,
        lookup: Arc<dyn ResourceLookup>,
        events: Arc<dyn SessionEventHandler>,
    ) -> Self {
        Self {
            transport,
            lookup,
            events,
            table: Mutex::new(SessionTable::new(cfg.session.max_sessions)),
            max_sessions: cfg.session.max_sessions,
            max_send_iov: cfg.session.max_send_iov,
        }
    }

    #[inline]
    pub fn max_sessions(&self) -> u16 {
        self.max_sessions
    }

    /// Snapshot one slot. `None` for out-of-range numbers.
    pub fn session_info(&self, session_number: u16) -> Option<SessionInfo> {
        let table = self.table.lock();
        table.get(session_number).map(|s| SessionInfo {
            state: s.state,
            resource_id: s.resource_id,
            slot: s.slot,
            connection: s.connection,
        })
    }

    // ------------------------------------------------------------------
    // Public API (application threads)

    /// Open a session to `resource_id` on the module side.
    ///
    /// Claims a slot, sends `CreateSession` and returns the session number
    /// right away; the session stays `InCreation` (not yet usable for
    /// [`send_data`](Self::send_data)) until the module's
    /// `CreateSessionResponse` flips it to `Active`. If the send itself
    /// fails the slot is returned to Idle before the error is surfaced.
    pub fn create_session(
        &self,
        slot: u8,
        connection: u8,
        resource_id: ResourceId,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<u16, SessionError> {
        let session_number = {
            let mut table = self.table.lock();
            let n = table.allocate().ok_or(SessionError::BadSessionNumber)?;
            if let Some(s) = table.get_mut(n) {
                s.resource_id = resource_id;
                s.slot = slot;
                s.connection = connection;
                s.handler = Some(handler);
            }
            n
        };

        debug!(slot, connection, %resource_id, session_number, "creating session");

        let mut buf = BytesMut::new();
        CreateSession::new(resource_id, session_number).encode_into(&mut buf);
        if let Err(e) = self.transport.send_data(slot, connection, &buf) {
            self.table.lock().release(session_number);
            return Err(SessionError::Transport(e));
        }
        Ok(session_number)
    }

    /// Ask the peer to close an `Active` session (idempotent while the
    /// close is pending). Completion is the inbound `CloseSessionResponse`.
    pub fn destroy_session(&self, session_number: u16) -> Result<(), SessionError> {
        let (slot, connection) = {
            let mut table = self.table.lock();
            let s = table
                .get_mut(session_number)
                .ok_or(SessionError::BadSessionNumber)?;
            if !s.state.is_closable() {
                return Err(SessionError::BadSessionNumber);
            }
            s.state = SessionState::InDeletion;
            (s.slot, s.connection)
        };

        debug!(slot, connection, session_number, "destroying session");

        let mut buf = BytesMut::new();
        CloseSessionRequest::new(session_number).encode_into(&mut buf);
        self.transport
            .send_data(slot, connection, &buf)
            .map_err(SessionError::Transport)
    }

    /// Send one APDU on an `Active` session.
    pub fn send_data(&self, session_number: u16, data: &[u8]) -> Result<(), SessionError> {
        self.send_datav(session_number, &[data])
    }

    /// Send one APDU gathered from up to `max_send_iov` chunks. The data
    /// SPDU header occupies one transport iov entry of its own, which is
    /// why the ceiling sits below [`MAX_TRANSPORT_IOV`](crate::transport::MAX_TRANSPORT_IOV).
    pub fn send_datav(&self, session_number: u16, iov: &[&[u8]]) -> Result<(), SessionError> {
        if iov.len() > self.max_send_iov {
            return Err(SessionError::IovLimit {
                got: iov.len(),
                limit: self.max_send_iov,
            });
        }

        let (slot, connection) = self.active_endpoint(session_number)?;

        let header = SessionData::header_bytes(session_number);
        let mut frames: Vec<&[u8]> = Vec::with_capacity(1 + iov.len());
        frames.push(&header);
        frames.extend_from_slice(iov);
        self.transport
            .send_datav(slot, connection, &frames)
            .map_err(SessionError::Transport)
    }

    /// Send one APDU to every `Active` session bound to `resource_id`,
    /// optionally restricted to one CI slot. The table lock is dropped
    /// around each send, so sessions closing mid-broadcast surface as
    /// [`SessionError::BadSessionNumber`]; the broadcast stops at the
    /// first failure.
    pub fn broadcast_data(
        &self,
        slot: Option<u8>,
        resource_id: ResourceId,
        data: &[u8],
    ) -> Result<(), SessionError> {
        for session_number in 0..self.max_sessions {
            let matched = {
                let table = self.table.lock();
                table.get(session_number).is_some_and(|s| {
                    s.state == SessionState::Active
                        && s.resource_id == resource_id
                        && slot.is_none_or(|filter| filter == s.slot)
                })
            };
            if matched {
                self.send_data(session_number, data)?;
            }
        }
        Ok(())
    }

    fn active_endpoint(&self, session_number: u16) -> Result<(u8, u8), SessionError> {
        let table = self.table.lock();
        let s = table
            .get(session_number)
            .ok_or(SessionError::BadSessionNumber)?;
        if s.state != SessionState::Active {
            return Err(SessionError::BadSessionNumber);
        }
        Ok((s.slot, s.connection))
    }

    // ------------------------------------------------------------------
    // Transport upcall (transport thread)

    /// Entry point for the transport thread. Data payloads are borrowed
    /// for the duration of the call only.
    pub fn handle_transport_event(&self, event: TransportEvent<'_>) {
        match event {
            TransportEvent::Data {
                slot,
                connection,
                payload,
            } => self.on_data(slot, connection, payload),
            TransportEvent::ConnectionClose { slot, connection } => {
                self.sweep_closed(slot, Some(connection));
            },
            TransportEvent::SlotClose { slot } => self.sweep_closed(slot, None),
        }
    }

    fn on_data(&self, slot: u8, connection: u8, payload: &[u8]) {
        let spdu = match Spdu::decode(payload) {
            Ok(spdu) => spdu,
            Err(e) => {
                warn!(
                    slot,
                    connection,
                    payload = %hex::encode(payload),
                    "dropping malformed spdu: {e}"
                );
                return;
            },
        };

        match spdu {
            Spdu::OpenSessionRequest(req) => {
                self.on_open_session_request(slot, connection, req.resource_id());
            },
            Spdu::CreateSessionResponse(rsp) => {
                self.on_create_session_response(slot, connection, &rsp);
            },
            Spdu::CloseSessionRequest(req) => {
                self.on_close_session_request(slot, connection, req.session_number.get());
            },
            Spdu::CloseSessionResponse(rsp) => {
                self.on_close_session_response(slot, connection, &rsp);
            },
            Spdu::SessionData(data) => self.on_session_data(slot, connection, &data),
            Spdu::OpenSessionResponse(_) | Spdu::CreateSession(_) => {
                warn!(
                    slot,
                    connection,
                    tag = ?spdu.tag(),
                    "dropping host-originated spdu echoed back by the module"
                );
            },
        }
    }

    /// A module wants a session. The lookup and lifecycle callbacks and
    /// the response send all run outside the table lock.
    fn on_open_session_request(&self, slot: u8, connection: u8, resource_id: ResourceId) {
        let (mut status, handler) = match self.lookup.lookup(slot, resource_id) {
            LookupResult::Found(handler) => (SessionStatus::Open, Some(handler)),
            LookupResult::NoResource => (SessionStatus::CloseNoResource, None),
            LookupResult::Unavailable => (SessionStatus::CloseResourceUnavailable, None),
            LookupResult::LowVersion => (SessionStatus::CloseResourceLowVersion, None),
        };

        let mut session_number = SESSION_NUMBER_NONE;
        if let Some(handler) = handler {
            match self.allocate_for_peer(slot, connection, resource_id, handler) {
                None => {
                    warn!(slot, connection, %resource_id, "session table full, refusing open");
                    status = SessionStatus::CloseNoResource;
                },
                Some(n) => {
                    session_number = n;
                    let verdict = self.events.on_session_event(&SessionEvent {
                        kind: SessionEventKind::Connecting,
                        slot,
                        session_number: n,
                        resource_id,
                    });
                    if verdict == SessionVerdict::Refuse {
                        self.table.lock().release(n);
                        status = SessionStatus::CloseResourceBusy;
                    } else {
                        // The lock was dropped for the callback; the slot
                        // may have been swept by a connection loss in the
                        // meantime and must still be ours before it goes
                        // Active.
                        let mut table = self.table.lock();
                        match table.get_mut(n) {
                            Some(s)
                                if s.state == SessionState::InCreation
                                    && s.slot == slot
                                    && s.connection == connection =>
                            {
                                s.state = SessionState::Active;
                            },
                            _ => {
                                warn!(
                                    slot,
                                    connection,
                                    session_number = n,
                                    "session vanished while connecting"
                                );
                                status = SessionStatus::CloseResourceUnavailable;
                            },
                        }
                    }
                },
            }
        }

        // On failure the field is 0xFFFF unless a slot was claimed first;
        // a refused open keeps reporting the number it briefly held.
        let mut buf = BytesMut::new();
        OpenSessionResponse::new(status, resource_id, session_number).encode_into(&mut buf);
        if let Err(e) = self.transport.send_data(slot, connection, &buf) {
            warn!(slot, connection, %resource_id, "failed to send open session response: {e}");
        }

        let kind = if status.is_open() {
            SessionEventKind::Connected
        } else {
            SessionEventKind::ConnectFail
        };
        self.events.on_session_event(&SessionEvent {
            kind,
            slot,
            session_number,
            resource_id,
        });
    }

    /// Claim a slot for a peer-opened session and stamp its identity in
    /// the same critical section, so a concurrent connection-close sweep
    /// can already see who it belongs to.
    fn allocate_for_peer(
        &self,
        slot: u8,
        connection: u8,
        resource_id: ResourceId,
        handler: Arc<dyn ResourceHandler>,
    ) -> Option<u16> {
        let mut table = self.table.lock();
        let n = table.allocate()?;
        if let Some(s) = table.get_mut(n) {
            s.resource_id = resource_id;
            s.slot = slot;
            s.connection = connection;
            s.handler = Some(handler);
        }
        Some(n)
    }

    /// Completion of a host-initiated create.
    fn on_create_session_response(
        &self,
        slot: u8,
        connection: u8,
        rsp: &CreateSessionResponse,
    ) {
        let session_number = rsp.session_number.get();
        let mut table = self.table.lock();
        let Some(s) = table.get_mut(session_number) else {
            warn!(
                slot,
                connection, session_number, "create session response for unknown session"
            );
            return;
        };
        if s.state != SessionState::InCreation || s.slot != slot || s.connection != connection {
            warn!(
                slot,
                connection,
                session_number,
                state = ?s.state,
                "dropping unsolicited create session response"
            );
            return;
        }

        if rsp.status.known().is_some_and(|st| st.is_open()) {
            s.state = SessionState::Active;
            debug!(slot, connection, session_number, "session active");
        } else {
            debug!(
                slot,
                connection,
                session_number,
                status = ?rsp.status,
                "module rejected session creation"
            );
            s.reset();
        }
    }

    /// A module wants a session gone. Always answered; only a full match
    /// releases the session.
    fn on_close_session_request(&self, slot: u8, connection: u8, session_number: u16) {
        let closed = {
            let mut table = self.table.lock();
            match table.get_mut(session_number) {
                Some(s)
                    if s.state.is_closable() && s.slot == slot && s.connection == connection =>
                {
                    let resource_id = s.resource_id;
                    s.reset();
                    Some(resource_id)
                },
                _ => None,
            }
        };

        let status = if closed.is_some() {
            SessionStatus::Open
        } else {
            warn!(
                slot,
                connection, session_number, "close request does not match any session"
            );
            SessionStatus::CloseNoResource
        };

        let mut buf = BytesMut::new();
        CloseSessionResponse::new(status, session_number).encode_into(&mut buf);
        if let Err(e) = self.transport.send_data(slot, connection, &buf) {
            warn!(slot, connection, session_number, "failed to send close session response: {e}");
        }

        if let Some(resource_id) = closed {
            debug!(slot, connection, session_number, "session closed by module");
            self.events.on_session_event(&SessionEvent {
                kind: SessionEventKind::Close,
                slot,
                session_number,
                resource_id,
            });
        }
    }

    /// Completion of a host-initiated destroy. Any status closes.
    fn on_close_session_response(
        &self,
        slot: u8,
        connection: u8,
        rsp: &CloseSessionResponse,
    ) {
        let session_number = rsp.session_number.get();
        let mut table = self.table.lock();
        let pending = table.get(session_number).is_some_and(|s| {
            s.state == SessionState::InDeletion && s.slot == slot && s.connection == connection
        });
        if pending {
            table.release(session_number);
            debug!(slot, connection, session_number, "session destroy confirmed");
        } else {
            warn!(
                slot,
                connection, session_number, "dropping unsolicited close session response"
            );
        }
    }

    /// Route one inbound APDU to the session's resource handler.
    fn on_session_data(&self, slot: u8, connection: u8, data: &SessionData<'_>) {
        let session_number = data.session_number;
        let target = {
            let table = self.table.lock();
            match table.get(session_number) {
                Some(s)
                    if s.state == SessionState::Active
                        && s.slot == slot
                        && s.connection == connection =>
                {
                    Some((s.handler.clone(), s.resource_id))
                },
                _ => None,
            }
        };

        match target {
            Some((Some(handler), resource_id)) => {
                handler.on_data(slot, session_number, resource_id, data.apdu);
            },
            Some((None, resource_id)) => {
                debug!(
                    slot,
                    connection,
                    session_number,
                    %resource_id,
                    "session has no resource handler, dropping apdu"
                );
            },
            None => {
                warn!(
                    slot,
                    connection, session_number, "dropping data spdu for inactive session"
                );
            },
        }
    }

    /// Fan a connection or slot loss out to every affected session, in
    /// ascending session-number order. The connection is gone, so no SPDU
    /// is emitted; each slot is released inside the lock and its `Close`
    /// notification fires outside it.
    fn sweep_closed(&self, slot: u8, connection: Option<u8>) {
        debug!(slot, ?connection, "sweeping sessions for closed transport");
        for session_number in 0..self.max_sessions {
            let closed = {
                let mut table = self.table.lock();
                match table.get_mut(session_number) {
                    Some(s)
                        if !s.state.is_idle()
                            && s.slot == slot
                            && connection.is_none_or(|c| c == s.connection) =>
                    {
                        let resource_id = s.resource_id;
                        s.reset();
                        Some(resource_id)
                    },
                    _ => None,
                }
            };
            if let Some(resource_id) = closed {
                self.events.on_session_event(&SessionEvent {
                    kind: SessionEventKind::Close,
                    slot,
                    session_number,
                    resource_id,
                });
            }
        }
    }
}

impl std::fmt::Debug for SessionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLayer")
            .field("max_sessions", &self.max_sessions)
            .field("max_send_iov", &self.max_send_iov)
            .finish_non_exhaustive()
    }
}

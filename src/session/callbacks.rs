// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Upward interfaces of the session layer.
//!
//! The layer never holds its internal lock while calling into these
//! traits, so an implementation is free to re-enter the layer (for
//! example, a [`ResourceHandler`] answering an APDU from inside
//! [`ResourceHandler::on_data`]). Implementations must be `Send + Sync`;
//! calls arrive on whichever thread drives the transport.

use std::sync::Arc;

use crate::resource::ResourceId;

/// Sink for inbound APDUs on one session.
pub trait ResourceHandler: Send + Sync {
    /// One data SPDU arrived for the session. `apdu` borrows the
    /// transport's receive buffer and is valid only for this call; copy it
    /// if it must outlive the callback.
    fn on_data(&self, slot: u8, session_number: u16, resource_id: ResourceId, apdu: &[u8]);
}

/// Answer of a [`ResourceLookup`] for one `OpenSessionRequest`.
pub enum LookupResult {
    /// The resource exists; route the session's data to this handler.
    Found(Arc<dyn ResourceHandler>),
    /// No such resource.
    NoResource,
    /// The resource exists but only in a lower version.
    LowVersion,
    /// The resource exists but cannot be used right now.
    Unavailable,
}

/// Resolves a module's `OpenSessionRequest` to a resource handler.
pub trait ResourceLookup: Send + Sync {
    fn lookup(&self, slot: u8, resource_id: ResourceId) -> LookupResult;
}

/// Why a [`SessionEventHandler`] is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// A module is opening a session; the verdict decides whether it may.
    Connecting,
    /// The session reached `Active`.
    Connected,
    /// The open attempt failed; the session number may be
    /// [`SESSION_NUMBER_NONE`](crate::spdu::spdu::SESSION_NUMBER_NONE).
    ConnectFail,
    /// The session left `Active`/`InCreation`/`InDeletion` for good.
    Close,
}

/// One session lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub slot: u8,
    pub session_number: u16,
    pub resource_id: ResourceId,
}

/// Answer to a lifecycle notification. Only consulted for
/// [`SessionEventKind::Connecting`]; every other kind ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVerdict {
    Accept,
    Refuse,
}

/// Observer of session lifecycle changes.
pub trait SessionEventHandler: Send + Sync {
    fn on_session_event(&self, event: &SessionEvent) -> SessionVerdict;
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Contract with the transport layer below.
//!
//! The transport owns the CI slots and the logical connections within
//! them; the session layer only ever addresses `(slot, connection)` pairs
//! and hands over fully framed SPDU bytes.

use anyhow::Result;

/// Largest scatter/gather vector [`Transport::send_datav`] accepts.
pub const MAX_TRANSPORT_IOV: usize = 10;

/// Downward interface consumed by the session layer.
///
/// Both methods may block; the session layer calls them without holding
/// any internal lock. A non-`Ok` return is surfaced to the originating
/// caller as a send failure; the session layer never retries.
pub trait Transport: Send + Sync {
    /// Send one contiguous frame on a connection.
    fn send_data(&self, slot: u8, connection: u8, data: &[u8]) -> Result<()> {
        self.send_datav(slot, connection, &[data])
    }

    /// Send a frame gathered from up to [`MAX_TRANSPORT_IOV`] chunks.
    fn send_datav(&self, slot: u8, connection: u8, iov: &[&[u8]]) -> Result<()>;
}

/// Upward notifications from the transport layer.
///
/// The transport thread feeds these to
/// [`SessionLayer::handle_transport_event`](crate::session::layer::SessionLayer::handle_transport_event).
/// `Data` payloads borrow the transport's receive buffer and are only
/// valid for the duration of the call. The transport must deliver all
/// close notifications for a connection before reusing its identifiers.
#[derive(Debug, Clone, Copy)]
pub enum TransportEvent<'a> {
    /// One framed payload arrived on a connection.
    Data {
        slot: u8,
        connection: u8,
        payload: &'a [u8],
    },
    /// One logical connection is gone; no SPDU can reach it any more.
    ConnectionClose { slot: u8, connection: u8 },
    /// A whole CI slot is gone (module removed, slot reset).
    SlotClose { slot: u8 },
}

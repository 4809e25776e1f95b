// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The layer promises to drop its internal lock before every transport
//! send and every upward callback. These tests would deadlock or corrupt
//! the table if that promise were broken.

use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use en50221_session_rs::{
    cfg::config::Config,
    resource::ResourceId,
    session::{
        callbacks::{
            ResourceHandler, SessionEvent, SessionEventHandler, SessionEventKind, SessionVerdict,
        },
        layer::SessionLayer,
        state::SessionState,
    },
    spdu::{
        spdu::{CreateSessionResponse, SpduEncode},
        status::SessionStatus,
    },
    transport::TransportEvent,
};
use hex_literal::hex;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::integration_tests::common::{
    MockTransport, RecordingHandler, StaticLookup, feed, harness,
};

/// Re-enters the layer from inside the data callback.
#[derive(Default)]
struct EchoHandler {
    layer: OnceCell<Arc<SessionLayer>>,
}

impl ResourceHandler for EchoHandler {
    fn on_data(&self, _slot: u8, session_number: u16, _resource_id: ResourceId, apdu: &[u8]) {
        if let Some(layer) = self.layer.get() {
            layer
                .send_data(session_number, apdu)
                .expect("re-entrant send must succeed");
        }
    }
}

#[test]
fn resource_handler_may_reenter_the_layer() -> Result<()> {
    let h = harness(5);
    let echo = Arc::new(EchoHandler::default());
    echo.layer
        .set(h.layer.clone())
        .unwrap_or_else(|_| panic!("layer already set"));
    h.lookup.set_handler(echo);

    feed(&h.layer, 0, 1, &hex!("91 04 00 01 00 41"));
    h.transport.take_sent();

    // Would deadlock here if the table lock were held across the callback.
    feed(&h.layer, 0, 1, &hex!("90 02 00 00 A0 01 82"));

    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bytes, hex!("90 02 00 00 A0 01 82"));
    Ok(())
}

/// Closes the connection from inside its own `Connecting` notification,
/// the worst-case interleaving of a sweep with a pending peer open.
#[derive(Default)]
struct ClosingEvents {
    layer: OnceCell<Arc<SessionLayer>>,
    seen: Mutex<Vec<SessionEventKind>>,
}

impl SessionEventHandler for ClosingEvents {
    fn on_session_event(&self, event: &SessionEvent) -> SessionVerdict {
        self.seen.lock().push(event.kind);
        if event.kind == SessionEventKind::Connecting
            && let Some(layer) = self.layer.get()
        {
            layer.handle_transport_event(TransportEvent::ConnectionClose {
                slot: event.slot,
                connection: 1,
            });
        }
        SessionVerdict::Accept
    }
}

#[test]
fn connection_loss_during_connecting_is_not_resurrected() -> Result<()> {
    let transport = Arc::new(MockTransport::default());
    let handler = Arc::new(RecordingHandler::default());
    let lookup = Arc::new(StaticLookup::new(handler));
    let events = Arc::new(ClosingEvents::default());
    let layer = Arc::new(SessionLayer::new(
        &Config::new(5),
        transport.clone(),
        lookup,
        events.clone(),
    ));
    events.layer.set(layer.clone()).expect("layer not set yet");

    feed(&layer, 0, 1, &hex!("91 04 00 01 00 41"));

    // The sweep already delivered Close; accepting afterwards must not
    // bring the swept slot back as a handlerless Active session.
    assert_eq!(
        *events.seen.lock(),
        vec![
            SessionEventKind::Connecting,
            SessionEventKind::Close,
            SessionEventKind::ConnectFail,
        ]
    );
    assert_eq!(
        layer.session_info(0).map(|i| i.state),
        Some(SessionState::Idle)
    );

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bytes, hex!("92 07 F1 00 01 00 41 00 00"));
    Ok(())
}

#[test]
fn parallel_creates_hand_out_distinct_numbers() -> Result<()> {
    const THREADS: u16 = 8;

    let h = harness(THREADS);
    let numbers: Mutex<Vec<u16>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                let handler = Arc::new(RecordingHandler::default());
                let n = h
                    .layer
                    .create_session(0, 1, ResourceId::MMI, handler)
                    .expect("table has room for every thread");
                numbers.lock().push(n);
            });
        }
    });

    let mut numbers = numbers.into_inner();
    numbers.sort_unstable();
    assert_eq!(numbers, (0..THREADS).collect::<Vec<_>>());

    // Every pending create can be completed by the module.
    for n in numbers {
        let mut buf = BytesMut::new();
        CreateSessionResponse::new(SessionStatus::Open, ResourceId::MMI, n)
            .encode_into(&mut buf);
        feed(&h.layer, 0, 1, &buf);
        assert_eq!(
            h.layer.session_info(n).map(|i| i.state),
            Some(SessionState::Active)
        );
    }
    Ok(())
}

#[test]
fn api_threads_race_the_transport_thread() -> Result<()> {
    const ROUNDS: usize = 200;

    let h = harness(16);

    std::thread::scope(|scope| {
        // The transport thread: opens, feeds data, closes.
        scope.spawn(|| {
            for i in 0..ROUNDS {
                feed(&h.layer, 0, 1, &hex!("91 04 00 01 00 41"));
                feed(&h.layer, 0, 1, &hex!("90 02 00 00 A0"));
                // Completes whichever host-side create happens to be
                // pending as number 1; dropped as unsolicited otherwise.
                feed(&h.layer, 0, 1, &hex!("94 07 00 00 03 00 41 00 01"));
                feed(&h.layer, 0, 1, &hex!("95 02 00 00"));
                if i % 16 == 0 {
                    h.layer.handle_transport_event(TransportEvent::ConnectionClose {
                        slot: 0,
                        connection: 1,
                    });
                }
            }
        });

        // Application threads: create, send, destroy; failures are part
        // of the race and simply ignored.
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    let handler = Arc::new(RecordingHandler::default());
                    if let Ok(n) =
                        h.layer
                            .create_session(0, 1, ResourceId::CONDITIONAL_ACCESS, handler)
                    {
                        let _ = h.layer.send_data(n, &hex!("A0"));
                        let _ = h.layer.destroy_session(n);
                    }
                }
            });
        }
    });

    // Everything the race left behind is still sweepable.
    h.layer
        .handle_transport_event(TransportEvent::SlotClose { slot: 0 });
    for n in 0..h.layer.max_sessions() {
        assert_eq!(
            h.layer.session_info(n).map(|i| i.state),
            Some(SessionState::Idle)
        );
    }
    Ok(())
}

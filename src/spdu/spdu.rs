// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed SPDU bodies and the [`Spdu`] tagged union.
//!
//! Fixed-size bodies are zerocopy structs whose fields mirror the wire
//! layout byte for byte; multi-byte integers are big-endian per EN 50221.
//! [`Spdu::decode`] is strict: a frame whose length byte disagrees with the
//! table in § 8.4 is rejected, the caller is expected to drop it.

use bytes::{BufMut, BytesMut};
use enum_dispatch::enum_dispatch;
use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::{
    resource::ResourceId,
    spdu::{
        status::{RawStatus, SessionStatus},
        tag::SpduTag,
    },
};

/// Wire encoding of "no session"; only valid in the session-number field of
/// a failed `OpenSessionResponse`. Session tables never grow large enough
/// to contain this index.
pub const SESSION_NUMBER_NONE: u16 = 0xFFFF;

/// Returned when an inbound frame is not a well-formed SPDU.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpduError {
    #[error("empty spdu")]
    Empty,
    #[error("invalid spdu tag: 0x{0:02x}")]
    UnknownTag(u8),
    #[error("{tag:?}: length byte is {got}, expected {expected}")]
    BadLength {
        tag: SpduTag,
        expected: usize,
        got: usize,
    },
    #[error("{tag:?}: body holds {got} bytes, expected {expected}")]
    BadBody {
        tag: SpduTag,
        expected: usize,
        got: usize,
    },
}

/// Encoding half of every SPDU body: each variant knows its tag and how to
/// append `tag ‖ length ‖ body` to an output buffer.
#[enum_dispatch]
pub trait SpduEncode {
    fn tag(&self) -> SpduTag;

    fn encode_into(&self, buf: &mut BytesMut);
}

/// Body of an `OpenSessionRequest` (module → host).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct OpenSessionRequest {
    pub resource_id: U32<BigEndian>, // 0..4
}

impl OpenSessionRequest {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id: U32::new(resource_id.raw()),
        }
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.resource_id.get())
    }
}

/// Body of an `OpenSessionResponse` (host → module).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct OpenSessionResponse {
    pub status: RawStatus,             // 0
    pub resource_id: U32<BigEndian>,   // 1..5
    pub session_number: U16<BigEndian>, // 5..7
}

impl OpenSessionResponse {
    pub fn new(status: SessionStatus, resource_id: ResourceId, session_number: u16) -> Self {
        Self {
            status: status.into(),
            resource_id: U32::new(resource_id.raw()),
            session_number: U16::new(session_number),
        }
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.resource_id.get())
    }
}

/// Body of a `CreateSession` (host → module).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CreateSession {
    pub resource_id: U32<BigEndian>,   // 0..4
    pub session_number: U16<BigEndian>, // 4..6
}

impl CreateSession {
    pub fn new(resource_id: ResourceId, session_number: u16) -> Self {
        Self {
            resource_id: U32::new(resource_id.raw()),
            session_number: U16::new(session_number),
        }
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.resource_id.get())
    }
}

/// Body of a `CreateSessionResponse` (module → host).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CreateSessionResponse {
    pub status: RawStatus,             // 0
    pub resource_id: U32<BigEndian>,   // 1..5
    pub session_number: U16<BigEndian>, // 5..7
}

impl CreateSessionResponse {
    pub fn new(status: SessionStatus, resource_id: ResourceId, session_number: u16) -> Self {
        Self {
            status: status.into(),
            resource_id: U32::new(resource_id.raw()),
            session_number: U16::new(session_number),
        }
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.resource_id.get())
    }
}

/// Body of a `CloseSessionRequest` (either direction).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CloseSessionRequest {
    pub session_number: U16<BigEndian>, // 0..2
}

impl CloseSessionRequest {
    pub fn new(session_number: u16) -> Self {
        Self {
            session_number: U16::new(session_number),
        }
    }
}

/// Body of a `CloseSessionResponse` (either direction).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CloseSessionResponse {
    pub status: RawStatus,             // 0
    pub session_number: U16<BigEndian>, // 1..3
}

impl CloseSessionResponse {
    pub fn new(status: SessionStatus, session_number: u16) -> Self {
        Self {
            status: status.into(),
            session_number: U16::new(session_number),
        }
    }
}

/// Data SPDU: a session number followed by the APDU bytes.
///
/// The length byte of this tag covers only the session number; the APDU
/// runs to the end of the transport payload, so the body borrows from the
/// inbound buffer and is valid only as long as that buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionData<'a> {
    pub session_number: u16,
    pub apdu: &'a [u8],
}

impl<'a> SessionData<'a> {
    pub fn new(session_number: u16, apdu: &'a [u8]) -> Self {
        Self {
            session_number,
            apdu,
        }
    }

    /// `tag ‖ 0x02 ‖ session_number`, the 4-byte prefix every outbound data
    /// frame starts with. The APDU is appended (or vectored) after it.
    pub fn header_bytes(session_number: u16) -> [u8; 4] {
        let sn = session_number.to_be_bytes();
        [SpduTag::SessionNumber as u8, 0x02, sn[0], sn[1]]
    }
}

impl SpduEncode for OpenSessionRequest {
    fn tag(&self) -> SpduTag {
        SpduTag::OpenSessionRequest
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for OpenSessionResponse {
    fn tag(&self) -> SpduTag {
        SpduTag::OpenSessionResponse
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for CreateSession {
    fn tag(&self) -> SpduTag {
        SpduTag::CreateSession
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for CreateSessionResponse {
    fn tag(&self) -> SpduTag {
        SpduTag::CreateSessionResponse
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for CloseSessionRequest {
    fn tag(&self) -> SpduTag {
        SpduTag::CloseSessionRequest
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for CloseSessionResponse {
    fn tag(&self) -> SpduTag {
        SpduTag::CloseSessionResponse
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.tag(), self.as_bytes());
    }
}

impl SpduEncode for SessionData<'_> {
    fn tag(&self) -> SpduTag {
        SpduTag::SessionNumber
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(4 + self.apdu.len());
        buf.put_slice(&Self::header_bytes(self.session_number));
        buf.put_slice(self.apdu);
    }
}

#[inline]
fn put_fixed(buf: &mut BytesMut, tag: SpduTag, body: &[u8]) {
    buf.reserve(2 + body.len());
    buf.put_u8(tag as u8);
    buf.put_u8(body.len() as u8);
    buf.put_slice(body);
}

/// One decoded SPDU, borrowing the APDU of a data frame from the inbound
/// buffer.
#[enum_dispatch(SpduEncode)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Spdu<'a> {
    SessionData(SessionData<'a>),
    OpenSessionRequest(OpenSessionRequest),
    OpenSessionResponse(OpenSessionResponse),
    CreateSession(CreateSession),
    CreateSessionResponse(CreateSessionResponse),
    CloseSessionRequest(CloseSessionRequest),
    CloseSessionResponse(CloseSessionResponse),
}

impl<'a> Spdu<'a> {
    /// Strict decode of one SPDU frame.
    pub fn decode(data: &'a [u8]) -> Result<Self, SpduError> {
        if data.is_empty() {
            return Err(SpduError::Empty);
        }
        let tag = SpduTag::from_u8(data[0]).ok_or(SpduError::UnknownTag(data[0]))?;

        let expected = tag.body_len();
        if data.len() < 2 {
            return Err(SpduError::BadBody {
                tag,
                expected,
                got: 0,
            });
        }
        let length = data[1] as usize;
        if length != expected {
            return Err(SpduError::BadLength {
                tag,
                expected,
                got: length,
            });
        }

        let body = &data[2..];
        match tag {
            // The APDU trails the declared body, everything else is exact.
            SpduTag::SessionNumber => {
                if body.len() < expected {
                    return Err(SpduError::BadBody {
                        tag,
                        expected,
                        got: body.len(),
                    });
                }
                let session_number = u16::from_be_bytes([body[0], body[1]]);
                Ok(Self::SessionData(SessionData::new(
                    session_number,
                    &body[2..],
                )))
            },
            _ => {
                if body.len() != expected {
                    return Err(SpduError::BadBody {
                        tag,
                        expected,
                        got: body.len(),
                    });
                }
                Self::read_fixed(tag, body)
            },
        }
    }

    fn read_fixed(tag: SpduTag, body: &[u8]) -> Result<Self, SpduError> {
        let mismatch = |got: usize| SpduError::BadBody {
            tag,
            expected: tag.body_len(),
            got,
        };
        Ok(match tag {
            SpduTag::OpenSessionRequest => Self::OpenSessionRequest(
                OpenSessionRequest::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::OpenSessionResponse => Self::OpenSessionResponse(
                OpenSessionResponse::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::CreateSession => Self::CreateSession(
                CreateSession::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::CreateSessionResponse => Self::CreateSessionResponse(
                CreateSessionResponse::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::CloseSessionRequest => Self::CloseSessionRequest(
                CloseSessionRequest::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::CloseSessionResponse => Self::CloseSessionResponse(
                CloseSessionResponse::read_from_bytes(body).map_err(|_| mismatch(body.len()))?,
            ),
            SpduTag::SessionNumber => return Err(mismatch(body.len())),
        })
    }

    /// Encode into a fresh buffer; `encode(decode(b)) == b` for every frame
    /// [`Spdu::decode`] accepts.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }
}

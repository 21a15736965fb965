//! HTTP/2 wire types and frame codec (RFC 7540).
//!
//! This is deliberately a small codec: it encodes whatever it is told to
//! encode, including frames that violate the peer's limits, and decodes
//! inbound bytes into the closed [`Frame`] sum type the classifier matches on.
//! Header blocks are never decompressed here.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::HarnessError;

// =============================================================================
// Connection (RFC 7540 §3.5)
// =============================================================================

/// The client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Initial value of SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// The largest length the 24-bit length field can carry.
pub const MAX_FRAME_LENGTH: usize = (1 << 24) - 1;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

// =============================================================================
// Frame types and flags (RFC 7540 §6)
// =============================================================================

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Data),
            0x1 => Some(Self::Headers),
            0x2 => Some(Self::Priority),
            0x3 => Some(Self::RstStream),
            0x4 => Some(Self::Settings),
            0x5 => Some(Self::PushPromise),
            0x6 => Some(Self::Ping),
            0x7 => Some(Self::GoAway),
            0x8 => Some(Self::WindowUpdate),
            0x9 => Some(Self::Continuation),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Frame flags. The same bit means different things on different frame
    /// types, hence the aliases.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const END_STREAM  = 0x01;
        const ACK         = 0x01;
        const END_HEADERS = 0x04;
        const PADDED      = 0x08;
        const PRIORITY    = 0x20;
    }
}

// =============================================================================
// Error codes (RFC 7540 §7)
// =============================================================================

/// An HTTP/2 error code.
///
/// Unknown codes are kept verbatim: a server answering with a code outside
/// the registry must still be reported accurately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NO_ERROR: Self = Self(0x0);
    pub const PROTOCOL_ERROR: Self = Self(0x1);
    pub const INTERNAL_ERROR: Self = Self(0x2);
    pub const FLOW_CONTROL_ERROR: Self = Self(0x3);
    pub const SETTINGS_TIMEOUT: Self = Self(0x4);
    pub const STREAM_CLOSED: Self = Self(0x5);
    pub const FRAME_SIZE_ERROR: Self = Self(0x6);
    pub const REFUSED_STREAM: Self = Self(0x7);
    pub const CANCEL: Self = Self(0x8);
    pub const COMPRESSION_ERROR: Self = Self(0x9);
    pub const CONNECT_ERROR: Self = Self(0xa);
    pub const ENHANCE_YOUR_CALM: Self = Self(0xb);
    pub const INADEQUATE_SECURITY: Self = Self(0xc);
    pub const HTTP_1_1_REQUIRED: Self = Self(0xd);

    /// Registry name, if the code is a known one.
    pub fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0x0 => "NO_ERROR",
            0x1 => "PROTOCOL_ERROR",
            0x2 => "INTERNAL_ERROR",
            0x3 => "FLOW_CONTROL_ERROR",
            0x4 => "SETTINGS_TIMEOUT",
            0x5 => "STREAM_CLOSED",
            0x6 => "FRAME_SIZE_ERROR",
            0x7 => "REFUSED_STREAM",
            0x8 => "CANCEL",
            0x9 => "COMPRESSION_ERROR",
            0xa => "CONNECT_ERROR",
            0xb => "ENHANCE_YOUR_CALM",
            0xc => "INADEQUATE_SECURITY",
            0xd => "HTTP_1_1_REQUIRED",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN({:#x})", self.0),
        }
    }
}

/// SETTINGS parameter identifiers (RFC 7540 §6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

// =============================================================================
// Inbound frames
// =============================================================================

/// A frame received from the server.
///
/// Only the kinds the classifier and handshake need are broken out; the rest
/// land in [`Frame::Other`] with their payload dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        end_stream: bool,
        payload: Bytes,
    },
    Headers {
        stream_id: u32,
        end_stream: bool,
        end_headers: bool,
        block: Bytes,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Other {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
    },
}

impl Frame {
    /// Short human readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { ack: true, .. } => "SETTINGS(ACK)",
            Frame::Settings { .. } => "SETTINGS",
            Frame::Ping { ack: true, .. } => "PING(ACK)",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Other { frame_type, .. } => match FrameType::from_u8(*frame_type) {
                Some(FrameType::Priority) => "PRIORITY",
                Some(FrameType::PushPromise) => "PUSH_PROMISE",
                Some(FrameType::Continuation) => "CONTINUATION",
                _ => "UNKNOWN",
            },
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::RstStream {
                stream_id,
                error_code,
            } => write!(f, "RST_STREAM(stream={stream_id}, {error_code})"),
            Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            } => write!(f, "GOAWAY(last_stream={last_stream_id}, {error_code})"),
            other => f.write_str(other.kind()),
        }
    }
}

/// Try to decode one frame from the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a complete frame; in that
/// case nothing is consumed.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>, HarnessError> {
    if src.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let length = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | (src[2] as usize);
    if src.len() < FRAME_HEADER_SIZE + length {
        return Ok(None);
    }

    let frame_type = src[3];
    let flags = FrameFlags::from_bits_retain(src[4]);
    let stream_id = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & STREAM_ID_MASK;
    src.advance(FRAME_HEADER_SIZE);
    let mut payload = src.split_to(length).freeze();

    let frame = match FrameType::from_u8(frame_type) {
        Some(FrameType::Data) => {
            strip_padding(&mut payload, flags, "DATA")?;
            Frame::Data {
                stream_id,
                end_stream: flags.contains(FrameFlags::END_STREAM),
                payload,
            }
        }
        Some(FrameType::Headers) => {
            strip_padding(&mut payload, flags, "HEADERS")?;
            if flags.contains(FrameFlags::PRIORITY) {
                if payload.len() < 5 {
                    return Err(HarnessError::Codec(format!(
                        "HEADERS priority block truncated: {} bytes",
                        payload.len()
                    )));
                }
                payload.advance(5);
            }
            Frame::Headers {
                stream_id,
                end_stream: flags.contains(FrameFlags::END_STREAM),
                end_headers: flags.contains(FrameFlags::END_HEADERS),
                block: payload,
            }
        }
        Some(FrameType::RstStream) => {
            expect_len(&payload, 4, "RST_STREAM")?;
            Frame::RstStream {
                stream_id,
                error_code: ErrorCode(payload.get_u32()),
            }
        }
        Some(FrameType::Settings) => {
            if payload.len() % 6 != 0 {
                return Err(HarnessError::Codec(format!(
                    "SETTINGS length {} is not a multiple of 6",
                    payload.len()
                )));
            }
            let mut params = Vec::with_capacity(payload.len() / 6);
            while payload.has_remaining() {
                params.push((payload.get_u16(), payload.get_u32()));
            }
            Frame::Settings {
                ack: flags.contains(FrameFlags::ACK),
                params,
            }
        }
        Some(FrameType::Ping) => {
            expect_len(&payload, 8, "PING")?;
            let mut data = [0u8; 8];
            payload.copy_to_slice(&mut data);
            Frame::Ping {
                ack: flags.contains(FrameFlags::ACK),
                payload: data,
            }
        }
        Some(FrameType::GoAway) => {
            if payload.len() < 8 {
                return Err(HarnessError::Codec(format!(
                    "GOAWAY too short: {} bytes",
                    payload.len()
                )));
            }
            let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
            let error_code = ErrorCode(payload.get_u32());
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data: payload,
            }
        }
        Some(FrameType::WindowUpdate) => {
            expect_len(&payload, 4, "WINDOW_UPDATE")?;
            Frame::WindowUpdate {
                stream_id,
                increment: payload.get_u32() & STREAM_ID_MASK,
            }
        }
        Some(FrameType::Priority | FrameType::PushPromise | FrameType::Continuation) | None => {
            Frame::Other {
                frame_type,
                flags: flags.bits(),
                stream_id,
            }
        }
    };

    Ok(Some(frame))
}

fn expect_len(payload: &Bytes, len: usize, kind: &str) -> Result<(), HarnessError> {
    if payload.len() != len {
        return Err(HarnessError::Codec(format!(
            "{kind} payload must be {len} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}

fn strip_padding(payload: &mut Bytes, flags: FrameFlags, kind: &str) -> Result<(), HarnessError> {
    if !flags.contains(FrameFlags::PADDED) {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(HarnessError::Codec(format!("padded {kind} without pad length")));
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(HarnessError::Codec(format!(
            "{kind} padding {pad} exceeds payload {}",
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad);
    Ok(())
}

// =============================================================================
// Outbound frames
// =============================================================================

/// A frame the harness writes to the server.
///
/// No limit is enforced on encode. Oversized DATA frames and malformed
/// header blocks are exactly what some cases need to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Settings {
        ack: bool,
        params: Vec<(SettingId, u32)>,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

impl OutboundFrame {
    pub fn settings_ack() -> Self {
        OutboundFrame::Settings {
            ack: true,
            params: Vec::new(),
        }
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            OutboundFrame::Settings { ack, params } => {
                let flags = if *ack { FrameFlags::ACK } else { FrameFlags::empty() };
                put_header(dst, params.len() * 6, FrameType::Settings, flags, 0);
                for (id, value) in params {
                    dst.put_u16(*id as u16);
                    dst.put_u32(*value);
                }
            }
            OutboundFrame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                let mut flags = FrameFlags::empty();
                flags.set(FrameFlags::END_STREAM, *end_stream);
                flags.set(FrameFlags::END_HEADERS, *end_headers);
                put_header(dst, block.len(), FrameType::Headers, flags, *stream_id);
                dst.put_slice(block);
            }
            OutboundFrame::Data {
                stream_id,
                payload,
                end_stream,
            } => {
                let flags = if *end_stream {
                    FrameFlags::END_STREAM
                } else {
                    FrameFlags::empty()
                };
                put_header(dst, payload.len(), FrameType::Data, flags, *stream_id);
                dst.put_slice(payload);
            }
            OutboundFrame::Ping { ack, payload } => {
                let flags = if *ack { FrameFlags::ACK } else { FrameFlags::empty() };
                put_header(dst, 8, FrameType::Ping, flags, 0);
                dst.put_slice(payload);
            }
            OutboundFrame::RstStream {
                stream_id,
                error_code,
            } => {
                put_header(dst, 4, FrameType::RstStream, FrameFlags::empty(), *stream_id);
                dst.put_u32(error_code.0);
            }
            OutboundFrame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                put_header(
                    dst,
                    8 + debug_data.len(),
                    FrameType::GoAway,
                    FrameFlags::empty(),
                    0,
                );
                dst.put_u32(*last_stream_id & STREAM_ID_MASK);
                dst.put_u32(error_code.0);
                dst.put_slice(debug_data);
            }
            OutboundFrame::WindowUpdate {
                stream_id,
                increment,
            } => {
                put_header(dst, 4, FrameType::WindowUpdate, FrameFlags::empty(), *stream_id);
                dst.put_u32(*increment & STREAM_ID_MASK);
            }
        }
    }
}

fn put_header(dst: &mut BytesMut, len: usize, ty: FrameType, flags: FrameFlags, stream_id: u32) {
    debug_assert!(len <= MAX_FRAME_LENGTH, "frame length {len} overflows 24 bits");
    dst.reserve(FRAME_HEADER_SIZE + len);
    dst.put_uint(len as u64, 3);
    dst.put_u8(ty as u8);
    dst.put_u8(flags.bits());
    dst.put_u32(stream_id & STREAM_ID_MASK);
}

//! In-process HTTP/2 servers for integration tests.
//!
//! [`ScriptedConnector`] hands the harness one end of a `tokio::io::duplex`
//! pipe per connection and runs a server task on the other end. The task
//! answers the preface with its SETTINGS, ACKs client SETTINGS, records every
//! frame it receives and lets a [`Responder`] decide how to react.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use h2_conformance::HarnessError;
use h2_conformance::harness::{Connector, FrameIo};
use h2_conformance::protocol::{CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, ErrorCode, Frame, OutboundFrame};
use tokio::io::{AsyncReadExt, DuplexStream};

/// What the server does after a frame arrives.
pub enum Action {
    Send(Vec<OutboundFrame>),
    /// Drop the connection without sending anything.
    Close,
    Ignore,
}

/// Per-connection reaction logic.
pub type Responder = Box<dyn FnMut(&Frame) -> Action + Send>;

pub struct ScriptedConnector {
    make: Box<dyn Fn() -> Responder + Send + Sync>,
    pub connections: AtomicUsize,
    /// Every frame any connection received, in arrival order.
    pub received: Arc<Mutex<Vec<Frame>>>,
}

impl ScriptedConnector {
    pub fn new(make: impl Fn() -> Responder + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            connections: AtomicUsize::new(0),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A server that reacts to every violation the catalogue sends.
    pub fn compliant() -> Self {
        Self::new(|| -> Responder {
            let mut server = CompliantServer::default();
            Box::new(move |frame: &Frame| server.on_frame(frame))
        })
    }

    /// Sends `frames` in reply to every HEADERS, ignores everything else.
    pub fn on_headers(frames: Vec<OutboundFrame>) -> Self {
        Self::new(move || -> Responder {
            let frames = frames.clone();
            Box::new(move |frame: &Frame| match frame {
                Frame::Headers { .. } => Action::Send(frames.clone()),
                _ => Action::Ignore,
            })
        })
    }

    /// Closes the connection as soon as HEADERS arrive.
    pub fn closing() -> Self {
        Self::new(|| -> Responder {
            Box::new(|frame: &Frame| match frame {
                Frame::Headers { .. } => Action::Close,
                _ => Action::Ignore,
            })
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Frame> {
        self.received.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream, HarnessError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(serve(server, (self.make)(), self.received.clone()));
        Ok(client)
    }
}

async fn serve(mut stream: DuplexStream, mut responder: Responder, received: Arc<Mutex<Vec<Frame>>>) {
    let mut preface = [0u8; 24];
    if stream.read_exact(&mut preface).await.is_err() || &preface[..] != CONNECTION_PREFACE {
        return;
    }

    let mut io = FrameIo::new(stream);
    let settings = OutboundFrame::Settings {
        ack: false,
        params: Vec::new(),
    };
    if io.send(&settings).await.is_err() {
        return;
    }

    while let Ok(frame) = io.receive(Duration::from_secs(30)).await {
        received.lock().unwrap().push(frame.clone());

        if let Frame::Settings { ack: false, .. } = frame
            && io.send(&OutboundFrame::settings_ack()).await.is_err()
        {
            return;
        }

        match responder(&frame) {
            Action::Send(frames) => {
                for reply in &frames {
                    if io.send(reply).await.is_err() {
                        return;
                    }
                }
            }
            Action::Close => return,
            Action::Ignore => {}
        }
    }
}

pub fn rst(stream_id: u32, code: ErrorCode) -> OutboundFrame {
    OutboundFrame::RstStream {
        stream_id,
        error_code: code,
    }
}

pub fn goaway(last_stream_id: u32, code: ErrorCode) -> OutboundFrame {
    OutboundFrame::GoAway {
        last_stream_id,
        error_code: code,
        debug_data: Bytes::new(),
    }
}

/// Decode a client header block with a fresh decoder.
pub fn decode_block(block: &[u8]) -> Vec<(String, String)> {
    fluke_hpack::Decoder::new()
        .decode(block)
        .unwrap()
        .into_iter()
        .map(|(n, v)| {
            (
                String::from_utf8_lossy(n.as_ref()).into_owned(),
                String::from_utf8_lossy(v.as_ref()).into_owned(),
            )
        })
        .collect()
}

/// Minimal RFC 7540 request validation: enough to answer every catalogue case
/// the way a conforming server would.
struct CompliantServer {
    decoder: fluke_hpack::Decoder<'static>,
    /// Declared content-length and bytes seen so far, per stream.
    bodies: HashMap<u32, (Option<usize>, usize)>,
}

impl Default for CompliantServer {
    fn default() -> Self {
        Self {
            decoder: fluke_hpack::Decoder::new(),
            bodies: HashMap::new(),
        }
    }
}

impl CompliantServer {
    fn on_frame(&mut self, frame: &Frame) -> Action {
        match frame {
            Frame::Headers { stream_id, block, .. } => {
                let Ok(fields) = self.decoder.decode(block) else {
                    return Action::Send(vec![goaway(0, ErrorCode::COMPRESSION_ERROR)]);
                };
                let fields: Vec<(Vec<u8>, Vec<u8>)> = fields
                    .into_iter()
                    .map(|(n, v)| (owned(n), owned(v)))
                    .collect();
                if is_malformed(&fields) {
                    return Action::Send(vec![rst(*stream_id, ErrorCode::PROTOCOL_ERROR)]);
                }
                let declared = fields
                    .iter()
                    .find(|(n, _)| n.as_slice() == b"content-length")
                    .and_then(|(_, v)| std::str::from_utf8(v).ok()?.parse().ok());
                self.bodies.insert(*stream_id, (declared, 0));
                Action::Ignore
            }
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => {
                if payload.len() > DEFAULT_MAX_FRAME_SIZE as usize {
                    return Action::Send(vec![goaway(*stream_id, ErrorCode::FRAME_SIZE_ERROR)]);
                }
                let Some((declared, seen)) = self.bodies.get_mut(stream_id) else {
                    return Action::Ignore;
                };
                *seen += payload.len();
                match declared {
                    Some(declared) if *end_stream && *declared != *seen => {
                        Action::Send(vec![rst(*stream_id, ErrorCode::PROTOCOL_ERROR)])
                    }
                    _ => Action::Ignore,
                }
            }
            _ => Action::Ignore,
        }
    }
}

fn owned(bytes: impl AsRef<[u8]>) -> Vec<u8> {
    bytes.as_ref().to_vec()
}

fn is_malformed(fields: &[(Vec<u8>, Vec<u8>)]) -> bool {
    let mut seen_regular = false;
    let mut has_path = false;

    for (name, value) in fields {
        if name.iter().any(u8::is_ascii_uppercase) {
            return true;
        }
        if name.starts_with(b":") {
            if seen_regular {
                return true;
            }
            match name.as_slice() {
                b":path" => has_path = true,
                b":method" | b":scheme" | b":authority" => {}
                _ => return true,
            }
        } else {
            seen_regular = true;
            match name.as_slice() {
                b"connection" | b"keep-alive" | b"proxy-connection" | b"transfer-encoding" | b"upgrade" => {
                    return true;
                }
                b"te" if value.as_slice() != b"trailers" => return true,
                _ => {}
            }
        }
    }
    !has_path
}

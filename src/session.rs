//! One connection's lifecycle: connect, handshake, run steps, close.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::error::HarnessError;
use crate::harness::{Connector, FrameIo, FrameSource};
use crate::hpack::HeaderEncoder;
use crate::protocol::{Frame, OutboundFrame};
use crate::testcase::{Handshake, Step};

/// A connection to the server under test, owned by exactly one case.
pub struct Session<S> {
    io: FrameIo<S>,
    encoder: HeaderEncoder,
    next_stream_id: u32,
    current_stream_id: Option<u32>,
    closed: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Connect through `connector` and perform `handshake`.
    ///
    /// Every failure, including a GOAWAY or a close during the handshake, is
    /// reported as [`HarnessError::Connect`].
    pub async fn open<C>(connector: &C, handshake: Handshake, budget: Duration) -> Result<Self, HarnessError>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect().await?;
        let mut session = Self::with_timeout(stream, budget);

        if let Err(e) = session.handshake(handshake, budget).await {
            session.close().await;
            return Err(match e {
                HarnessError::Connect(_) => e,
                other => HarnessError::Connect(format!("handshake: {other}")),
            });
        }
        Ok(session)
    }

    /// Wrap an already connected stream. No bytes are exchanged.
    pub fn new(stream: S) -> Self {
        Self::with_timeout(stream, crate::config::DEFAULT_TIMEOUT)
    }

    /// Like [`new`](Self::new), bounding every write and the close by `timeout`.
    pub fn with_timeout(stream: S, timeout: Duration) -> Self {
        Self {
            io: FrameIo::new(stream).with_write_timeout(timeout),
            encoder: HeaderEncoder::new(),
            next_stream_id: 1,
            current_stream_id: None,
            closed: false,
        }
    }

    async fn handshake(&mut self, handshake: Handshake, budget: Duration) -> Result<(), HarnessError> {
        self.io.send_preface().await?;
        if handshake == Handshake::PrefaceOnly {
            return Ok(());
        }

        self.io
            .send(&OutboundFrame::Settings {
                ack: false,
                params: Vec::new(),
            })
            .await?;

        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::Timeout(budget));
            }
            match self.io.receive(remaining).await? {
                Frame::Settings { ack: false, params } => {
                    tracing::trace!(?params, "server SETTINGS");
                    self.io.send(&OutboundFrame::settings_ack()).await?;
                    return Ok(());
                }
                Frame::GoAway { error_code, .. } => {
                    return Err(HarnessError::Connect(format!(
                        "server sent GOAWAY({error_code}) during handshake"
                    )));
                }
                other => tracing::trace!(frame = other.kind(), "skipping frame during handshake"),
            }
        }
    }

    /// Allocate the next client stream id (1, 3, 5, ...).
    pub fn open_stream(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        self.current_stream_id = Some(id);
        id
    }

    /// The id the next [`open_stream`](Self::open_stream) will return.
    pub fn next_stream_id(&self) -> u32 {
        self.next_stream_id
    }

    /// Perform one step of a case.
    pub async fn execute(&mut self, step: &Step) -> Result<(), HarnessError> {
        let frame = match step {
            Step::Settings(params) => OutboundFrame::Settings {
                ack: false,
                params: params.clone(),
            },
            Step::Headers { fields, end_stream } => {
                let block = self.encoder.encode(fields);
                OutboundFrame::Headers {
                    stream_id: self.open_stream(),
                    block,
                    end_stream: *end_stream,
                    end_headers: true,
                }
            }
            Step::HeaderBlock { block, end_stream } => OutboundFrame::Headers {
                stream_id: self.open_stream(),
                block: block.clone(),
                end_stream: *end_stream,
                end_headers: true,
            },
            Step::Data { payload, end_stream } => OutboundFrame::Data {
                stream_id: self.current_stream_id.unwrap_or(self.next_stream_id),
                payload: payload.clone(),
                end_stream: *end_stream,
            },
        };
        self.send(&frame).await
    }

    pub async fn send(&mut self, frame: &OutboundFrame) -> Result<(), HarnessError> {
        if self.closed {
            return Err(HarnessError::Write(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session closed",
            )));
        }
        self.io.send(frame).await
    }

    /// Shut the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.io.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S> FrameSource for Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn receive(&mut self, budget: Duration) -> Result<Frame, HarnessError> {
        if self.closed {
            return Err(HarnessError::Closed);
        }
        self.io.receive(budget).await
    }
}

//! Test case data model.
//!
//! A [`Case`] is plain data: what to send ([`Step`]s built from a
//! [`CaseContext`]) and which server reactions count as conforming
//! ([`Expectation`]s). The runner executes every case the same way.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::hpack::HeaderField;
use crate::protocol::{ErrorCode, Frame, SettingId};

// =============================================================================
// Requests
// =============================================================================

/// How much of the connection handshake the session performs before the
/// case's own steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Preface, SETTINGS, wait for the server's SETTINGS and ACK it.
    Full,
    /// Preface only. The case sends its own SETTINGS.
    PrefaceOnly,
}

/// One action a case performs on its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A SETTINGS frame with the given parameters.
    Settings(Vec<(SettingId, u32)>),
    /// HPACK-encode `fields` and send them in a HEADERS frame on a newly
    /// opened stream.
    Headers {
        fields: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Send `block` verbatim as the header block of a HEADERS frame on a
    /// newly opened stream, bypassing the encoder.
    HeaderBlock { block: Bytes, end_stream: bool },
    /// A DATA frame on the most recently opened stream.
    Data { payload: Bytes, end_stream: bool },
}

/// Per-run values a case needs to build its request.
#[derive(Debug, Clone)]
pub struct CaseContext {
    pub authority: String,
    pub scheme: &'static str,
}

/// The request line every case starts from.
pub fn request_headers(ctx: &CaseContext, method: &str) -> Vec<HeaderField> {
    vec![
        crate::hpack::pair(":method", method),
        crate::hpack::pair(":scheme", ctx.scheme),
        crate::hpack::pair(":path", "/"),
        crate::hpack::pair(":authority", ctx.authority.as_str()),
    ]
}

/// `len` bytes of filler.
pub fn dummy_data(len: usize) -> Bytes {
    Bytes::from(vec![b'x'; len])
}

// =============================================================================
// Expectations
// =============================================================================

/// The granularity at which the server signals an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// RST_STREAM.
    StreamError,
    /// GOAWAY.
    ConnectionError,
}

/// Whether a matching frame passes or fails the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Accept,
    Forbid,
}

/// A predicate over a single inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub signal: Signal,
    pub codes: Vec<ErrorCode>,
    pub polarity: Polarity,
}

impl Expectation {
    /// RST_STREAM carrying `code`.
    pub fn stream_error(code: ErrorCode) -> Self {
        Self {
            signal: Signal::StreamError,
            codes: vec![code],
            polarity: Polarity::Accept,
        }
    }

    /// GOAWAY carrying `code`.
    pub fn connection_error(code: ErrorCode) -> Self {
        Self {
            signal: Signal::ConnectionError,
            codes: vec![code],
            polarity: Polarity::Accept,
        }
    }

    /// RST_STREAM or GOAWAY carrying `code`, whichever arrives first.
    pub fn stream_or_connection_error(code: ErrorCode) -> Vec<Self> {
        vec![Self::stream_error(code), Self::connection_error(code)]
    }

    /// Turn this into a negative expectation: a matching frame fails the case.
    pub fn forbidden(mut self) -> Self {
        self.polarity = Polarity::Forbid;
        self
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        let code = match (self.signal, frame) {
            (Signal::StreamError, Frame::RstStream { error_code, .. }) => error_code,
            (Signal::ConnectionError, Frame::GoAway { error_code, .. }) => error_code,
            _ => return false,
        };
        self.codes.contains(code)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.polarity == Polarity::Forbid {
            f.write_str("no ")?;
        }
        let kind = match self.signal {
            Signal::StreamError => "RST_STREAM",
            Signal::ConnectionError => "GOAWAY",
        };
        let codes: Vec<String> = self.codes.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", kind, codes.join("|"))
    }
}

// =============================================================================
// Results
// =============================================================================

/// Why a case failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The budget ran out with no qualifying frame.
    Timeout(Duration),
    /// The server closed the connection with no qualifying frame.
    ConnectionClosed,
    /// A frame matched a negative expectation.
    Forbidden { expectation: String, frame: String },
    /// Connecting or handshaking failed.
    Setup(String),
    /// Sending the crafted request failed.
    Write(String),
    /// The server sent something the codec could not parse.
    Transport(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(budget) => {
                write!(f, "no matching frame observed before deadline ({budget:?})")
            }
            Self::ConnectionClosed => write!(f, "connection closed before match"),
            Self::Forbidden { expectation, frame } => {
                write!(f, "received {frame}, expected {expectation}")
            }
            Self::Setup(e) => write!(f, "setup failed: {e}"),
            Self::Write(e) => write!(f, "write failed: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Terminal result of the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { matched: String },
    Fail(FailReason),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }
}

/// The reported result of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub id: String,
    pub description: &'static str,
    pub requirement: &'static str,
    pub verdict: Verdict,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

// =============================================================================
// Cases and sections
// =============================================================================

/// Builds a case's steps from the run context.
pub type BuildFn = fn(&CaseContext) -> Vec<Step>;

/// One conformance check.
#[derive(Debug, Clone)]
pub struct Case {
    /// `section#n`, assigned when the case is added to its section.
    pub id: String,
    pub description: &'static str,
    /// The requirement text a failure is reported against.
    pub requirement: &'static str,
    pub handshake: Handshake,
    pub build: BuildFn,
    /// Checked in order; the first one a frame satisfies decides the case.
    pub expectations: Vec<Expectation>,
}

impl Case {
    pub fn new(description: &'static str, requirement: &'static str, build: BuildFn) -> Self {
        Self {
            id: String::new(),
            description,
            requirement,
            handshake: Handshake::Full,
            build,
            expectations: Vec::new(),
        }
    }

    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    pub fn expect_any(mut self, expectations: impl IntoIterator<Item = Expectation>) -> Self {
        self.expectations.extend(expectations);
        self
    }
}

/// A child of a [`Section`].
#[derive(Debug, Clone)]
pub enum Node {
    Section(Section),
    Case(Case),
}

/// A titled group of cases and subsections.
#[derive(Debug, Clone)]
pub struct Section {
    /// Dotted section number, e.g. `8.1.2.1`. Empty for the root.
    pub id: String,
    pub title: String,
    pub depth: usize,
    pub children: Vec<Node>,
}

impl Section {
    pub fn root() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            depth: 0,
            children: Vec::new(),
        }
    }

    pub fn new(id: &str, title: &str, depth: usize) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            depth,
            children: Vec::new(),
        }
    }

    /// Append a case, assigning it the next `section#n` id.
    pub fn case(mut self, mut case: Case) -> Self {
        let n = self
            .children
            .iter()
            .filter(|c| matches!(c, Node::Case(_)))
            .count()
            + 1;
        case.id = format!("{}#{}", self.id, n);
        self.children.push(Node::Case(case));
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.children.push(Node::Section(section));
        self
    }

    /// Header line text, e.g. `4.2. Frame Size`.
    pub fn heading(&self) -> String {
        format!("{}. {}", self.id, self.title)
    }

    /// All cases in traversal order.
    pub fn cases(&self) -> Vec<&Case> {
        let mut out = Vec::new();
        self.collect_cases(&mut out);
        out
    }

    fn collect_cases<'a>(&'a self, out: &mut Vec<&'a Case>) {
        for child in &self.children {
            match child {
                Node::Case(case) => out.push(case),
                Node::Section(section) => section.collect_cases(out),
            }
        }
    }
}

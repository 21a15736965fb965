//! HTTP/2 conformance harness.
//!
//! Connects to an HTTP/2 server, sends deliberately malformed or
//! boundary-violating frames and checks that the server answers with the
//! error RFC 7540 requires: a `RST_STREAM` for stream errors, a `GOAWAY`
//! for connection errors.
//!
//! # Architecture
//!
//! - [`protocol`]: frame codec, error codes, flags
//! - [`hpack`]: header block encoding
//! - [`harness`]: frame I/O and connectors (TCP, TLS)
//! - [`session`]: one connection per case, handshake to close
//! - [`testcase`]: cases, expectations, verdicts, sections
//! - [`classifier`]: the deadline-bounded read-and-match loop
//! - [`runner`]: walks the section tree and runs selected cases
//! - [`report`]: nested tallies and the text/JSON report
//! - [`tests`]: the case catalogue

pub mod classifier;
pub mod config;
pub mod error;
pub mod harness;
pub mod hpack;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod session;
pub mod testcase;
pub mod tests;

pub use config::{RunConfig, SectionFilter};
pub use error::HarnessError;
pub use report::{Reporter, Summary};
pub use runner::Runner;

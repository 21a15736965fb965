//! Header block encoding.
//!
//! Thin wrapper over `fluke_hpack`. Each [`Session`](crate::session::Session)
//! owns its own encoder because the HPACK dynamic table is connection state.

use bytes::Bytes;

/// One header field, in the order it should appear in the block.
///
/// Names are sent exactly as given. Uppercase names, unknown pseudo-headers
/// and misplaced pseudo-headers all survive encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Shorthand for building a [`HeaderField`].
pub fn pair(name: impl Into<String>, value: impl Into<String>) -> HeaderField {
    HeaderField {
        name: name.into(),
        value: value.into(),
    }
}

/// Connection-scoped HPACK encoder.
pub struct HeaderEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl HeaderEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode `fields` into a header block fragment.
    pub fn encode(&mut self, fields: &[HeaderField]) -> Bytes {
        let block = self.inner.encode(
            fields
                .iter()
                .map(|f| (f.name.as_bytes(), f.value.as_bytes())),
        );
        Bytes::from(block)
    }
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}

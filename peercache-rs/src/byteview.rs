//! Provides an immutable view on the bytes of a cached value.
//!
//! A [ByteView] is what a [Group](crate::group::Group) stores and hands out. Internally it wraps
//! a [Bytes] buffer, so that cloning a view (e.g. when returning a cached value or when handing
//! one result to several waiting callers) never copies the underlying data. As there is no way
//! to obtain mutable access, a view can be shared freely across threads.
//!
//! # Examples
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::from("Hello World");
//! assert_eq!(view.len(), 11);
//! assert_eq!(view.as_slice(), b"Hello World");
//! assert_eq!(view.to_string(), "Hello World");
//!
//! // Clones share the same buffer...
//! let copy = view.clone();
//! assert_eq!(copy, view);
//! ```
use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable snapshot of a byte sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Creates a view by copying the given slice.
    ///
    /// Use this if the caller keeps ownership of the buffer and might modify or reuse it.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        ByteView {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Determines if this view contains no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Provides read access to the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns a copy of the underlying bytes which the caller may modify as needed.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Returns a cheap handle to the underlying buffer.
    ///
    /// This is used to hand the data to the HTTP layer without copying it.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.bytes.len()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView { bytes: data.into() }
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        ByteView { bytes }
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView {
            bytes: data.into_bytes().into(),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from_slice(data.as_bytes())
    }
}

impl Display for ByteView {
    /// Renders the bytes as string, replacing invalid UTF-8 sequences.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

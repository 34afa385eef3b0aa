//! Hierarchical documents: trees of named values.
//!
//! A [`DataNode`] has a name, an optional [`Value`], and ordered children.
//! The same tree is used for configuration files and for structured
//! payloads, and can be stored in three forms (see [`DocumentFormat`]).
//!
//! # Example
//!
//! ```
//! use tether_protocol::{DataNode, DocumentFormat};
//!
//! let mut config = DataNode::new("server");
//! config.set_child("port", 5127).set_child("name", "lobby");
//! config.get_or_add_child("limits").set_child("players", 16);
//!
//! let bytes = config.to_bytes(DocumentFormat::Compressed).unwrap();
//! let loaded = DataNode::from_bytes(&bytes).unwrap();
//!
//! assert_eq!(loaded.child_value::<i32>("limits/players"), Some(16));
//! assert_eq!(loaded, config);
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tether_buffer::Buffer;

use crate::convert::FromValue;
use crate::{ObjectCodec, ProtocolError, Value, text};

/// Marker that opens the compressed form.
pub const COMPRESSED_MAGIC: [u8; 4] = *b"CD01";

// ---------------------------------------------------------------------------
// DocumentFormat
// ---------------------------------------------------------------------------

/// The physical forms a document can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    /// Tab-indented `name = literal` lines.
    Text,
    /// The codec's node encoding.
    Binary,
    /// [`COMPRESSED_MAGIC`] followed by the binary form through zlib.
    Compressed,
}

impl DocumentFormat {
    /// Guesses the form of `bytes`.
    ///
    /// The magic marker means compressed. Text must open with a name
    /// character (letters, digits, `_ / "`) and keep to line characters
    /// (`= space tab CR LF` as well) for the first four bytes. The first
    /// binary byte is the root name's length and can be any of those, so
    /// text-looking input that decodes completely as a binary node is
    /// binary.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&COMPRESSED_MAGIC) {
            return Self::Compressed;
        }
        let starts_line = |b: &u8| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b'"');
        let continues_line =
            |b: &u8| starts_line(b) || matches!(b, b'=' | b' ' | b'\t' | b'\r' | b'\n');
        let mut head = bytes.iter().take(4);
        let looks_like_text = head.next().is_some_and(starts_line) && head.all(continues_line);
        if looks_like_text && !decodes_as_binary(bytes) {
            Self::Text
        } else {
            Self::Binary
        }
    }
}

fn decodes_as_binary(bytes: &[u8]) -> bool {
    let mut buf = Buffer::from_slice(bytes);
    ObjectCodec::default().read_node(&mut buf).is_ok() && buf.remaining() == 0
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
            Self::Compressed => write!(f, "compressed"),
        }
    }
}

// ---------------------------------------------------------------------------
// DataNode
// ---------------------------------------------------------------------------

/// A named node with an optional value and ordered children.
///
/// Child names need not be unique. Lookups return the first match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataNode {
    name: String,
    value: Option<Value>,
    children: Vec<DataNode>,
}

impl DataNode {
    /// Creates a node without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            children: Vec::new(),
        }
    }

    /// Creates a node holding `value`. A null value leaves it empty.
    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut node = Self::new(name);
        node.set_value(value);
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Replaces the value. Setting [`Value::Null`] clears it.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        let value = value.into();
        self.value = (!value.is_null()).then_some(value);
    }

    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    /// The value converted to `T`.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        self.value.as_ref().and_then(T::from_value)
    }

    pub fn children(&self) -> &[DataNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<DataNode> {
        &mut self.children
    }

    /// Appends `child` and returns it.
    pub fn add_child(&mut self, child: DataNode) -> &mut DataNode {
        self.children.push(child);
        self.children.last_mut().expect("just pushed")
    }

    /// Appends a child named `name` holding `value` and returns it.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut DataNode {
        self.add_child(DataNode::with_value(name, value))
    }

    /// The first child called `name`.
    pub fn child(&self, name: &str) -> Option<&DataNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut DataNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Follows a `/`-separated path of child names.
    pub fn child_at_path(&self, path: &str) -> Option<&DataNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// The first child called `name`, created if missing.
    pub fn get_or_add_child(&mut self, name: &str) -> &mut DataNode {
        match self.children.iter().position(|c| c.name == name) {
            Some(index) => &mut self.children[index],
            None => self.add_child(DataNode::new(name)),
        }
    }

    /// Sets `value` on every child called `name`, or adds one child if
    /// there are none. Returns `self` for chaining.
    pub fn set_child(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        let mut found = false;
        for child in self.children.iter_mut().filter(|c| c.name == name) {
            child.set_value(value.clone());
            found = true;
        }
        if !found {
            self.add_child(DataNode::with_value(name, value));
        }
        self
    }

    /// Removes and returns the first child called `name`.
    pub fn remove_child(&mut self, name: &str) -> Option<DataNode> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// The value at `path` converted to `T`.
    pub fn child_value<T: FromValue>(&self, path: &str) -> Option<T> {
        self.child_at_path(path).and_then(DataNode::get)
    }

    /// Like [`child_value`](Self::child_value) with a fallback.
    pub fn child_value_or<T: FromValue>(&self, path: &str, default: T) -> T {
        self.child_value(path).unwrap_or(default)
    }

    /// Whether the node carries anything worth storing: a value or at
    /// least one child.
    pub fn is_serializable(&self) -> bool {
        self.value.is_some() || !self.children.is_empty()
    }

    /// Merges `other` into `self`.
    ///
    /// `other`'s value, if it has one, replaces this node's value.
    /// Children are merged by name, adding the ones that are missing.
    /// Nothing in `self` is removed.
    pub fn merge(&mut self, other: &DataNode) {
        if let Some(value) = &other.value {
            self.value = Some(value.clone());
        }
        for theirs in &other.children {
            self.get_or_add_child(&theirs.name).merge(theirs);
        }
    }

    // -- Serialization --

    /// Appends the text form to `out`.
    pub fn write_text(&self, out: &mut String) {
        text::write_document(out, self);
    }

    /// Parses the text form.
    pub fn read_text(text: &str) -> Result<Self, ProtocolError> {
        text::read_document(text)
    }

    /// Encodes the document in `format`.
    pub fn to_bytes(&self, format: DocumentFormat) -> Result<Vec<u8>, ProtocolError> {
        match format {
            DocumentFormat::Text => Ok(self.to_string().into_bytes()),
            DocumentFormat::Binary => self.binary(),
            DocumentFormat::Compressed => {
                let mut out = COMPRESSED_MAGIC.to_vec();
                let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
                encoder.write_all(&self.binary()?)?;
                encoder.finish()?;
                Ok(out)
            }
        }
    }

    /// Decodes a document, detecting its form. Empty input is an empty
    /// document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        match DocumentFormat::detect(bytes) {
            DocumentFormat::Text => {
                let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
                Self::read_text(text)
            }
            DocumentFormat::Binary => Self::from_binary(bytes),
            DocumentFormat::Compressed => {
                let mut raw = Vec::new();
                ZlibDecoder::new(&bytes[COMPRESSED_MAGIC.len()..]).read_to_end(&mut raw)?;
                Self::from_binary(&raw)
            }
        }
    }

    /// Writes the document to `path` in `format`.
    pub fn save(&self, path: impl AsRef<Path>, format: DocumentFormat) -> Result<(), ProtocolError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes(format)?)?;
        tracing::debug!(path = %path.display(), %format, "saved document");
        Ok(())
    }

    /// Reads a document from `path` in whichever form it was saved.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let node = Self::from_bytes(&bytes)?;
        tracing::debug!(
            path = %path.display(),
            format = %DocumentFormat::detect(&bytes),
            "loaded document"
        );
        Ok(node)
    }

    fn binary(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Buffer::new();
        ObjectCodec::default().write_node(&mut buf, self)?;
        Ok(buf.as_slice().to_vec())
    }

    fn from_binary(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Buffer::from_slice(bytes);
        let node = ObjectCodec::default().read_node(&mut buf)?;
        if buf.remaining() > 0 {
            tracing::warn!(trailing = buf.remaining(), "ignoring bytes after document");
        }
        Ok(node)
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_text(&mut out);
        f.write_str(&out)
    }
}

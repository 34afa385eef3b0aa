//! The binary object codec.
//!
//! Every value is written as a one-byte [`TypeTag`] followed by its
//! payload. Counts (string lengths, element counts, field counts) use a
//! variable width: one byte when below 255, otherwise the byte 255 and a
//! full little-endian `i32`.
//!
//! ```text
//! scalar   : tag | payload
//! array    : 250 | element name | count | homogeneous u8 | (shared tag | payload*) or value*
//! list     : 251 | (same as array)
//! custom   : 252 | type name | payload length | payload
//! object   : 253 | type name | field count | (field name | value)*
//! opaque   : 255 | length | bytes
//! document : 14  | name | value | child count | child*
//! ```
//!
//! # Error policy
//!
//! Anything that leaves the cursor in an unknown place (an unknown tag,
//! a truncated buffer, invalid UTF-8) is returned as an error. Problems
//! confined to a value whose extent is known, such as a custom payload
//! that does not decode or an array element of the wrong type, are
//! logged and produce `None` / `Default::default()` instead.

use tether_buffer::Buffer;

use crate::convert::FromValue;
use crate::value::{
    Bounds, Color, Color32, CustomValue, Matrix4, ObjectValue, Quat, Sequence, SkinWeights,
    TypeTag, Value, Vec2, Vec3, Vec4,
};
use crate::{DataNode, ProtocolError};

/// Default limit on how deeply values may nest.
pub const DEFAULT_MAX_DEPTH: usize = 64;

const COUNT_ESCAPE: u8 = 255;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A type that writes and reads its own binary payload.
///
/// The codec stores the payload behind the type name and a length, so a
/// reader that does not know `TYPE_NAME` can still skip it.
///
/// # Example
///
/// ```
/// use tether_buffer::Buffer;
/// use tether_protocol::{BinarySerializable, ObjectCodec, ProtocolError};
///
/// #[derive(Debug, PartialEq)]
/// struct Score(u32);
///
/// impl BinarySerializable for Score {
///     const TYPE_NAME: &'static str = "Score";
///
///     fn serialize(&self, buf: &mut Buffer) {
///         buf.write_u32(self.0);
///     }
///
///     fn deserialize(buf: &mut Buffer) -> Result<Self, ProtocolError> {
///         Ok(Score(buf.read_u32()?))
///     }
/// }
///
/// let codec = ObjectCodec::default();
/// let mut buf = Buffer::new();
/// codec.write_custom(&mut buf, &Score(7)).unwrap();
/// buf.begin_read(0).unwrap();
/// assert_eq!(codec.read_custom::<Score>(&mut buf).unwrap(), Some(Score(7)));
/// ```
pub trait BinarySerializable: Sized {
    const TYPE_NAME: &'static str;

    fn serialize(&self, buf: &mut Buffer);

    fn deserialize(buf: &mut Buffer) -> Result<Self, ProtocolError>;
}

/// A type that describes itself as a list of named fields.
///
/// Each field goes through the codec like any other value, so a described
/// type can contain any value the codec supports, including other
/// described objects.
pub trait Describe: Sized {
    const TYPE_NAME: &'static str;

    /// The fields to write, in order.
    fn describe(&self) -> Vec<(&'static str, Value)>;

    /// Rebuilds the type from decoded fields.
    fn from_fields(object: &ObjectValue) -> Result<Self, ProtocolError>;

    fn to_object(&self) -> ObjectValue {
        ObjectValue {
            type_name: Self::TYPE_NAME.to_string(),
            fields: self
                .describe()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

impl CustomValue {
    /// Serializes `value` into an opaque custom payload.
    pub fn encode<T: BinarySerializable>(value: &T) -> Self {
        let mut scratch = Buffer::new();
        value.serialize(&mut scratch);
        Self {
            type_name: T::TYPE_NAME.to_string(),
            payload: scratch.as_slice().to_vec(),
        }
    }

    /// Decodes the payload as `T`.
    pub fn decode<T: BinarySerializable>(&self) -> Result<T, ProtocolError> {
        if self.type_name != T::TYPE_NAME {
            return Err(ProtocolError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                found: self.type_name.clone(),
            });
        }
        T::deserialize(&mut Buffer::from_slice(&self.payload))
    }
}

impl ObjectValue {
    /// Reads field `name` as `T`, if present and convertible.
    pub fn get<T: FromValue>(&self, name: &str) -> Option<T> {
        self.field(name).and_then(T::from_value)
    }

    /// Like [`get`](Self::get) but reports which field was missing.
    pub fn require<T: FromValue>(&self, name: &str) -> Result<T, ProtocolError> {
        self.get(name)
            .ok_or_else(|| ProtocolError::InvalidMessage(format!(
                "{} is missing field {name}",
                self.type_name
            )))
    }
}

// ---------------------------------------------------------------------------
// Counts and strings
// ---------------------------------------------------------------------------

/// Writes a variable-width count. Counts past `i32::MAX` have no wire
/// form.
pub fn write_count(buf: &mut Buffer, count: usize) -> Result<(), ProtocolError> {
    if count < COUNT_ESCAPE as usize {
        buf.write_u8(count as u8);
    } else {
        let wide = i32::try_from(count).map_err(|_| ProtocolError::CountTooLarge(count))?;
        buf.write_u8(COUNT_ESCAPE);
        buf.write_i32(wide);
    }
    Ok(())
}

/// Reads a variable-width count.
pub fn read_count(buf: &mut Buffer) -> Result<usize, ProtocolError> {
    let first = buf.read_u8()?;
    if first < COUNT_ESCAPE {
        return Ok(first as usize);
    }
    let wide = buf.read_i32()?;
    usize::try_from(wide).map_err(|_| ProtocolError::ImplausibleLength {
        count: 0,
        remaining: buf.remaining(),
    })
}

/// Writes a count-prefixed UTF-8 string.
pub fn write_string(buf: &mut Buffer, value: &str) -> Result<(), ProtocolError> {
    write_count(buf, value.len())?;
    buf.write_bytes(value.as_bytes());
    Ok(())
}

/// Reads a count-prefixed UTF-8 string.
pub fn read_string(buf: &mut Buffer) -> Result<String, ProtocolError> {
    let len = read_count(buf)?;
    let bytes = buf.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Rejects `count` items that need at least `min_size` bytes each when
/// fewer bytes remain.
fn check_plausible(buf: &Buffer, count: usize, min_size: usize) -> Result<(), ProtocolError> {
    let remaining = buf.remaining();
    if count.saturating_mul(min_size) > remaining {
        return Err(ProtocolError::ImplausibleLength { count, remaining });
    }
    Ok(())
}

fn read_f32(buf: &mut Buffer) -> Result<f32, ProtocolError> {
    let v = buf.read_f32()?;
    Ok(if v.is_nan() { 0.0 } else { v })
}

fn read_f64(buf: &mut Buffer) -> Result<f64, ProtocolError> {
    let v = buf.read_f64()?;
    Ok(if v.is_nan() { 0.0 } else { v })
}

fn read_floats<const N: usize>(buf: &mut Buffer) -> Result<[f32; N], ProtocolError> {
    let mut out = [0.0; N];
    for slot in &mut out {
        *slot = read_f32(buf)?;
    }
    Ok(out)
}

fn write_floats(buf: &mut Buffer, values: &[f32]) {
    for v in values {
        buf.write_f32(*v);
    }
}

// ---------------------------------------------------------------------------
// ObjectCodec
// ---------------------------------------------------------------------------

/// Writes and reads tagged [`Value`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectCodec {
    /// Nesting limit applied while reading. Deeper input is rejected
    /// with [`ProtocolError::TooDeep`].
    pub max_depth: usize,
}

impl Default for ObjectCodec {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ObjectCodec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    // -- Writing --

    /// Writes a tagged value.
    pub fn write(&self, buf: &mut Buffer, value: &Value) -> Result<(), ProtocolError> {
        buf.write_u8(value.tag().into());
        self.write_payload(buf, value)
    }

    /// Converts `value` and writes it tagged.
    pub fn write_as(&self, buf: &mut Buffer, value: impl Into<Value>) -> Result<(), ProtocolError> {
        self.write(buf, &value.into())
    }

    /// Writes `value` as a custom payload behind its type name.
    pub fn write_custom<T: BinarySerializable>(
        &self,
        buf: &mut Buffer,
        value: &T,
    ) -> Result<(), ProtocolError> {
        self.write(buf, &Value::Custom(CustomValue::encode(value)))
    }

    /// Writes `value` as a field-described object.
    pub fn write_object<T: Describe>(&self, buf: &mut Buffer, value: &T) -> Result<(), ProtocolError> {
        self.write(buf, &Value::Object(value.to_object()))
    }

    fn write_payload(&self, buf: &mut Buffer, value: &Value) -> Result<(), ProtocolError> {
        match value {
            Value::Null => {}
            Value::Bool(v) => buf.write_bool(*v),
            Value::U8(v) => buf.write_u8(*v),
            Value::I8(v) => buf.write_i8(*v),
            Value::U16(v) => buf.write_u16(*v),
            Value::I16(v) => buf.write_i16(*v),
            Value::U32(v) => buf.write_u32(*v),
            Value::I32(v) => buf.write_i32(*v),
            Value::U64(v) => buf.write_u64(*v),
            Value::I64(v) => buf.write_i64(*v),
            Value::F32(v) => buf.write_f32(*v),
            Value::F64(v) => buf.write_f64(*v),
            Value::String(s) => write_string(buf, s)?,
            Value::Vec2(v) => write_floats(buf, &[v.x, v.y]),
            Value::Vec3(v) => write_floats(buf, &[v.x, v.y, v.z]),
            Value::Vec4(v) => write_floats(buf, &[v.x, v.y, v.z, v.w]),
            Value::Quat(q) => write_floats(buf, &[q.x, q.y, q.z, q.w]),
            Value::Color32(c) => buf.write_bytes(&[c.r, c.g, c.b, c.a]),
            Value::Color(c) => write_floats(buf, &[c.r, c.g, c.b, c.a]),
            Value::Matrix4(m) => write_floats(buf, &m.0),
            Value::Bounds(b) => write_floats(
                buf,
                &[b.center.x, b.center.y, b.center.z, b.size.x, b.size.y, b.size.z],
            ),
            Value::SkinWeights(w) => {
                for (index, weight) in w.indices.iter().zip(&w.weights) {
                    buf.write_i32(*index);
                    buf.write_f32(*weight);
                }
            }
            Value::Array(seq) | Value::List(seq) => self.write_sequence(buf, seq)?,
            Value::Document(node) => self.write_node(buf, node)?,
            Value::Custom(custom) => {
                write_string(buf, &custom.type_name)?;
                write_count(buf, custom.payload.len())?;
                buf.write_bytes(&custom.payload);
            }
            Value::Object(object) => {
                write_string(buf, &object.type_name)?;
                write_count(buf, object.fields.len())?;
                for (name, field) in &object.fields {
                    write_string(buf, name)?;
                    self.write(buf, field)?;
                }
            }
            Value::Opaque(bytes) => {
                write_count(buf, bytes.len())?;
                buf.write_bytes(bytes);
            }
        }
        Ok(())
    }

    fn write_sequence(&self, buf: &mut Buffer, seq: &Sequence) -> Result<(), ProtocolError> {
        write_string(buf, &seq.element)?;
        write_count(buf, seq.items.len())?;
        match seq.shared_tag() {
            Some(tag) => {
                buf.write_u8(1);
                buf.write_u8(tag.into());
                for item in &seq.items {
                    self.write_payload(buf, item)?;
                }
            }
            None => {
                buf.write_u8(0);
                for item in &seq.items {
                    self.write(buf, item)?;
                }
            }
        }
        Ok(())
    }

    /// Writes a document node (without a leading tag).
    ///
    /// Children that carry neither a value nor children of their own are
    /// skipped.
    pub fn write_node(&self, buf: &mut Buffer, node: &DataNode) -> Result<(), ProtocolError> {
        write_string(buf, node.name())?;
        match node.value() {
            Some(value) => self.write(buf, value)?,
            None => buf.write_u8(TypeTag::Null.into()),
        }
        let children: Vec<&DataNode> = node
            .children()
            .iter()
            .filter(|child| child.is_serializable())
            .collect();
        write_count(buf, children.len())?;
        for child in children {
            self.write_node(buf, child)?;
        }
        Ok(())
    }

    // -- Reading --

    /// Reads one tagged value.
    pub fn read(&self, buf: &mut Buffer) -> Result<Value, ProtocolError> {
        self.read_value(buf, 0)
    }

    /// Reads a value and converts it to `T`.
    ///
    /// Null yields `None`. A value that does not convert is logged and
    /// also yields `None`; the cursor is past it either way.
    pub fn read_as<T: FromValue>(&self, buf: &mut Buffer) -> Result<Option<T>, ProtocolError> {
        let value = self.read(buf)?;
        if value.is_null() {
            return Ok(None);
        }
        let converted = T::from_value(&value);
        if converted.is_none() {
            tracing::warn!(
                found = %value.type_name(),
                expected = std::any::type_name::<T>(),
                "value does not convert, using none"
            );
        }
        Ok(converted)
    }

    /// Reads an array or list of `T`.
    ///
    /// The result always has the declared number of elements: items that
    /// do not convert are logged and replaced with `T::default()`.
    pub fn read_vec<T: FromValue + Default>(
        &self,
        buf: &mut Buffer,
    ) -> Result<Vec<T>, ProtocolError> {
        let seq = match self.read(buf)? {
            Value::Array(seq) | Value::List(seq) => seq,
            Value::Null => return Ok(Vec::new()),
            other => {
                tracing::warn!(found = %other.type_name(), "expected an array");
                return Ok(Vec::new());
            }
        };
        Ok(seq
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                T::from_value(item).unwrap_or_else(|| {
                    tracing::warn!(
                        index,
                        found = %item.type_name(),
                        "array element does not convert, using default"
                    );
                    T::default()
                })
            })
            .collect())
    }

    /// Reads a custom payload as `T`.
    ///
    /// An unknown type name or a payload that fails to decode is logged
    /// and yields `None`.
    pub fn read_custom<T: BinarySerializable>(
        &self,
        buf: &mut Buffer,
    ) -> Result<Option<T>, ProtocolError> {
        match self.read(buf)? {
            Value::Null => Ok(None),
            Value::Custom(custom) => match custom.decode::<T>() {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(
                        type_name = %custom.type_name,
                        error = %e,
                        "custom value could not be decoded"
                    );
                    Ok(None)
                }
            },
            other => {
                tracing::warn!(
                    expected = T::TYPE_NAME,
                    found = %other.type_name(),
                    "expected a custom value"
                );
                Ok(None)
            }
        }
    }

    /// Reads a field-described object as `T`.
    pub fn read_object<T: Describe>(&self, buf: &mut Buffer) -> Result<Option<T>, ProtocolError> {
        match self.read(buf)? {
            Value::Null => Ok(None),
            Value::Object(object) if object.type_name == T::TYPE_NAME => {
                match T::from_fields(&object) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        tracing::warn!(type_name = T::TYPE_NAME, error = %e, "object could not be rebuilt");
                        Ok(None)
                    }
                }
            }
            other => {
                tracing::warn!(
                    expected = T::TYPE_NAME,
                    found = %other.type_name(),
                    "unexpected object type"
                );
                Ok(None)
            }
        }
    }

    /// Reads a document node (without a leading tag).
    pub fn read_node(&self, buf: &mut Buffer) -> Result<DataNode, ProtocolError> {
        self.read_node_at(buf, 0)
    }

    fn read_value(&self, buf: &mut Buffer, depth: usize) -> Result<Value, ProtocolError> {
        if depth > self.max_depth {
            return Err(ProtocolError::TooDeep(self.max_depth));
        }
        let raw = buf.read_u8()?;
        let tag = TypeTag::try_from(raw).map_err(|_| ProtocolError::UnknownTag(raw))?;
        self.read_payload(buf, tag, depth)
    }

    fn read_payload(
        &self,
        buf: &mut Buffer,
        tag: TypeTag,
        depth: usize,
    ) -> Result<Value, ProtocolError> {
        Ok(match tag {
            TypeTag::Null => Value::Null,
            TypeTag::Bool => Value::Bool(buf.read_bool()?),
            TypeTag::U8 => Value::U8(buf.read_u8()?),
            TypeTag::I8 => Value::I8(buf.read_i8()?),
            TypeTag::U16 => Value::U16(buf.read_u16()?),
            TypeTag::I16 => Value::I16(buf.read_i16()?),
            TypeTag::U32 => Value::U32(buf.read_u32()?),
            TypeTag::I32 => Value::I32(buf.read_i32()?),
            TypeTag::U64 => Value::U64(buf.read_u64()?),
            TypeTag::I64 => Value::I64(buf.read_i64()?),
            TypeTag::F32 => Value::F32(read_f32(buf)?),
            TypeTag::F64 => Value::F64(read_f64(buf)?),
            TypeTag::String => Value::String(read_string(buf)?),
            TypeTag::Vec2 => {
                let [x, y] = read_floats(buf)?;
                Value::Vec2(Vec2 { x, y })
            }
            TypeTag::Vec3 => {
                let [x, y, z] = read_floats(buf)?;
                Value::Vec3(Vec3 { x, y, z })
            }
            TypeTag::Vec4 => {
                let [x, y, z, w] = read_floats(buf)?;
                Value::Vec4(Vec4 { x, y, z, w })
            }
            TypeTag::Quat => {
                let [x, y, z, w] = read_floats(buf)?;
                Value::Quat(Quat { x, y, z, w })
            }
            TypeTag::Color32 => {
                let bytes = buf.read_bytes(4)?;
                Value::Color32(Color32 {
                    r: bytes[0],
                    g: bytes[1],
                    b: bytes[2],
                    a: bytes[3],
                })
            }
            TypeTag::Color => {
                let [r, g, b, a] = read_floats(buf)?;
                Value::Color(Color { r, g, b, a })
            }
            TypeTag::Matrix4 => Value::Matrix4(Matrix4(read_floats(buf)?)),
            TypeTag::Bounds => {
                let [cx, cy, cz, sx, sy, sz] = read_floats(buf)?;
                Value::Bounds(Bounds {
                    center: Vec3 {
                        x: cx,
                        y: cy,
                        z: cz,
                    },
                    size: Vec3 {
                        x: sx,
                        y: sy,
                        z: sz,
                    },
                })
            }
            TypeTag::SkinWeights => {
                let mut weights = SkinWeights::default();
                for i in 0..4 {
                    weights.indices[i] = buf.read_i32()?;
                    weights.weights[i] = read_f32(buf)?;
                }
                Value::SkinWeights(weights)
            }
            TypeTag::Document => Value::Document(Box::new(self.read_node_at(buf, depth + 1)?)),
            TypeTag::Array => Value::Array(self.read_sequence(buf, depth)?),
            TypeTag::List => Value::List(self.read_sequence(buf, depth)?),
            TypeTag::Custom => {
                let type_name = read_string(buf)?;
                let len = read_count(buf)?;
                let payload = buf.read_bytes(len)?.to_vec();
                Value::Custom(CustomValue { type_name, payload })
            }
            TypeTag::Object => {
                let type_name = read_string(buf)?;
                let count = read_count(buf)?;
                // field name count byte + value tag
                check_plausible(buf, count, 2)?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = read_string(buf)?;
                    let value = self.read_value(buf, depth + 1)?;
                    fields.push((name, value));
                }
                Value::Object(ObjectValue { type_name, fields })
            }
            TypeTag::Opaque => {
                let len = read_count(buf)?;
                Value::Opaque(buf.read_bytes(len)?.to_vec())
            }
        })
    }

    fn read_sequence(&self, buf: &mut Buffer, depth: usize) -> Result<Sequence, ProtocolError> {
        let element = read_string(buf)?;
        let count = read_count(buf)?;
        let homogeneous = buf.read_u8()? != 0;
        let mut items = Vec::new();

        if homogeneous {
            let raw = buf.read_u8()?;
            let tag = TypeTag::try_from(raw).map_err(|_| ProtocolError::UnknownTag(raw))?;
            if !tag.is_builtin() {
                return Err(ProtocolError::UnknownTag(raw));
            }
            check_plausible(buf, count, 1)?;
            items.reserve(count);
            for _ in 0..count {
                items.push(self.read_payload(buf, tag, depth + 1)?);
            }
        } else {
            check_plausible(buf, count, 1)?;
            items.reserve(count);
            for _ in 0..count {
                items.push(self.read_value(buf, depth + 1)?);
            }
        }
        Ok(Sequence { element, items })
    }

    fn read_node_at(&self, buf: &mut Buffer, depth: usize) -> Result<DataNode, ProtocolError> {
        if depth > self.max_depth {
            return Err(ProtocolError::TooDeep(self.max_depth));
        }
        let name = read_string(buf)?;
        let value = self.read_value(buf, depth)?;
        let count = read_count(buf)?;
        // name count byte + value tag + child count byte
        check_plausible(buf, count, 3)?;

        let mut node = DataNode::with_value(name, value);
        for _ in 0..count {
            let child = self.read_node_at(buf, depth + 1)?;
            node.add_child(child);
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &Value) -> Value {
        let codec = ObjectCodec::default();
        let mut buf = Buffer::new();
        codec.write(&mut buf, value).unwrap();
        buf.begin_read(0).unwrap();
        let decoded = codec.read(&mut buf).unwrap();
        assert_eq!(buf.remaining(), 0, "trailing bytes after {value:?}");
        decoded
    }

    // =========================================================================
    // Counts and strings
    // =========================================================================

    #[test]
    fn test_small_counts_take_one_byte() {
        let mut buf = Buffer::new();
        write_count(&mut buf, 254).unwrap();
        assert_eq!(buf.size(), 1);
        buf.begin_read(0).unwrap();
        assert_eq!(read_count(&mut buf).unwrap(), 254);
    }

    #[test]
    fn test_large_counts_use_escape_byte() {
        let mut buf = Buffer::new();
        write_count(&mut buf, 255).unwrap();
        write_count(&mut buf, 70_000).unwrap();
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.peek_u8(0), Some(255));
        buf.begin_read(0).unwrap();
        assert_eq!(read_count(&mut buf).unwrap(), 255);
        assert_eq!(read_count(&mut buf).unwrap(), 70_000);
    }

    #[test]
    fn test_count_past_i32_max_is_an_error() {
        let mut buf = Buffer::new();
        let count = i32::MAX as usize + 1;
        assert!(matches!(
            write_count(&mut buf, count),
            Err(ProtocolError::CountTooLarge(c)) if c == count
        ));
        assert!(buf.is_empty());
        write_count(&mut buf, i32::MAX as usize).unwrap();
        buf.begin_read(0).unwrap();
        assert_eq!(read_count(&mut buf).unwrap(), i32::MAX as usize);
    }

    #[test]
    fn test_negative_wide_count_is_rejected() {
        let mut buf = Buffer::new();
        buf.write_u8(255);
        buf.write_i32(-5);
        buf.begin_read(0).unwrap();
        assert!(matches!(
            read_count(&mut buf),
            Err(ProtocolError::ImplausibleLength { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut buf = Buffer::new();
        buf.write_u8(TypeTag::String.into());
        buf.write_u8(2);
        buf.write_bytes(&[0xC3, 0x28]);
        buf.begin_read(0).unwrap();
        assert!(matches!(
            ObjectCodec::default().read(&mut buf),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    #[test]
    fn test_integer_boundaries_round_trip() {
        let values = [
            Value::U8(u8::MAX),
            Value::I8(i8::MIN),
            Value::U16(u16::MAX),
            Value::I16(i16::MIN),
            Value::U32(u32::MAX),
            Value::I32(i32::MIN),
            Value::U64(u64::MAX),
            Value::I64(i64::MIN),
            Value::Bool(true),
            Value::String(String::new()),
            Value::String("héllo".into()),
        ];
        for value in values {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_nan_reads_back_as_zero() {
        assert_eq!(round_trip(&Value::F32(f32::NAN)), Value::F32(0.0));
        assert_eq!(round_trip(&Value::F64(f64::NAN)), Value::F64(0.0));
        let v = Value::Vec3(Vec3 {
            x: f32::NAN,
            y: 1.0,
            z: 2.0,
        });
        assert_eq!(
            round_trip(&v),
            Value::Vec3(Vec3 {
                x: 0.0,
                y: 1.0,
                z: 2.0
            })
        );
    }

    #[test]
    fn test_infinity_is_preserved() {
        assert_eq!(round_trip(&Value::F32(f32::INFINITY)), Value::F32(f32::INFINITY));
    }

    #[test]
    fn test_null_is_a_single_tag_byte() {
        let mut buf = Buffer::new();
        ObjectCodec::default().write(&mut buf, &Value::Null).unwrap();
        assert_eq!(buf.as_slice(), &[0]);
        assert_eq!(round_trip(&Value::Null), Value::Null);
    }

    #[test]
    fn test_math_types_round_trip() {
        let values = [
            Value::Vec2(Vec2 { x: 1.0, y: -2.0 }),
            Value::Vec4(Vec4 {
                x: 1.0,
                y: 2.0,
                z: 3.0,
                w: 4.0,
            }),
            Value::Quat(Quat::default()),
            Value::Color32(Color32 {
                r: 1,
                g: 2,
                b: 3,
                a: 4,
            }),
            Value::Color(Color {
                r: 0.5,
                g: 0.25,
                b: 0.0,
                a: 1.0,
            }),
            Value::Matrix4(Matrix4::IDENTITY),
            Value::Bounds(Bounds {
                center: Vec3 {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                },
                size: Vec3 {
                    x: 4.0,
                    y: 5.0,
                    z: 6.0,
                },
            }),
            Value::SkinWeights(SkinWeights {
                indices: [0, 1, 2, 3],
                weights: [0.4, 0.3, 0.2, 0.1],
            }),
        ];
        for value in values {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        for raw in [23u8, 100, 254] {
            let mut buf = Buffer::from_slice(&[raw, 1, 2, 3]);
            assert!(matches!(
                ObjectCodec::default().read(&mut buf),
                Err(ProtocolError::UnknownTag(t)) if t == raw
            ));
        }
    }

    #[test]
    fn test_truncated_value_is_an_error() {
        let mut buf = Buffer::from_slice(&[TypeTag::I32.into(), 1, 2]);
        assert!(matches!(
            ObjectCodec::default().read(&mut buf),
            Err(ProtocolError::Buffer(_))
        ));
    }

    // =========================================================================
    // Collections
    // =========================================================================

    #[test]
    fn test_homogeneous_array_shares_one_tag() {
        let value = Value::from(vec![1i32, 2, 3]);
        let mut buf = Buffer::new();
        ObjectCodec::default().write(&mut buf, &value).unwrap();
        // tag + "int" + count + flag + shared tag + 3 * 4 bytes
        assert_eq!(buf.size(), 1 + 4 + 1 + 1 + 1 + 12);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_mixed_list_tags_each_item() {
        let value = Value::List(Sequence::mixed(vec![
            Value::I32(1),
            Value::from("two"),
            Value::Null,
            Value::from(vec![3.0f32]),
        ]));
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_empty_array_round_trips() {
        let value = Value::Array(Sequence::typed(TypeTag::String, vec![]));
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_implausible_count_is_rejected_before_allocating() {
        let mut buf = Buffer::new();
        buf.write_u8(TypeTag::Array.into());
        write_string(&mut buf, "int").unwrap();
        write_count(&mut buf, 1_000_000).unwrap();
        buf.write_u8(0);
        buf.begin_read(0).unwrap();
        assert!(matches!(
            ObjectCodec::default().read(&mut buf),
            Err(ProtocolError::ImplausibleLength { count: 1_000_000, .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut value = Value::I32(0);
        for _ in 0..10 {
            value = Value::List(Sequence::mixed(vec![value]));
        }
        let mut buf = Buffer::new();
        ObjectCodec::default().write(&mut buf, &value).unwrap();

        buf.begin_read(0).unwrap();
        assert!(matches!(
            ObjectCodec::new(4).read(&mut buf),
            Err(ProtocolError::TooDeep(4))
        ));
        buf.begin_read(0).unwrap();
        assert_eq!(ObjectCodec::default().read(&mut buf).unwrap(), value);
    }

    #[test]
    fn test_read_vec_keeps_declared_count() {
        let value = Value::Array(Sequence::mixed(vec![
            Value::I32(1),
            Value::from("oops"),
            Value::I32(3),
        ]));
        let mut buf = Buffer::new();
        let codec = ObjectCodec::default();
        codec.write(&mut buf, &value).unwrap();
        buf.begin_read(0).unwrap();
        assert_eq!(codec.read_vec::<i32>(&mut buf).unwrap(), vec![1, 0, 3]);
    }

    // =========================================================================
    // Custom and described values
    // =========================================================================

    #[derive(Debug, PartialEq)]
    struct Health(u16);

    impl BinarySerializable for Health {
        const TYPE_NAME: &'static str = "Health";

        fn serialize(&self, buf: &mut Buffer) {
            buf.write_u16(self.0);
        }

        fn deserialize(buf: &mut Buffer) -> Result<Self, ProtocolError> {
            Ok(Health(buf.read_u16()?))
        }
    }

    #[derive(Debug, PartialEq)]
    struct Spawn {
        name: String,
        position: Vec3,
        health: u16,
    }

    impl Describe for Spawn {
        const TYPE_NAME: &'static str = "Spawn";

        fn describe(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("name", self.name.clone().into()),
                ("position", self.position.into()),
                ("health", self.health.into()),
            ]
        }

        fn from_fields(object: &ObjectValue) -> Result<Self, ProtocolError> {
            Ok(Spawn {
                name: object.require("name")?,
                position: object.require("position")?,
                health: object.require("health")?,
            })
        }
    }

    #[test]
    fn test_custom_value_round_trip() {
        let codec = ObjectCodec::default();
        let mut buf = Buffer::new();
        codec.write_custom(&mut buf, &Health(90)).unwrap();
        buf.begin_read(0).unwrap();
        assert_eq!(codec.read_custom::<Health>(&mut buf).unwrap(), Some(Health(90)));
    }

    #[test]
    fn test_unknown_custom_type_is_skipped() {
        let codec = ObjectCodec::default();
        let mut buf = Buffer::new();
        codec.write(
            &mut buf,
            &Value::Custom(CustomValue {
                type_name: "Mystery".into(),
                payload: vec![1, 2, 3, 4, 5],
            }),
        );
        codec.write_as(&mut buf, 42i32).unwrap();
        buf.begin_read(0).unwrap();

        assert_eq!(codec.read_custom::<Health>(&mut buf).unwrap(), None);
        assert_eq!(codec.read_as::<i32>(&mut buf).unwrap(), Some(42));
    }

    #[test]
    fn test_described_object_round_trip() {
        let spawn = Spawn {
            name: "orc".into(),
            position: Vec3 {
                x: 1.0,
                y: 0.0,
                z: -1.0,
            },
            health: 30,
        };
        let codec = ObjectCodec::default();
        let mut buf = Buffer::new();
        codec.write_object(&mut buf, &spawn).unwrap();
        buf.begin_read(0).unwrap();
        assert_eq!(codec.read_object::<Spawn>(&mut buf).unwrap(), Some(spawn));
    }

    #[test]
    fn test_object_with_missing_field_decodes_to_none() {
        let codec = ObjectCodec::default();
        let mut buf = Buffer::new();
        codec.write(
            &mut buf,
            &Value::Object(ObjectValue::new("Spawn").with("name", "orc")),
        );
        buf.begin_read(0).unwrap();
        assert_eq!(codec.read_object::<Spawn>(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_nested_document_round_trip() {
        let mut node = DataNode::new("root");
        node.add_child(DataNode::with_value("hp", 10i32));
        let value = Value::from(node);
        assert_eq!(round_trip(&value), value);
    }
}

//! Conversions between Rust types and [`Value`].
//!
//! `From<T> for Value` wraps a typed value; [`FromValue`] goes the other
//! way and is deliberately lenient: integers convert between widths when
//! the number fits, floats accept integers, and the four-float types
//! convert into each other.

use crate::value::{
    Bounds, Color, Color32, Matrix4, Quat, Sequence, SkinWeights, TypeTag, Value, Vec2, Vec3,
    Vec4,
};
use crate::DataNode;

/// Types with a fixed built-in wire tag.
pub trait ValueType {
    const TAG: TypeTag;
}

/// Extracts a typed value from a [`Value`].
pub trait FromValue: Sized {
    /// Returns `None` when `value` has no sensible conversion to `Self`.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! builtin_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ValueType for $ty {
                const TAG: TypeTag = TypeTag::$variant;
            }

            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

builtin_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Quat => Quat,
    Color32 => Color32,
    Color => Color,
    Matrix4 => Matrix4,
    Bounds => Bounds,
    SkinWeights => SkinWeights,
}

impl ValueType for DataNode {
    const TAG: TypeTag = TypeTag::Document;
}

impl From<DataNode> for Value {
    fn from(node: DataNode) -> Self {
        Value::Document(Box::new(node))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A homogeneous array of built-in values.
impl<T: ValueType + Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(Sequence::typed(
            T::TAG,
            items.into_iter().map(Into::into).collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// FromValue
// ---------------------------------------------------------------------------

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

fn integer(value: &Value) -> Option<i128> {
    Some(match *value {
        Value::U8(v) => v.into(),
        Value::I8(v) => v.into(),
        Value::U16(v) => v.into(),
        Value::I16(v) => v.into(),
        Value::U32(v) => v.into(),
        Value::I32(v) => v.into(),
        Value::U64(v) => v.into(),
        Value::I64(v) => v.into(),
        _ => return None,
    })
}

macro_rules! integer_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    if let Value::Bool(b) = value {
                        return Some(<$ty>::from(*b));
                    }
                    integer(value).and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

integer_from_value!(u8, i8, u16, i16, u32, i32, u64, i64);

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::F32(v) => Some(v),
            Value::F64(v) => Some(v as f32),
            _ => integer(value).map(|v| v as f32),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::F64(v) => Some(v),
            Value::F32(v) => Some(f64::from(v)),
            _ => integer(value).map(|v| v as f64),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            other => integer(other).map(|v| v != 0),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Vec2 {
    fn from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Vec2(v) => Some(v),
            Value::Vec3(v) => Some(Vec2 { x: v.x, y: v.y }),
            _ => None,
        }
    }
}

impl FromValue for Vec3 {
    fn from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Vec3(v) => Some(v),
            Value::Vec2(v) => Some(Vec3 {
                x: v.x,
                y: v.y,
                z: 0.0,
            }),
            _ => None,
        }
    }
}

/// `(x, y, z, w)` of any four-float value.
fn four_floats(value: &Value) -> Option<[f32; 4]> {
    match *value {
        Value::Vec4(v) => Some([v.x, v.y, v.z, v.w]),
        Value::Quat(q) => Some([q.x, q.y, q.z, q.w]),
        Value::Color(c) => Some([c.r, c.g, c.b, c.a]),
        Value::Color32(c) => Some([c.r, c.g, c.b, c.a].map(|ch| f32::from(ch) / 255.0)),
        _ => None,
    }
}

impl FromValue for Vec4 {
    fn from_value(value: &Value) -> Option<Self> {
        let [x, y, z, w] = four_floats(value)?;
        Some(Vec4 { x, y, z, w })
    }
}

impl FromValue for Quat {
    fn from_value(value: &Value) -> Option<Self> {
        let [x, y, z, w] = four_floats(value)?;
        Some(Quat { x, y, z, w })
    }
}

impl FromValue for Color {
    fn from_value(value: &Value) -> Option<Self> {
        let [r, g, b, a] = four_floats(value)?;
        Some(Color { r, g, b, a })
    }
}

impl FromValue for Color32 {
    fn from_value(value: &Value) -> Option<Self> {
        if let Value::Color32(c) = value {
            return Some(*c);
        }
        let to_byte = |ch: f32| (ch.clamp(0.0, 1.0) * 255.0).round() as u8;
        let [r, g, b, a] = four_floats(value)?.map(to_byte);
        Some(Color32 { r, g, b, a })
    }
}

impl FromValue for Matrix4 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Matrix4(m) => Some(*m),
            _ => None,
        }
    }
}

impl FromValue for Bounds {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bounds(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for SkinWeights {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::SkinWeights(w) => Some(*w),
            _ => None,
        }
    }
}

impl FromValue for DataNode {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_document().cloned()
    }
}

/// Every item must convert; use
/// [`ObjectCodec::read_vec`](crate::ObjectCodec::read_vec) to keep
/// partially failing arrays.
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(seq) | Value::List(seq) => seq.items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_convert_when_they_fit() {
        assert_eq!(u8::from_value(&Value::I32(200)), Some(200));
        assert_eq!(u8::from_value(&Value::I32(300)), None);
        assert_eq!(i64::from_value(&Value::U32(u32::MAX)), Some(u32::MAX as i64));
        assert_eq!(u64::from_value(&Value::I8(-1)), None);
    }

    #[test]
    fn test_floats_accept_integers() {
        assert_eq!(f32::from_value(&Value::I32(3)), Some(3.0));
        assert_eq!(f64::from_value(&Value::F32(0.5)), Some(0.5));
        assert_eq!(i32::from_value(&Value::F32(1.0)), None);
    }

    #[test]
    fn test_quaternion_from_four_float_values() {
        let v = Value::Vec4(Vec4 {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            w: 4.0,
        });
        let q = Quat::from_value(&v).unwrap();
        assert_eq!((q.x, q.w), (1.0, 4.0));
    }

    #[test]
    fn test_color32_round_trips_through_color() {
        let c = Color32 {
            r: 255,
            g: 128,
            b: 0,
            a: 64,
        };
        let color = Color::from_value(&Value::Color32(c)).unwrap();
        assert_eq!(Color32::from_value(&Value::Color(color)), Some(c));
    }

    #[test]
    fn test_vec_into_value_is_typed_array() {
        let value = Value::from(vec![1i32, 2, 3]);
        match &value {
            Value::Array(seq) => {
                assert_eq!(seq.element, "int");
                assert_eq!(seq.shared_tag(), Some(TypeTag::I32));
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(Vec::<i32>::from_value(&value), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_option_maps_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Option::<i32>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i32>::from_value(&Value::I32(4)), Some(Some(4)));
    }

    #[test]
    fn test_string_does_not_parse_numbers() {
        assert_eq!(i32::from_value(&Value::from("12")), None);
        assert_eq!(String::from_value(&Value::from("12")), Some("12".into()));
    }
}

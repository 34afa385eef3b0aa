//! Dynamically typed values carried by the codec and documents.
//!
//! [`Value`] is a closed tagged union over every type the wire format
//! knows. Each variant maps to exactly one [`TypeTag`], the byte that
//! precedes the value on the wire.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::DataNode;

// ---------------------------------------------------------------------------
// TypeTag
// ---------------------------------------------------------------------------

/// The leading byte of every encoded value.
///
/// Tags 1–22 are fixed-layout built-ins and may share a single tag in a
/// homogeneous array. Tags 250–255 introduce values whose type is named
/// on the wire. 254 is reserved and rejected like any unknown tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum TypeTag {
    Null = 0,
    Bool = 1,
    U8 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    F32 = 6,
    String = 7,
    Vec2 = 8,
    Vec3 = 9,
    Vec4 = 10,
    Quat = 11,
    Color32 = 12,
    Color = 13,
    Document = 14,
    F64 = 15,
    I16 = 16,
    I8 = 17,
    I64 = 18,
    U64 = 19,
    Matrix4 = 20,
    SkinWeights = 21,
    Bounds = 22,
    /// Array of a named element type.
    Array = 250,
    /// Ordered list of a named element type.
    List = 251,
    /// Custom-serializable value; type name and payload follow.
    Custom = 252,
    /// Field-described object; type name and named fields follow.
    Object = 253,
    /// Opaque byte blob.
    Opaque = 255,
}

impl TypeTag {
    /// The type name used in array headers and the text form.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::U8 => "byte",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::F32 => "float",
            Self::String => "string",
            Self::Vec2 => "Vector2",
            Self::Vec3 => "Vector3",
            Self::Vec4 => "Vector4",
            Self::Quat => "Quaternion",
            Self::Color32 => "Color32",
            Self::Color => "Color",
            Self::Document => "DataNode",
            Self::F64 => "double",
            Self::I16 => "short",
            Self::I8 => "sbyte",
            Self::I64 => "long",
            Self::U64 => "ulong",
            Self::Matrix4 => "Matrix4x4",
            Self::SkinWeights => "BoneWeight",
            Self::Bounds => "Bounds",
            Self::Array => "Array",
            Self::List => "List",
            Self::Custom => "Custom",
            Self::Object => "Object",
            Self::Opaque => "opaque",
        }
    }

    /// Looks up a built-in tag by its type name.
    pub fn from_name(name: &str) -> Option<Self> {
        BUILTINS.iter().copied().find(|tag| tag.name() == name)
    }

    /// Returns `true` for the fixed built-in tags (1–22).
    pub fn is_builtin(self) -> bool {
        let raw: u8 = self.into();
        (1..=22).contains(&raw)
    }
}

const BUILTINS: [TypeTag; 22] = [
    TypeTag::Bool,
    TypeTag::U8,
    TypeTag::U16,
    TypeTag::I32,
    TypeTag::U32,
    TypeTag::F32,
    TypeTag::String,
    TypeTag::Vec2,
    TypeTag::Vec3,
    TypeTag::Vec4,
    TypeTag::Quat,
    TypeTag::Color32,
    TypeTag::Color,
    TypeTag::Document,
    TypeTag::F64,
    TypeTag::I16,
    TypeTag::I8,
    TypeTag::I64,
    TypeTag::U64,
    TypeTag::Matrix4,
    TypeTag::SkinWeights,
    TypeTag::Bounds,
];

/// Element type name used for arrays whose items do not share a type.
pub const MIXED_ELEMENT: &str = "object";

// ---------------------------------------------------------------------------
// Fixed-size math types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// A rotation quaternion. Defaults to the identity rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// An 8-bit-per-channel RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// A floating-point RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// A 4×4 matrix stored as 16 floats in column-major order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4(pub [f32; 16]);

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub center: Vec3,
    pub size: Vec3,
}

/// Up to four bone influences on a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SkinWeights {
    pub indices: [i32; 4],
    pub weights: [f32; 4],
}

// ---------------------------------------------------------------------------
// Compound payloads
// ---------------------------------------------------------------------------

/// The items of an array or list, plus the name of their element type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    /// Element type name, e.g. `"int"`, `"Vector3"`, or
    /// [`MIXED_ELEMENT`] for items of differing types.
    pub element: String,
    pub items: Vec<Value>,
}

impl Sequence {
    pub fn new(element: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            element: element.into(),
            items,
        }
    }

    /// A sequence of built-in `element` values.
    pub fn typed(element: TypeTag, items: Vec<Value>) -> Self {
        Self::new(element.name(), items)
    }

    /// A sequence whose items may have any type.
    pub fn mixed(items: Vec<Value>) -> Self {
        Self::new(MIXED_ELEMENT, items)
    }

    /// The built-in tag every item shares, if there is one.
    ///
    /// When present the codec writes the tag once and the items
    /// without their own tags.
    pub fn shared_tag(&self) -> Option<TypeTag> {
        let first = self.items.first()?.tag();
        if !first.is_builtin() {
            return None;
        }
        self.items
            .iter()
            .all(|item| item.tag() == first)
            .then_some(first)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A value produced by a type's own binary serializer.
///
/// The payload stays opaque until a reader that knows the type asks for
/// it with [`CustomValue::decode`](crate::CustomValue::decode).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomValue {
    pub type_name: String,
    pub payload: Vec<u8>,
}

/// An object described as an ordered list of named fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectValue {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl ObjectValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field and returns `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// The first field called `name`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Any value the codec can carry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value. Never a zero.
    #[default]
    Null,
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    Color32(Color32),
    Color(Color),
    Matrix4(Matrix4),
    Bounds(Bounds),
    SkinWeights(SkinWeights),
    Array(Sequence),
    List(Sequence),
    Document(Box<DataNode>),
    Custom(CustomValue),
    Object(ObjectValue),
    Opaque(Vec<u8>),
}

impl Value {
    /// The wire tag for this value.
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::Null,
            Self::Bool(_) => TypeTag::Bool,
            Self::U8(_) => TypeTag::U8,
            Self::I8(_) => TypeTag::I8,
            Self::U16(_) => TypeTag::U16,
            Self::I16(_) => TypeTag::I16,
            Self::U32(_) => TypeTag::U32,
            Self::I32(_) => TypeTag::I32,
            Self::U64(_) => TypeTag::U64,
            Self::I64(_) => TypeTag::I64,
            Self::F32(_) => TypeTag::F32,
            Self::F64(_) => TypeTag::F64,
            Self::String(_) => TypeTag::String,
            Self::Vec2(_) => TypeTag::Vec2,
            Self::Vec3(_) => TypeTag::Vec3,
            Self::Vec4(_) => TypeTag::Vec4,
            Self::Quat(_) => TypeTag::Quat,
            Self::Color32(_) => TypeTag::Color32,
            Self::Color(_) => TypeTag::Color,
            Self::Matrix4(_) => TypeTag::Matrix4,
            Self::Bounds(_) => TypeTag::Bounds,
            Self::SkinWeights(_) => TypeTag::SkinWeights,
            Self::Array(_) => TypeTag::Array,
            Self::List(_) => TypeTag::List,
            Self::Document(_) => TypeTag::Document,
            Self::Custom(_) => TypeTag::Custom,
            Self::Object(_) => TypeTag::Object,
            Self::Opaque(_) => TypeTag::Opaque,
        }
    }

    /// Human-readable type name, including element types for
    /// collections (`int[]`, `List<string>`) and declared names for
    /// custom and object values.
    pub fn type_name(&self) -> String {
        match self {
            Self::Array(seq) => format!("{}[]", seq.element),
            Self::List(seq) => format!("List<{}>", seq.element),
            Self::Custom(custom) => custom.type_name.clone(),
            Self::Object(object) => object.type_name.clone(),
            other => other.tag().name().to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DataNode> {
        match self {
            Self::Document(node) => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_round_trips_through_u8() {
        for tag in BUILTINS {
            let raw: u8 = tag.into();
            assert_eq!(TypeTag::try_from(raw).unwrap(), tag);
        }
        assert_eq!(TypeTag::try_from(255).unwrap(), TypeTag::Opaque);
    }

    #[test]
    fn test_reserved_tag_is_rejected() {
        assert!(TypeTag::try_from(254).is_err());
        assert!(TypeTag::try_from(23).is_err());
    }

    #[test]
    fn test_from_name_only_knows_builtins() {
        assert_eq!(TypeTag::from_name("Vector3"), Some(TypeTag::Vec3));
        assert_eq!(TypeTag::from_name("long"), Some(TypeTag::I64));
        assert_eq!(TypeTag::from_name("Object"), None);
        assert_eq!(TypeTag::from_name("null"), None);
    }

    #[test]
    fn test_shared_tag_requires_uniform_builtin_items() {
        let ints = Sequence::typed(TypeTag::I32, vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(ints.shared_tag(), Some(TypeTag::I32));

        let mixed = Sequence::mixed(vec![Value::I32(1), Value::Bool(true)]);
        assert_eq!(mixed.shared_tag(), None);

        let nulls = Sequence::mixed(vec![Value::Null, Value::Null]);
        assert_eq!(nulls.shared_tag(), None);

        assert_eq!(Sequence::mixed(vec![]).shared_tag(), None);
    }

    #[test]
    fn test_type_name_describes_collections() {
        let array = Value::Array(Sequence::typed(TypeTag::F32, vec![]));
        assert_eq!(array.type_name(), "float[]");
        let list = Value::List(Sequence::mixed(vec![]));
        assert_eq!(list.type_name(), "List<object>");
        assert_eq!(Value::Quat(Quat::default()).type_name(), "Quaternion");
    }

    #[test]
    fn test_object_value_field_lookup_returns_first_match() {
        let obj = ObjectValue::new("Player")
            .with("hp", Value::I32(10))
            .with("hp", Value::I32(20));
        assert_eq!(obj.field("hp"), Some(&Value::I32(10)));
        assert_eq!(obj.field("mp"), None);
    }
}

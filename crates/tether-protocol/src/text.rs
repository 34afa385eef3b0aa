//! The indented text form of a [`DataNode`].
//!
//! ```text
//! // comment lines are skipped
//! Player
//!     name = "Ada"
//!     level = 12
//!     speed = 3.5
//!     spawn = (1.0, 0.0, -4.0)
//!     tint = 0xFF8000FF
//!     loot = int[2]
//!         Add = 3
//!         Add = 7
//!     drop = Chest{1}
//!         gold = 40
//! ```
//!
//! Each line is `name` or `name = literal`, indented with one tab per
//! depth. Compound values put a header in place of the literal and their
//! content on the lines below it: `T[n]` and `List<T>[n]` take `n` item
//! lines, `DataNode` takes the nested root line, and `Type{n}` takes `n`
//! field lines. Lines after those are ordinary children of the node.
//! Hand-written `T[]` and `List<T>` headers take the leading `Add` lines.
//!
//! Literal types are decided once, while parsing, by `classify`. The
//! order of its arms is the tie-break: literal shapes come first, named
//! types last.

use std::fmt::Write as _;

use crate::value::{
    Bounds, Color, Color32, CustomValue, Matrix4, ObjectValue, Quat, Sequence, SkinWeights,
    TypeTag, Value, Vec2, Vec3, Vec4,
};
use crate::{DataNode, ProtocolError};

/// Name of the lines that hold array and list items.
const ITEM_NAME: &str = "Add";

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Appends the text form of `root` to `out`.
///
/// An unnamed root without a value is written as its children at depth
/// zero, unless it has exactly one child (which would read back as the
/// root itself).
pub(crate) fn write_document(out: &mut String, root: &DataNode) {
    let children: Vec<&DataNode> = serializable_children(root).collect();
    if root.name().is_empty() && root.value().is_none() && children.len() != 1 {
        for child in children {
            write_node(out, child, 0);
        }
    } else {
        write_node(out, root, 0);
    }
}

fn serializable_children(node: &DataNode) -> impl Iterator<Item = &DataNode> {
    node.children().iter().filter(|c| c.is_serializable())
}

fn write_node(out: &mut String, node: &DataNode, depth: usize) {
    write_line(out, depth, node.name(), node.value());
    for child in serializable_children(node) {
        write_node(out, child, depth + 1);
    }
}

fn write_line(out: &mut String, depth: usize, name: &str, value: Option<&Value>) {
    for _ in 0..depth {
        out.push('\t');
    }
    if needs_quotes(name) {
        out.push_str(&quote(name));
    } else {
        out.push_str(name);
    }
    if let Some(value) = value {
        out.push_str(" = ");
        out.push_str(&value_text(value));
    }
    out.push('\n');
    if let Some(value) = value {
        write_content(out, value, depth + 1);
    }
}

/// Lines below a compound value's header.
fn write_content(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Array(seq) | Value::List(seq) => {
            for item in &seq.items {
                let item = (!item.is_null()).then_some(item);
                write_line(out, depth, ITEM_NAME, item);
            }
        }
        Value::Document(node) => write_node(out, node, depth),
        Value::Object(object) => {
            for (name, field) in &object.fields {
                let field = (!field.is_null()).then_some(field);
                write_line(out, depth, name, field);
            }
        }
        _ => {}
    }
}

/// The literal or header written after `=`.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(v) => v.to_string(),
        Value::U8(v) => format!("byte({v})"),
        Value::I8(v) => format!("sbyte({v})"),
        Value::U16(v) => format!("ushort({v})"),
        Value::I16(v) => format!("short({v})"),
        Value::U32(v) => format!("uint({v})"),
        Value::I32(v) => v.to_string(),
        Value::U64(v) => format!("ulong({v})"),
        Value::I64(v) => format!("long({v})"),
        Value::F32(v) if v.is_finite() => format!("{v:?}"),
        Value::F32(v) => format!("float({v:?})"),
        Value::F64(v) => format!("double({v:?})"),
        Value::String(s) => quote(s),
        Value::Vec2(v) => tuple(&[v.x, v.y]),
        Value::Vec3(v) => tuple(&[v.x, v.y, v.z]),
        Value::Vec4(v) => format!("Vector4{}", tuple(&[v.x, v.y, v.z, v.w])),
        Value::Quat(q) => format!("Quaternion{}", tuple(&[q.x, q.y, q.z, q.w])),
        Value::Color32(c) => format!("0x{:02X}{:02X}{:02X}{:02X}", c.r, c.g, c.b, c.a),
        Value::Color(c) => tuple(&[c.r, c.g, c.b, c.a]),
        Value::Matrix4(m) => tuple(&m.0),
        Value::Bounds(b) => tuple(&[
            b.center.x, b.center.y, b.center.z, b.size.x, b.size.y, b.size.z,
        ]),
        Value::SkinWeights(w) => {
            let mut s = String::from("(");
            for i in 0..4 {
                if i > 0 {
                    s.push_str(", ");
                }
                let _ = write!(s, "{}, {:?}", w.indices[i], w.weights[i]);
            }
            s.push(')');
            s
        }
        Value::Array(seq) => format!("{}[{}]", seq.element, seq.items.len()),
        Value::List(seq) => format!("List<{}>[{}]", seq.element, seq.items.len()),
        Value::Document(_) => TypeTag::Document.name().to_string(),
        Value::Custom(custom) => format!("{}(0x{})", custom.type_name, hex::encode(&custom.payload)),
        Value::Object(object) if object.fields.is_empty() => format!("{}()", object.type_name),
        Value::Object(object) => format!("{}{{{}}}", object.type_name, object.fields.len()),
        Value::Opaque(bytes) => format!("{}(0x{})", TypeTag::Opaque.name(), hex::encode(bytes)),
    }
}

fn tuple(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
    format!("({})", parts.join(", "))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn needs_quotes(name: &str) -> bool {
    name.is_empty()
        || name.trim() != name
        || name.starts_with('"')
        || name.starts_with("//")
        || name.contains(['=', '\n', '\r', '\t'])
}

// ---------------------------------------------------------------------------
// Parsing: lines
// ---------------------------------------------------------------------------

/// One non-comment line with the lines nested under it.
#[derive(Debug)]
struct Line {
    number: usize,
    name: String,
    value: Option<String>,
    children: Vec<Line>,
}

/// Parses the text form.
///
/// A single top-level line becomes the root. Several top-level lines are
/// wrapped in an unnamed root.
pub(crate) fn read_document(text: &str) -> Result<DataNode, ProtocolError> {
    let mut lines = parse_lines(text)?;
    if lines.len() == 1 {
        if let Some(line) = lines.pop() {
            return Ok(build_node(line));
        }
    }
    let mut root = DataNode::default();
    for line in lines {
        root.add_child(build_node(line));
    }
    Ok(root)
}

fn parse_lines(text: &str) -> Result<Vec<Line>, ProtocolError> {
    // stack[d] holds the open line at depth d
    let mut stack: Vec<Line> = Vec::new();
    let mut top: Vec<Line> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let number = index + 1;
        let depth = raw.chars().take_while(|c| *c == '\t').count();
        let content = raw[depth..].trim();
        if content.is_empty() || content.starts_with("//") {
            continue;
        }
        if depth > stack.len() {
            return Err(ProtocolError::Text {
                line: number,
                message: format!("indented {depth} levels under a line at depth {}", stack.len().saturating_sub(1)),
            });
        }
        close_to(&mut stack, &mut top, depth);
        let (name, value) = split_line(content, number)?;
        stack.push(Line {
            number,
            name,
            value,
            children: Vec::new(),
        });
    }
    close_to(&mut stack, &mut top, 0);
    Ok(top)
}

/// Pops open lines until only `depth` remain, attaching each to its
/// parent.
fn close_to(stack: &mut Vec<Line>, top: &mut Vec<Line>, depth: usize) {
    while stack.len() > depth {
        let Some(line) = stack.pop() else { break };
        match stack.last_mut() {
            Some(parent) => parent.children.push(line),
            None => top.push(line),
        }
    }
}

fn split_line(content: &str, number: usize) -> Result<(String, Option<String>), ProtocolError> {
    let (name, rest) = if content.starts_with('"') {
        let end = closing_quote(content).ok_or_else(|| ProtocolError::Text {
            line: number,
            message: "unterminated quoted name".into(),
        })?;
        let name = unquote(&content[..=end]).ok_or_else(|| ProtocolError::Text {
            line: number,
            message: "invalid escape in name".into(),
        })?;
        let rest = content[end + 1..].trim_start();
        (name, rest.strip_prefix('='))
    } else {
        match content.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(value)),
            None => (content.to_string(), None),
        }
    };
    let value = rest
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Ok((name, value))
}

/// Byte index of the quote closing the string that opens `s`.
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            '\\' => '\\',
            '"' => '"',
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            _ => return None,
        });
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Parsing: values
// ---------------------------------------------------------------------------

fn build_node(line: Line) -> DataNode {
    let Line {
        number,
        name,
        value,
        mut children,
    } = line;
    let mut node = DataNode::new(name);
    if let Some(text) = value {
        if let Some(value) = resolve(&text, None, &mut children, number) {
            node.set_value(value);
        }
    }
    for child in children {
        node.add_child(build_node(child));
    }
    node
}

/// The shape of a literal, in the order shapes are tried.
#[derive(Debug, PartialEq)]
enum Shape<'a> {
    Quoted(&'a str),
    HexColor(&'a str),
    Tuple(Vec<&'a str>),
    Bool(bool),
    Numeral(&'a str),
    ArrayHeader { element: &'a str, count: Option<usize> },
    ListHeader { element: &'a str, count: Option<usize> },
    DocumentHeader,
    ObjectHeader { type_name: &'a str, count: usize },
    Constructor { name: &'a str, args: &'a str },
    Identifier(&'a str),
    Bare(&'a str),
}

fn classify(text: &str) -> Shape<'_> {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return Shape::Quoted(text);
    }
    if let Some(digits) = text.strip_prefix("0x") {
        if matches!(digits.len(), 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Shape::HexColor(digits);
        }
    }
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return Shape::Tuple(inner.split(',').map(str::trim).collect());
    }
    match text {
        "true" => return Shape::Bool(true),
        "false" => return Shape::Bool(false),
        _ => {}
    }
    if is_numeral(text) {
        return Shape::Numeral(text);
    }
    if let Some((element, tail)) = text.strip_prefix("List<").and_then(|t| t.rsplit_once('>')) {
        if tail.is_empty() {
            return Shape::ListHeader { element, count: None };
        }
        if let Some(("", count)) = counted(tail, '[', ']') {
            return Shape::ListHeader { element, count };
        }
    }
    if let Some((element, count)) = counted(text, '[', ']') {
        if !element.is_empty() {
            return Shape::ArrayHeader { element, count };
        }
    }
    if text == TypeTag::Document.name() {
        return Shape::DocumentHeader;
    }
    if let Some((type_name, Some(count))) = counted(text, '{', '}') {
        if is_identifier(type_name) {
            return Shape::ObjectHeader { type_name, count };
        }
    }
    if let Some((name, rest)) = text.split_once('(') {
        if let Some(args) = rest.strip_suffix(')') {
            if is_identifier(name) {
                return Shape::Constructor {
                    name,
                    args: args.trim(),
                };
            }
        }
    }
    if is_identifier(text) {
        return Shape::Identifier(text);
    }
    Shape::Bare(text)
}

/// Splits `head[n]` (or `head{n}`) into `head` and `n`. An empty
/// bracket gives no count.
fn counted(text: &str, open: char, close: char) -> Option<(&str, Option<usize>)> {
    let (head, inner) = text.strip_suffix(close)?.rsplit_once(open)?;
    if inner.is_empty() {
        return Some((head, None));
    }
    inner.parse().ok().map(|count| (head, Some(count)))
}

fn is_numeral(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let mut chars = unsigned.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Turns the text after `=` into a value, consuming the nested lines a
/// compound header owns.
///
/// `hint` is the element type of an enclosing array; it decides whether
/// a four-part tuple is a color, a vector or a quaternion.
fn resolve(
    text: &str,
    hint: Option<TypeTag>,
    children: &mut Vec<Line>,
    line: usize,
) -> Option<Value> {
    let value = match classify(text) {
        Shape::Quoted(quoted) => unquote(quoted).map(Value::String),
        Shape::HexColor(digits) => hex_color(digits),
        Shape::Tuple(parts) => {
            let tag = match (parts.len(), hint) {
                (2, _) => TypeTag::Vec2,
                (3, _) => TypeTag::Vec3,
                (4, Some(TypeTag::Quat)) => TypeTag::Quat,
                (4, Some(TypeTag::Vec4)) => TypeTag::Vec4,
                (4, _) => TypeTag::Color,
                (6, _) => TypeTag::Bounds,
                (8, _) => TypeTag::SkinWeights,
                (16, _) => TypeTag::Matrix4,
                _ => {
                    tracing::warn!(line, parts = parts.len(), "tuple has no matching type");
                    return None;
                }
            };
            tuple_value(tag, &parts)
        }
        Shape::Bool(b) => Some(Value::Bool(b)),
        Shape::Numeral(n) => numeral(n),
        Shape::ArrayHeader { element, count } => {
            Some(Value::Array(items(element, count, children, line)))
        }
        Shape::ListHeader { element, count } => {
            Some(Value::List(items(element, count, children, line)))
        }
        Shape::DocumentHeader => {
            let nested = if children.is_empty() {
                DataNode::default()
            } else {
                build_node(children.remove(0))
            };
            Some(Value::Document(Box::new(nested)))
        }
        Shape::Constructor { name, args } => construct(name, args),
        Shape::ObjectHeader { type_name, count } => {
            let mut object = ObjectValue::new(type_name);
            let count = owned_lines(count, children.len(), line);
            for field in children.drain(..count) {
                let number = field.number;
                let mut nested = field.children;
                let value = field
                    .value
                    .and_then(|text| resolve(&text, None, &mut nested, number))
                    .unwrap_or_default();
                object.fields.push((field.name, value));
            }
            Some(Value::Object(object))
        }
        Shape::Identifier(word) | Shape::Bare(word) => Some(Value::String(word.to_string())),
    };
    if value.is_none() {
        tracing::warn!(line, literal = text, "could not parse value, leaving it empty");
    }
    value
}

/// Collects `count` item lines, or the leading `Add` lines when the
/// header has no count.
fn items(element: &str, count: Option<usize>, children: &mut Vec<Line>, line: usize) -> Sequence {
    let hint = TypeTag::from_name(element);
    let count = match count {
        Some(count) => owned_lines(count, children.len(), line),
        None => children
            .iter()
            .take_while(|child| child.name == ITEM_NAME)
            .count(),
    };
    let items = children
        .drain(..count)
        .map(|item| {
            let mut nested = item.children;
            item.value
                .and_then(|text| resolve(&text, hint, &mut nested, item.number))
                .unwrap_or_default()
        })
        .collect();
    tracing::trace!(line, element, count, "parsed sequence");
    Sequence::new(element, items)
}

/// How many of the `available` nested lines a header claiming `count`
/// gets.
fn owned_lines(count: usize, available: usize, line: usize) -> usize {
    if count > available {
        tracing::warn!(line, count, available, "header claims more lines than it has");
    }
    count.min(available)
}

fn hex_color(digits: &str) -> Option<Value> {
    let bytes = hex::decode(digits).ok()?;
    let channel = |i: usize| bytes.get(i).copied().unwrap_or(255);
    Some(Value::Color32(Color32 {
        r: channel(0),
        g: channel(1),
        b: channel(2),
        a: channel(3),
    }))
}

fn numeral(text: &str) -> Option<Value> {
    if text.contains(['.', 'e', 'E']) {
        return text.parse().ok().map(Value::F32);
    }
    if let Ok(v) = text.parse::<i32>() {
        return Some(Value::I32(v));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(Value::I64(v));
    }
    text.parse::<u64>().ok().map(Value::U64)
}

fn floats<const N: usize>(parts: &[&str]) -> Option<[f32; N]> {
    if parts.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse().ok()?;
    }
    Some(out)
}

fn tuple_value(tag: TypeTag, parts: &[&str]) -> Option<Value> {
    Some(match tag {
        TypeTag::Vec2 => {
            let [x, y] = floats(parts)?;
            Value::Vec2(Vec2 { x, y })
        }
        TypeTag::Vec3 => {
            let [x, y, z] = floats(parts)?;
            Value::Vec3(Vec3 { x, y, z })
        }
        TypeTag::Vec4 => {
            let [x, y, z, w] = floats(parts)?;
            Value::Vec4(Vec4 { x, y, z, w })
        }
        TypeTag::Quat => {
            let [x, y, z, w] = floats(parts)?;
            Value::Quat(Quat { x, y, z, w })
        }
        TypeTag::Color => {
            let [r, g, b, a] = floats(parts)?;
            Value::Color(Color { r, g, b, a })
        }
        TypeTag::Bounds => {
            let [cx, cy, cz, sx, sy, sz] = floats(parts)?;
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
            if parts.len() != 8 {
                return None;
            }
            let mut w = SkinWeights::default();
            for (i, pair) in parts.chunks(2).enumerate() {
                w.indices[i] = pair[0].parse().ok()?;
                w.weights[i] = pair[1].parse().ok()?;
            }
            Value::SkinWeights(w)
        }
        TypeTag::Matrix4 => Value::Matrix4(Matrix4(floats(parts)?)),
        _ => return None,
    })
}

/// `name(args)`: typed numerals, named tuples, and hex payloads.
fn construct(name: &str, args: &str) -> Option<Value> {
    let parts = || args.split(',').map(str::trim).collect::<Vec<_>>();
    match name {
        "byte" => args.parse().ok().map(Value::U8),
        "sbyte" => args.parse().ok().map(Value::I8),
        "short" => args.parse().ok().map(Value::I16),
        "ushort" => args.parse().ok().map(Value::U16),
        "int" => args.parse().ok().map(Value::I32),
        "uint" => args.parse().ok().map(Value::U32),
        "long" => args.parse().ok().map(Value::I64),
        "ulong" => args.parse().ok().map(Value::U64),
        "float" => args.parse().ok().map(Value::F32),
        "double" => args.parse().ok().map(Value::F64),
        "bool" => args.parse().ok().map(Value::Bool),
        "opaque" => hex_payload(args).map(Value::Opaque),
        _ => {
            if let Some(tag) = TypeTag::from_name(name) {
                return tuple_value(tag, &parts());
            }
            if args.is_empty() {
                return Some(Value::Object(ObjectValue::new(name)));
            }
            hex_payload(args).map(|payload| {
                Value::Custom(CustomValue {
                    type_name: name.to_string(),
                    payload,
                })
            })
        }
    }
}

fn hex_payload(args: &str) -> Option<Vec<u8>> {
    hex::decode(args.strip_prefix("0x")?).ok()
}

//! Structured tree: the wire format between encoder and decoder.
//!
//! Nodes render to a JSON tree with one discriminator key per node shape;
//! scalars are bare JSON values. Object key order is preserved end to end
//! (`serde_json` with `preserve_order`), which matters because ordinals are
//! assigned in traversal order.
//!
//! | node           | keys                                            |
//! |----------------|-------------------------------------------------|
//! | reference      | `ref`                                           |
//! | structured obj | `type`, `bases`, `fields`, opt. `items`/`map_like` |
//! | sequence       | `items`                                         |
//! | mapping        | `entries` (list of `[key, value]` pairs)        |
//! | set            | `set_items`                                     |
//! | tuple          | `tuple_items`                                   |
//! | text stream    | `text`, `cursor`                                |
//! | byte stream    | `bytes_hex`, `cursor`                           |
//! | opaque blob    | `opaque_hex`                                    |
use std::cell::Cell;
use std::fmt;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Number, Value as Json};

use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{Error, Result};
use crate::value::Scalar;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    /// back-pointer to a previously registered object
    Ref(usize),
    Object(ObjectNode),
    List(Vec<Node>),
    /// insertion-ordered; keys may be compound
    Map(Vec<(Node, Node)>),
    Set(Vec<Node>),
    Tuple(Vec<Node>),
    Text { content: String, cursor: usize },
    Bytes { content: Vec<u8>, cursor: usize },
    Opaque(Vec<u8>),
}

/// A user-defined object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    pub type_name: String,
    /// declared immediate bases, in order
    pub bases: Vec<String>,
    /// attributes, or entries when `map_like`
    pub fields: IndexMap<String, Node>,
    /// present for sequence subtypes
    pub items: Option<Vec<Node>>,
    pub map_like: bool,
}

impl ObjectNode {
    pub(crate) fn payload(&self) -> &'static str {
        match (&self.items, self.map_like) {
            (Some(_), true) => "both items and entries",
            (Some(_), false) => "a sequence subtype",
            (None, true) => "a mapping subtype",
            (None, false) => "a plain object",
        }
    }
}

mod keys {
    pub const REF: &str = "ref";
    pub const TYPE: &str = "type";
    pub const BASES: &str = "bases";
    pub const FIELDS: &str = "fields";
    pub const ITEMS: &str = "items";
    pub const MAP_LIKE: &str = "map_like";
    pub const ENTRIES: &str = "entries";
    pub const SET_ITEMS: &str = "set_items";
    pub const TUPLE_ITEMS: &str = "tuple_items";
    pub const TEXT: &str = "text";
    pub const BYTES_HEX: &str = "bytes_hex";
    pub const CURSOR: &str = "cursor";
    pub const OPAQUE_HEX: &str = "opaque_hex";
}

// ————————————————————————————————————————————————————————————————————————————
// RENDER
// ————————————————————————————————————————————————————————————————————————————

impl Node {
    /// Render as a JSON tree.
    pub fn to_json(&self) -> Result<Json> {
        let out = match self {
            Node::Scalar(s) => scalar_to_json(s)?,
            Node::Ref(ordinal) => tagged([(keys::REF, Json::from(*ordinal))]),
            Node::Object(obj) => {
                let mut fields = Map::new();
                for (name, node) in &obj.fields {
                    fields.insert(name.clone(), node.to_json()?);
                }
                let mut map = Map::new();
                map.insert(keys::TYPE.into(), Json::from(obj.type_name.as_str()));
                map.insert(keys::BASES.into(), Json::from(obj.bases.clone()));
                map.insert(keys::FIELDS.into(), Json::Object(fields));
                if let Some(items) = &obj.items {
                    map.insert(keys::ITEMS.into(), nodes_to_json(items)?);
                }
                if obj.map_like {
                    map.insert(keys::MAP_LIKE.into(), Json::Bool(true));
                }
                Json::Object(map)
            }
            Node::List(items) => tagged([(keys::ITEMS, nodes_to_json(items)?)]),
            Node::Map(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    pairs.push(Json::Array(vec![k.to_json()?, v.to_json()?]));
                }
                tagged([(keys::ENTRIES, Json::Array(pairs))])
            }
            Node::Set(items) => tagged([(keys::SET_ITEMS, nodes_to_json(items)?)]),
            Node::Tuple(items) => tagged([(keys::TUPLE_ITEMS, nodes_to_json(items)?)]),
            Node::Text { content, cursor } => tagged([
                (keys::TEXT, Json::from(content.as_str())),
                (keys::CURSOR, Json::from(*cursor)),
            ]),
            Node::Bytes { content, cursor } => tagged([
                (keys::BYTES_HEX, Json::from(hex::encode(content))),
                (keys::CURSOR, Json::from(*cursor)),
            ]),
            Node::Opaque(payload) => tagged([(keys::OPAQUE_HEX, Json::from(hex::encode(payload)))]),
        };
        Ok(out)
    }

    /// Number of nodes in the tree, references included.
    pub fn size(&self) -> usize {
        1 + match self {
            Node::Scalar(_) | Node::Ref(_) | Node::Text { .. } | Node::Bytes { .. } | Node::Opaque(_) => 0,
            Node::Object(obj) => {
                obj.fields.values().map(Node::size).sum::<usize>()
                    + obj.items.iter().flatten().map(Node::size).sum::<usize>()
            }
            Node::List(items) | Node::Set(items) | Node::Tuple(items) => items.iter().map(Node::size).sum(),
            Node::Map(entries) => entries.iter().map(|(k, v)| k.size() + v.size()).sum(),
        }
    }
}

fn tagged<const N: usize>(pairs: [(&str, Json); N]) -> Json {
    Json::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn nodes_to_json(nodes: &[Node]) -> Result<Json> {
    nodes.iter().map(Node::to_json).collect::<Result<Vec<_>>>().map(Json::Array)
}

fn scalar_to_json(s: &Scalar) -> Result<Json> {
    Ok(match s {
        Scalar::Null => Json::Null,
        Scalar::Bool(b) => Json::Bool(*b),
        Scalar::Int(i) => Json::Number((*i).into()),
        Scalar::Float(OrderedFloat(f)) => {
            Json::Number(Number::from_f64(*f).ok_or(Error::NonFiniteFloat(*f))?)
        }
        Scalar::Str(s) => Json::String(s.clone()),
    })
}

// ————————————————————————————————————————————————————————————————————————————
// PARSE
// ————————————————————————————————————————————————————————————————————————————

impl Node {
    /// Parse a JSON tree nested at most [`DEFAULT_MAX_DEPTH`] containers deep.
    pub fn from_json(json: &Json) -> Result<Node> {
        Node::from_json_bounded(json, DEFAULT_MAX_DEPTH)
    }

    /// Parse a JSON tree. Errors carry the JSON path of the offending node.
    pub fn from_json_bounded(json: &Json, max_depth: usize) -> Result<Node> {
        parse(json, max_depth)
    }

    /// Parse JSON text straight into a tree. serde_json's own nesting limit is
    /// lifted; `max_depth` bounds the recursion instead.
    pub fn from_str_bounded(text: &str, max_depth: usize) -> Result<Node> {
        let mut de = serde_json::Deserializer::from_str(text);
        de.disable_recursion_limit();
        let node = parse(&mut de, max_depth)?;
        de.end()?;
        Ok(node)
    }
}

impl TryFrom<&Json> for Node {
    type Error = Error;
    fn try_from(json: &Json) -> Result<Node> { Node::from_json(json) }
}

impl std::str::FromStr for Node {
    type Err = Error;
    fn from_str(text: &str) -> Result<Node> { Node::from_str_bounded(text, DEFAULT_MAX_DEPTH) }
}

fn parse<'de, D>(de: D, max_depth: usize) -> Result<Node>
where
    D: Deserializer<'de, Error = serde_json::Error>,
{
    let cx = Context { max_depth, depth: Cell::new(0), fault: Cell::new(None) };
    let mut track = serde_path_to_error::Track::new();
    let result = NodeSeed(&cx).deserialize(serde_path_to_error::Deserializer::new(de, &mut track));
    result.map_err(|err| {
        let path = track.path().to_string();
        match cx.fault.take() {
            Some(Fault::Unrecognized(found)) => Error::UnrecognizedNode { path, found },
            Some(Fault::Depth) => Error::DepthExceeded(max_depth),
            None if err.is_data() => Error::InvalidNode { path, reason: err.to_string() },
            None => Error::Json(err),
        }
    })
}

/// Failures classified by the visitors themselves; serde only carries a message.
enum Fault {
    Unrecognized(String),
    Depth,
}

struct Context {
    max_depth: usize,
    depth: Cell<usize>,
    fault: Cell<Option<Fault>>,
}

impl Context {
    fn fail<E: de::Error>(&self, fault: Fault) -> E {
        let msg = match &fault {
            Fault::Unrecognized(found) => format!("unrecognized node: {found}"),
            Fault::Depth => format!("nesting exceeds {} containers", self.max_depth),
        };
        self.fault.set(Some(fault));
        E::custom(msg)
    }

    /// Runs `f` one container level down.
    fn descend<T, E: de::Error>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let depth = self.depth.get();
        if depth >= self.max_depth {
            return Err(self.fail(Fault::Depth));
        }
        self.depth.set(depth + 1);
        let out = f();
        self.depth.set(depth);
        out
    }
}

#[derive(Clone, Copy)]
struct NodeSeed<'c>(&'c Context);

impl<'de> DeserializeSeed<'de> for NodeSeed<'_> {
    type Value = Node;
    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for NodeSeed<'_> {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar or a node object")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> { Ok(Node::Scalar(Scalar::Null)) }
    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Node, E> { Ok(Node::Scalar(Scalar::Bool(b))) }
    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Node, E> { Ok(Node::Scalar(Scalar::Int(i))) }
    fn visit_f64<E: de::Error>(self, f: f64) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Float(OrderedFloat(f))))
    }
    fn visit_str<E: de::Error>(self, s: &str) -> Result<Node, E> { Ok(Node::Scalar(Scalar::Str(s.to_string()))) }
    fn visit_string<E: de::Error>(self, s: String) -> Result<Node, E> { Ok(Node::Scalar(Scalar::Str(s))) }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Node, E> {
        i64::try_from(u)
            .map(|i| Node::Scalar(Scalar::Int(i)))
            .map_err(|_| E::custom(format_args!("integer {u} does not fit in i64")))
    }

    // rejected before any element is read, so deep arrays never recurse
    fn visit_seq<A: SeqAccess<'de>>(self, _seq: A) -> Result<Node, A::Error> {
        Err(self.0.fail(Fault::Unrecognized("an array".to_string())))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Node, A::Error> {
        let cx = self.0;
        let mut wire = Wire::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                keys::REF => put(&mut wire.ordinal, &key, map.next_value()?)?,
                keys::TYPE => put(&mut wire.type_name, &key, map.next_value()?)?,
                keys::BASES => put(&mut wire.bases, &key, map.next_value()?)?,
                keys::MAP_LIKE => put(&mut wire.map_like, &key, map.next_value()?)?,
                keys::TEXT => put(&mut wire.text, &key, map.next_value()?)?,
                keys::CURSOR => put(&mut wire.cursor, &key, map.next_value()?)?,
                keys::BYTES_HEX => put(&mut wire.bytes, &key, map.next_value::<Hex>()?.0)?,
                keys::OPAQUE_HEX => put(&mut wire.opaque, &key, map.next_value::<Hex>()?.0)?,
                keys::FIELDS => {
                    let fields = cx.descend(|| map.next_value_seed(FieldsSeed(cx)))?;
                    put(&mut wire.fields, &key, fields)?
                }
                keys::ITEMS => {
                    let items = cx.descend(|| map.next_value_seed(ListSeed(cx)))?;
                    put(&mut wire.items, &key, items)?
                }
                keys::SET_ITEMS => {
                    let items = cx.descend(|| map.next_value_seed(ListSeed(cx)))?;
                    put(&mut wire.set_items, &key, items)?
                }
                keys::TUPLE_ITEMS => {
                    let items = cx.descend(|| map.next_value_seed(ListSeed(cx)))?;
                    put(&mut wire.tuple_items, &key, items)?
                }
                keys::ENTRIES => {
                    let entries = cx.descend(|| map.next_value_seed(EntriesSeed(cx)))?;
                    put(&mut wire.entries, &key, entries)?
                }
                other => return Err(cx.fail(Fault::Unrecognized(format!("unknown key `{other}`")))),
            }
        }
        wire.into_node(cx)
    }
}

fn put<T, E: de::Error>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), E> {
    match slot.replace(value) {
        Some(_) => Err(E::custom(format_args!("duplicate key `{key}`"))),
        None => Ok(()),
    }
}

/// Every key a node object may carry, collected before dispatch so key
/// order on the wire does not matter.
#[derive(Default)]
struct Wire {
    ordinal: Option<usize>,
    type_name: Option<String>,
    bases: Option<Vec<String>>,
    fields: Option<IndexMap<String, Node>>,
    items: Option<Vec<Node>>,
    map_like: Option<bool>,
    entries: Option<Vec<(Node, Node)>>,
    set_items: Option<Vec<Node>>,
    tuple_items: Option<Vec<Node>>,
    text: Option<String>,
    bytes: Option<Vec<u8>>,
    cursor: Option<usize>,
    opaque: Option<Vec<u8>>,
}

impl Wire {
    /// The first discriminator present decides the node shape.
    fn into_node<E: de::Error>(self, cx: &Context) -> Result<Node, E> {
        if let Some(ordinal) = self.ordinal {
            return Ok(Node::Ref(ordinal));
        }
        if let Some(type_name) = self.type_name {
            // `bases` may be omitted for a type without bases; `fields` may not
            let fields = self.fields.ok_or_else(|| E::missing_field(keys::FIELDS))?;
            return Ok(Node::Object(ObjectNode {
                type_name,
                bases: self.bases.unwrap_or_default(),
                fields,
                items: self.items,
                map_like: self.map_like.unwrap_or(false),
            }));
        }
        if let Some(items) = self.items {
            return Ok(Node::List(items));
        }
        if let Some(entries) = self.entries {
            return Ok(Node::Map(entries));
        }
        if let Some(items) = self.set_items {
            return Ok(Node::Set(items));
        }
        if let Some(items) = self.tuple_items {
            return Ok(Node::Tuple(items));
        }
        if let Some(content) = self.text {
            let cursor = self.cursor.ok_or_else(|| E::missing_field(keys::CURSOR))?;
            return Ok(Node::Text { content, cursor });
        }
        if let Some(content) = self.bytes {
            let cursor = self.cursor.ok_or_else(|| E::missing_field(keys::CURSOR))?;
            return Ok(Node::Bytes { content, cursor });
        }
        if let Some(payload) = self.opaque {
            return Ok(Node::Opaque(payload));
        }
        Err(cx.fail(Fault::Unrecognized("an object without a node discriminator".to_string())))
    }
}

struct ListSeed<'c>(&'c Context);

impl<'de> DeserializeSeed<'de> for ListSeed<'_> {
    type Value = Vec<Node>;
    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Node>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed<'_> {
    type Value = Vec<Node>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of nodes")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Node>, A::Error> {
        let mut out = Vec::new();
        while let Some(node) = seq.next_element_seed(NodeSeed(self.0))? {
            out.push(node);
        }
        Ok(out)
    }
}

struct EntriesSeed<'c>(&'c Context);

impl<'de> DeserializeSeed<'de> for EntriesSeed<'_> {
    type Value = Vec<(Node, Node)>;
    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for EntriesSeed<'_> {
    type Value = Vec<(Node, Node)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of [key, value] pairs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::new();
        while let Some(pair) = seq.next_element_seed(PairSeed(self.0))? {
            out.push(pair);
        }
        Ok(out)
    }
}

struct PairSeed<'c>(&'c Context);

impl<'de> DeserializeSeed<'de> for PairSeed<'_> {
    type Value = (Node, Node);
    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_tuple(2, self)
    }
}

impl<'de> Visitor<'de> for PairSeed<'_> {
    type Value = (Node, Node);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a [key, value] pair")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let Some(key) = seq.next_element_seed(NodeSeed(self.0))? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        let Some(value) = seq.next_element_seed(NodeSeed(self.0))? else {
            return Err(de::Error::invalid_length(1, &self));
        };
        if seq.next_element_seed(NodeSeed(self.0))?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok((key, value))
    }
}

struct FieldsSeed<'c>(&'c Context);

impl<'de> DeserializeSeed<'de> for FieldsSeed<'_> {
    type Value = IndexMap<String, Node>;
    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for FieldsSeed<'_> {
    type Value = IndexMap<String, Node>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object of named nodes")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut fields = IndexMap::new();
        while let Some(name) = map.next_key::<String>()? {
            let node = map.next_value_seed(NodeSeed(self.0))?;
            fields.insert(name, node);
        }
        Ok(fields)
    }
}

/// Lowercase hex string on the wire, bytes in memory.
struct Hex(Vec<u8>);

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Hex).map_err(|()| de::Error::custom("malformed hex string"))
    }
}

/// Hex encoding/decoding utilities.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if !s.len().is_multiple_of(2) || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}

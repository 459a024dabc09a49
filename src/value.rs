//! In-memory object graph.
//!
//! - Scalars and tuples are plain values; they are never aliased.
//! - Everything else lives behind an [`ObjRef`], a shared mutable handle.
//!   Cloning a `Value::Obj` aliases the object, so graphs may share
//!   sub-objects and contain cycles.
//! - Hashing/equality of `Value` is by value for scalars, structural for
//!   tuples and by identity for objects. Use [`deep_eq`] for structural
//!   comparison of whole graphs.
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::opaque::Opaque;
use crate::registry::{TypeDescriptor, TypeKind};

// ————————————————————————————————————————————————————————————————————————————
// SCALARS
// ————————————————————————————————————————————————————————————————————————————

/// Immutable primitive. Floats go through `OrderedFloat` so scalars can be
/// map keys and set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl From<bool> for Scalar { fn from(v: bool) -> Self { Scalar::Bool(v) } }
impl From<i64> for Scalar { fn from(v: i64) -> Self { Scalar::Int(v) } }
impl From<i32> for Scalar { fn from(v: i32) -> Self { Scalar::Int(v.into()) } }
impl From<f64> for Scalar { fn from(v: f64) -> Self { Scalar::Float(OrderedFloat(v)) } }
impl From<&str> for Scalar { fn from(v: &str) -> Self { Scalar::Str(v.to_string()) } }
impl From<String> for Scalar { fn from(v: String) -> Self { Scalar::Str(v) } }
impl From<()> for Scalar { fn from(_: ()) -> Self { Scalar::Null } }

// ————————————————————————————————————————————————————————————————————————————
// VALUES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Scalar(Scalar),
    /// fixed-arity, immutable; not tracked for identity
    Tuple(Rc<[Value]>),
    Obj(ObjRef),
}

macro_rules! scalar_into_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self { Value::Scalar(v.into()) }
        })*
    };
}

scalar_into_value!(Scalar, bool, i64, i32, f64, &str, String, ());

impl From<ObjRef> for Value {
    fn from(v: ObjRef) -> Self { Value::Obj(v) }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self { Value::object(Object::Instance(v)) }
}

impl Value {
    pub const NULL: Value = Value::Scalar(Scalar::Null);

    pub fn object(obj: Object) -> Self { Value::Obj(ObjRef::new(obj)) }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::object(Object::List(items.into_iter().collect()))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::object(Object::Map(entries.into_iter().collect()))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::object(Object::Set(items.into_iter().collect()))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn text_stream(stream: TextStream) -> Self { Value::object(Object::Text(stream)) }

    pub fn byte_stream(stream: Cursor<Vec<u8>>) -> Self { Value::object(Object::Bytes(stream)) }

    pub fn opaque<T: Opaque>(value: T) -> Self {
        Value::object(Object::Opaque(Box::new(value)))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self { Value::Scalar(s) => Some(s), _ => None }
    }

    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self { Value::Obj(o) => Some(o), _ => None }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self { Value::Tuple(t) => Some(t), _ => None }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self { Value::Scalar(Scalar::Int(i)) => Some(*i), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::Scalar(Scalar::Str(s)) => Some(s), _ => None }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Scalar(Scalar::Null)) }

    /// Same object (for `Obj`), or equal value otherwise.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Obj(a), Value::Obj(b)) => a.ptr_eq(b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (a, b) => a == b,
        }
    }

    /// Decide the encoding category once. Order of the variants mirrors the
    /// encoder's dispatch order: the first capability that applies wins.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Scalar(_) => Kind::Scalar,
            Value::Tuple(_) => Kind::Tuple,
            Value::Obj(obj) => obj.borrow().kind(),
        }
    }
}

/// Capability classification of a value, in encoder dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Scalar,
    /// structured object that is also a sequence
    SequenceInstance,
    /// structured object that is also a mapping
    MappingInstance,
    List,
    Map,
    Set,
    Tuple,
    TextStream,
    ByteStream,
    /// structured object with attribute storage only
    Instance,
    Opaque,
}

// ————————————————————————————————————————————————————————————————————————————
// OBJECTS
// ————————————————————————————————————————————————————————————————————————————

/// Shared, mutable, identity-bearing handle.
#[derive(Clone)]
pub struct ObjRef(Rc<RefCell<Object>>);

impl ObjRef {
    pub fn new(obj: Object) -> Self { ObjRef(Rc::new(RefCell::new(obj))) }

    pub fn borrow(&self) -> Ref<'_, Object> { self.0.borrow() }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> { self.0.borrow_mut() }

    /// Swap in new contents, keeping the identity.
    pub fn replace(&self, obj: Object) -> Object { self.0.replace(obj) }

    pub fn ptr_eq(&self, other: &ObjRef) -> bool { Rc::ptr_eq(&self.0, &other.0) }

    fn addr(&self) -> usize { Rc::as_ptr(&self.0) as *const () as usize }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool { self.ptr_eq(other) }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

// shallow on purpose: graphs may be cyclic
impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef@{:#x}", self.addr())
    }
}

#[derive(Debug)]
pub enum Object {
    List(Vec<Value>),
    Map(IndexMap<Value, Value>),
    /// unordered semantically; `IndexSet` keeps traversal deterministic
    Set(IndexSet<Value>),
    Instance(Instance),
    Text(TextStream),
    Bytes(Cursor<Vec<u8>>),
    Opaque(Box<dyn Opaque>),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Instance(inst) => match inst.ty().kind() {
                TypeKind::Sequence => Kind::SequenceInstance,
                TypeKind::Mapping => Kind::MappingInstance,
                TypeKind::Object => Kind::Instance,
            },
            Object::List(_) => Kind::List,
            Object::Map(_) => Kind::Map,
            Object::Set(_) => Kind::Set,
            Object::Text(_) => Kind::TextStream,
            Object::Bytes(_) => Kind::ByteStream,
            Object::Opaque(_) => Kind::Opaque,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self { Object::List(v) => Some(v), _ => None }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self { Object::List(v) => Some(v), _ => None }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Value, Value>> {
        match self { Object::Map(m) => Some(m), _ => None }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<Value, Value>> {
        match self { Object::Map(m) => Some(m), _ => None }
    }

    pub fn as_set(&self) -> Option<&IndexSet<Value>> {
        match self { Object::Set(s) => Some(s), _ => None }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self { Object::Instance(i) => Some(i), _ => None }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match self { Object::Instance(i) => Some(i), _ => None }
    }

    pub fn as_text(&self) -> Option<&TextStream> {
        match self { Object::Text(t) => Some(t), _ => None }
    }

    pub fn as_bytes(&self) -> Option<&Cursor<Vec<u8>>> {
        match self { Object::Bytes(b) => Some(b), _ => None }
    }

    pub fn as_opaque(&self) -> Option<&dyn Opaque> {
        match self { Object::Opaque(o) => Some(o.as_ref()), _ => None }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INSTANCES
// ————————————————————————————————————————————————————————————————————————————

/// A structured object of a registered type. Its state is plain data: there
/// is no constructor to run, which is what lets the decoder allocate it empty
/// and fill it in afterwards.
#[derive(Debug)]
pub struct Instance {
    ty: Arc<TypeDescriptor>,
    body: Body,
}

#[derive(Debug)]
enum Body {
    Object { attrs: IndexMap<String, Value> },
    Sequence { attrs: IndexMap<String, Value>, items: Vec<Value> },
    Mapping { entries: IndexMap<String, Value> },
}

impl Instance {
    pub fn new(ty: Arc<TypeDescriptor>) -> Self {
        let body = match ty.kind() {
            TypeKind::Object => Body::Object { attrs: IndexMap::new() },
            TypeKind::Sequence => Body::Sequence { attrs: IndexMap::new(), items: Vec::new() },
            TypeKind::Mapping => Body::Mapping { entries: IndexMap::new() },
        };
        Instance { ty, body }
    }

    pub fn ty(&self) -> &Arc<TypeDescriptor> { &self.ty }

    pub fn type_name(&self) -> &str { self.ty.name() }

    /// `None` for mapping subtypes.
    pub fn attrs(&self) -> Option<&IndexMap<String, Value>> {
        match &self.body {
            Body::Object { attrs } | Body::Sequence { attrs, .. } => Some(attrs),
            Body::Mapping { .. } => None,
        }
    }

    pub fn attrs_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match &mut self.body {
            Body::Object { attrs } | Body::Sequence { attrs, .. } => Some(attrs),
            Body::Mapping { .. } => None,
        }
    }

    pub fn items(&self) -> Option<&Vec<Value>> {
        match &self.body { Body::Sequence { items, .. } => Some(items), _ => None }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.body { Body::Sequence { items, .. } => Some(items), _ => None }
    }

    pub fn entries(&self) -> Option<&IndexMap<String, Value>> {
        match &self.body { Body::Mapping { entries } => Some(entries), _ => None }
    }

    pub fn entries_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match &mut self.body { Body::Mapping { entries } => Some(entries), _ => None }
    }

    /// Attribute, or entry for mapping subtypes.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match &self.body {
            Body::Object { attrs } | Body::Sequence { attrs, .. } => attrs.get(name),
            Body::Mapping { entries } => entries.get(name),
        }
    }

    /// Set an attribute (an entry for mapping subtypes), returning the old value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let (name, value) = (name.into(), value.into());
        match &mut self.body {
            Body::Object { attrs } | Body::Sequence { attrs, .. } => attrs.insert(name, value),
            Body::Mapping { entries } => entries.insert(name, value),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TEXT STREAMS
// ————————————————————————————————————————————————————————————————————————————

/// In-memory text buffer with a cursor. The cursor is a byte offset and
/// always sits on a char boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextStream {
    buf: String,
    pos: usize,
}

impl TextStream {
    pub fn new(content: impl Into<String>) -> Self {
        Self { buf: content.into(), pos: 0 }
    }

    pub fn with_cursor(content: impl Into<String>, pos: usize) -> Result<Self> {
        let mut stream = Self::new(content);
        stream.seek(pos)?;
        Ok(stream)
    }

    /// Full buffered content, regardless of the cursor.
    pub fn value(&self) -> &str { &self.buf }

    pub fn tell(&self) -> usize { self.pos }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() || !self.buf.is_char_boundary(pos) {
            return Err(Error::InvalidCursor { cursor: pos, len: self.buf.len() });
        }
        self.pos = pos;
        Ok(())
    }

    /// Remaining text after the cursor; moves the cursor to the end.
    pub fn read_to_end(&mut self) -> String {
        let rest = self.buf[self.pos..].to_string();
        self.pos = self.buf.len();
        rest
    }
}

/// Writes overwrite from the cursor onwards and extend past the end.
impl fmt::Write for TextStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut end = (self.pos + s.len()).min(self.buf.len());
        while !self.buf.is_char_boundary(end) { end += 1; }
        self.buf.replace_range(self.pos..end, s);
        self.pos += s.len();
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCTURAL EQUALITY
// ————————————————————————————————————————————————————————————————————————————

/// Structural equality modulo identity: same scalars, same container
/// contents and order, same attributes, same types. Terminates on cycles by
/// assuming object pairs already under comparison are equal.
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    DeepEq::default().values(a, b)
}

#[derive(Default)]
struct DeepEq {
    assumed: HashSet<(usize, usize)>,
}

impl DeepEq {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Scalar(x), Value::Scalar(y)) => x == y,
            (Value::Tuple(x), Value::Tuple(y)) => self.seqs(x, y),
            (Value::Obj(x), Value::Obj(y)) => {
                if !self.assumed.insert((x.addr(), y.addr())) {
                    return true;
                }
                let (x, y) = (x.borrow(), y.borrow());
                self.objects(&x, &y)
            }
            _ => false,
        }
    }

    /// Like `values`, but a mismatch leaves no assumptions behind.
    fn tentative(&mut self, a: &Value, b: &Value) -> bool {
        let saved = self.assumed.clone();
        let eq = self.values(a, b);
        if !eq {
            self.assumed = saved;
        }
        eq
    }

    /// Finds a one-to-one pairing of equal members, backtracking when a later
    /// member of `a` has nothing left to pair with.
    fn sets(&mut self, a: &IndexSet<Value>, b: &IndexSet<Value>) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let b: Vec<&Value> = b.iter().collect();
        let mut used = vec![false; b.len()];
        // (index into `b`, assumptions held before the pairing) per paired member of `a`
        let mut paired: Vec<(usize, HashSet<(usize, usize)>)> = Vec::with_capacity(a.len());
        let mut from = 0;
        while let Some(item) = a.get_index(paired.len()) {
            let before = self.assumed.clone();
            let mut found = None;
            for j in from..b.len() {
                if !used[j] && self.tentative(item, b[j]) {
                    found = Some(j);
                    break;
                }
            }
            match found {
                Some(j) => {
                    used[j] = true;
                    paired.push((j, before));
                    from = 0;
                }
                None => {
                    let Some((j, assumed)) = paired.pop() else {
                        return false;
                    };
                    used[j] = false;
                    self.assumed = assumed;
                    from = j + 1;
                }
            }
        }
        true
    }

    fn seqs(&mut self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values(x, y))
    }

    fn pairs<'v, K: 'v>(
        &mut self,
        a: impl ExactSizeIterator<Item = (&'v K, &'v Value)>,
        b: impl ExactSizeIterator<Item = (&'v K, &'v Value)>,
        mut keys_eq: impl FnMut(&mut Self, &K, &K) -> bool,
    ) -> bool {
        a.len() == b.len()
            && a.zip(b).all(|((ka, va), (kb, vb))| keys_eq(self, ka, kb) && self.values(va, vb))
    }

    fn objects(&mut self, a: &Object, b: &Object) -> bool {
        match (a, b) {
            (Object::List(x), Object::List(y)) => self.seqs(x, y),
            (Object::Map(x), Object::Map(y)) => {
                self.pairs(x.iter(), y.iter(), |s, ka, kb| s.values(ka, kb))
            }
            (Object::Set(x), Object::Set(y)) => self.sets(x, y),
            (Object::Instance(x), Object::Instance(y)) => self.instances(x, y),
            (Object::Text(x), Object::Text(y)) => x == y,
            (Object::Bytes(x), Object::Bytes(y)) => {
                x.get_ref() == y.get_ref() && x.position() == y.position()
            }
            (Object::Opaque(x), Object::Opaque(y)) => x.dyn_eq(y.as_ref()),
            _ => false,
        }
    }

    fn instances(&mut self, a: &Instance, b: &Instance) -> bool {
        if a.type_name() != b.type_name() {
            return false;
        }
        match (&a.body, &b.body) {
            (Body::Object { attrs: x }, Body::Object { attrs: y }) => {
                self.pairs(x.iter(), y.iter(), |_, ka, kb| ka == kb)
            }
            (
                Body::Sequence { attrs: xa, items: xi },
                Body::Sequence { attrs: ya, items: yi },
            ) => self.seqs(xi, yi) && self.pairs(xa.iter(), ya.iter(), |_, ka, kb| ka == kb),
            (Body::Mapping { entries: x }, Body::Mapping { entries: y }) => {
                self.pairs(x.iter(), y.iter(), |_, ka, kb| ka == kb)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn point() -> Arc<TypeDescriptor> { Arc::new(TypeDescriptor::object("Point")) }

    #[test]
    fn objects_hash_by_identity_scalars_by_value() {
        let a = Value::list([]);
        let b = Value::list([]);
        let mut set = IndexSet::new();
        set.insert(a.clone());
        set.insert(b.clone());
        set.insert(a.clone());
        assert_eq!(set.len(), 2);

        let mut set = IndexSet::new();
        set.insert(Value::from(1.5));
        set.insert(Value::from(1.5));
        set.insert(Value::tuple([Value::from(1), Value::from("x")]));
        set.insert(Value::tuple([Value::from(1), Value::from("x")]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn kind_follows_dispatch_categories() {
        assert_eq!(Value::from(3).kind(), Kind::Scalar);
        assert_eq!(Value::tuple([]).kind(), Kind::Tuple);
        assert_eq!(Value::list([]).kind(), Kind::List);
        assert_eq!(Value::map([]).kind(), Kind::Map);
        assert_eq!(Value::set([]).kind(), Kind::Set);
        assert_eq!(Value::text_stream(TextStream::new("")).kind(), Kind::TextStream);
        assert_eq!(Value::byte_stream(Cursor::new(vec![])).kind(), Kind::ByteStream);
        assert_eq!(Value::opaque(7u8).kind(), Kind::Opaque);
        assert_eq!(Value::from(point().allocate()).kind(), Kind::Instance);

        let seq = Arc::new(TypeDescriptor::sequence("Stack"));
        assert_eq!(Value::from(seq.allocate()).kind(), Kind::SequenceInstance);
        let map = Arc::new(TypeDescriptor::mapping("Bag"));
        assert_eq!(Value::from(map.allocate()).kind(), Kind::MappingInstance);
    }

    #[test]
    fn deep_eq_ignores_identity_and_terminates_on_cycles() {
        let make = || {
            let inst = point().allocate().with("x", 1).with("y", 2);
            let v = Value::from(inst);
            let obj = v.as_obj().unwrap().clone();
            obj.borrow_mut().as_instance_mut().unwrap().set("me", v.clone());
            v
        };
        let (a, b) = (make(), make());
        assert!(!a.is(&b));
        assert!(deep_eq(&a, &b));

        let c = make();
        c.as_obj().unwrap().borrow_mut().as_instance_mut().unwrap().set("y", 3);
        assert!(!deep_eq(&a, &c));
    }

    #[test]
    fn deep_eq_sets_ignore_order() {
        let a = Value::set([Value::from(1), Value::from(2), Value::from(3)]);
        let b = Value::set([Value::from(3), Value::from(1), Value::from(2)]);
        assert!(deep_eq(&a, &b));
        assert!(!deep_eq(&a, &Value::set([Value::from(1), Value::from(2)])));
    }

    #[test]
    fn deep_eq_sets_pair_members_one_to_one() {
        let a = Value::set([Value::list([]), Value::list([])]);
        let b = Value::set([Value::list([]), Value::list([Value::from(1)])]);
        assert!(!deep_eq(&a, &b));
        assert!(!deep_eq(&b, &a));

        let a = Value::set([Value::list([]), Value::list([Value::from(1)])]);
        let c = Value::set([Value::list([Value::from(1)]), Value::list([])]);
        assert!(deep_eq(&a, &c));
    }

    #[test]
    fn mapping_instances_store_entries() {
        let bag = Arc::new(TypeDescriptor::mapping("Bag"));
        let mut inst = bag.allocate();
        inst.set("k", "v");
        assert!(inst.attrs().is_none());
        assert_eq!(inst.get("k").and_then(Value::as_str), Some("v"));
        assert_eq!(inst.entries().map(|e| e.len()), Some(1));
    }

    #[test]
    fn text_stream_cursor_rules() {
        let mut s = TextStream::with_cursor("héllo", 1).unwrap();
        assert!(s.seek(2).is_err(), "inside a multi-byte char");
        s.seek(3).unwrap();
        assert_eq!(s.read_to_end(), "llo");
        assert_eq!(s.tell(), s.value().len());
        assert!(TextStream::with_cursor("ab", 3).is_err());

        let mut s = TextStream::new("abcdef");
        s.seek(2).unwrap();
        write!(s, "XY").unwrap();
        assert_eq!(s.value(), "abXYef");
        s.seek(5).unwrap();
        write!(s, "123").unwrap();
        assert_eq!(s.value(), "abXYe123");
        assert_eq!(s.tell(), 8);
    }
}

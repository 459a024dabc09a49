//! Structured tree → value.
//!
//! Mirrors the encoder's traversal exactly: every registrable node binds its
//! (still empty) object to the next ordinal before its children are decoded,
//! so a child referring back to it resolves to the same handle. Contents are
//! decoded next and stored into the bound handle, keeping its identity.
use std::io::Cursor;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::RefReader;
use crate::node::{Node, ObjectNode};
use crate::opaque::FallbackCodec;
use crate::registry::{TypeDescriptor, TypeKind, TypeRegistry};
use crate::value::{ObjRef, Object, TextStream, Value};

pub struct Decoder<'a> {
    registry: &'a TypeRegistry,
    fallback: &'a dyn FallbackCodec,
    config: &'a Config,
    refs: RefReader,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a TypeRegistry, fallback: &'a dyn FallbackCodec, config: &'a Config) -> Self {
        Decoder { registry, fallback, config, refs: RefReader::new(), depth: 0 }
    }

    /// Decode one tree. Bindings from a previous call are dropped first.
    pub fn decode(&mut self, node: &Node) -> Result<Value> {
        self.refs.clear();
        self.depth = 0;
        let value = self.node(node);
        tracing::debug!(objects = self.refs.len(), ok = value.is_ok(), "decoded object graph");
        // a failed decode must not leave half-built objects reachable
        if value.is_err() {
            self.refs.clear();
        }
        value
    }

    fn node(&mut self, node: &Node) -> Result<Value> {
        match node {
            Node::Scalar(s) => Ok(Value::Scalar(s.clone())),
            Node::Ref(ordinal) => self.refs.resolve(*ordinal).map(Value::Obj),
            Node::Tuple(items) => self.nested(|dec| dec.seq(items)).map(|items| Value::Tuple(items.into())),
            Node::List(items) => self.nested(|dec| dec.list(items)),
            Node::Map(entries) => self.nested(|dec| dec.map(entries)),
            Node::Set(items) => self.nested(|dec| dec.set(items)),
            Node::Object(obj) => self.nested(|dec| dec.object(obj)),
            Node::Text { content, cursor } => {
                let stream = TextStream::with_cursor(content.clone(), *cursor)?;
                Ok(Value::Obj(self.bind(Object::Text(stream))))
            }
            Node::Bytes { content, cursor } => {
                let mut stream = Cursor::new(content.clone());
                stream.set_position(*cursor as u64);
                Ok(Value::Obj(self.bind(Object::Bytes(stream))))
            }
            Node::Opaque(payload) => {
                let value = self.fallback.decode(payload).map_err(Error::Fallback)?;
                tracing::trace!(ty = value.type_name(), "decoded through fallback codec");
                Ok(Value::Obj(self.bind(Object::Opaque(value))))
            }
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.config.max_depth {
            return Err(Error::DepthExceeded(self.config.max_depth));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn bind(&mut self, obj: Object) -> ObjRef {
        let handle = ObjRef::new(obj);
        self.refs.bind(handle.clone());
        handle
    }

    fn seq(&mut self, items: &[Node]) -> Result<Vec<Value>> {
        items.iter().map(|item| self.node(item)).collect()
    }

    fn list(&mut self, items: &[Node]) -> Result<Value> {
        let handle = self.bind(Object::List(Vec::new()));
        let items = self.seq(items)?;
        handle.replace(Object::List(items));
        Ok(Value::Obj(handle))
    }

    fn map(&mut self, entries: &[(Node, Node)]) -> Result<Value> {
        let handle = self.bind(Object::Map(IndexMap::new()));
        let mut map = IndexMap::with_capacity(entries.len());
        for (k, v) in entries {
            let k = self.node(k)?;
            let v = self.node(v)?;
            map.insert(k, v);
        }
        handle.replace(Object::Map(map));
        Ok(Value::Obj(handle))
    }

    fn set(&mut self, items: &[Node]) -> Result<Value> {
        let handle = self.bind(Object::Set(IndexSet::new()));
        let items: IndexSet<Value> = self.seq(items)?.into_iter().collect();
        handle.replace(Object::Set(items));
        Ok(Value::Obj(handle))
    }

    fn object(&mut self, node: &ObjectNode) -> Result<Value> {
        let ty = self
            .registry
            .lookup(&node.type_name)
            .ok_or_else(|| Error::UnknownType(node.type_name.clone()))?;
        let ty = Arc::clone(ty);
        self.check_bases(&ty, &node.bases)?;
        check_shape(&ty, node)?;

        let handle = self.bind(Object::Instance(ty.allocate()));
        let mut inst = ty.allocate();
        if let (Some(items), Some(dst)) = (&node.items, inst.items_mut()) {
            *dst = self.seq(items)?;
        }
        // attributes are injected as-is; no constructor or validation runs
        for (name, field) in &node.fields {
            let value = self.node(field)?;
            inst.set(name.clone(), value);
        }
        handle.replace(Object::Instance(inst));
        Ok(Value::Obj(handle))
    }

    /// Bases are checked against the descriptor's declared bases; no type is
    /// ever synthesized from them. Unregistered names are skipped.
    fn check_bases(&self, ty: &TypeDescriptor, bases: &[String]) -> Result<()> {
        for base in bases {
            if ty.declares(base) {
                continue;
            }
            if !self.registry.contains(base) {
                tracing::trace!(ty = ty.name(), base = %base, "skipping unregistered base");
                continue;
            }
            if self.config.strict_bases {
                return Err(Error::BaseMismatch { ty: ty.name().to_string(), base: base.clone() });
            }
            tracing::warn!(ty = ty.name(), base = %base, "node lists a base the type does not declare");
        }
        Ok(())
    }
}

fn check_shape(ty: &TypeDescriptor, node: &ObjectNode) -> Result<()> {
    let matches = match ty.kind() {
        TypeKind::Object => node.items.is_none() && !node.map_like,
        TypeKind::Sequence => node.items.is_some() && !node.map_like,
        TypeKind::Mapping => node.items.is_none() && node.map_like,
    };
    if matches {
        return Ok(());
    }
    Err(Error::ShapeMismatch {
        ty: ty.name().to_string(),
        expected: ty.kind().describe(),
        found: node.payload(),
    })
}

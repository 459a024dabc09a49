//! Value → structured tree.
//!
//! Dispatch, first match wins:
//! 1. object already registered → `Ref`
//! 2. scalar → `Scalar`
//! 3. sequence subtype → `Object` with items and attributes
//! 4. mapping subtype → `Object` with `map_like` entries
//! 5. list, 6. map, 7. set
//! 8. tuple (not registered)
//! 9. text / byte stream
//! 10. plain structured object
//! 11. anything else → opaque fallback
//!
//! Every object is registered *before* its children are visited.
use indexmap::IndexMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::RefWriter;
use crate::node::{Node, ObjectNode};
use crate::opaque::FallbackCodec;
use crate::value::{Instance, ObjRef, Object, Value};

pub struct Encoder<'a> {
    refs: RefWriter,
    fallback: &'a dyn FallbackCodec,
    max_depth: usize,
    depth: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(fallback: &'a dyn FallbackCodec, config: &Config) -> Self {
        Encoder {
            refs: RefWriter::new(),
            fallback,
            max_depth: config.max_depth,
            depth: 0,
        }
    }

    /// Encode one graph. Ordinals restart at 0 on every call.
    pub fn encode(&mut self, value: &Value) -> Result<Node> {
        self.refs.clear();
        self.depth = 0;
        let node = self.value(value)?;
        tracing::debug!(objects = self.refs.len(), nodes = node.size(), "encoded object graph");
        Ok(node)
    }

    fn value(&mut self, value: &Value) -> Result<Node> {
        match value {
            Value::Obj(obj) => match self.refs.lookup(obj) {
                Some(ordinal) => Ok(Node::Ref(ordinal)),
                None => self.nested(|enc| enc.object(obj)),
            },
            Value::Scalar(s) => Ok(Node::Scalar(s.clone())),
            Value::Tuple(items) => self.nested(|enc| enc.seq(items)).map(Node::Tuple),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(Error::DepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn seq(&mut self, items: &[Value]) -> Result<Vec<Node>> {
        items.iter().map(|item| self.value(item)).collect()
    }

    fn fields(&mut self, fields: &IndexMap<String, Value>) -> Result<IndexMap<String, Node>> {
        let mut out = IndexMap::with_capacity(fields.len());
        for (name, value) in fields {
            out.insert(name.clone(), self.value(value)?);
        }
        Ok(out)
    }

    fn object(&mut self, handle: &ObjRef) -> Result<Node> {
        self.refs.register(handle);
        let obj = handle.borrow();
        match &*obj {
            Object::Instance(inst) => self.instance(inst),
            Object::List(items) => self.seq(items).map(Node::List),
            Object::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let k = self.value(k)?;
                    out.push((k, self.value(v)?));
                }
                Ok(Node::Map(out))
            }
            Object::Set(items) => {
                items.iter().map(|item| self.value(item)).collect::<Result<_>>().map(Node::Set)
            }
            Object::Text(stream) => Ok(Node::Text {
                content: stream.value().to_string(),
                cursor: stream.tell(),
            }),
            Object::Bytes(stream) => {
                let len = stream.get_ref().len();
                let cursor = usize::try_from(stream.position())
                    .map_err(|_| Error::InvalidCursor { cursor: usize::MAX, len })?;
                Ok(Node::Bytes { content: stream.get_ref().clone(), cursor })
            }
            Object::Opaque(value) => {
                tracing::trace!(ty = value.type_name(), "encoding through fallback codec");
                let payload = self.fallback.encode(value.as_ref()).map_err(Error::Fallback)?;
                Ok(Node::Opaque(payload))
            }
        }
    }

    /// Items first, then attributes (or entries); the decoder mirrors this order.
    fn instance(&mut self, inst: &Instance) -> Result<Node> {
        let ty = inst.ty();
        let items = match inst.items() {
            Some(items) => Some(self.seq(items)?),
            None => None,
        };
        let (fields, map_like) = match (inst.entries(), inst.attrs()) {
            (Some(entries), _) => (self.fields(entries)?, true),
            (None, Some(attrs)) => (self.fields(attrs)?, false),
            (None, None) => (IndexMap::new(), false),
        };
        Ok(Node::Object(ObjectNode {
            type_name: ty.name().to_string(),
            bases: ty.bases().to_vec(),
            fields,
            items,
            map_like,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::opaque::NoFallback;
    use crate::registry::TypeDescriptor;
    use crate::value::{Scalar, TextStream};

    fn encode(value: &Value) -> Result<Node> {
        Encoder::new(&NoFallback, &Config::default()).encode(value)
    }

    fn int(i: i64) -> Node { Node::Scalar(Scalar::Int(i)) }

    #[test]
    fn scalars_only_sequence() {
        let v = Value::list([Value::from(1), Value::from("a"), Value::from(1)]);
        assert_eq!(
            encode(&v).unwrap(),
            Node::List(vec![int(1), Node::Scalar(Scalar::Str("a".into())), int(1)])
        );
    }

    #[test]
    fn shared_object_becomes_reference() {
        let m = Value::map([(Value::from("k"), Value::from(1))]);
        let s = Value::list([m.clone(), m]);
        let Node::List(items) = encode(&s).unwrap() else { panic!("expected a list") };
        assert!(matches!(items[0], Node::Map(_)));
        // the outer list holds ordinal 0, the mapping ordinal 1
        assert_eq!(items[1], Node::Ref(1));
    }

    #[test]
    fn tuples_are_not_registered() {
        let inner = Value::list([]);
        let t = Value::tuple([inner.clone(), Value::from(2)]);
        let v = Value::list([t.clone(), t, inner]);
        let node = encode(&v).unwrap();
        assert_eq!(
            node,
            Node::List(vec![
                Node::Tuple(vec![Node::List(vec![]), int(2)]),
                Node::Tuple(vec![Node::Ref(1), int(2)]),
                Node::Ref(1),
            ])
        );
    }

    #[test]
    fn self_reference_encodes_as_own_ordinal() {
        let ty = Arc::new(TypeDescriptor::object("Loop").with_base("Base"));
        let v = Value::from(ty.allocate().with("n", 1));
        let obj = v.as_obj().unwrap().clone();
        obj.borrow_mut().as_instance_mut().unwrap().set("self", v.clone());

        let Node::Object(node) = encode(&v).unwrap() else { panic!("expected an object") };
        assert_eq!(node.type_name, "Loop");
        assert_eq!(node.bases, ["Base".to_string()]);
        assert_eq!(node.fields.get("self"), Some(&Node::Ref(0)));
        assert_eq!(node.fields.keys().collect::<Vec<_>>(), ["n", "self"]);
        assert!(node.items.is_none() && !node.map_like);
    }

    #[test]
    fn sequence_subtype_items_come_before_attributes() {
        let ty = Arc::new(TypeDescriptor::sequence("Tagged").with_base("list"));
        let shared = Value::list([]);
        let mut inst = ty.allocate().with("tag", shared.clone());
        inst.items_mut().unwrap().push(shared);

        let Node::Object(node) = encode(&Value::from(inst)).unwrap() else { panic!() };
        assert_eq!(node.items, Some(vec![Node::List(vec![])]));
        assert_eq!(node.fields.get("tag"), Some(&Node::Ref(1)));
    }

    #[test]
    fn mapping_subtype_is_map_like() {
        let ty = Arc::new(TypeDescriptor::mapping("Env").with_base("dict"));
        let inst = ty.allocate().with("HOME", "/root");
        let Node::Object(node) = encode(&Value::from(inst)).unwrap() else { panic!() };
        assert!(node.map_like);
        assert_eq!(node.fields.get("HOME"), Some(&Node::Scalar(Scalar::Str("/root".into()))));
    }

    #[test]
    fn streams_capture_content_and_cursor() {
        let mut text = TextStream::new("hello");
        text.seek(2).unwrap();
        let mut bytes = Cursor::new(vec![1, 2, 3]);
        bytes.set_position(3);
        let v = Value::list([Value::text_stream(text), Value::byte_stream(bytes)]);
        assert_eq!(
            encode(&v).unwrap(),
            Node::List(vec![
                Node::Text { content: "hello".into(), cursor: 2 },
                Node::Bytes { content: vec![1, 2, 3], cursor: 3 },
            ])
        );
    }

    #[test]
    fn fallback_errors_propagate() {
        let err = encode(&Value::opaque(5u16)).unwrap_err();
        assert!(matches!(err, Error::Fallback(_)));
        assert!(err.to_string().contains("u16"));
    }

    #[test]
    fn depth_is_bounded() {
        let mut v = Value::list([]);
        for _ in 0..10 {
            v = Value::list([v]);
        }
        let config = Config::new().max_depth(5);
        let err = Encoder::new(&NoFallback, &config).encode(&v).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded(5)));
        assert!(Encoder::new(&NoFallback, &Config::new().max_depth(11)).encode(&v).is_ok());
    }

    #[test]
    fn ordinals_restart_per_call() {
        let shared = Value::list([]);
        let v = Value::list([shared.clone(), shared]);
        let mut encoder = Encoder::new(&NoFallback, &Config::default());
        let first = encoder.encode(&v).unwrap();
        let second = encoder.encode(&v).unwrap();
        assert_eq!(first, second);
    }
}

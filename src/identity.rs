//! Identity tracking: object ↔ ordinal.
//!
//! Ordinals are slot indices handed out in traversal order, starting at 0,
//! and never written onto the node that introduces the object. Encode and
//! decode therefore have to visit registrable nodes in exactly the same
//! order; both sides register an object *before* descending into it so that
//! cycles resolve to the slot being filled.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::ObjRef;

/// Encode side: maps objects already visited to their ordinal.
///
/// `ObjRef` hashes and compares by `Rc` address. That is sound here because
/// every key holds a clone of the handle: a registered object stays
/// allocated until the writer is cleared or dropped, so no later object can
/// be handed its address and inherit its ordinal.
#[derive(Debug, Default)]
pub struct RefWriter {
    refs: HashMap<ObjRef, usize>,
}

impl RefWriter {
    pub fn new() -> Self { Self::default() }

    pub fn lookup(&self, obj: &ObjRef) -> Option<usize> {
        self.refs.get(obj).copied()
    }

    /// Assign the next ordinal to a not-yet-seen object. An object already
    /// registered keeps its ordinal.
    pub fn register(&mut self, obj: &ObjRef) -> usize {
        let next = self.refs.len();
        *self.refs.entry(obj.clone()).or_insert(next)
    }

    pub fn len(&self) -> usize { self.refs.len() }
    pub fn is_empty(&self) -> bool { self.refs.is_empty() }

    /// Forget every object and restart ordinals at 0.
    pub fn clear(&mut self) { self.refs.clear() }
}

/// Decode side: ordinal → live (possibly still being filled) object.
#[derive(Debug, Default)]
pub struct RefReader {
    slots: Vec<ObjRef>,
}

impl RefReader {
    pub fn new() -> Self { Self::default() }

    /// Bind `obj` to the next ordinal and return that ordinal.
    pub fn bind(&mut self, obj: ObjRef) -> usize {
        self.slots.push(obj);
        self.slots.len() - 1
    }

    pub fn resolve(&self, ordinal: usize) -> Result<ObjRef> {
        self.slots.get(ordinal).cloned().ok_or(Error::UnresolvedReference(ordinal))
    }

    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    pub fn clear(&mut self) { self.slots.clear() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Object, Value};

    #[test]
    fn writer_keeps_registered_objects_alive() {
        let mut writer = RefWriter::new();
        let first = {
            let temp = ObjRef::new(Object::List(vec![]));
            writer.register(&temp)
        };
        assert_eq!(first, 0);
        for expected in 1..64 {
            let fresh = ObjRef::new(Object::List(vec![]));
            assert_eq!(writer.lookup(&fresh), None);
            assert_eq!(writer.register(&fresh), expected);
        }
        assert_eq!(writer.len(), 64);
    }

    #[test]
    fn writer_assigns_ordinals_in_first_visit_order() {
        let a = ObjRef::new(Object::List(vec![]));
        let b = ObjRef::new(Object::List(vec![]));
        let mut writer = RefWriter::new();

        assert_eq!(writer.lookup(&a), None);
        assert_eq!(writer.register(&a), 0);
        assert_eq!(writer.register(&b), 1);
        assert_eq!(writer.register(&a), 0, "re-registering keeps the ordinal");
        assert_eq!(writer.lookup(&b), Some(1));
        assert_eq!(writer.len(), 2);

        writer.clear();
        assert!(writer.is_empty());
        assert_eq!(writer.register(&b), 0);
    }

    #[test]
    fn equal_but_distinct_objects_get_distinct_ordinals() {
        let mut writer = RefWriter::new();
        let x = Value::list([Value::from(1)]);
        let y = Value::list([Value::from(1)]);
        let ox = writer.register(x.as_obj().unwrap());
        let oy = writer.register(y.as_obj().unwrap());
        assert_ne!(ox, oy);
    }

    #[test]
    fn reader_resolves_bound_slots_only() {
        let a = ObjRef::new(Object::List(vec![]));
        let mut reader = RefReader::new();
        assert_eq!(reader.bind(a.clone()), 0);

        assert!(reader.resolve(0).unwrap().ptr_eq(&a));
        assert!(matches!(reader.resolve(1), Err(Error::UnresolvedReference(1))));
    }
}

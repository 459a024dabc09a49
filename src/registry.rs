//! Name → type-descriptor table consulted when rebuilding structured objects.
//!
//! Types are registered explicitly by the caller before any decode; the table
//! is read-only afterwards and can be shared (`Arc<TypeRegistry>`) between
//! codec instances.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Instance;

/// What a structured type is besides a bag of attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// attribute storage only
    Object,
    /// a sequence subtype: ordered items plus attributes
    Sequence,
    /// a mapping subtype: text-keyed entries, no attribute storage
    Mapping,
}

impl TypeKind {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            TypeKind::Object => "a plain object",
            TypeKind::Sequence => "a sequence subtype",
            TypeKind::Mapping => "a mapping subtype",
        }
    }
}

/// A constructible structured type.
///
/// `bases` are the *declared immediate* base names, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    bases: Vec<String>,
    kind: TypeKind,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self { name: name.into(), bases: Vec::new(), kind }
    }

    pub fn object(name: impl Into<String>) -> Self { Self::new(name, TypeKind::Object) }
    pub fn sequence(name: impl Into<String>) -> Self { Self::new(name, TypeKind::Sequence) }
    pub fn mapping(name: impl Into<String>) -> Self { Self::new(name, TypeKind::Mapping) }

    /// Append a declared base name.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn bases(&self) -> &[String] { &self.bases }
    pub fn kind(&self) -> TypeKind { self.kind }

    pub fn declares(&self, base: &str) -> bool {
        self.bases.iter().any(|b| b == base)
    }

    /// Raw allocation: an empty instance whose state is filled in afterwards,
    /// without running any domain constructor or validation.
    pub fn allocate(self: &Arc<Self>) -> Instance {
        Instance::new(Arc::clone(self))
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register a type under its name. Names are unique: a second descriptor
    /// with the same name is a configuration error.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<Arc<TypeDescriptor>> {
        if self.types.contains_key(descriptor.name()) {
            return Err(Error::DuplicateType(descriptor.name));
        }
        let descriptor = Arc::new(descriptor);
        self.types.insert(descriptor.name.clone(), Arc::clone(&descriptor));
        tracing::trace!(ty = %descriptor.name, kind = ?descriptor.kind, "registered type");
        Ok(descriptor)
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    /// Registered descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::object("Shape")).unwrap();
        let point = registry
            .register(TypeDescriptor::object("Point").with_base("Shape"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("Shape"));
        assert!(registry.lookup("Circle").is_none());

        let found = registry.lookup("Point").unwrap();
        assert!(Arc::ptr_eq(found, &point));
        assert_eq!(found.bases(), ["Shape".to_string()]);
        assert!(found.declares("Shape"));
        assert!(!found.declares("Point"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::object("Node")).unwrap();
        let err = registry
            .register(TypeDescriptor::sequence("Node").with_base("list"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateType(name) if name == "Node"));
        // first registration survives untouched
        assert_eq!(registry.lookup("Node").unwrap().kind(), TypeKind::Object);
    }

    #[test]
    fn iteration_keeps_registration_order() {
        let mut registry = TypeRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(TypeDescriptor::object(name)).unwrap();
        }
        let names: Vec<&str> = registry.iter().map(|d| d.name()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn allocate_matches_kind() {
        let seq = Arc::new(TypeDescriptor::sequence("Stack"));
        let inst = seq.allocate();
        assert!(inst.items().is_some_and(|items| items.is_empty()));
        assert!(inst.entries().is_none());

        let map = Arc::new(TypeDescriptor::mapping("Bag"));
        let inst = map.allocate();
        assert!(inst.entries().is_some());
        assert!(inst.attrs().is_none());
    }
}

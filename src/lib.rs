//! Graph-aware object codec.
//!
//! Turns an in-memory object graph (scalars, containers, structured objects,
//! shared references, cycles) into a self-describing JSON tree and back.
//!
//! - Shared objects are written once; later occurrences become `{"ref": n}`.
//! - Cycles work because objects are registered before their children.
//! - Structured objects are rebuilt from a caller-populated [`TypeRegistry`].
//! - Anything without structure goes through a [`FallbackCodec`].
//!
//! ```
//! use json_objgraph::{Codec, TypeDescriptor, TypeRegistry, Value};
//!
//! let mut registry = TypeRegistry::new();
//! let node_ty = registry.register(TypeDescriptor::object("Node")).unwrap();
//!
//! let x = Value::from(node_ty.allocate().with("label", "x"));
//! x.as_obj().unwrap().borrow_mut().as_instance_mut().unwrap().set("next", x.clone());
//!
//! let codec = Codec::new(registry);
//! let text = codec.to_string(&x).unwrap();
//! assert_eq!(text, r#"{"type":"Node","bases":[],"fields":{"label":"x","next":{"ref":0}}}"#);
//!
//! let y = codec.from_str(&text).unwrap();
//! let obj = y.as_obj().unwrap().borrow();
//! assert!(obj.as_instance().unwrap().get("next").unwrap().is(&y));
//! ```
pub mod codec;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod identity;
pub mod node;
pub mod opaque;
pub mod registry;
pub mod value;

pub use codec::Codec;
pub use config::Config;
pub use error::{Error, Result};
pub use node::{Node, ObjectNode};
pub use opaque::{FallbackCodec, NoFallback, Opaque, SerdeFallback};
pub use registry::{TypeDescriptor, TypeKind, TypeRegistry};
pub use value::{deep_eq, Instance, Kind, ObjRef, Object, Scalar, TextStream, Value};

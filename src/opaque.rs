//! Last-resort path for values the codec cannot take apart.
//!
//! The codec core only moves the bytes a [`FallbackCodec`] produces; it never
//! looks inside them. [`SerdeFallback`] is a general-purpose marshaller for
//! any `serde` type registered under a tag.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FallbackError;

/// A value with no structural decomposition. Implemented for every
/// `'static + Debug + PartialEq` type.
pub trait Opaque: Any + fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Opaque) -> bool;
}

impl<T: Any + fmt::Debug + PartialEq> Opaque for T {
    fn type_name(&self) -> &'static str { std::any::type_name::<T>() }

    fn as_any(&self) -> &dyn Any { self }

    fn dyn_eq(&self, other: &dyn Opaque) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|other| self == other)
    }
}

impl dyn Opaque {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// External black-box marshaller. Errors are handed back to the caller of
/// `encode`/`decode` unchanged.
pub trait FallbackCodec: Send + Sync {
    fn encode(&self, value: &dyn Opaque) -> Result<Vec<u8>, FallbackError>;
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Opaque>, FallbackError>;
}

#[derive(Debug, Error)]
pub enum FallbackFailure {
    #[error("no fallback marshaller for `{0}`")]
    Unsupported(String),
    #[error("unknown opaque tag `{0}`")]
    UnknownTag(String),
    #[error("no fallback codec configured")]
    Disabled,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Refuses everything. The default when no fallback is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFallback;

impl FallbackCodec for NoFallback {
    fn encode(&self, value: &dyn Opaque) -> Result<Vec<u8>, FallbackError> {
        Err(FallbackFailure::Unsupported(value.type_name().to_string()).into())
    }

    fn decode(&self, _bytes: &[u8]) -> Result<Box<dyn Opaque>, FallbackError> {
        Err(FallbackFailure::Disabled.into())
    }
}

// -------------------------- serde-backed marshaller -------------------------- //

type EncodeFn = fn(&dyn Any) -> Option<serde_json::Result<serde_json::Value>>;
type DecodeFn = fn(serde_json::Value) -> serde_json::Result<Box<dyn Opaque>>;

struct Marshaller {
    encode: EncodeFn,
    decode: DecodeFn,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    value: serde_json::Value,
}

/// Marshals registered `serde` types as a tagged JSON payload
/// (`{"type": tag, "value": ...}`).
#[derive(Default)]
pub struct SerdeFallback {
    by_tag: IndexMap<String, Marshaller>,
    tags: HashMap<TypeId, String>,
}

impl SerdeFallback {
    pub fn new() -> Self { Self::default() }

    /// Register `T` under `tag`. Re-registering a tag replaces it.
    pub fn register<T>(mut self, tag: impl Into<String>) -> Self
    where
        T: Opaque + Serialize + DeserializeOwned,
    {
        let tag = tag.into();
        self.tags.insert(TypeId::of::<T>(), tag.clone());
        self.by_tag.insert(tag, Marshaller { encode: encode_as::<T>, decode: decode_as::<T> });
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.by_tag.keys().map(String::as_str)
    }
}

fn encode_as<T: Serialize + 'static>(value: &dyn Any) -> Option<serde_json::Result<serde_json::Value>> {
    value.downcast_ref::<T>().map(serde_json::to_value)
}

fn decode_as<T: Opaque + DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<Box<dyn Opaque>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

impl FallbackCodec for SerdeFallback {
    fn encode(&self, value: &dyn Opaque) -> Result<Vec<u8>, FallbackError> {
        let unsupported = || FallbackFailure::Unsupported(value.type_name().to_string());
        let any = value.as_any();
        let tag = self.tags.get(&any.type_id()).ok_or_else(unsupported)?;
        let marshaller = &self.by_tag[tag.as_str()];
        let value = (marshaller.encode)(any).ok_or_else(unsupported)??;
        let envelope = Envelope { tag: tag.clone(), value };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Opaque>, FallbackError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let marshaller = self
            .by_tag
            .get(&envelope.tag)
            .ok_or_else(|| FallbackFailure::UnknownTag(envelope.tag.clone()))?;
        Ok((marshaller.decode)(envelope.value)?)
    }
}

impl fmt::Debug for SerdeFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeFallback").field("tags", &self.by_tag.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Complex {
        re: f64,
        im: f64,
    }

    #[test]
    fn dyn_eq_compares_same_types_only() {
        let a: Box<dyn Opaque> = Box::new(Complex { re: 1.0, im: 2.0 });
        let b: Box<dyn Opaque> = Box::new(Complex { re: 1.0, im: 2.0 });
        let c: Box<dyn Opaque> = Box::new(3u32);
        assert!(a.dyn_eq(b.as_ref()));
        assert!(!a.dyn_eq(c.as_ref()));
        assert_eq!(c.downcast_ref::<u32>(), Some(&3));
    }

    #[test]
    fn serde_fallback_round_trip() {
        let fallback = SerdeFallback::new().register::<Complex>("complex");
        let bytes = fallback.encode(&Complex { re: 0.5, im: -1.0 }).unwrap();
        let back = fallback.decode(&bytes).unwrap();
        assert_eq!(back.downcast_ref::<Complex>(), Some(&Complex { re: 0.5, im: -1.0 }));
    }

    #[test]
    fn serde_fallback_failures() {
        let fallback = SerdeFallback::new().register::<Complex>("complex");
        let err = fallback.encode(&7u64).unwrap_err();
        assert!(err.to_string().contains("u64"));

        let err = fallback.decode(br#"{"type":"quaternion","value":[1,2,3,4]}"#).unwrap_err();
        assert_eq!(err.to_string(), "unknown opaque tag `quaternion`");

        assert!(fallback.decode(b"\x80not json").is_err());
    }

    #[test]
    fn no_fallback_refuses() {
        assert!(NoFallback.encode(&1u8).is_err());
        assert!(NoFallback.decode(b"{}").is_err());
    }
}

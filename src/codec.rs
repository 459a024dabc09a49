use std::sync::Arc;

use serde_json::Value as Json;

use crate::config::Config;
use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::error::Result;
use crate::node::Node;
use crate::opaque::{FallbackCodec, NoFallback};
use crate::registry::TypeRegistry;
use crate::value::Value;

/// Entry point: a type registry, a fallback codec and settings.
///
/// Each `encode`/`decode` call runs with its own identity tracker, so a
/// `Codec` can be reused freely; ordinals never leak from one call into the
/// next.
#[derive(Clone)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
    fallback: Arc<dyn FallbackCodec>,
    config: Config,
}

impl Codec {
    pub fn new(registry: impl Into<Arc<TypeRegistry>>) -> Self {
        Codec {
            registry: registry.into(),
            fallback: Arc::new(NoFallback),
            config: Config::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl FallbackCodec + 'static) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &TypeRegistry { &self.registry }
    pub fn config(&self) -> &Config { &self.config }

    pub fn encode(&self, value: &Value) -> Result<Node> {
        Encoder::new(self.fallback.as_ref(), &self.config).encode(value)
    }

    pub fn decode(&self, node: &Node) -> Result<Value> {
        Decoder::new(&self.registry, self.fallback.as_ref(), &self.config).decode(node)
    }

    pub fn to_json(&self, value: &Value) -> Result<Json> {
        self.encode(value)?.to_json()
    }

    pub fn from_json(&self, json: &Json) -> Result<Value> {
        self.decode(&Node::from_json_bounded(json, self.config.max_depth)?)
    }

    /// JSON text, pretty-printed when `Config::pretty` is set.
    pub fn to_string(&self, value: &Value) -> Result<String> {
        let json = self.to_json(value)?;
        let text = if self.config.pretty {
            serde_json::to_string_pretty(&json)?
        } else {
            serde_json::to_string(&json)?
        };
        Ok(text)
    }

    /// Parse and decode JSON text, both bounded by `Config::max_depth`.
    pub fn from_str(&self, text: &str) -> Result<Value> {
        self.decode(&Node::from_str_bounded(text, self.config.max_depth)?)
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("types", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

use serde::Deserialize;

/// Codec settings.
///
/// Deserializable with every field optional, so it can be embedded in a
/// host application's own config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum container nesting accepted by encode, decode and text
    /// parsing. Every walk is recursive, so this bounds stack usage; the
    /// default fits the 2 MiB stack of a spawned thread. Raise it only on a
    /// thread with a larger stack.
    pub max_depth: usize,
    /// Reject structured objects that list a registered base their type
    /// does not declare, instead of logging a warning.
    pub strict_bases: bool,
    /// Pretty-print JSON text produced by `Codec::to_string`.
    pub pretty: bool,
}

pub const DEFAULT_MAX_DEPTH: usize = 64;

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: DEFAULT_MAX_DEPTH,
            strict_bases: false,
            pretty: false,
        }
    }
}

impl Config {
    pub fn new() -> Self { Self::default() }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn strict_bases(mut self, strict: bool) -> Self {
        self.strict_bases = strict;
        self
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"strict_bases": true}"#).unwrap();
        assert_eq!(config, Config::new().strict_bases(true));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config: Config = serde_json::from_str(r#"{"pretty": true, "colour": "blue"}"#).unwrap();
        assert!(config.pretty);
    }
}

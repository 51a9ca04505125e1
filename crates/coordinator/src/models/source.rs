use std::fmt;

use serde::{Deserialize, Serialize};

/// A logical external capability served by one or more redundant providers.
///
/// Every variant a caller uses must have a configuration block. Missing blocks
/// surface as [`crate::CoordinatorError::SourceNotConfigured`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// Blockchain JSON-RPC nodes.
    ChainRpc,
    /// Market-data / price feeds.
    PriceFeed,
    /// Block-explorer HTTP APIs.
    BlockExplorer,
}

impl Source {
    /// Every source, in declaration order.
    pub const ALL: [Source; 3] = [Source::ChainRpc, Source::PriceFeed, Source::BlockExplorer];

    /// Stable kebab-case name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainRpc => "chain-rpc",
            Self::PriceFeed => "price-feed",
            Self::BlockExplorer => "block-explorer",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority of a queued request.
///
/// All `High` requests of a source are dispatched before any `Normal` one;
/// order within a tier is FIFO.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_serializes_kebab_case() {
        let json = serde_json::to_string(&Source::ChainRpc).unwrap();
        assert_eq!(json, "\"chain-rpc\"");

        let parsed: Source = serde_json::from_str("\"block-explorer\"").unwrap();
        assert_eq!(parsed, Source::BlockExplorer);
    }

    #[test]
    fn test_source_display_matches_serialized_name() {
        for source in Source::ALL {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source));
        }
    }

    #[test]
    fn test_priority_defaults_to_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }
}

//! Explicit connection configuration.
//!
//! Nothing in the mapping layer reads the environment; URLs reach the registry through these
//! values, typically deserialized from a JSON document:
//!
//! ```ignore
//! let config = RegistryConfig::from_json(r#"{
//!     "graphs": {
//!         "blog": { "url": "mongodb://localhost:27017/blog" },
//!         "audit": { "url": "memory://audit" }
//!     }
//! }"#)?;
//! registry.connect_all(&config).await?;
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::OdmResult;

/// Connection settings of one graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    pub url: String,
}

impl GraphConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Connection settings of every graph, keyed by graph name.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub graphs: IndexMap<String, GraphConfig>,
}

impl RegistryConfig {
    pub fn from_json(json: &str) -> OdmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_graph(mut self, name: impl Into<String>, config: GraphConfig) -> Self {
        self.graphs.insert(name.into(), config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OdmError;

    #[test]
    fn parses_graphs_in_order() {
        let config = RegistryConfig::from_json(
            r#"{ "graphs": { "b": { "url": "memory://b" }, "a": { "url": "memory://a" } } }"#,
        )
        .unwrap();

        assert_eq!(config.graphs.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(config.graphs["a"], GraphConfig::new("memory://a"));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            RegistryConfig::from_json("{ graphs: "),
            Err(OdmError::Serialization(_))
        ));
    }
}

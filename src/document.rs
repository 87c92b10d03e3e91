// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Document
//!
//! The declarative description of a topology: exchanges, queues and the bindings
//! between them, plus an informational list of routing keys.
//!
//! ```yaml
//! exchanges:
//!   - name: ex1
//!     type: direct
//!     durable: true
//! routing_keys:
//!   - name: rk1
//! queues:
//!   - name: q1
//!     durable: true
//!     arguments:
//!       x-message-ttl: 60000
//! bindings:
//!   - exchange: ex1
//!     routing_key: rk1
//!     queue_name: q1
//! ```

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, error};

/// A routing key entry; informational only, never applied to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingKey {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TopologyDocument {
    #[serde(default)]
    pub exchanges: Vec<ExchangeDefinition>,
    #[serde(default)]
    pub routing_keys: Vec<RoutingKey>,
    #[serde(default)]
    pub queues: Vec<QueueDefinition>,
    #[serde(default)]
    pub bindings: Vec<QueueBinding>,
}

impl TopologyDocument {
    pub fn from_yaml_str(raw: &str) -> Result<TopologyDocument, AmqpError> {
        serde_yaml::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse the topology document");
            AmqpError::DocumentError(err.to_string())
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<TopologyDocument, AmqpError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading topology document");

        let raw = std::fs::read_to_string(path).map_err(|err| {
            error!(error = err.to_string(), "failure to read the topology document");
            AmqpError::DocumentError(format!("{}: {}", path.display(), err))
        })?;

        TopologyDocument::from_yaml_str(&raw)
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exchange::ExchangeKind, headers::HeaderValue};
    use std::io::Write;

    const DOCUMENT: &str = r#"
exchanges:
  - name: ex1
    type: direct
    durable: true
  - name: delayed
    type: x-delayed-message
    arguments:
      x-delayed-type: direct
routing_keys:
  - name: rk1
queues:
  - name: q1
    durable: true
    autoDelete: false
    arguments:
      x-message-ttl: 60000
bindings:
  - exchange: ex1
    routing_key: rk1
    queue_name: q1
"#;

    #[test]
    fn parses_every_section() {
        let doc = TopologyDocument::from_yaml_str(DOCUMENT).unwrap();

        assert_eq!(doc.exchanges.len(), 2);
        assert_eq!(doc.exchanges[0], ExchangeDefinition::new("ex1").direct().durable());
        assert_eq!(doc.exchanges[1].kind, ExchangeKind::XMessageDelayed);
        assert_eq!(
            doc.exchanges[1].arguments.get("x-delayed-type"),
            Some(&HeaderValue::String("direct".to_owned()))
        );

        assert_eq!(
            doc.routing_keys,
            vec![RoutingKey {
                name: "rk1".to_owned()
            }]
        );

        assert_eq!(doc.queues.len(), 1);
        assert!(doc.queues[0].is_durable());
        assert_eq!(
            doc.queues[0].arguments.get("x-message-ttl"),
            Some(&HeaderValue::Int(60000))
        );

        assert_eq!(
            doc.bindings,
            vec![QueueBinding::new("q1").exchange("ex1").routing_key("rk1")]
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let doc = TopologyDocument::from_yaml_str("queues:\n  - name: only\n").unwrap();

        assert!(doc.exchanges.is_empty());
        assert!(doc.bindings.is_empty());
        assert!(!doc.is_empty());
    }

    #[test]
    fn rejects_malformed_documents() {
        let err = TopologyDocument::from_yaml_str("exchanges: [{type: direct}]").unwrap_err();

        assert!(matches!(err, AmqpError::DocumentError(_)));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();

        let doc = TopologyDocument::from_path(file.path()).unwrap();
        assert_eq!(doc.queues[0].name(), "q1");

        let err = TopologyDocument::from_path(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(err, AmqpError::DocumentError(_)));
    }
}

//! Declarative topic catalog.
//!
//! # Purpose
//! Parses the topics document (topics with their project, desired
//! subscriptions, and canned message payloads) and derives the views the rest
//! of the service needs: the distinct project set and the payloads keyed by
//! `project/topic`.
//!
//! # Notes
//! Parsing does not validate cross-references. Duplicate topic keys are
//! allowed and simply contribute overlapping payload sets.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read topics config {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse topics config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub name: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    #[serde(rename = "project")]
    pub project_id: String,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub payloads: Vec<MessagePayload>,
}

impl TopicSpec {
    pub fn key(&self) -> String {
        topic_key(&self.project_id, &self.name)
    }
}

/// Key correlating runtime topics with configured payloads.
pub fn topic_key(project_id: &str, topic: &str) -> String {
    format!("{project_id}/{topic}")
}

pub type PayloadMap = HashMap<String, Vec<MessagePayload>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub topics: Vec<TopicSpec>,
}

impl Catalog {
    /// Decodes a YAML (or JSON) topics document.
    pub fn parse(source: &str) -> Result<Self, CatalogError> {
        // An empty document means no declarative provisioning.
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn project_ids(&self) -> BTreeSet<String> {
        self.topics
            .iter()
            .map(|topic| topic.project_id.clone())
            .collect()
    }

    pub fn payloads_by_topic_key(&self) -> PayloadMap {
        let mut payloads: PayloadMap = HashMap::new();
        for topic in &self.topics {
            payloads
                .entry(topic.key())
                .or_default()
                .extend(topic.payloads.iter().cloned());
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
topics:
  - name: orders
    project: p1
    subscriptions: [audit, billing]
    payloads:
      - name: created
        payload: '{"id": 1}'
  - name: users
    project: p2
  - name: orders
    project: p1
    payloads:
      - name: cancelled
        payload: '{"id": 2}'
"#;

    #[test]
    fn parse_reads_topics_and_defaults() {
        let catalog = Catalog::parse(SAMPLE).expect("parse");
        assert_eq!(catalog.topics.len(), 3);
        assert_eq!(catalog.topics[0].subscriptions, vec!["audit", "billing"]);
        assert!(catalog.topics[1].subscriptions.is_empty());
        assert!(catalog.topics[1].payloads.is_empty());
        assert_eq!(catalog.topics[0].key(), "p1/orders");
    }

    #[test]
    fn parse_accepts_json_documents() {
        let catalog = Catalog::parse(r#"{"topics": []}"#).expect("parse");
        assert!(catalog.is_empty());
        let catalog = Catalog::parse(
            r#"{"topics": [{"name": "t1", "project": "p1", "subscriptions": ["s1"]}]}"#,
        )
        .expect("parse");
        assert_eq!(catalog.topics[0].subscriptions, vec!["s1"]);
    }

    #[test]
    fn parse_empty_document_is_empty_catalog() {
        assert!(Catalog::parse("").expect("parse").is_empty());
        assert!(Catalog::parse("topics: []").expect("parse").is_empty());
    }

    #[test]
    fn parse_rejects_malformed_structure() {
        assert!(matches!(
            Catalog::parse("topics: [{name: t1}]"),
            Err(CatalogError::Parse(_))
        ));
        assert!(Catalog::parse("topics: nope").is_err());
    }

    #[test]
    fn project_ids_are_distinct_and_order_independent() {
        let catalog = Catalog::parse(SAMPLE).expect("parse");
        let ids: Vec<_> = catalog.project_ids().into_iter().collect();
        assert_eq!(ids, vec!["p1", "p2"]);

        let mut reversed = catalog.clone();
        reversed.topics.reverse();
        assert_eq!(reversed.project_ids(), catalog.project_ids());
    }

    #[test]
    fn payloads_concatenate_in_source_order() {
        let catalog = Catalog::parse(SAMPLE).expect("parse");
        let payloads = catalog.payloads_by_topic_key();
        let names: Vec<_> = payloads["p1/orders"]
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["created", "cancelled"]);
        assert!(payloads["p2/users"].is_empty());
        assert_eq!(payloads.len(), 2);
    }

    #[test]
    fn load_reports_missing_file_path() {
        let err = Catalog::load(Path::new("/definitely/not/here.yaml")).expect_err("missing");
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn load_reads_file_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("topics.yaml");
        std::fs::write(&path, SAMPLE).expect("write");
        let catalog = Catalog::load(&path).expect("load");
        assert_eq!(catalog.topics.len(), 3);
    }
}

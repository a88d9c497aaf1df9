//! Annotation and metric kind descriptors.
//!
//! Definitions are opaque to the scheduler beyond their id; their `spec`
//! payload belongs to whichever labeler defines the kind.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Identifier of an annotation or metric definition.
///
/// Backed by `Arc<str>` since every reported annotation and metric carries a copy.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(Arc<str>);

impl DefinitionId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The empty id is reserved for nil handles
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for DefinitionId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DefinitionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DefinitionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DefinitionId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl PartialEq<str> for DefinitionId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for DefinitionId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefinitionId({:?})", self.0)
    }
}

impl Serialize for DefinitionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DefinitionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

fn default_format() -> String {
    "json".to_string()
}

/// Kind of annotation a labeler produces (e.g. "bounding box", "semantic segmentation").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDefinition {
    /// Unique within a simulation
    pub id: DefinitionId,

    #[serde(default)]
    pub description: String,

    /// Output format of the annotation values
    #[serde(default = "default_format")]
    pub format: String,

    /// Format-specific specification (label tables, value ranges, ...)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
}

impl AnnotationDefinition {
    pub fn new(id: impl Into<DefinitionId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            format: default_format(),
            spec: Value::Null,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }
}

/// Kind of metric (e.g. "object count", "render time").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: DefinitionId,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
}

impl MetricDefinition {
    pub fn new(id: impl Into<DefinitionId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            spec: Value::Null,
        }
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }
}

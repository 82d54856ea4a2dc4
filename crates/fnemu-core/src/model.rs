use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, StructuredError};

/// Resource type reported in `ResourceInfo` error details.
pub const RESOURCE_TYPE: &str = "cloudfunction";

/// Fully-qualified function naming: `projects/{p}/locations/{r}/functions/{f}`.
pub struct FunctionName;

impl FunctionName {
    pub fn format(project_id: &str, region: &str, name: &str) -> String {
        format!(
            "{}/functions/{name}",
            Self::location(project_id, region)
        )
    }

    pub fn location(project_id: &str, region: &str) -> String {
        format!("projects/{project_id}/locations/{region}")
    }

    /// Last path segment of a fully-qualified name (or the name itself).
    pub fn short(name: &str) -> &str {
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// The event source that invokes a deployed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Http { url: Option<String> },
    Topic(String),
    Bucket(String),
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Http { .. } => "HTTP",
            Trigger::Topic(_) => "Topic",
            Trigger::Bucket(_) => "Bucket",
        }
    }

    /// The URL, topic, or bucket this trigger points at.
    pub fn target(&self) -> Option<&str> {
        match self {
            Trigger::Http { url } => url.as_deref(),
            Trigger::Topic(topic) => Some(topic),
            Trigger::Bucket(bucket) => Some(bucket),
        }
    }

    /// Resolve the mutually exclusive trigger flags of a deploy request.
    ///
    /// Exactly one of the three must be set.
    pub fn resolve(
        http: bool,
        topic: Option<&str>,
        bucket: Option<&str>,
    ) -> Result<Self, StructuredError> {
        let mut chosen = Vec::new();
        if let Some(bucket) = bucket {
            chosen.push(Trigger::Bucket(bucket.to_string()));
        }
        if let Some(topic) = topic {
            chosen.push(Trigger::Topic(topic.to_string()));
        }
        if http {
            chosen.push(Trigger::Http { url: None });
        }

        match chosen.len() {
            1 => Ok(chosen.remove(0)),
            0 => Err(StructuredError::invalid_argument(
                "You must specify a trigger type!",
            )
            .with_field_violation(
                "trigger",
                "one of trigger-http, trigger-topic or trigger-bucket is required",
            )),
            _ => Err(StructuredError::invalid_argument(
                "Only one trigger type may be specified!",
            )
            .with_field_violations(
                chosen
                    .iter()
                    .map(|t| FieldViolation::new("trigger", format!("{} trigger also set", t.label())))
                    .collect(),
            )),
        }
    }
}

/// A deployed (or about to be deployed) function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Fully-qualified name.
    pub name: String,
    pub trigger: Option<Trigger>,
    /// Location identifier of the packaged code (`gs://...` or a local path).
    pub source_archive_url: Option<String>,
    pub timeout: Option<Duration>,
    /// Absolute path of the local directory the code was packaged from.
    pub local_path: Option<PathBuf>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: None,
            source_archive_url: None,
            timeout: None,
            local_path: None,
        }
    }

    pub fn short_name(&self) -> &str {
        FunctionName::short(&self.name)
    }

    /// Check the invariants required before handing the descriptor to a
    /// transport's create operation.
    pub fn validate_for_create(&self) -> Result<(), StructuredError> {
        if self.trigger.is_none() {
            return Err(StructuredError::invalid_argument(format!(
                "Function {} has no trigger",
                self.short_name()
            ))
            .with_field_violation("trigger", "exactly one trigger must be set"));
        }
        if self.source_archive_url.as_deref().is_none_or(str::is_empty) {
            return Err(StructuredError::invalid_argument(format!(
                "Function {} has no source location",
                self.short_name()
            ))
            .with_field_violation("sourceArchiveUrl", "a source location is required"));
        }
        Ok(())
    }
}

/// Outcome of invoking a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub execution_id: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

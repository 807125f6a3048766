//! Detection payloads grouped by checkpoint

use serde::{Deserialize, Serialize};
use std::fmt;

/// Request facet inspected for malicious payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Checkpoint {
    /// Raw query string
    #[serde(alias = "Query")]
    Query,
    /// Request path
    #[serde(alias = "Path")]
    Path,
    /// Form, JSON or multipart body
    #[serde(alias = "Form")]
    Form,
    /// Uploaded file extensions
    #[serde(alias = "Upload")]
    Upload,
}

impl Checkpoint {
    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Path => "path",
            Self::Form => "form",
            Self::Upload => "upload",
        }
    }

    /// Checkpoint of the worker that evaluates payloads of this checkpoint.
    ///
    /// Upload payloads are evaluated by the form worker before it scans
    /// content.
    pub fn worker(&self) -> Checkpoint {
        match self {
            Self::Upload => Self::Form,
            other => *other,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadData {
    /// Optional identifier, reported in audit records
    #[serde(default)]
    pub id: Option<String>,

    /// Facet this payload applies to
    pub checkpoint: Checkpoint,

    /// Pattern handed to the pattern matcher
    pub pattern: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl PayloadData {
    /// Create a payload without id or description
    pub fn new(checkpoint: Checkpoint, pattern: impl Into<String>) -> Self {
        Self {
            id: None,
            checkpoint,
            pattern: pattern.into(),
            description: None,
        }
    }

    /// Builder: set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder: set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Read-only, process-wide payload set grouped by checkpoint.
///
/// Groups keep the order in which their checkpoint was first registered, and
/// payloads keep their declared order within a group.
#[derive(Debug, Clone, Default)]
pub struct PayloadCollection {
    groups: Vec<(Checkpoint, Vec<PayloadData>)>,
}

impl PayloadCollection {
    /// Group payloads by checkpoint
    pub fn new(payloads: impl IntoIterator<Item = PayloadData>) -> Self {
        let mut groups: Vec<(Checkpoint, Vec<PayloadData>)> = Vec::new();
        for payload in payloads {
            match groups.iter_mut().find(|(cp, _)| *cp == payload.checkpoint) {
                Some((_, group)) => group.push(payload),
                None => groups.push((payload.checkpoint, vec![payload])),
            }
        }
        Self { groups }
    }

    /// Payloads of one checkpoint, in declared order
    pub fn for_checkpoint(&self, checkpoint: Checkpoint) -> &[PayloadData] {
        self.groups
            .iter()
            .find(|(cp, _)| *cp == checkpoint)
            .map(|(_, group)| group.as_slice())
            .unwrap_or_default()
    }

    /// Checkpoints with at least one payload, in registration order
    pub fn checkpoints(&self) -> impl Iterator<Item = Checkpoint> + '_ {
        self.groups.iter().map(|(cp, _)| *cp)
    }

    /// Worker checkpoints to spawn, in registration order
    pub fn workers(&self) -> Vec<Checkpoint> {
        let mut workers = Vec::new();
        for worker in self.checkpoints().map(|cp| cp.worker()) {
            if !workers.contains(&worker) {
                workers.push(worker);
            }
        }
        workers
    }

    /// All payloads across groups
    pub fn iter(&self) -> impl Iterator<Item = &PayloadData> {
        self.groups.iter().flat_map(|(_, group)| group.iter())
    }

    /// Total payload count
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.len()).sum()
    }

    /// Whether no payloads are registered
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

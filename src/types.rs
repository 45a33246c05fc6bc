//! Shared data model for routing, caching, and evaluation.

use serde::{Deserialize, Serialize};

/// Stable identity of a tool: the hosting server, an optional toolset
/// grouping, and the tool name. Ingestion writes composite ids of the form
/// `server_toolset_name`; the toolset segment is empty for ungrouped tools.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub server: String,
    pub toolset: Option<String>,
    pub name: String,
}

impl ToolIdentity {
    pub fn new(server: impl Into<String>, toolset: Option<String>, name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            toolset,
            name: name.into(),
        }
    }

    /// Composite id, `server_toolset_name`.
    pub fn id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.server,
            self.toolset.as_deref().unwrap_or(""),
            self.name
        )
    }

    /// Parse a composite id back into its parts.
    ///
    /// Toolset names may themselves contain underscores, so the first
    /// segment is the server, the last is the tool name, and everything in
    /// between is the toolset.
    pub fn from_id(id: &str) -> Self {
        let parts: Vec<&str> = id.split('_').collect();
        if parts.len() < 3 {
            return Self {
                server: parts.first().unwrap_or(&"").to_string(),
                toolset: None,
                name: parts.last().unwrap_or(&"").to_string(),
            };
        }
        let toolset = parts[1..parts.len() - 1].join("_");
        Self {
            server: parts[0].to_string(),
            toolset: (!toolset.is_empty()).then_some(toolset),
            name: parts[parts.len() - 1].to_string(),
        }
    }

    /// `server.name`, the form ground-truth expected-tool lists use.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.name)
    }
}

/// Descriptive metadata carried alongside a hit. All fields come from
/// ingestion and pass through the router untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sample_questions: Vec<String>,
    #[serde(default)]
    pub endpoint: String,
}

/// One backend's opinion of one tool for one query. The score is on the
/// backend's own scale and is not comparable across sources until
/// normalized.
#[derive(Debug, Clone)]
pub struct CandidateHit {
    pub identity: ToolIdentity,
    pub score: f64,
    pub metadata: ToolMetadata,
}

impl CandidateHit {
    pub fn into_match(self, normalized_score: f64) -> ToolMatch {
        ToolMatch {
            id: self.identity.id(),
            server: self.identity.server,
            toolset: self.identity.toolset,
            name: self.identity.name,
            score: normalized_score,
            description: self.metadata.description,
            keywords: self.metadata.keywords,
            sample_questions: self.metadata.sample_questions,
            endpoint: self.metadata.endpoint,
        }
    }
}

/// A candidate hit after cross-source normalization, score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMatch {
    pub id: String,
    pub server: String,
    #[serde(default)]
    pub toolset: Option<String>,
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sample_questions: Vec<String>,
    #[serde(default)]
    pub endpoint: String,
}

impl ToolMatch {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.name)
    }
}

/// The router's output: a deduplicated, descending-score tool list bounded
/// by the configured return limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedToolList {
    pub query: String,
    pub tools: Vec<ToolMatch>,
    /// Wall-clock latency of producing this list, in milliseconds.
    pub execution_time_ms: f64,
}

impl RankedToolList {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tools: Vec::new(),
            execution_time_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_id_round_trip() {
        let identity = ToolIdentity::new("m365", Some("mail".to_string()), "send_message");
        let id = identity.id();
        assert_eq!(id, "m365_mail_send_message");

        let parsed = ToolIdentity::from_id(&id);
        assert_eq!(parsed.server, "m365");
        assert_eq!(parsed.toolset.as_deref(), Some("mail"));
        // Underscores in the tool name fold into the toolset segment on
        // parse; the original ingestion has the same ambiguity.
        assert_eq!(parsed.name, "message");
    }

    #[test]
    fn test_id_with_empty_toolset() {
        let identity = ToolIdentity::new("github", None, "search");
        assert_eq!(identity.id(), "github__search");

        let parsed = ToolIdentity::from_id("github__search");
        assert_eq!(parsed.server, "github");
        assert_eq!(parsed.toolset, None);
        assert_eq!(parsed.name, "search");
    }

    #[test]
    fn test_toolset_with_underscores() {
        let parsed = ToolIdentity::from_id("srv_tool_set_lookup");
        assert_eq!(parsed.server, "srv");
        assert_eq!(parsed.toolset.as_deref(), Some("tool_set"));
        assert_eq!(parsed.name, "lookup");
    }

    #[test]
    fn test_qualified_name() {
        let identity = ToolIdentity::new("jira", Some("issues".to_string()), "create_ticket");
        assert_eq!(identity.qualified_name(), "jira.create_ticket");
    }
}

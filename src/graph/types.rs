//! Node and edge vocabulary for the entity graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    User,
    Memory,
    Concept,
    Entity,
    Person,
    Organization,
    Location,
    Event,
    Skill,
}

impl NodeType {
    pub const ALL: [NodeType; 9] = [
        Self::User,
        Self::Memory,
        Self::Concept,
        Self::Entity,
        Self::Person,
        Self::Organization,
        Self::Location,
        Self::Event,
        Self::Skill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Memory => "Memory",
            Self::Concept => "Concept",
            Self::Entity => "Entity",
            Self::Person => "Person",
            Self::Organization => "Organization",
            Self::Location => "Location",
            Self::Event => "Event",
            Self::Skill => "Skill",
        }
    }

    /// Map an extractor's free-text type hint. People land on `Entity`;
    /// anything unrecognized does too.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_lowercase().as_str() {
            "user" => Self::User,
            "organization" => Self::Organization,
            "location" => Self::Location,
            "skill" => Self::Skill,
            "concept" => Self::Concept,
            _ => Self::Entity,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown node type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    HasMemory,
    Mentions,
    RelatedTo,
    Knows,
    About,
    WorksAt,
    LivesIn,
    HasSkill,
    StudiedAt,
    BelongsTo,
    Uses,
    Met,
    Attended,
    Visited,
    OccurredAt,
    OccurredOn,
    Hobby,
    Owns,
    LocatedIn,
    BornIn,
    Speaks,
    /// Free-form relation; the literal name lives in `relation_name`.
    Custom,
}

impl EdgeType {
    pub const ALL: [EdgeType; 22] = [
        Self::HasMemory,
        Self::Mentions,
        Self::RelatedTo,
        Self::Knows,
        Self::About,
        Self::WorksAt,
        Self::LivesIn,
        Self::HasSkill,
        Self::StudiedAt,
        Self::BelongsTo,
        Self::Uses,
        Self::Met,
        Self::Attended,
        Self::Visited,
        Self::OccurredAt,
        Self::OccurredOn,
        Self::Hobby,
        Self::Owns,
        Self::LocatedIn,
        Self::BornIn,
        Self::Speaks,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasMemory => "HAS_MEMORY",
            Self::Mentions => "MENTIONS",
            Self::RelatedTo => "RELATED_TO",
            Self::Knows => "KNOWS",
            Self::About => "ABOUT",
            Self::WorksAt => "WORKS_AT",
            Self::LivesIn => "LIVES_IN",
            Self::HasSkill => "HAS_SKILL",
            Self::StudiedAt => "STUDIED_AT",
            Self::BelongsTo => "BELONGS_TO",
            Self::Uses => "USES",
            Self::Met => "MET",
            Self::Attended => "ATTENDED",
            Self::Visited => "VISITED",
            Self::OccurredAt => "OCCURRED_AT",
            Self::OccurredOn => "OCCURRED_ON",
            Self::Hobby => "HOBBY",
            Self::Owns => "OWNS",
            Self::LocatedIn => "LOCATED_IN",
            Self::BornIn => "BORN_IN",
            Self::Speaks => "SPEAKS",
            Self::Custom => "CUSTOM",
        }
    }

    /// Map an extracted relation string (`works_at`, `Lives In`, ...) onto the
    /// fixed vocabulary, falling back to [`EdgeType::Custom`].
    pub fn from_relation(relation: &str) -> Self {
        let key = relation.trim().to_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|t| *t != Self::Custom && t.as_str() == key)
            .unwrap_or(Self::Custom)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown edge type: {s}"))
    }
}

/// Lower-cased, trimmed, spaces to underscores.
pub fn normalize_node_id(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Reference to a node by its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub node_type: NodeType,
    pub node_id: String,
}

impl NodeRef {
    pub fn new(node_type: NodeType, node_id: impl Into<String>) -> Self {
        Self {
            node_type,
            node_id: node_id.into(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node_type, self.node_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    /// `None` for shared nodes.
    pub user_id: Option<String>,
    pub node_type: NodeType,
    pub node_id: String,
    pub properties: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Temporal state of an edge. Superseded edges are kept for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EdgeValidity {
    Active { valid_from: String },
    Superseded { valid_from: String, valid_until: String },
}

impl EdgeValidity {
    pub fn from_columns(valid_from: String, valid_until: Option<String>) -> Self {
        match valid_until {
            None => Self::Active { valid_from },
            Some(valid_until) => Self::Superseded {
                valid_from,
                valid_until,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn valid_until(&self) -> Option<&str> {
        match self {
            Self::Active { .. } => None,
            Self::Superseded { valid_until, .. } => Some(valid_until),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub user_id: Option<String>,
    pub source: NodeRef,
    pub edge_type: EdgeType,
    /// Literal relation for [`EdgeType::Custom`]; empty otherwise.
    pub relation_name: String,
    pub target: NodeRef,
    /// Carries `content` and `confidence` for extracted edges.
    pub properties: Value,
    pub validity: EdgeValidity,
    pub created_at: String,
}

impl GraphEdge {
    /// Relation as shown to readers: the custom name or the lower-cased type.
    pub fn relation_label(&self) -> String {
        if self.edge_type == EdgeType::Custom && !self.relation_name.is_empty() {
            self.relation_name.clone()
        } else {
            self.edge_type.as_str().to_lowercase()
        }
    }

    pub fn confidence(&self) -> f64 {
        self.properties
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
    }
}

/// A (subject, relation, object) assertion as produced by extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Triple {
    pub subject: String,
    pub subject_type: String,
    pub relation: String,
    pub object: String,
    pub object_type: String,
    pub content: String,
    pub confidence: Option<f64>,
}

/// An active edge rendered for recall.
#[derive(Debug, Clone, Serialize)]
pub struct EntityFact {
    pub subject: String,
    pub subject_type: NodeType,
    pub relation: String,
    pub object: String,
    pub object_type: NodeType,
    /// `"subject → relation: object"`.
    pub content: String,
    pub confidence: f64,
    pub valid_from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_lookup_falls_back_to_custom() {
        assert_eq!(EdgeType::from_relation("works_at"), EdgeType::WorksAt);
        assert_eq!(EdgeType::from_relation("Lives In"), EdgeType::LivesIn);
        assert_eq!(EdgeType::from_relation("custom"), EdgeType::Custom);
        assert_eq!(EdgeType::from_relation("is_allergic_to"), EdgeType::Custom);
    }

    #[test]
    fn type_hints_default_to_entity() {
        assert_eq!(NodeType::from_hint("Organization"), NodeType::Organization);
        assert_eq!(NodeType::from_hint("person"), NodeType::Entity);
        assert_eq!(NodeType::from_hint("spaceship"), NodeType::Entity);
    }

    #[test]
    fn node_ids_normalize() {
        assert_eq!(normalize_node_id("  New York "), "new_york");
        assert_eq!(normalize_node_id("Google"), "google");
    }

    #[test]
    fn validity_maps_columns() {
        assert!(EdgeValidity::from_columns("t0".into(), None).is_active());
        let old = EdgeValidity::from_columns("t0".into(), Some("t1".into()));
        assert_eq!(old.valid_until(), Some("t1"));
    }
}

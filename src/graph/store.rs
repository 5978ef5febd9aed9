//! SQLite-backed entity graph: triple ingestion with temporal conflict
//! resolution, entity fact lookup, and plain node/edge CRUD.
//!
//! Node scope is compared with `user_id IS ?`, so `None` addresses the shared
//! (owner-less) nodes and never matches an owner's private ones.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

use super::types::{
    normalize_node_id, Direction, EdgeType, EdgeValidity, EntityFact, GraphEdge, GraphNode, NodeRef,
    NodeType, Triple,
};
use crate::error::{MemoryError, Result};
use crate::memory::now_timestamp;

const EDGE_COLUMNS: &str = "id, user_id, source_type, source_id, edge_type, relation_name, \
     target_type, target_id, properties, valid_from, valid_until, created_at";

const NODE_COLUMNS: &str = "id, user_id, node_type, node_id, properties, created_at, updated_at";

/// Deepest search [`find_path`] accepts.
pub const MAX_PATH_DEPTH: u32 = 10;

/// What to do with a new triple given the currently active edges for its
/// (subject, relation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Nothing active yet.
    Add,
    /// The same object is already asserted.
    Noop,
    /// A different object is active; supersede it.
    Update,
}

/// Decide between add, no-op and supersede. Object identity is exact
/// (type, normalized id) equality.
pub fn resolve_conflict(active: &[GraphEdge], object: &NodeRef) -> ConflictAction {
    let live: Vec<&GraphEdge> = active.iter().filter(|e| e.validity.is_active()).collect();
    if live.is_empty() {
        ConflictAction::Add
    } else if live.iter().any(|e| &e.target == object) {
        ConflictAction::Noop
    } else {
        ConflictAction::Update
    }
}

/// Outcome of [`store_triples`].
#[derive(Debug, Default, Clone)]
pub struct StoredTriples {
    /// Triples that added or superseded an edge (no-ops excluded).
    pub applied: usize,
    /// The edges inserted, in input order.
    pub edges: Vec<GraphEdge>,
    /// Edges closed by a newer fact, carrying their `valid_until`.
    pub superseded: Vec<GraphEdge>,
}

impl StoredTriples {
    /// Every edge whose state changed: closed edges first, then new ones.
    pub fn changed_edges(&self) -> Vec<GraphEdge> {
        self.superseded.iter().chain(&self.edges).cloned().collect()
    }
}

fn parse_col<T: std::str::FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| json!({})))
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        node_type: parse_col(row, 2)?,
        node_id: row.get(3)?,
        properties: json_col(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
    Ok(GraphEdge {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source: NodeRef::new(parse_col(row, 2)?, row.get::<_, String>(3)?),
        edge_type: parse_col(row, 4)?,
        relation_name: row.get(5)?,
        target: NodeRef::new(parse_col(row, 6)?, row.get::<_, String>(7)?),
        properties: json_col(row, 8)?,
        validity: EdgeValidity::from_columns(row.get(9)?, row.get(10)?),
        created_at: row.get(11)?,
    })
}

fn merge_properties(base: &mut Value, patch: &Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base), Some(patch)) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}

// ── Triples ───────────────────────────────────────────────────────────────────

/// Get-or-create a node. Existing nodes are left untouched.
fn ensure_node(conn: &Connection, owner: Option<&str>, node: &NodeRef, name: &str) -> Result<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO graph_nodes (id, user_id, node_type, node_id, properties, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            uuid::Uuid::now_v7().to_string(),
            owner,
            node.node_type.as_str(),
            node.node_id,
            json!({"name": name}).to_string(),
            now,
        ],
    )?;
    Ok(())
}

/// Active edges sharing the conflict key (owner, source, edge_type, relation_name).
fn active_edges(
    conn: &Connection,
    owner: &str,
    source: &NodeRef,
    edge_type: EdgeType,
    relation_name: &str,
) -> Result<Vec<GraphEdge>> {
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM graph_edges \
         WHERE user_id = ?1 AND source_type = ?2 AND source_id = ?3 AND edge_type = ?4 \
         AND relation_name = ?5 AND valid_until IS NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let edges = stmt
        .query_map(
            params![owner, source.node_type.as_str(), source.node_id, edge_type.as_str(), relation_name],
            row_to_edge,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

fn insert_edge(
    conn: &Connection,
    owner: Option<&str>,
    source: &NodeRef,
    edge_type: EdgeType,
    relation_name: &str,
    target: &NodeRef,
    properties: Value,
) -> Result<GraphEdge> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO graph_edges (id, user_id, source_type, source_id, edge_type, relation_name, \
         target_type, target_id, properties, valid_from, valid_until, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?10)",
        params![
            id,
            owner,
            source.node_type.as_str(),
            source.node_id,
            edge_type.as_str(),
            relation_name,
            target.node_type.as_str(),
            target.node_id,
            properties.to_string(),
            now,
        ],
    )?;
    Ok(GraphEdge {
        id,
        user_id: owner.map(str::to_string),
        source: source.clone(),
        edge_type,
        relation_name: relation_name.to_string(),
        target: target.clone(),
        properties,
        validity: EdgeValidity::Active {
            valid_from: now.clone(),
        },
        created_at: now,
    })
}

/// Ingest extracted triples for one owner.
///
/// Triples with an empty subject, relation or object are skipped. A `user`
/// subject resolves to the owner's own node. Any database failure aborts the
/// whole call; run it inside a transaction to keep the batch atomic.
pub fn store_triples(conn: &Connection, owner: &str, triples: &[Triple]) -> Result<StoredTriples> {
    let mut stored = StoredTriples::default();

    for triple in triples {
        let subject = triple.subject.trim();
        let object = triple.object.trim();
        let relation = triple.relation.trim();
        if subject.is_empty() || object.is_empty() || relation.is_empty() {
            tracing::debug!(?triple, "skipping incomplete triple");
            continue;
        }

        let subject_type = NodeType::from_hint(&triple.subject_type);
        let source = match subject_type {
            NodeType::User => NodeRef::new(NodeType::User, owner),
            t => NodeRef::new(t, normalize_node_id(subject)),
        };
        let target = NodeRef::new(NodeType::from_hint(&triple.object_type), normalize_node_id(object));
        let edge_type = EdgeType::from_relation(relation);
        let relation_name = if edge_type == EdgeType::Custom { relation } else { "" };

        ensure_node(conn, Some(owner), &source, subject)?;
        ensure_node(conn, Some(owner), &target, object)?;

        let active = active_edges(conn, owner, &source, edge_type, relation_name)?;
        match resolve_conflict(&active, &target) {
            ConflictAction::Noop => continue,
            ConflictAction::Update => {
                let now = now_timestamp();
                let ids: Vec<&str> = active.iter().map(|e| e.id.as_str()).collect();
                let placeholders = vec!["?"; ids.len()].join(", ");
                conn.execute(
                    &format!("UPDATE graph_edges SET valid_until = ? WHERE id IN ({placeholders})"),
                    params_from_iter(std::iter::once(now.as_str()).chain(ids.iter().copied())),
                )?;
                tracing::debug!(owner = %owner, source = %source, relation = %edge_type, superseded = ids.len(), "edge superseded");
                stored.superseded.extend(active.into_iter().filter(|e| e.validity.is_active()).map(|mut e| {
                    let valid_from = match e.validity {
                        EdgeValidity::Active { valid_from } | EdgeValidity::Superseded { valid_from, .. } => valid_from,
                    };
                    e.validity = EdgeValidity::Superseded {
                        valid_from,
                        valid_until: now.clone(),
                    };
                    e
                }));
            }
            ConflictAction::Add => {}
        }

        let properties = json!({
            "content": triple.content,
            "confidence": triple.confidence.unwrap_or(1.0),
        });
        let edge = insert_edge(conn, Some(owner), &source, edge_type, relation_name, &target, properties)?;
        stored.edges.push(edge);
        stored.applied += 1;
    }

    Ok(stored)
}

/// Active facts touching an entity, in either direction.
///
/// The name matches a node id either normalized or verbatim, so an owner id
/// finds the owner's own `User` node.
pub fn find_entity_facts(
    conn: &Connection,
    owner: &str,
    entity_name: &str,
    limit: usize,
) -> Result<Vec<EntityFact>> {
    let raw = entity_name.trim();
    if raw.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let normalized = normalize_node_id(raw);

    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM graph_edges \
         WHERE user_id = ?1 AND valid_until IS NULL \
         AND (source_id IN (?2, ?3) OR target_id IN (?2, ?3)) \
         ORDER BY created_at DESC, id DESC LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let edges = stmt
        .query_map(params![owner, normalized, raw, limit as i64], row_to_edge)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(edges.into_iter().map(edge_to_fact).collect())
}

fn edge_to_fact(edge: GraphEdge) -> EntityFact {
    let relation = edge.relation_label();
    let valid_from = match &edge.validity {
        EdgeValidity::Active { valid_from } | EdgeValidity::Superseded { valid_from, .. } => {
            valid_from.clone()
        }
    };
    EntityFact {
        content: format!("{} → {}: {}", edge.source.node_id, relation, edge.target.node_id),
        confidence: edge.confidence(),
        subject: edge.source.node_id,
        subject_type: edge.source.node_type,
        relation,
        object: edge.target.node_id,
        object_type: edge.target.node_type,
        valid_from,
    }
}

/// Every edge between `source` and the edge type, active or not, oldest first.
pub fn edge_history(
    conn: &Connection,
    owner: &str,
    source: &NodeRef,
    edge_type: EdgeType,
) -> Result<Vec<GraphEdge>> {
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM graph_edges \
         WHERE user_id = ?1 AND source_type = ?2 AND source_id = ?3 AND edge_type = ?4 \
         ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let edges = stmt
        .query_map(
            params![owner, source.node_type.as_str(), source.node_id, edge_type.as_str()],
            row_to_edge,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

// ── Node CRUD ─────────────────────────────────────────────────────────────────

pub fn get_node(conn: &Connection, owner: Option<&str>, node: &NodeRef) -> Result<Option<GraphNode>> {
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE user_id IS ?1 AND node_type = ?2 AND node_id = ?3"
    );
    Ok(conn
        .query_row(&sql, params![owner, node.node_type.as_str(), node.node_id], row_to_node)
        .optional()?)
}

/// Create a node; an existing (owner, type, id) is a validation error.
pub fn create_node(
    conn: &Connection,
    owner: Option<&str>,
    node: &NodeRef,
    properties: Value,
) -> Result<GraphNode> {
    if node.node_id.trim().is_empty() {
        return Err(MemoryError::validation("node id must not be empty"));
    }
    if get_node(conn, owner, node)?.is_some() {
        return Err(MemoryError::validation(format!("node {node} already exists")));
    }
    let now = now_timestamp();
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO graph_nodes (id, user_id, node_type, node_id, properties, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, owner, node.node_type.as_str(), node.node_id, properties.to_string(), now],
    )?;
    Ok(GraphNode {
        id,
        user_id: owner.map(str::to_string),
        node_type: node.node_type,
        node_id: node.node_id.clone(),
        properties,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Merge `properties` into an existing node.
pub fn update_node(
    conn: &Connection,
    owner: Option<&str>,
    node: &NodeRef,
    properties: &Value,
) -> Result<GraphNode> {
    let mut current =
        get_node(conn, owner, node)?.ok_or_else(|| MemoryError::not_found("graph node", node.to_string()))?;
    merge_properties(&mut current.properties, properties);
    current.updated_at = now_timestamp();
    conn.execute(
        "UPDATE graph_nodes SET properties = ?1, updated_at = ?2 WHERE id = ?3",
        params![current.properties.to_string(), current.updated_at, current.id],
    )?;
    Ok(current)
}

/// Delete a node and every edge touching it. Returns the number of edges removed.
pub fn delete_node(conn: &Connection, owner: Option<&str>, node: &NodeRef) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM graph_nodes WHERE user_id IS ?1 AND node_type = ?2 AND node_id = ?3",
        params![owner, node.node_type.as_str(), node.node_id],
    )?;
    if removed == 0 {
        return Err(MemoryError::not_found("graph node", node.to_string()));
    }
    let edges = conn.execute(
        "DELETE FROM graph_edges WHERE user_id IS ?1 \
         AND ((source_type = ?2 AND source_id = ?3) OR (target_type = ?2 AND target_id = ?3))",
        params![owner, node.node_type.as_str(), node.node_id],
    )?;
    Ok(edges)
}

// ── Edge CRUD ─────────────────────────────────────────────────────────────────

/// Create an active edge between two existing nodes.
///
/// For [`EdgeType::Custom`], `properties.relation_name` names the relation.
pub fn create_edge(
    conn: &Connection,
    owner: Option<&str>,
    source: &NodeRef,
    edge_type: EdgeType,
    target: &NodeRef,
    properties: Value,
) -> Result<GraphEdge> {
    for node in [source, target] {
        if get_node(conn, owner, node)?.is_none() {
            return Err(MemoryError::validation(format!("node {node} not found")));
        }
    }
    let relation_name = match edge_type {
        EdgeType::Custom => properties
            .get("relation_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    insert_edge(conn, owner, source, edge_type, &relation_name, target, properties)
}

/// Delete every edge of `edge_type` from `source` to `target`. Returns how many.
pub fn delete_edge(
    conn: &Connection,
    owner: Option<&str>,
    source: &NodeRef,
    edge_type: EdgeType,
    target: &NodeRef,
) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM graph_edges WHERE user_id IS ?1 AND source_type = ?2 AND source_id = ?3 \
         AND edge_type = ?4 AND target_type = ?5 AND target_id = ?6",
        params![
            owner,
            source.node_type.as_str(),
            source.node_id,
            edge_type.as_str(),
            target.node_type.as_str(),
            target.node_id
        ],
    )?;
    if removed == 0 {
        return Err(MemoryError::not_found(
            "graph edge",
            format!("{source}-[{edge_type}]->{target}"),
        ));
    }
    Ok(removed)
}

/// An adjacent node and the edge that reaches it.
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub node: NodeRef,
    pub edge: GraphEdge,
}

/// Nodes one active edge away from `node`.
pub fn get_neighbors(
    conn: &Connection,
    owner: Option<&str>,
    node: &NodeRef,
    direction: Direction,
    edge_types: &[EdgeType],
    limit: usize,
) -> Result<Vec<Neighbor>> {
    let neighbors = adjacent(conn, owner, node, direction)?
        .into_iter()
        .filter(|n| edge_types.is_empty() || edge_types.contains(&n.edge.edge_type))
        .take(limit)
        .collect();
    Ok(neighbors)
}

fn adjacent(
    conn: &Connection,
    owner: Option<&str>,
    node: &NodeRef,
    direction: Direction,
) -> Result<Vec<Neighbor>> {
    let side = match direction {
        Direction::Outgoing => "(source_type = ?2 AND source_id = ?3)",
        Direction::Incoming => "(target_type = ?2 AND target_id = ?3)",
        Direction::Both => {
            "((source_type = ?2 AND source_id = ?3) OR (target_type = ?2 AND target_id = ?3))"
        }
    };
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM graph_edges \
         WHERE user_id IS ?1 AND valid_until IS NULL AND {side} ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let edges = stmt
        .query_map(params![owner, node.node_type.as_str(), node.node_id], row_to_edge)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(edges
        .into_iter()
        .map(|edge| {
            let other = if &edge.source == node {
                edge.target.clone()
            } else {
                edge.source.clone()
            };
            Neighbor { node: other, edge }
        })
        .collect())
}

/// A shortest undirected path over active edges.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<NodeRef>,
    pub edges: Vec<GraphEdge>,
}

/// Breadth-first shortest path of at most `max_depth` hops.
pub fn find_path(
    conn: &Connection,
    owner: Option<&str>,
    source: &NodeRef,
    target: &NodeRef,
    max_depth: u32,
) -> Result<Option<GraphPath>> {
    if !(1..=MAX_PATH_DEPTH).contains(&max_depth) {
        return Err(MemoryError::validation(format!(
            "max_depth must be between 1 and {MAX_PATH_DEPTH}, got {max_depth}"
        )));
    }
    if source == target {
        return Ok(Some(GraphPath {
            nodes: vec![source.clone()],
            edges: Vec::new(),
        }));
    }

    let mut parents: HashMap<NodeRef, (NodeRef, GraphEdge)> = HashMap::new();
    let mut seen: HashSet<NodeRef> = HashSet::from([source.clone()]);
    let mut queue = VecDeque::from([(source.clone(), 0u32)]);

    while let Some((current, depth)) = queue.pop_front() {
        if depth == max_depth {
            continue;
        }
        for Neighbor { node, edge } in adjacent(conn, owner, &current, Direction::Both)? {
            if !seen.insert(node.clone()) {
                continue;
            }
            parents.insert(node.clone(), (current.clone(), edge));
            if &node == target {
                return Ok(Some(unwind(parents, source, target)));
            }
            queue.push_back((node, depth + 1));
        }
    }
    Ok(None)
}

fn unwind(mut parents: HashMap<NodeRef, (NodeRef, GraphEdge)>, source: &NodeRef, target: &NodeRef) -> GraphPath {
    let mut nodes = vec![target.clone()];
    let mut edges = Vec::new();
    let mut cursor = target.clone();
    while &cursor != source {
        let Some((prev, edge)) = parents.remove(&cursor) else {
            break;
        };
        edges.push(edge);
        nodes.push(prev.clone());
        cursor = prev;
    }
    nodes.reverse();
    edges.reverse();
    GraphPath { nodes, edges }
}

/// Node and edge counts for one owner: `(nodes, edges, active_edges)`.
pub fn graph_counts(conn: &Connection, owner: &str) -> Result<(i64, i64, i64)> {
    let nodes = conn.query_row(
        "SELECT COUNT(*) FROM graph_nodes WHERE user_id = ?1",
        params![owner],
        |r| r.get(0),
    )?;
    let (edges, active) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(valid_until IS NULL), 0) FROM graph_edges WHERE user_id = ?1",
        params![owner],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok((nodes, edges, active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_conn;

    fn triple(subject_type: &str, subject: &str, relation: &str, object_type: &str, object: &str) -> Triple {
        Triple {
            subject: subject.into(),
            subject_type: subject_type.into(),
            relation: relation.into(),
            object: object.into(),
            object_type: object_type.into(),
            content: format!("{subject} {relation} {object}"),
            confidence: Some(0.9),
        }
    }

    fn works_at(company: &str) -> Triple {
        triple("user", "I", "works_at", "organization", company)
    }

    #[test]
    fn new_employer_supersedes_old() {
        let conn = test_conn();
        assert_eq!(store_triples(&conn, "alice", &[works_at("Google")]).unwrap().applied, 1);
        assert_eq!(store_triples(&conn, "alice", &[works_at("Meta")]).unwrap().applied, 1);

        let me = NodeRef::new(NodeType::User, "alice");
        let history = edge_history(&conn, "alice", &me, EdgeType::WorksAt).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].target.node_id, "google");
        assert!(history[0].validity.valid_until().is_some());
        assert_eq!(history[1].target.node_id, "meta");
        assert!(history[1].validity.is_active());

        let facts = find_entity_facts(&conn, "alice", "alice", 10).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, "meta");
        assert_eq!(facts[0].content, "alice → works_at: meta");
        assert!((facts[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn supersession_reports_closed_edges() {
        let conn = test_conn();
        let first = store_triples(&conn, "alice", &[works_at("Google")]).unwrap();
        assert!(first.superseded.is_empty());

        let second = store_triples(&conn, "alice", &[works_at("Meta")]).unwrap();
        assert_eq!(second.superseded.len(), 1);
        assert_eq!(second.superseded[0].id, first.edges[0].id);
        assert!(second.superseded[0].validity.valid_until().is_some());

        let changed = second.changed_edges();
        assert_eq!(changed.len(), 2);
        assert!(!changed[0].validity.is_active());
        assert_eq!(changed[1].target.node_id, "meta");
        assert!(changed[1].validity.is_active());
    }

    #[test]
    fn repeated_triple_is_noop() {
        let conn = test_conn();
        store_triples(&conn, "alice", &[works_at("Google")]).unwrap();
        let second = store_triples(&conn, "alice", &[works_at("google")]).unwrap();
        assert_eq!(second.applied, 0);
        assert!(second.edges.is_empty());
        assert!(second.superseded.is_empty());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn incomplete_triples_are_skipped() {
        let conn = test_conn();
        let stored = store_triples(
            &conn,
            "alice",
            &[triple("user", "I", "", "entity", "x"), triple("user", " ", "knows", "entity", "bob")],
        )
        .unwrap();
        assert_eq!(stored.applied, 0);
    }

    #[test]
    fn custom_relations_keep_their_name() {
        let conn = test_conn();
        let stored = store_triples(
            &conn,
            "alice",
            &[
                triple("user", "I", "allergic_to", "entity", "peanuts"),
                triple("user", "I", "afraid_of", "entity", "spiders"),
            ],
        )
        .unwrap();
        assert_eq!(stored.applied, 2);
        assert_eq!(stored.edges[0].edge_type, EdgeType::Custom);
        assert_eq!(stored.edges[0].relation_name, "allergic_to");

        let facts = find_entity_facts(&conn, "alice", "alice", 10).unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().any(|f| f.content == "alice → allergic_to: peanuts"));
    }

    #[test]
    fn facts_are_found_from_either_end() {
        let conn = test_conn();
        store_triples(&conn, "alice", &[works_at("Google")]).unwrap();
        let facts = find_entity_facts(&conn, "alice", "Google", 10).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].subject, "alice");
        assert!(find_entity_facts(&conn, "bob", "Google", 10).unwrap().is_empty());
    }

    #[test]
    fn conflict_resolution_is_pure() {
        let edge = |target: &str, until: Option<&str>| GraphEdge {
            id: target.into(),
            user_id: None,
            source: NodeRef::new(NodeType::User, "u"),
            edge_type: EdgeType::LivesIn,
            relation_name: String::new(),
            target: NodeRef::new(NodeType::Location, target),
            properties: json!({}),
            validity: EdgeValidity::from_columns("t0".into(), until.map(str::to_string)),
            created_at: "t0".into(),
        };
        let paris = NodeRef::new(NodeType::Location, "paris");
        assert_eq!(resolve_conflict(&[], &paris), ConflictAction::Add);
        assert_eq!(resolve_conflict(&[edge("paris", None)], &paris), ConflictAction::Noop);
        assert_eq!(resolve_conflict(&[edge("rome", None)], &paris), ConflictAction::Update);
        assert_eq!(resolve_conflict(&[edge("rome", Some("t1"))], &paris), ConflictAction::Add);
    }

    #[test]
    fn node_crud_round() {
        let conn = test_conn();
        let google = NodeRef::new(NodeType::Organization, "google");
        create_node(&conn, Some("alice"), &google, json!({"name": "Google"})).unwrap();

        let dup = create_node(&conn, Some("alice"), &google, json!({})).unwrap_err();
        assert!(dup.to_string().contains("Organization:google already exists"));
        // Shared scope is separate from the owner's.
        create_node(&conn, None, &google, json!({})).unwrap();

        let updated = update_node(&conn, Some("alice"), &google, &json!({"hq": "MTV"})).unwrap();
        assert_eq!(updated.properties["name"], "Google");
        assert_eq!(updated.properties["hq"], "MTV");

        let missing = NodeRef::new(NodeType::Organization, "nope");
        assert!(matches!(
            update_node(&conn, Some("alice"), &missing, &json!({})),
            Err(MemoryError::NotFound { .. })
        ));
    }

    #[test]
    fn edges_need_both_nodes_and_cascade_on_delete() {
        let conn = test_conn();
        let alice = NodeRef::new(NodeType::User, "alice");
        let rust = NodeRef::new(NodeType::Skill, "rust");
        create_node(&conn, Some("alice"), &alice, json!({})).unwrap();

        let err = create_edge(&conn, Some("alice"), &alice, EdgeType::HasSkill, &rust, json!({})).unwrap_err();
        assert!(err.to_string().contains("Skill:rust not found"));

        create_node(&conn, Some("alice"), &rust, json!({})).unwrap();
        create_edge(&conn, Some("alice"), &alice, EdgeType::HasSkill, &rust, json!({})).unwrap();

        let neighbors = get_neighbors(&conn, Some("alice"), &rust, Direction::Incoming, &[], 10).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].node, alice);

        assert_eq!(delete_node(&conn, Some("alice"), &rust).unwrap(), 1);
        assert!(get_neighbors(&conn, Some("alice"), &alice, Direction::Both, &[], 10)
            .unwrap()
            .is_empty());
        assert!(matches!(
            delete_edge(&conn, Some("alice"), &alice, EdgeType::HasSkill, &rust),
            Err(MemoryError::NotFound { kind: "graph edge", .. })
        ));
    }

    #[test]
    fn shortest_path_is_breadth_first() {
        let conn = test_conn();
        store_triples(
            &conn,
            "alice",
            &[
                works_at("Google"),
                triple("organization", "Google", "located_in", "location", "Mountain View"),
                triple("entity", "Bob", "lives_in", "location", "Mountain View"),
            ],
        )
        .unwrap();

        let alice = NodeRef::new(NodeType::User, "alice");
        let bob = NodeRef::new(NodeType::Entity, "bob");
        let path = find_path(&conn, Some("alice"), &alice, &bob, 5).unwrap().unwrap();
        assert_eq!(path.nodes.len(), 4);
        assert_eq!(path.edges.len(), 3);
        assert_eq!(path.nodes[1].node_id, "google");

        assert!(find_path(&conn, Some("alice"), &alice, &bob, 2).unwrap().is_none());
        assert!(matches!(
            find_path(&conn, Some("alice"), &alice, &bob, 0),
            Err(MemoryError::Validation(_))
        ));
        assert!(find_path(&conn, Some("alice"), &alice, &bob, 11).is_err());
    }

    #[test]
    fn counts_track_active_edges() {
        let conn = test_conn();
        store_triples(&conn, "alice", &[works_at("Google"), works_at("Meta")]).unwrap();
        assert_eq!(graph_counts(&conn, "alice").unwrap(), (3, 2, 1));
    }
}

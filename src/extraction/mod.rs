//! LLM-driven extraction of memories from conversation turns.
//!
//! One batch of turns goes through one classification call. Embeddings are
//! computed before the database is entered; every write of the batch
//! (preferences, profile, facts, episodes, triples and the `extracted` flags)
//! then commits in a single transaction or not at all. A failed or malformed
//! generation writes nothing and leaves the turns unextracted.

pub mod prompt;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::db::Database;
use crate::embedding::{check_dims, EmbeddingProvider};
use crate::error::Result;
use crate::graph::mirror::mirror_after_commit;
use crate::graph::store::store_triples;
use crate::graph::{GraphEdge, GraphMirror, Triple};
use crate::llm::{ChatMessage, LlmProvider};
use crate::memory::conversation::{mark_extracted, pending_ids, ConversationTurn};
use crate::memory::kv::{self, PREFERENCES_NAMESPACE, PROFILE_NAMESPACE};
use crate::memory::store::{insert_memory, NewMemory};
use crate::memory::temporal::TemporalExtractor;
use crate::memory::types::MemoryType;
use crate::memory::{format_timestamp, parse_timestamp};
use prompt::{Classification, Emotion, ExtractedEpisode, ExtractedFact};

/// Profile keys whose latest value wins.
const PROFILE_OVERWRITE_KEYS: [&str; 2] = ["identity", "occupation"];
/// Profile keys that accumulate, deduplicated case-insensitively.
const PROFILE_APPEND_KEYS: [&str; 5] = ["interests", "values", "relationships", "personality", "preferences"];
/// Above this share of one script, a detected language replaces the stored one.
const LANGUAGE_SWITCH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    pub preferences_extracted: usize,
    pub facts_extracted: usize,
    pub episodes_extracted: usize,
    pub triples_extracted: usize,
    pub profile_fields_updated: usize,
    pub messages_processed: usize,
}

impl ExtractionStats {
    pub fn absorb(&mut self, other: &ExtractionStats) {
        self.preferences_extracted += other.preferences_extracted;
        self.facts_extracted += other.facts_extracted;
        self.episodes_extracted += other.episodes_extracted;
        self.triples_extracted += other.triples_extracted;
        self.profile_fields_updated += other.profile_fields_updated;
        self.messages_processed += other.messages_processed;
    }
}

/// Knobs for the classification call.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub graph_enabled: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            graph_enabled: true,
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

/// A memory ready to insert, vector included.
#[derive(Debug, Clone)]
pub struct PreparedMemory {
    pub memory: NewMemory,
    pub embedding: Vec<f32>,
}

/// Everything one batch will write.
#[derive(Debug, Clone, Default)]
pub struct ExtractionPlan {
    pub task_id: String,
    pub turn_ids: Vec<String>,
    pub language: Option<String>,
    pub preferences: Vec<(String, Value)>,
    pub profile_updates: Map<String, Value>,
    pub facts: Vec<PreparedMemory>,
    pub episodes: Vec<PreparedMemory>,
    pub triples: Vec<Triple>,
}

/// Apply a plan. Call inside a transaction and commit only on `Some`.
///
/// Turns are flagged first, scoped to `owner`. If any of them was already
/// extracted (a concurrent run got there first) the result is `None`; the
/// caller must roll back so the remaining turns are retried on their own.
pub fn apply_plan(
    conn: &Connection,
    owner: &str,
    plan: &ExtractionPlan,
) -> Result<Option<(ExtractionStats, Vec<GraphEdge>)>> {
    let marked = mark_extracted(conn, owner, &plan.turn_ids, &plan.task_id)?;
    if marked != plan.turn_ids.len() {
        tracing::debug!(
            owner = %owner,
            task_id = %plan.task_id,
            expected = plan.turn_ids.len(),
            marked,
            "turns changed under the batch, discarding it"
        );
        return Ok(None);
    }

    let mut stats = ExtractionStats {
        messages_processed: marked,
        ..Default::default()
    };

    for (key, value) in &plan.preferences {
        kv::set(conn, PREFERENCES_NAMESPACE, owner, key, value)?;
        stats.preferences_extracted += 1;
    }

    if let Some(language) = &plan.language {
        kv::set(conn, PROFILE_NAMESPACE, owner, "language", &json!(language))?;
    }
    for (key, update) in &plan.profile_updates {
        let existing = kv::get(conn, PROFILE_NAMESPACE, owner, key)?;
        if let Some(merged) = merge_profile_value(key, existing.as_ref().map(|kv| &kv.value), update) {
            kv::set(conn, PROFILE_NAMESPACE, owner, key, &merged)?;
            stats.profile_fields_updated += 1;
        }
    }

    for fact in &plan.facts {
        insert_memory(conn, &fact.memory, &fact.embedding)?;
        stats.facts_extracted += 1;
    }
    for episode in &plan.episodes {
        insert_memory(conn, &episode.memory, &episode.embedding)?;
        stats.episodes_extracted += 1;
    }

    let stored = store_triples(conn, owner, &plan.triples)?;
    stats.triples_extracted = stored.applied;

    Ok(Some((stats, stored.changed_edges())))
}

/// Merge one profile update into the stored value. `None` means nothing to write.
pub fn merge_profile_value(key: &str, existing: Option<&Value>, update: &Value) -> Option<Value> {
    if PROFILE_OVERWRITE_KEYS.contains(&key) {
        return match update {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            v => Some(v.clone()),
        };
    }
    if !PROFILE_APPEND_KEYS.contains(&key) {
        return None;
    }

    let incoming: Vec<String> = match update {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    let incoming: Vec<String> = incoming.into_iter().filter(|s| !s.trim().is_empty()).collect();
    if incoming.is_empty() {
        return None;
    }

    let mut merged: Vec<String> = existing
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let mut seen: std::collections::HashSet<String> = merged.iter().map(|s| s.to_lowercase()).collect();
    for item in incoming {
        if seen.insert(item.to_lowercase()) {
            merged.push(item);
        }
    }
    Some(json!(merged))
}

/// Event time for an extracted item: the model's ISO timestamp, else the
/// temporal parser over the model's time phrase, then over the content,
/// else the batch reference time.
pub fn resolve_timestamp(
    llm_timestamp: Option<&str>,
    original: Option<&str>,
    content: &str,
    reference: DateTime<Utc>,
) -> DateTime<Utc> {
    let temporal = TemporalExtractor::shared();
    llm_timestamp
        .and_then(|ts| parse_iso(ts).or_else(|| temporal.extract(ts, Some(reference))))
        .or_else(|| original.and_then(|o| temporal.extract(o, Some(reference))))
        .or_else(|| temporal.extract(content, Some(reference)))
        .unwrap_or(reference)
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    parse_timestamp(raw)
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        })
}

fn insert_common(meta: &mut Map<String, Value>, importance: Option<f64>, emotion: Option<&Emotion>, entities: Option<&Value>) {
    if let Some(importance) = importance {
        meta.insert("importance".into(), json!(importance));
    }
    if let Some(emotion) = emotion {
        meta.insert("emotion".into(), emotion.to_metadata());
    }
    if let Some(entities) = entities.filter(|e| e.is_object()) {
        meta.insert("entities".into(), entities.clone());
    }
}

fn fact_memory(owner: &str, fact: &ExtractedFact, reference: DateTime<Utc>) -> NewMemory {
    let mut meta = Map::new();
    meta.insert("category".into(), json!(fact.category.as_deref().unwrap_or("general")));
    meta.insert("confidence".into(), json!(fact.confidence.unwrap_or(1.0)));
    meta.insert("extracted_from".into(), json!("conversation"));
    insert_common(&mut meta, fact.importance, fact.emotion.as_ref(), fact.entities.as_ref());

    let when = resolve_timestamp(
        fact.timestamp.as_deref(),
        fact.timestamp_original.as_deref(),
        &fact.content,
        reference,
    );
    NewMemory {
        extracted_timestamp: Some(when),
        ..NewMemory::new(owner, fact.content.trim(), MemoryType::Fact).with_metadata(Value::Object(meta))
    }
}

fn episode_memory(owner: &str, episode: &ExtractedEpisode, reference: DateTime<Utc>) -> NewMemory {
    let when = resolve_timestamp(
        episode.timestamp.as_deref(),
        episode.timestamp_original.as_deref(),
        &episode.content,
        reference,
    );
    let mut meta = Map::new();
    meta.insert("timestamp".into(), json!(format_timestamp(when)));
    meta.insert("confidence".into(), json!(episode.confidence.unwrap_or(1.0)));
    meta.insert("extracted_from".into(), json!("conversation"));
    if let Some(original) = &episode.timestamp_original {
        meta.insert("timestamp_original".into(), json!(original));
    }
    if let Some(people) = episode.people.as_ref().filter(|p| !p.is_empty()) {
        meta.insert("people".into(), json!(people));
    }
    if let Some(location) = episode.location.as_ref().filter(|l| !l.trim().is_empty()) {
        meta.insert("location".into(), json!(location));
    }
    insert_common(&mut meta, episode.importance, episode.emotion.as_ref(), episode.entities.as_ref());

    NewMemory {
        extracted_timestamp: Some(when),
        ..NewMemory::new(owner, episode.content.trim(), MemoryType::Episodic).with_metadata(Value::Object(meta))
    }
}

/// Runs the classify, embed, commit pipeline for batches of turns.
pub struct MemoryExtractor {
    db: Database,
    embedding: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    settings: ExtractionSettings,
    mirror: Option<Arc<dyn GraphMirror>>,
}

impl MemoryExtractor {
    pub fn new(
        db: Database,
        embedding: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            db,
            embedding,
            llm,
            settings,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn GraphMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Extract one batch of turns belonging to `owner`.
    ///
    /// Turns of other owners and turns already extracted are dropped before
    /// the model is called.
    /// LLM failures and unparseable replies yield empty stats with the turns
    /// left unextracted. Write failures roll the batch back and are returned.
    pub async fn extract(&self, owner: &str, turns: &[ConversationTurn]) -> Result<ExtractionStats> {
        let ids: Vec<String> = turns.iter().map(|t| t.id.clone()).collect();
        let owner_key = owner.to_string();
        let pending = self
            .db
            .call(move |conn| pending_ids(conn, &owner_key, &ids))
            .await?;
        let turns: Vec<ConversationTurn> = turns.iter().filter(|t| pending.contains(&t.id)).cloned().collect();
        if turns.is_empty() {
            return Ok(ExtractionStats::default());
        }
        let turns = turns.as_slice();

        let conversation = prompt::format_conversation(turns);
        let session_time = turns.last().map(|t| prompt::turn_time(t).to_string());
        let reference = session_time
            .as_deref()
            .and_then(parse_iso)
            .unwrap_or_else(Utc::now);
        let (language, language_changed) = self.resolve_language(owner, &conversation).await?;

        let request = prompt::build_prompt(
            &conversation,
            &language,
            session_time.as_deref(),
            self.settings.graph_enabled,
        );
        let reply = match self
            .llm
            .chat(&[ChatMessage::user(request)], self.settings.temperature, self.settings.max_tokens)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(owner = %owner, turns = turns.len(), error = %e, "classification call failed");
                return Ok(ExtractionStats::default());
            }
        };
        let Some(classification) = prompt::parse_classification(&reply) else {
            return Ok(ExtractionStats::default());
        };

        let mut plan = self.prepare(owner, classification, reference).await;
        plan.task_id = uuid::Uuid::now_v7().to_string();
        plan.turn_ids = turns.iter().map(|t| t.id.clone()).collect();
        plan.language = language_changed.then_some(language);

        let owner_key = owner.to_string();
        let applied = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let applied = apply_plan(&tx, &owner_key, &plan)?;
                if applied.is_some() {
                    tx.commit()?;
                }
                Ok(applied)
            })
            .await?;
        let Some((stats, edges)) = applied else {
            return Ok(ExtractionStats::default());
        };

        mirror_after_commit(self.mirror.as_deref(), owner, &edges).await;

        tracing::info!(
            owner = %owner,
            facts = stats.facts_extracted,
            episodes = stats.episodes_extracted,
            preferences = stats.preferences_extracted,
            triples = stats.triples_extracted,
            messages = stats.messages_processed,
            "extraction committed"
        );
        Ok(stats)
    }

    /// Stored language preference, switched only when the conversation is
    /// dominated by another script. Returns the language and whether it
    /// should be written back.
    async fn resolve_language(&self, owner: &str, conversation: &str) -> Result<(String, bool)> {
        let owner_key = owner.to_string();
        let stored = self
            .db
            .call(move |conn| kv::get(conn, PROFILE_NAMESPACE, &owner_key, "language"))
            .await?
            .and_then(|kv| kv.value.as_str().map(str::to_string))
            .filter(|l| l == "en" || l == "zh");

        let detected = prompt::detect_language(conversation);
        Ok(match stored {
            Some(stored) if stored == detected => (stored, false),
            Some(stored) => {
                if prompt::language_confidence(conversation) > LANGUAGE_SWITCH_CONFIDENCE {
                    tracing::info!(owner = %owner, from = %stored, to = detected, "extraction language switched");
                    (detected.to_string(), true)
                } else {
                    (stored, false)
                }
            }
            None => (detected.to_string(), true),
        })
    }

    /// Turn a classification into insertable rows. Items whose embedding
    /// fails are logged and dropped.
    async fn prepare(&self, owner: &str, classification: Classification, reference: DateTime<Utc>) -> ExtractionPlan {
        let facts: Vec<ExtractedFact> = classification
            .facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .collect();
        let episodes: Vec<ExtractedEpisode> = classification
            .episodes
            .into_iter()
            .filter(|e| !e.content.trim().is_empty())
            .collect();

        let fact_vectors = self.embed_all(facts.iter().map(|f| f.content.trim().to_string()).collect()).await;
        let episode_vectors = self
            .embed_all(episodes.iter().map(|e| e.content.trim().to_string()).collect())
            .await;

        let facts = facts
            .iter()
            .zip(fact_vectors)
            .filter_map(|(fact, vector)| {
                vector.map(|embedding| PreparedMemory {
                    memory: fact_memory(owner, fact, reference),
                    embedding,
                })
            })
            .collect();
        let episodes = episodes
            .iter()
            .zip(episode_vectors)
            .filter_map(|(episode, vector)| {
                vector.map(|embedding| PreparedMemory {
                    memory: episode_memory(owner, episode, reference),
                    embedding,
                })
            })
            .collect();

        let preferences = classification
            .preferences
            .into_iter()
            .filter(|p| !p.key.trim().is_empty() && !p.value.is_null())
            .map(|p| (p.key.trim().to_string(), p.value))
            .collect();

        ExtractionPlan {
            preferences,
            profile_updates: classification.profile_updates,
            facts,
            episodes,
            triples: if self.settings.graph_enabled {
                classification.triples
            } else {
                Vec::new()
            },
            ..Default::default()
        }
    }

    /// One batch call; if it fails, each text is retried alone.
    async fn embed_all(&self, texts: Vec<String>) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let dims = self.embedding.dims();
        match self.embedding.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors
                    .into_iter()
                    .map(|v| match check_dims(dims, &v) {
                        Ok(()) => Some(v),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping extracted item with bad embedding");
                            None
                        }
                    })
                    .collect();
            }
            Ok(vectors) => tracing::warn!(expected = texts.len(), got = vectors.len(), "batch embedding size mismatch"),
            Err(e) => tracing::warn!(error = %e, items = texts.len(), "batch embedding failed, retrying per item"),
        }

        let mut out = Vec::with_capacity(texts.len());
        for text in &texts {
            let vector = match self.embedding.embed(text).await {
                Ok(v) if check_dims(dims, &v).is_ok() => Some(v),
                Ok(v) => {
                    tracing::warn!(expected = dims, got = v.len(), "dropping extracted item with bad embedding");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed, dropping extracted item");
                    None
                }
            };
            out.push(vector);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conversation::{append_message, get_unextracted, Role};
    use crate::memory::store::list_memories;
    use crate::test_support::{axis, test_conn};
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn timestamp_resolution_order() {
        let r = reference();
        let iso = resolve_timestamp(Some("2023-05-07"), Some("yesterday"), "x", r);
        assert_eq!(iso, Utc.with_ymd_and_hms(2023, 5, 7, 0, 0, 0).unwrap());

        let phrase = resolve_timestamp(None, Some("yesterday"), "x", r);
        assert_eq!(phrase.date_naive(), NaiveDate::from_ymd_opt(2023, 6, 14).unwrap());

        let content = resolve_timestamp(None, None, "we met on 2023-01-02", r);
        assert_eq!(content.date_naive(), NaiveDate::from_ymd_opt(2023, 1, 2).unwrap());

        assert_eq!(resolve_timestamp(None, None, "no time here", r), r);
    }

    #[test]
    fn profile_merge_rules() {
        assert_eq!(
            merge_profile_value("occupation", Some(&json!("student")), &json!("engineer")),
            Some(json!("engineer"))
        );
        assert_eq!(
            merge_profile_value("interests", Some(&json!(["Hiking"])), &json!(["hiking", "chess"])),
            Some(json!(["Hiking", "chess"]))
        );
        assert_eq!(merge_profile_value("interests", None, &json!("tea")), Some(json!(["tea"])));
        assert_eq!(merge_profile_value("interests", None, &json!([])), None);
        assert_eq!(merge_profile_value("favorite_planet", None, &json!("mars")), None);
        assert_eq!(merge_profile_value("identity", None, &json!("")), None);
    }

    fn plan_for(turn_ids: Vec<String>) -> ExtractionPlan {
        ExtractionPlan {
            task_id: "task-1".into(),
            turn_ids,
            language: Some("en".into()),
            preferences: vec![("drink".into(), json!("tea"))],
            profile_updates: json!({"occupation": "engineer"}).as_object().cloned().unwrap_or_default(),
            facts: vec![PreparedMemory {
                memory: NewMemory::new("alice", "Alice works at Google", MemoryType::Fact),
                embedding: axis(0),
            }],
            episodes: vec![PreparedMemory {
                memory: NewMemory::new("alice", "Alice visited Paris", MemoryType::Episodic),
                embedding: axis(1),
            }],
            triples: vec![Triple {
                subject: "user".into(),
                subject_type: "user".into(),
                relation: "works_at".into(),
                object: "Google".into(),
                object_type: "organization".into(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn apply_writes_every_category() {
        let conn = test_conn();
        let turn = append_message(&conn, "alice", Some("s1"), Role::User, "hi", None).unwrap();
        let (stats, edges) = apply_plan(&conn, "alice", &plan_for(vec![turn.id])).unwrap().unwrap();

        assert_eq!(stats.messages_processed, 1);
        assert_eq!(stats.preferences_extracted, 1);
        assert_eq!(stats.facts_extracted, 1);
        assert_eq!(stats.episodes_extracted, 1);
        assert_eq!(stats.triples_extracted, 1);
        assert_eq!(stats.profile_fields_updated, 1);
        assert_eq!(edges.len(), 1);

        assert_eq!(list_memories(&conn, "alice", None, 10, 0).unwrap().0, 2);
        let lang = kv::get(&conn, PROFILE_NAMESPACE, "alice", "language").unwrap().unwrap();
        assert_eq!(lang.value, json!("en"));
        assert!(get_unextracted(&conn, "alice", None, 10).unwrap().is_empty());
    }

    #[test]
    fn apply_skips_batches_already_extracted() {
        let conn = test_conn();
        let turn = append_message(&conn, "alice", Some("s1"), Role::User, "hi", None).unwrap();
        mark_extracted(&conn, "alice", &[turn.id.clone()], "earlier").unwrap();

        assert!(apply_plan(&conn, "alice", &plan_for(vec![turn.id])).unwrap().is_none());
        assert_eq!(list_memories(&conn, "alice", None, 10, 0).unwrap().0, 0);
    }

    #[test]
    fn partly_extracted_batch_is_discarded() {
        let mut conn = test_conn();
        let done = append_message(&conn, "alice", Some("s1"), Role::User, "hi", None).unwrap();
        let fresh = append_message(&conn, "alice", Some("s1"), Role::User, "again", None).unwrap();
        mark_extracted(&conn, "alice", &[done.id.clone()], "earlier").unwrap();

        let tx = conn.transaction().unwrap();
        assert!(apply_plan(&tx, "alice", &plan_for(vec![done.id, fresh.id])).unwrap().is_none());
        drop(tx);

        assert_eq!(list_memories(&conn, "alice", None, 10, 0).unwrap().0, 0);
        assert_eq!(get_unextracted(&conn, "alice", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn foreign_turns_never_apply() {
        let conn = test_conn();
        let turn = append_message(&conn, "alice", Some("s1"), Role::User, "hi", None).unwrap();

        assert!(apply_plan(&conn, "bob", &plan_for(vec![turn.id])).unwrap().is_none());
        assert_eq!(get_unextracted(&conn, "alice", None, 10).unwrap().len(), 1);
    }
}

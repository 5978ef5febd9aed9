//! The memory engine: the async surface front-ends call.
//!
//! [`MemoryCore`] holds the collaborators and implements every operation;
//! [`NeuroMemory`] pairs it with the [`ExtractionTrigger`] that schedules
//! automatic extraction. The trigger holds the core as its backend, never the
//! other way round.
//!
//! Every operation embeds or calls the LLM first and only then enters the
//! database, inside one closure (and one transaction when it writes).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::NeuromemConfig;
use crate::db::{migrations, Database};
use crate::embedding::{check_dims, EmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::extraction::{ExtractionSettings, ExtractionStats, MemoryExtractor};
use crate::graph::mirror::mirror_after_commit;
use crate::graph::store::{self as graph_store, GraphPath, Neighbor};
use crate::graph::types::Direction;
use crate::graph::{EdgeType, EntityFact, GraphEdge, GraphMirror, GraphNode, NodeRef, StoredTriples, Triple};
use crate::llm::LlmProvider;
use crate::memory::conversation::{self, ConversationTurn, Role, SessionInfo};
use crate::memory::kv::{self, KeyValue};
use crate::memory::recall::{apply_graph_boost, collect_graph_facts, merge_results, RecallOptions, RecallResult};
use crate::memory::search::{hybrid_search, scored_search, ScoredMemory, ScoredQuery, SearchHit};
use crate::memory::stats::{memory_stats, StatsResponse};
use crate::memory::store::{self, MemoryUpdate, NewMemory};
use crate::memory::temporal::TemporalExtractor;
use crate::memory::types::{Memory, MemoryType};
use crate::reflection::{get_emotion_profile, EmotionProfile, ReflectionResult, ReflectionSettings, Reflector};
use crate::trigger::{ExtractionBackend, ExtractionTrigger};

/// Result of appending a turn: the stored turn and, when the append crossed
/// the message interval, the extraction it caused.
#[derive(Debug, Clone, Serialize)]
pub struct AppendOutcome {
    pub turn: ConversationTurn,
    pub extraction: Option<ExtractionStats>,
}

pub struct MemoryCore {
    db: Database,
    embedding: Arc<dyn EmbeddingProvider>,
    config: NeuromemConfig,
    extractor: Option<MemoryExtractor>,
    reflector: Option<Reflector>,
    mirror: Option<Arc<dyn GraphMirror>>,
    db_path: Option<PathBuf>,
}

impl MemoryCore {
    fn require_extractor(&self) -> Result<&MemoryExtractor> {
        self.extractor
            .as_ref()
            .ok_or_else(|| MemoryError::validation("memory extraction needs an llm provider"))
    }

    fn require_reflector(&self) -> Result<&Reflector> {
        self.reflector
            .as_ref()
            .ok_or_else(|| MemoryError::validation("reflection needs an llm provider"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embedding.embed(text).await?;
        check_dims(self.embedding.dims(), &vector)?;
        Ok(vector)
    }

    /// Extract unextracted turns in batches until none are left or a batch
    /// produces nothing.
    pub async fn extract_pending(&self, owner: &str, session_id: Option<&str>) -> Result<ExtractionStats> {
        let extractor = self.require_extractor()?;
        let batch_size = self.config.extraction.batch_size.max(1);
        let mut total = ExtractionStats::default();

        loop {
            let (o, s) = (owner.to_string(), session_id.map(str::to_string));
            let batch = self
                .db
                .call(move |conn| conversation::get_unextracted(conn, &o, s.as_deref(), batch_size))
                .await?;
            if batch.is_empty() {
                break;
            }
            let stats = extractor.extract(owner, &batch).await?;
            total.absorb(&stats);
            if stats.messages_processed == 0 || batch.len() < batch_size {
                break;
            }
        }
        Ok(total)
    }

    /// Extract pending turns (best effort), then reflect.
    pub async fn reflect(&self, owner: &str, limit: Option<usize>) -> Result<ReflectionResult> {
        let reflector = self.require_reflector()?;
        if let Err(e) = self.extract_pending(owner, None).await {
            tracing::warn!(owner = %owner, error = %e, "pre-reflection extraction failed");
        }
        reflector.reflect(owner, limit).await
    }
}

#[async_trait]
impl ExtractionBackend for MemoryCore {
    async fn extract_session(&self, owner: &str, session_id: &str) -> Result<ExtractionStats> {
        self.extract_pending(owner, Some(session_id)).await
    }

    async fn reflect(&self, owner: &str) -> Result<()> {
        MemoryCore::reflect(self, owner, None).await.map(|_| ())
    }
}

/// Entry point for all memory operations.
pub struct NeuroMemory {
    core: Arc<MemoryCore>,
    trigger: Option<ExtractionTrigger>,
}

/// Optional parts of a [`NeuroMemory`].
#[derive(Default)]
pub struct EngineParts {
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub mirror: Option<Arc<dyn GraphMirror>>,
    /// On-disk location, used for the size figure in stats.
    pub db_path: Option<PathBuf>,
}

impl NeuroMemory {
    /// Assemble the engine and pin the embedding dimension.
    ///
    /// A database that already holds vectors of another dimension is refused;
    /// a fresh one records the provider's model and dimension.
    pub async fn new(
        db: Database,
        embedding: Arc<dyn EmbeddingProvider>,
        config: NeuromemConfig,
        parts: EngineParts,
    ) -> Result<Self> {
        let dims = embedding.dims();
        let model = embedding.model_name().to_string();
        db.call(move |conn| {
            match migrations::get_embedding_dims(conn)? {
                Some(stored) if stored != dims => Err(MemoryError::validation(format!(
                    "database holds {stored}-dimensional embeddings but the provider produces {dims}"
                ))),
                Some(_) => {
                    if migrations::get_embedding_model(conn)?.as_deref() != Some(model.as_str()) {
                        tracing::warn!(model = %model, "embedding model differs from the one stored vectors were made with");
                    }
                    Ok(())
                }
                None => {
                    migrations::set_embedding_dims(conn, dims)?;
                    migrations::set_embedding_model(conn, &model)?;
                    Ok(())
                }
            }
        })
        .await?;

        let extractor = parts.llm.as_ref().map(|llm| {
            let extractor = MemoryExtractor::new(
                db.clone(),
                Arc::clone(&embedding),
                Arc::clone(llm),
                ExtractionSettings {
                    graph_enabled: config.retrieval.graph_enabled,
                    temperature: config.llm.temperature,
                    max_tokens: config.llm.max_tokens,
                },
            );
            match &parts.mirror {
                Some(mirror) => extractor.with_mirror(Arc::clone(mirror)),
                None => extractor,
            }
        });
        let reflector = parts.llm.as_ref().map(|llm| {
            Reflector::new(
                db.clone(),
                Arc::clone(&embedding),
                Arc::clone(llm),
                ReflectionSettings {
                    batch_size: config.reflection.batch_size,
                    insight_importance: config.reflection.insight_importance,
                    temperature: config.llm.temperature,
                    max_tokens: config.llm.max_tokens,
                },
            )
        });

        let extraction_config = config.extraction.clone();
        let core = Arc::new(MemoryCore {
            db,
            embedding,
            config,
            extractor,
            reflector,
            mirror: parts.mirror,
            db_path: parts.db_path,
        });
        let trigger = core.extractor.is_some().then(|| {
            ExtractionTrigger::new(Arc::clone(&core) as Arc<dyn ExtractionBackend>, extraction_config)
        });

        Ok(Self { core, trigger })
    }

    pub fn database(&self) -> &Database {
        &self.core.db
    }

    pub fn config(&self) -> &NeuromemConfig {
        &self.core.config
    }

    /// The scheduler, present when an LLM provider is configured.
    pub fn trigger(&self) -> Option<&ExtractionTrigger> {
        self.trigger.as_ref()
    }

    // ── Memory store ─────────────────────────────────────────────────────────

    /// Embed and store one memory. Embedding failures are returned.
    pub async fn add_memory(
        &self,
        owner: &str,
        content: &str,
        memory_type: Option<MemoryType>,
        metadata: Option<Value>,
    ) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(MemoryError::validation("memory content must not be empty"));
        }
        let embedding = self.core.embed(content).await?;
        let mut new = NewMemory::new(owner, content, memory_type.unwrap_or(MemoryType::General));
        if let Some(metadata) = metadata {
            new = new.with_metadata(metadata);
        }
        self.core
            .db
            .transaction(move |tx| store::insert_memory(tx, &new, &embedding))
            .await
    }

    pub async fn get_memory(&self, id: &str, owner: &str) -> Result<Option<Memory>> {
        let (id, owner) = (id.to_string(), owner.to_string());
        self.core.db.call(move |conn| store::get_memory(conn, &id, &owner)).await
    }

    /// Edit a memory. A content change re-embeds; if that fails the record
    /// keeps its old vector and a warning is logged.
    pub async fn update_memory(&self, id: &str, owner: &str, update: MemoryUpdate) -> Result<Memory> {
        let embedding = match &update.content {
            Some(content) if !content.trim().is_empty() => match self.core.embed(content).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "re-embedding failed, keeping previous vector");
                    None
                }
            },
            _ => None,
        };
        let (id, owner) = (id.to_string(), owner.to_string());
        self.core
            .db
            .transaction(move |tx| store::update_memory(tx, &id, &owner, &update, embedding.as_deref()))
            .await
    }

    /// `false` when the record is missing or owned by someone else.
    pub async fn delete_memory(&self, id: &str, owner: &str) -> Result<bool> {
        let (id, owner) = (id.to_string(), owner.to_string());
        self.core
            .db
            .transaction(move |tx| store::delete_memory(tx, &id, &owner))
            .await
    }

    pub async fn delete_all(&self, owner: &str) -> Result<usize> {
        let owner = owner.to_string();
        self.core.db.transaction(move |tx| store::delete_all(tx, &owner)).await
    }

    pub async fn list_memories(
        &self,
        owner: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
        offset: usize,
    ) -> Result<(i64, Vec<Memory>)> {
        let owner = owner.to_string();
        self.core
            .db
            .call(move |conn| store::list_memories(conn, &owner, memory_type, limit, offset))
            .await
    }

    pub async fn get_by_time_range(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        memory_type: Option<MemoryType>,
        limit: usize,
        offset: usize,
    ) -> Result<(i64, Vec<Memory>)> {
        let owner = owner.to_string();
        self.core
            .db
            .call(move |conn| store::get_by_time_range(conn, &owner, start, end, memory_type, limit, offset))
            .await
    }

    pub async fn get_recent(&self, owner: &str, days: u32, types: Vec<MemoryType>, limit: usize) -> Result<Vec<Memory>> {
        let owner = owner.to_string();
        self.core
            .db
            .call(move |conn| store::get_recent(conn, &owner, days, &types, limit))
            .await
    }

    // ── Retrieval ────────────────────────────────────────────────────────────

    /// Three-factor ranked search. `decay_rate` defaults to the configured rate.
    pub async fn scored_search(
        &self,
        owner: &str,
        query: &str,
        limit: usize,
        memory_type: Option<MemoryType>,
        decay_rate: Option<f64>,
    ) -> Result<Vec<ScoredMemory>> {
        let embedding = self.core.embed(query).await?;
        let owner = owner.to_string();
        let decay_rate = decay_rate.unwrap_or(self.core.config.retrieval.decay_rate_secs);
        let multiplier = self.core.config.retrieval.candidate_multiplier;
        self.core
            .db
            .call(move |conn| {
                let q = ScoredQuery {
                    owner: &owner,
                    embedding: &embedding,
                    limit,
                    memory_type,
                    decay_rate,
                    event_after: None,
                    event_before: None,
                };
                scored_search(conn, &q, multiplier)
            })
            .await
    }

    /// Keyword plus vector search fused by reciprocal rank.
    pub async fn search(
        &self,
        owner: &str,
        query: &str,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.core.embed(query).await?;
        let (owner, query) = (owner.to_string(), query.to_string());
        let rrf_k = self.core.config.retrieval.rrf_k;
        self.core
            .db
            .call(move |conn| hybrid_search(conn, &owner, &embedding, &query, limit, memory_type, rrf_k))
            .await
    }

    /// Ranked memories fused with graph facts about the query and the owner.
    pub async fn recall(&self, owner: &str, query: &str, options: RecallOptions) -> Result<RecallResult> {
        let retrieval = &self.core.config.retrieval;
        let limit = options.limit.unwrap_or(retrieval.default_limit);
        if limit == 0 {
            return Ok(RecallResult::default());
        }

        let (mut event_after, mut event_before) = (options.event_after, options.event_before);
        if retrieval.temporal_filter && event_after.is_none() && event_before.is_none() {
            if let Some((start, end)) = TemporalExtractor::shared().extract_time_range(query, None) {
                tracing::debug!(%start, %end, "recall narrowed by time expression");
                event_after = Some(start);
                event_before = Some(end);
            }
        }

        let embedding = self.core.embed(query).await?;
        let (owner_key, query_text) = (owner.to_string(), query.to_string());
        let decay_rate = options.decay_rate.unwrap_or(retrieval.decay_rate_secs);
        let multiplier = retrieval.candidate_multiplier;
        let graph_enabled = retrieval.graph_enabled;
        let memory_type = options.memory_type;

        let (mut vector_results, graph_results) = self
            .core
            .db
            .call(move |conn| {
                let q = ScoredQuery {
                    owner: &owner_key,
                    embedding: &embedding,
                    limit,
                    memory_type,
                    decay_rate,
                    event_after,
                    event_before,
                };
                let vector = scored_search(conn, &q, multiplier)?;
                let graph = if graph_enabled {
                    collect_graph_facts(conn, &owner_key, &query_text, limit)?
                } else {
                    Vec::new()
                };
                Ok((vector, graph))
            })
            .await?;

        if retrieval.graph_boost {
            apply_graph_boost(&mut vector_results, &graph_results);
        }
        let merged = merge_results(&vector_results, &graph_results, limit);
        tracing::debug!(
            owner = %owner,
            vector = vector_results.len(),
            graph = graph_results.len(),
            merged = merged.len(),
            "recall complete"
        );
        Ok(RecallResult {
            vector_results,
            graph_results,
            merged,
        })
    }

    // ── Graph ────────────────────────────────────────────────────────────────

    pub async fn store_triples(&self, owner: &str, triples: Vec<Triple>) -> Result<StoredTriples> {
        let owner_key = owner.to_string();
        let stored = self
            .core
            .db
            .transaction(move |tx| graph_store::store_triples(tx, &owner_key, &triples))
            .await?;
        mirror_after_commit(self.core.mirror.as_deref(), owner, &stored.changed_edges()).await;
        Ok(stored)
    }

    pub async fn find_entity_facts(&self, owner: &str, entity: &str, limit: usize) -> Result<Vec<EntityFact>> {
        let (owner, entity) = (owner.to_string(), entity.to_string());
        self.core
            .db
            .call(move |conn| graph_store::find_entity_facts(conn, &owner, &entity, limit))
            .await
    }

    /// Every version of a relation, superseded ones included.
    pub async fn edge_history(&self, owner: &str, source: NodeRef, edge_type: EdgeType) -> Result<Vec<GraphEdge>> {
        let owner = owner.to_string();
        self.core
            .db
            .call(move |conn| graph_store::edge_history(conn, &owner, &source, edge_type))
            .await
    }

    pub async fn create_node(&self, owner: Option<&str>, node: NodeRef, properties: Value) -> Result<GraphNode> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .transaction(move |tx| graph_store::create_node(tx, owner.as_deref(), &node, properties))
            .await
    }

    pub async fn get_node(&self, owner: Option<&str>, node: NodeRef) -> Result<Option<GraphNode>> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .call(move |conn| graph_store::get_node(conn, owner.as_deref(), &node))
            .await
    }

    pub async fn update_node(&self, owner: Option<&str>, node: NodeRef, properties: Value) -> Result<GraphNode> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .transaction(move |tx| graph_store::update_node(tx, owner.as_deref(), &node, &properties))
            .await
    }

    /// Remove a node and its incident edges; returns the edge count removed.
    pub async fn delete_node(&self, owner: Option<&str>, node: NodeRef) -> Result<usize> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .transaction(move |tx| graph_store::delete_node(tx, owner.as_deref(), &node))
            .await
    }

    pub async fn create_edge(
        &self,
        owner: Option<&str>,
        source: NodeRef,
        edge_type: EdgeType,
        target: NodeRef,
        properties: Value,
    ) -> Result<GraphEdge> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .transaction(move |tx| graph_store::create_edge(tx, owner.as_deref(), &source, edge_type, &target, properties))
            .await
    }

    pub async fn delete_edge(
        &self,
        owner: Option<&str>,
        source: NodeRef,
        edge_type: EdgeType,
        target: NodeRef,
    ) -> Result<usize> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .transaction(move |tx| graph_store::delete_edge(tx, owner.as_deref(), &source, edge_type, &target))
            .await
    }

    pub async fn get_neighbors(
        &self,
        owner: Option<&str>,
        node: NodeRef,
        direction: Direction,
        edge_types: Vec<EdgeType>,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .call(move |conn| graph_store::get_neighbors(conn, owner.as_deref(), &node, direction, &edge_types, limit))
            .await
    }

    pub async fn find_path(
        &self,
        owner: Option<&str>,
        source: NodeRef,
        target: NodeRef,
        max_depth: u32,
    ) -> Result<Option<GraphPath>> {
        let owner = owner.map(str::to_string);
        self.core
            .db
            .call(move |conn| graph_store::find_path(conn, owner.as_deref(), &source, &target, max_depth))
            .await
    }

    // ── Key-value ────────────────────────────────────────────────────────────

    pub async fn kv_set(&self, namespace: &str, scope_id: &str, key: &str, value: Value) -> Result<()> {
        let (ns, scope, key) = (namespace.to_string(), scope_id.to_string(), key.to_string());
        self.core
            .db
            .transaction(move |tx| kv::set(tx, &ns, &scope, &key, &value))
            .await
    }

    pub async fn kv_get(&self, namespace: &str, scope_id: &str, key: &str) -> Result<Option<KeyValue>> {
        let (ns, scope, key) = (namespace.to_string(), scope_id.to_string(), key.to_string());
        self.core.db.call(move |conn| kv::get(conn, &ns, &scope, &key)).await
    }

    pub async fn kv_list(
        &self,
        namespace: &str,
        scope_id: &str,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KeyValue>> {
        let (ns, scope, prefix) = (namespace.to_string(), scope_id.to_string(), prefix.map(str::to_string));
        self.core
            .db
            .call(move |conn| kv::list(conn, &ns, &scope, prefix.as_deref(), limit))
            .await
    }

    pub async fn kv_delete(&self, namespace: &str, scope_id: &str, key: &str) -> Result<bool> {
        let (ns, scope, key) = (namespace.to_string(), scope_id.to_string(), key.to_string());
        self.core
            .db
            .transaction(move |tx| kv::delete(tx, &ns, &scope, &key))
            .await
    }

    pub async fn kv_batch_set(&self, namespace: &str, scope_id: &str, items: Vec<(String, Value)>) -> Result<usize> {
        let (ns, scope) = (namespace.to_string(), scope_id.to_string());
        self.core
            .db
            .transaction(move |tx| kv::batch_set(tx, &ns, &scope, items.iter().map(|(k, v)| (k.as_str(), v))))
            .await
    }

    // ── Conversations and extraction ─────────────────────────────────────────

    /// Store a turn and let the trigger count it.
    pub async fn append_message(
        &self,
        owner: &str,
        session_id: Option<&str>,
        role: Role,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<AppendOutcome> {
        let (owner_key, session, content) = (owner.to_string(), session_id.map(str::to_string), content.to_string());
        let turn = self
            .core
            .db
            .transaction(move |tx| {
                conversation::append_message(tx, &owner_key, session.as_deref(), role, &content, metadata.as_ref())
            })
            .await?;

        let extraction = match &self.trigger {
            Some(trigger) => trigger.on_message(owner, &turn.session_id).await,
            None => None,
        };
        Ok(AppendOutcome { turn, extraction })
    }

    /// Close a session. Returns the close-triggered extraction, if one ran.
    pub async fn close_session(&self, owner: &str, session_id: &str) -> Result<Option<ExtractionStats>> {
        let (o, s) = (owner.to_string(), session_id.to_string());
        let known = self
            .core
            .db
            .transaction(move |tx| conversation::close_session(tx, &o, &s))
            .await?;
        if !known {
            return Err(MemoryError::not_found("session", session_id));
        }
        Ok(match &self.trigger {
            Some(trigger) => trigger.on_session_close(owner, session_id).await,
            None => None,
        })
    }

    pub async fn list_sessions(&self, owner: &str, limit: usize, offset: usize) -> Result<(i64, Vec<SessionInfo>)> {
        let owner = owner.to_string();
        self.core
            .db
            .call(move |conn| conversation::list_sessions(conn, &owner, limit, offset))
            .await
    }

    pub async fn get_session_messages(
        &self,
        owner: &str,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let (owner, session) = (owner.to_string(), session_id.to_string());
        self.core
            .db
            .call(move |conn| conversation::get_session_messages(conn, &owner, &session, limit, offset))
            .await
    }

    pub async fn get_unextracted(&self, owner: &str, session_id: Option<&str>, limit: usize) -> Result<Vec<ConversationTurn>> {
        let (owner, session) = (owner.to_string(), session_id.map(str::to_string));
        self.core
            .db
            .call(move |conn| conversation::get_unextracted(conn, &owner, session.as_deref(), limit))
            .await
    }

    /// Extract the given turns as one batch.
    pub async fn extract_memories(&self, owner: &str, turns: &[ConversationTurn]) -> Result<ExtractionStats> {
        self.core.require_extractor()?.extract(owner, turns).await
    }

    /// Extract everything still pending for the owner, or for one session.
    pub async fn extract_pending(&self, owner: &str, session_id: Option<&str>) -> Result<ExtractionStats> {
        self.core.extract_pending(owner, session_id).await
    }

    // ── Reflection and stats ─────────────────────────────────────────────────

    pub async fn reflect(&self, owner: &str, limit: Option<usize>) -> Result<ReflectionResult> {
        self.core.reflect(owner, limit).await
    }

    pub async fn emotion_profile(&self, owner: &str) -> Result<Option<EmotionProfile>> {
        let owner = owner.to_string();
        self.core.db.call(move |conn| get_emotion_profile(conn, &owner)).await
    }

    pub async fn stats(&self, owner: &str) -> Result<StatsResponse> {
        let owner = owner.to_string();
        let path = self.core.db_path.clone();
        self.core
            .db
            .call(move |conn| memory_stats(conn, &owner, path.as_deref()))
            .await
    }

    /// Stop all timers and run shutdown extractions as configured.
    pub async fn shutdown(&self) -> usize {
        match &self.trigger {
            Some(trigger) => trigger.shutdown().await,
            None => 0,
        }
    }
}

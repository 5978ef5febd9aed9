//! Periodic consolidation of recent memories into insights and an emotion profile.
//!
//! Reflection is incremental. `emotion_profiles.last_reflected_at` together
//! with `last_reflected_id` is the watermark: each run analyses only fact,
//! episodic, preference and general memories ordered after it by
//! `(created_at, id)`, then advances it to the last one analysed in the same
//! transaction that stores the insights.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::Database;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::extraction::prompt::{detect_language, strip_code_fence};
use crate::llm::{ChatMessage, LlmProvider};
use crate::memory::now_timestamp;
use crate::memory::store::{insert_memory, row_to_memory, NewMemory, MEMORY_COLUMNS};
use crate::memory::types::{Memory, MemoryType};

/// Memory types reflection reads.
pub const REFLECTED_TYPES: [MemoryType; 4] = [
    MemoryType::Fact,
    MemoryType::Episodic,
    MemoryType::Preference,
    MemoryType::General,
];

#[derive(Debug, Clone)]
pub struct ReflectionSettings {
    pub batch_size: usize,
    pub insight_importance: u8,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            insight_importance: 8,
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

/// Per-owner singleton, overwritten on every reflection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmotionProfile {
    pub user_id: String,
    pub latest_state: Option<String>,
    pub latest_valence: Option<f64>,
    pub dominant_emotions: Value,
    pub emotion_triggers: Value,
    pub last_reflected_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionResult {
    pub memories_analyzed: usize,
    pub insights_generated: usize,
    pub insights: Vec<Memory>,
    /// Set only when this run produced a new emotion summary.
    pub emotion_profile: Option<EmotionProfile>,
}

#[derive(Debug, Clone, Deserialize)]
struct InsightDraft {
    content: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmotionSummary {
    pub latest_state: Option<String>,
    pub dominant_emotions: Value,
    pub emotion_triggers: Value,
}

pub fn get_emotion_profile(conn: &Connection, owner: &str) -> Result<Option<EmotionProfile>> {
    Ok(conn
        .query_row(
            "SELECT user_id, latest_state, latest_valence, dominant_emotions, emotion_triggers, \
             last_reflected_at, updated_at FROM emotion_profiles WHERE user_id = ?1",
            params![owner],
            |row| {
                let dominant: String = row.get(3)?;
                let triggers: String = row.get(4)?;
                Ok(EmotionProfile {
                    user_id: row.get(0)?,
                    latest_state: row.get(1)?,
                    latest_valence: row.get(2)?,
                    dominant_emotions: serde_json::from_str(&dominant).unwrap_or_else(|_| json!({})),
                    emotion_triggers: serde_json::from_str(&triggers).unwrap_or_else(|_| json!([])),
                    last_reflected_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()?)
}

/// Position of the last memory a reflection consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionCursor {
    pub created_at: String,
    /// `None` for watermarks written before ids were recorded.
    pub id: Option<String>,
}

impl ReflectionCursor {
    pub fn after(memory: &Memory) -> Self {
        Self {
            created_at: memory.created_at.clone(),
            id: Some(memory.id.clone()),
        }
    }
}

pub fn reflection_cursor(conn: &Connection, owner: &str) -> Result<Option<ReflectionCursor>> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT last_reflected_at, last_reflected_id FROM emotion_profiles WHERE user_id = ?1",
            params![owner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(created_at, id)| created_at.map(|created_at| ReflectionCursor { created_at, id })))
}

/// Reflectable memories ordered after `cursor` by `(created_at, id)`, oldest first.
pub fn memories_since(
    conn: &Connection,
    owner: &str,
    cursor: Option<&ReflectionCursor>,
    limit: usize,
) -> Result<Vec<Memory>> {
    let types = REFLECTED_TYPES
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories \
         WHERE user_id = ?1 AND memory_type IN ({types}) \
         AND (?2 IS NULL OR created_at > ?2 OR (created_at = ?2 AND ?3 IS NOT NULL AND id > ?3)) \
         ORDER BY created_at, id LIMIT ?4"
    );
    let (created_at, id) = match cursor {
        Some(c) => (Some(c.created_at.as_str()), c.id.as_deref()),
        None => (None, None),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner, created_at, id, limit as i64], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Store insights and move the watermark in one unit. `summary` replaces the
/// emotion fields; without it only the watermark moves.
pub fn commit_reflection(
    conn: &Connection,
    owner: &str,
    insights: &[(NewMemory, Vec<f32>)],
    summary: Option<(&EmotionSummary, Option<f64>)>,
    watermark: &ReflectionCursor,
) -> Result<(Vec<Memory>, Option<EmotionProfile>)> {
    let stored = insights
        .iter()
        .map(|(memory, embedding)| insert_memory(conn, memory, embedding))
        .collect::<Result<Vec<_>>>()?;

    let now = now_timestamp();
    match summary {
        Some((summary, valence)) => {
            conn.execute(
                "INSERT INTO emotion_profiles (user_id, latest_state, latest_valence, dominant_emotions, \
                 emotion_triggers, last_reflected_at, last_reflected_id, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(user_id) DO UPDATE SET latest_state = excluded.latest_state, \
                 latest_valence = excluded.latest_valence, dominant_emotions = excluded.dominant_emotions, \
                 emotion_triggers = excluded.emotion_triggers, last_reflected_at = excluded.last_reflected_at, \
                 last_reflected_id = excluded.last_reflected_id, updated_at = excluded.updated_at",
                params![
                    owner,
                    summary.latest_state,
                    valence,
                    serde_json::to_string(&non_null(&summary.dominant_emotions, json!({})))?,
                    serde_json::to_string(&non_null(&summary.emotion_triggers, json!([])))?,
                    watermark.created_at,
                    watermark.id,
                    now,
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO emotion_profiles (user_id, last_reflected_at, last_reflected_id, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(user_id) DO UPDATE SET last_reflected_at = excluded.last_reflected_at, \
                 last_reflected_id = excluded.last_reflected_id, updated_at = excluded.updated_at",
                params![owner, watermark.created_at, watermark.id, now],
            )?;
        }
    }

    let profile = match summary {
        Some(_) => get_emotion_profile(conn, owner)?,
        None => None,
    };
    Ok((stored, profile))
}

fn non_null(value: &Value, default: Value) -> Value {
    if value.is_null() {
        default
    } else {
        value.clone()
    }
}

/// Mean `emotion.valence` over memories that carry one.
pub fn mean_valence(memories: &[Memory]) -> Option<f64> {
    let values: Vec<f64> = memories
        .iter()
        .filter_map(|m| m.metadata.pointer("/emotion/valence").and_then(Value::as_f64))
        .collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn has_emotion(memory: &Memory) -> bool {
    memory.metadata.get("emotion").is_some_and(Value::is_object)
}

fn render_memories(memories: &[Memory]) -> String {
    memories
        .iter()
        .map(|m| {
            let label = m
                .metadata
                .pointer("/emotion/label")
                .and_then(Value::as_str)
                .filter(|l| !l.is_empty());
            match label {
                Some(label) => format!("- [{}] {} (emotion: {label})", m.memory_type, m.content),
                None => format!("- [{}] {}", m.memory_type, m.content),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn insight_prompt(memories: &[Memory]) -> String {
    let listing = render_memories(memories);
    if detect_language(&listing) == "zh" {
        format!(
            "根据以下用户记忆，总结更高层次的洞察（行为模式、阶段性总结）。只返回 JSON：\
             {{\"insights\": [{{\"content\": \"...\", \"category\": \"pattern|summary\"}}]}}\n\n{listing}"
        )
    } else {
        format!(
            "From the user's memories below, write higher-level insights (behavioural patterns, \
             period summaries). Reply with JSON only: \
             {{\"insights\": [{{\"content\": \"...\", \"category\": \"pattern|summary\"}}]}}\n\n{listing}"
        )
    }
}

fn emotion_prompt(memories: &[Memory]) -> String {
    let listing = render_memories(memories);
    if detect_language(&listing) == "zh" {
        format!(
            "根据以下带情感标注的记忆，概括用户近期的情绪状态。只返回 JSON：\
             {{\"latest_state\": \"...\", \"dominant_emotions\": {{\"情绪\": 比例}}, \"emotion_triggers\": {{\"话题\": {{\"valence\": -1.0-1.0}}}}}}\n\n{listing}"
        )
    } else {
        format!(
            "Summarise the user's recent emotional state from the annotated memories below. Reply with JSON only: \
             {{\"latest_state\": \"...\", \"dominant_emotions\": {{\"emotion\": share}}, \"emotion_triggers\": {{\"topic\": {{\"valence\": -1.0-1.0}}}}}}\n\n{listing}"
        )
    }
}

fn parse_insights(reply: &str) -> Vec<InsightDraft> {
    #[derive(Deserialize)]
    struct Reply {
        #[serde(default)]
        insights: Vec<Value>,
    }
    match serde_json::from_str::<Reply>(strip_code_fence(reply)) {
        Ok(reply) => reply
            .insights
            .into_iter()
            .filter_map(|v| serde_json::from_value::<InsightDraft>(v).ok())
            .filter(|d| !d.content.trim().is_empty())
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "insight reply is not valid JSON");
            Vec::new()
        }
    }
}

fn parse_emotion_summary(reply: &str) -> Option<EmotionSummary> {
    match serde_json::from_str::<EmotionSummary>(strip_code_fence(reply)) {
        Ok(summary) if summary.latest_state.is_some() => Some(summary),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "emotion reply is not valid JSON");
            None
        }
    }
}

pub struct Reflector {
    db: Database,
    embedding: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    settings: ReflectionSettings,
}

impl Reflector {
    pub fn new(
        db: Database,
        embedding: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        settings: ReflectionSettings,
    ) -> Self {
        Self {
            db,
            embedding,
            llm,
            settings,
        }
    }

    /// Analyse memories past the watermark, up to `limit` of them.
    ///
    /// Unparseable replies count as "nothing produced"; a failed LLM call is
    /// returned and leaves the watermark where it was.
    pub async fn reflect(&self, owner: &str, limit: Option<usize>) -> Result<ReflectionResult> {
        let memories = self.load_pending(owner, limit.unwrap_or(usize::MAX)).await?;
        let Some(watermark) = memories.last().map(ReflectionCursor::after) else {
            tracing::debug!(owner = %owner, "nothing new to reflect on");
            return Ok(ReflectionResult {
                memories_analyzed: 0,
                insights_generated: 0,
                insights: Vec::new(),
                emotion_profile: None,
            });
        };

        let mut drafts: Vec<(InsightDraft, Vec<String>)> = Vec::new();
        for page in memories.chunks(self.settings.batch_size.max(1)) {
            let reply = self.chat(insight_prompt(page)).await?;
            let source_ids: Vec<String> = page.iter().map(|m| m.id.clone()).collect();
            drafts.extend(parse_insights(&reply).into_iter().map(|d| (d, source_ids.clone())));
        }

        let emotional: Vec<Memory> = memories.iter().filter(|m| has_emotion(m)).cloned().collect();
        let summary = if emotional.is_empty() {
            None
        } else {
            parse_emotion_summary(&self.chat(emotion_prompt(&emotional)).await?)
        };
        let valence = mean_valence(&emotional);

        let insights = self.prepare_insights(owner, drafts).await;

        let owner_key = owner.to_string();
        let (stored, profile) = self
            .db
            .transaction(move |tx| {
                commit_reflection(tx, &owner_key, &insights, summary.as_ref().map(|s| (s, valence)), &watermark)
            })
            .await?;

        tracing::info!(
            owner = %owner,
            analyzed = memories.len(),
            insights = stored.len(),
            profile_updated = profile.is_some(),
            "reflection committed"
        );
        Ok(ReflectionResult {
            memories_analyzed: memories.len(),
            insights_generated: stored.len(),
            insights: stored,
            emotion_profile: profile,
        })
    }

    async fn load_pending(&self, owner: &str, limit: usize) -> Result<Vec<Memory>> {
        let owner = owner.to_string();
        let page_size = self.settings.batch_size.max(1);
        self.db
            .call(move |conn| {
                let mut cursor = reflection_cursor(conn, &owner)?;
                let mut out: Vec<Memory> = Vec::new();
                while out.len() < limit {
                    let want = page_size.min(limit - out.len());
                    let page = memories_since(conn, &owner, cursor.as_ref(), want)?;
                    let done = page.len() < want;
                    if let Some(last) = page.last() {
                        cursor = Some(ReflectionCursor::after(last));
                    }
                    out.extend(page);
                    if done {
                        break;
                    }
                }
                Ok(out)
            })
            .await
    }

    async fn chat(&self, prompt: String) -> Result<String> {
        Ok(self
            .llm
            .chat(&[ChatMessage::user(prompt)], self.settings.temperature, self.settings.max_tokens)
            .await?)
    }

    async fn prepare_insights(&self, owner: &str, drafts: Vec<(InsightDraft, Vec<String>)>) -> Vec<(NewMemory, Vec<f32>)> {
        if drafts.is_empty() {
            return Vec::new();
        }
        let texts: Vec<String> = drafts.iter().map(|(d, _)| d.content.trim().to_string()).collect();
        let vectors = match self.embedding.embed_batch(&texts).await {
            Ok(v) if v.len() == texts.len() => v.into_iter().map(Some).collect(),
            Ok(_) | Err(_) => {
                let mut out = Vec::with_capacity(texts.len());
                for text in &texts {
                    out.push(match self.embedding.embed(text).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            tracing::warn!(error = %e, "insight embedding failed, dropping insight");
                            None
                        }
                    });
                }
                out
            }
        };

        drafts
            .into_iter()
            .zip(vectors)
            .filter_map(|((draft, source_ids), vector)| {
                let metadata = json!({
                    "category": draft.category.unwrap_or_else(|| "pattern".into()),
                    "importance": self.settings.insight_importance,
                    "source_ids": source_ids,
                });
                vector.map(|v| {
                    (
                        NewMemory::new(owner, draft.content.trim(), MemoryType::Insight).with_metadata(metadata),
                        v,
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{axis, test_conn};

    fn add(conn: &Connection, content: &str, t: MemoryType, metadata: Value) -> Memory {
        insert_memory(conn, &NewMemory::new("alice", content, t).with_metadata(metadata), &axis(0)).unwrap()
    }

    fn cursor(created_at: &str) -> ReflectionCursor {
        ReflectionCursor {
            created_at: created_at.into(),
            id: None,
        }
    }

    #[test]
    fn watermark_limits_what_is_read() {
        let conn = test_conn();
        let first = add(&conn, "works at Google", MemoryType::Fact, json!({}));
        add(&conn, "an old insight", MemoryType::Insight, json!({}));
        let second = add(&conn, "went hiking", MemoryType::Episodic, json!({}));

        let all = memories_since(&conn, "alice", None, 10).unwrap();
        assert_eq!(all.len(), 2);

        commit_reflection(&conn, "alice", &[], None, &ReflectionCursor::after(&first)).unwrap();
        let watermark = reflection_cursor(&conn, "alice").unwrap();
        assert_eq!(watermark.as_ref().and_then(|c| c.id.as_deref()), Some(first.id.as_str()));
        let after = memories_since(&conn, "alice", watermark.as_ref(), 10).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, second.id);
    }

    #[test]
    fn shared_timestamps_survive_a_page_break() {
        let conn = test_conn();
        for content in ["a", "b", "c"] {
            add(&conn, content, MemoryType::Fact, json!({}));
        }
        conn.execute("UPDATE memories SET created_at = '2024-01-01T00:00:00.000000Z'", [])
            .unwrap();

        let page = memories_since(&conn, "alice", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        let next = memories_since(&conn, "alice", Some(&ReflectionCursor::after(&page[1])), 2).unwrap();
        assert_eq!(next.len(), 1);
        assert!(page.iter().all(|m| m.id != next[0].id));
    }

    #[test]
    fn summary_overwrites_profile() {
        let conn = test_conn();
        let summary = EmotionSummary {
            latest_state: Some("stressed by work".into()),
            dominant_emotions: json!({"anxious": 0.7}),
            emotion_triggers: Value::Null,
        };
        let (_, profile) = commit_reflection(&conn, "alice", &[], Some((&summary, Some(-0.6))), &cursor("t1")).unwrap();
        let profile = profile.unwrap();
        assert_eq!(profile.latest_state.as_deref(), Some("stressed by work"));
        assert_eq!(profile.latest_valence, Some(-0.6));
        assert_eq!(profile.emotion_triggers, json!([]));

        let (_, none) = commit_reflection(&conn, "alice", &[], None, &cursor("t2")).unwrap();
        assert!(none.is_none());
        let kept = get_emotion_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(kept.latest_state.as_deref(), Some("stressed by work"));
        assert_eq!(kept.last_reflected_at.as_deref(), Some("t2"));
    }

    #[test]
    fn valence_is_mean_of_annotated_memories() {
        let conn = test_conn();
        let a = add(&conn, "a", MemoryType::Episodic, json!({"emotion": {"valence": -0.5, "arousal": 0.3}}));
        let b = add(&conn, "b", MemoryType::Episodic, json!({"emotion": {"valence": -0.7, "arousal": 0.8}}));
        let c = add(&conn, "c", MemoryType::Fact, json!({}));
        let mean = mean_valence(&[a, b, c]).unwrap();
        assert!((mean + 0.6).abs() < 1e-9);
        assert!(mean_valence(&[]).is_none());
    }

    #[test]
    fn insight_parsing_tolerates_noise() {
        let drafts = parse_insights("```json\n{\"insights\": [{\"content\": \"likes tech\", \"category\": \"pattern\"}, {\"content\": \"\"}, 3]}\n```");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].category.as_deref(), Some("pattern"));
        assert!(parse_insights("This is not valid JSON").is_empty());
        assert!(parse_emotion_summary("{}").is_none());
    }
}

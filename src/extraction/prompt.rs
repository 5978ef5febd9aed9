//! Classification prompt and the lenient parser for its JSON reply.
//!
//! The model is an untrusted generator. A reply that is not a JSON object is
//! reported as `None`; inside a valid object, categories of the wrong shape
//! become empty and individual malformed items are dropped.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::graph::Triple;
use crate::memory::conversation::ConversationTurn;

/// Share of CJK characters above which a conversation counts as Chinese.
const ZH_RATIO: f64 = 0.3;

/// `"zh"` when more than 30% of the characters are CJK ideographs, else `"en"`.
pub fn detect_language(text: &str) -> &'static str {
    let total = text.chars().count();
    if total == 0 {
        return "en";
    }
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    if cjk as f64 / total as f64 > ZH_RATIO {
        "zh"
    } else {
        "en"
    }
}

/// How strongly one script dominates the letters of `text`, in [0.5, 1].
pub fn language_confidence(text: &str) -> f64 {
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let latin = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let total = cjk + latin;
    if total == 0 {
        return 0.5;
    }
    cjk.max(latin) as f64 / total as f64
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// One line per turn: `[time] ROLE: content`. A `session_timestamp` in the
/// turn metadata takes precedence over the stored creation time.
pub fn format_conversation(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            format!(
                "[{}] {}: {}",
                turn_time(t),
                t.role.as_str().to_uppercase(),
                t.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn turn_time(turn: &ConversationTurn) -> &str {
    turn.metadata
        .as_ref()
        .and_then(|m| m.get("session_timestamp"))
        .and_then(Value::as_str)
        .unwrap_or(&turn.created_at)
}

const EN_TEMPLATE: &str = r#"Extract structured memories from the conversation below. Reply with JSON only.

Conversation:
```
{conversation}
```
{temporal}
1. facts: persistent attributes of the user or people mentioned (job, skills, hobbies, values, relationships).
   Format: {"content": "...", "category": "work|skill|hobby|personal|education|location|health|relationship|finance", "confidence": 0.0-1.0, "importance": 1-10, "emotion": {"valence": -1.0-1.0, "arousal": 0.0-1.0, "label": "..."} or null, "entities": {"people": [], "locations": [], "topics": []}}
   Each fact is atomic and names its subject explicitly; never use pronouns. One-off events are episodes, not facts.
2. episodes: dated events and experiences.
   Format: {"content": "...", "timestamp": "ISO 8601 date or null", "timestamp_original": "time phrase as written or null", "people": [], "location": "... or null", "confidence": 0.0-1.0, "importance": 1-10, "emotion": {...} or null}
3. preferences: explicit likes and settings as {"key": "snake_case_key", "value": "..."}.
{triples}
{profile_number}. profile_updates: only fields stated in the conversation. identity and occupation are strings; interests, preferences, values, relationships and personality are string arrays.

Only extract what is said. Use the conversation's language for every content field. Empty categories are empty lists.

```json
{"facts": [], "episodes": [], "preferences": []{triples_key}, "profile_updates": {}}
```"#;

const EN_TRIPLES: &str = r#"4. triples: relations drawn from the facts and episodes.
   Format: {"subject": "...", "subject_type": "user|person|organization|location|event|skill|concept|entity", "relation": "works_at|lives_in|has_skill|studied_at|uses|knows|met|attended|visited|occurred_at|occurred_on|...", "object": "...", "object_type": "...", "content": "...", "confidence": 0.0-1.0}
   For the user, use subject "user" with subject_type "user"."#;

const EN_TEMPORAL: &str = r#"
Session time: {session_time}. Resolve relative expressions ("yesterday", "last week", "three years ago") against it into ISO 8601 "timestamp" values and keep the phrase in "timestamp_original".
"#;

const ZH_TEMPLATE: &str = r#"从下面的对话中提取结构化记忆，只返回 JSON。

对话：
```
{conversation}
```
{temporal}
1. facts：用户或对话中人物的持久属性（职业、技能、爱好、价值观、人际关系）。
   格式：{"content": "...", "category": "work|skill|hobby|personal|education|location|health|relationship|finance", "confidence": 0.0-1.0, "importance": 1-10, "emotion": {"valence": -1.0-1.0, "arousal": 0.0-1.0, "label": "..."} 或 null, "entities": {"people": [], "locations": [], "topics": []}}
   每条事实只含一个信息并写明主语，不要使用代词。一次性事件归入 episodes。
2. episodes：有时间的事件和经历。
   格式：{"content": "...", "timestamp": "ISO 8601 日期或 null", "timestamp_original": "原始时间表达或 null", "people": [], "location": "地点或 null", "confidence": 0.0-1.0, "importance": 1-10, "emotion": {...} 或 null}
3. preferences：明确的喜好与设置，格式 {"key": "snake_case_key", "value": "..."}。
{triples}
{profile_number}. profile_updates：只包含对话中明确提到的字段。identity、occupation 为字符串；interests、preferences、values、relationships、personality 为字符串数组。

只提取明确提到的信息。所有 content 使用对话的语言。没有信息的类别返回空列表。

```json
{"facts": [], "episodes": [], "preferences": []{triples_key}, "profile_updates": {}}
```"#;

const ZH_TRIPLES: &str = r#"4. triples：从 facts 和 episodes 中提取的实体关系。
   格式：{"subject": "...", "subject_type": "user|person|organization|location|event|skill|concept|entity", "relation": "works_at|lives_in|has_skill|studied_at|uses|knows|met|attended|visited|occurred_at|occurred_on|...", "object": "...", "object_type": "...", "content": "...", "confidence": 0.0-1.0}
   用户本人的 subject 填 "user"，subject_type 填 "user"。"#;

const ZH_TEMPORAL: &str = r#"
会话时间：{session_time}。请据此把相对时间（"昨天"、"上周"、"三年前"）换算为 ISO 8601 的 "timestamp"，原始表达保留在 "timestamp_original"。
"#;

/// Build the single-turn classification prompt.
pub fn build_prompt(
    conversation: &str,
    language: &str,
    session_time: Option<&str>,
    graph_enabled: bool,
) -> String {
    let (template, triples, temporal) = if language == "zh" {
        (ZH_TEMPLATE, ZH_TRIPLES, ZH_TEMPORAL)
    } else {
        (EN_TEMPLATE, EN_TRIPLES, EN_TEMPORAL)
    };
    let temporal = session_time
        .map(|t| temporal.replace("{session_time}", t))
        .unwrap_or_default();
    let (triples, triples_key, profile_number) = if graph_enabled {
        (triples, r#", "triples": []"#, "5")
    } else {
        ("", "", "4")
    };

    template
        .replace("{temporal}", &temporal)
        .replace("{triples}", triples)
        .replace("{triples_key}", triples_key)
        .replace("{profile_number}", profile_number)
        .replace("{conversation}", conversation)
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Emotion {
    pub valence: Option<f64>,
    pub arousal: Option<f64>,
    pub label: Option<String>,
}

impl Emotion {
    /// Metadata form with missing fields zeroed.
    pub fn to_metadata(&self) -> Value {
        serde_json::json!({
            "valence": self.valence.unwrap_or(0.0),
            "arousal": self.arousal.unwrap_or(0.0),
            "label": self.label.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedFact {
    pub content: String,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub emotion: Option<Emotion>,
    pub entities: Option<Value>,
    pub timestamp: Option<String>,
    pub timestamp_original: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedEpisode {
    pub content: String,
    pub timestamp: Option<String>,
    pub timestamp_original: Option<String>,
    pub people: Option<Vec<String>>,
    pub location: Option<String>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub emotion: Option<Emotion>,
    pub entities: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedPreference {
    pub key: String,
    pub value: Value,
}

/// Parsed model reply.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub facts: Vec<ExtractedFact>,
    pub episodes: Vec<ExtractedEpisode>,
    pub preferences: Vec<ExtractedPreference>,
    pub triples: Vec<Triple>,
    pub profile_updates: Map<String, Value>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.episodes.is_empty()
            && self.preferences.is_empty()
            && self.triples.is_empty()
            && self.profile_updates.is_empty()
    }
}

/// Body of the first fenced block if there is one, else the trimmed text.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let body = &text[start + 3..];
    let body = body.strip_prefix("json").unwrap_or(body);
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parse the fenced or bare JSON object. `None` when the reply is not an object.
pub fn parse_classification(reply: &str) -> Option<Classification> {
    let value: Value = match serde_json::from_str(strip_code_fence(reply)) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "classification reply is not valid JSON");
            return None;
        }
    };
    let Value::Object(mut object) = value else {
        tracing::warn!("classification reply is not a JSON object");
        return None;
    };

    let profile_updates = match object.remove("profile_updates") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Some(Classification {
        facts: items(&mut object, "facts"),
        episodes: items(&mut object, "episodes"),
        preferences: items(&mut object, "preferences"),
        triples: items(&mut object, "triples"),
        profile_updates,
    })
}

fn items<T: DeserializeOwned>(object: &mut Map<String, Value>, key: &str) -> Vec<T> {
    let Some(Value::Array(values)) = object.remove(key) else {
        return Vec::new();
    };
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(category = key, error = %e, "dropping malformed item");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_follows_cjk_ratio() {
        assert_eq!(detect_language("I work at Google"), "en");
        assert_eq!(detect_language("我在谷歌工作"), "zh");
        assert_eq!(detect_language(""), "en");
        assert_eq!(language_confidence("hello"), 1.0);
        assert_eq!(language_confidence("..."), 0.5);
    }

    #[test]
    fn prompt_includes_triples_only_with_graph() {
        let with = build_prompt("USER: hi", "en", Some("2024-03-01T10:00:00Z"), true);
        assert!(with.contains("triples:"));
        assert!(with.contains("2024-03-01T10:00:00Z"));
        assert!(with.contains("USER: hi"));

        let without = build_prompt("USER: hi", "en", None, false);
        assert!(!without.contains("triples"));
        assert!(!without.contains("Session time"));
        assert!(build_prompt("用户: 你好", "zh", None, true).contains("从下面的对话"));
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("sure:\n```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn parse_is_lenient_inside_an_object() {
        let reply = r#"```json
{
  "facts": [{"content": "Alice works at Google", "importance": 8}, {"content": 42}],
  "episodes": "not a list",
  "preferences": [{"key": "drink", "value": "tea"}],
  "triples": [{"subject": "user", "subject_type": "user", "relation": "works_at", "object": "Google", "object_type": "organization"}],
  "profile_updates": {"occupation": "engineer"}
}
```"#;
        let parsed = parse_classification(reply).unwrap();
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].importance, Some(8.0));
        assert!(parsed.episodes.is_empty());
        assert_eq!(parsed.preferences[0].key, "drink");
        assert_eq!(parsed.triples[0].relation, "works_at");
        assert_eq!(parsed.profile_updates["occupation"], "engineer");
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(parse_classification("This is not valid JSON").is_none());
        assert!(parse_classification("[1, 2]").is_none());
        assert!(parse_classification("{}").unwrap().is_empty());
    }
}

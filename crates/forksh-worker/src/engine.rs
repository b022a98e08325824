//! Engines — what a worker serves.
//!
//! The host only knows message shapes; what `read`, `write` and `status`
//! mean is up to the engine behind the link.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// A request the engine could not carry out. Sent to the host as `err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unsupported query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

/// The data side of a worker.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Current status, reported as the body of a `status` reply.
    async fn status(&self) -> Value;

    /// Subjects matching a query, each reported as one `next` frame.
    async fn read(&self, jrql: Value) -> Result<Vec<Value>, EngineError>;

    /// Apply an update.
    async fn write(&self, jrql: Value) -> Result<(), EngineError>;

    /// Release resources before the worker exits.
    async fn close(&self) {}
}

/// Subjects keyed by `@id`, held in memory.
///
/// Writes accept a subject, an array of subjects, or
/// `{"@delete": ..., "@insert": ...}`. Reads accept `{"@describe": id}`,
/// with `"?s"` describing every subject.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    subjects: Mutex<BTreeMap<String, Map<String, Value>>>,
    ticks: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn subjects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Map<String, Value>>> {
        self.subjects.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.subjects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects().is_empty()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn status(&self) -> Value {
        json!({
            "online": true,
            "outdated": false,
            "silo": true,
            "ticks": self.ticks.load(Ordering::SeqCst),
        })
    }

    async fn read(&self, jrql: Value) -> Result<Vec<Value>, EngineError> {
        let describe = match &jrql {
            Value::Object(query) => query.get("@describe"),
            _ => None,
        }
        .ok_or_else(|| EngineError::InvalidQuery(jrql.to_string()))?;

        let subjects = self.subjects();
        let found = match describe {
            Value::String(var) if var == "?s" => subjects.values().cloned().map(Value::Object).collect(),
            id => subjects
                .get(&id_key(id)?)
                .cloned()
                .map(Value::Object)
                .into_iter()
                .collect(),
        };
        Ok(found)
    }

    async fn write(&self, jrql: Value) -> Result<(), EngineError> {
        let update = Update::from_jrql(jrql)?;
        let mut subjects = self.subjects();
        for subject in update.delete {
            delete(&mut subjects, subject)?;
        }
        for subject in update.insert {
            insert(&mut subjects, subject)?;
        }
        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(ticks, subjects = subjects.len(), "update applied");
        Ok(())
    }
}

struct Update {
    delete: Vec<Value>,
    insert: Vec<Value>,
}

impl Update {
    fn from_jrql(jrql: Value) -> Result<Self, EngineError> {
        match jrql {
            Value::Object(mut map) if map.contains_key("@insert") || map.contains_key("@delete") => Ok(Self {
                delete: map.remove("@delete").map(spread).unwrap_or_default(),
                insert: map.remove("@insert").map(spread).unwrap_or_default(),
            }),
            subject @ (Value::Object(_) | Value::Array(_)) => Ok(Self {
                delete: Vec::new(),
                insert: spread(subject),
            }),
            other => Err(EngineError::InvalidUpdate(other.to_string())),
        }
    }
}

fn spread(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Subject ids are strings; numbers are accepted and keyed by their text.
fn id_key(id: &Value) -> Result<String, EngineError> {
    match id {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(EngineError::InvalidQuery(format!("bad @id {other}"))),
    }
}

fn subject_parts(subject: Value) -> Result<(String, Map<String, Value>), EngineError> {
    let Value::Object(mut props) = subject else {
        return Err(EngineError::InvalidUpdate(format!("not a subject: {subject}")));
    };
    let id = props
        .remove("@id")
        .ok_or_else(|| EngineError::InvalidUpdate(format!("subject has no @id: {}", Value::Object(props.clone()))))?;
    let id = id_key(&id).map_err(|e| EngineError::InvalidUpdate(e.to_string()))?;
    Ok((id, props))
}

fn insert(subjects: &mut BTreeMap<String, Map<String, Value>>, subject: Value) -> Result<(), EngineError> {
    let (id, props) = subject_parts(subject)?;
    let entry = subjects.entry(id.clone()).or_insert_with(|| {
        let mut fresh = Map::new();
        fresh.insert("@id".to_string(), Value::String(id));
        fresh
    });
    entry.extend(props);
    Ok(())
}

/// A bare id (or `{"@id": id}`) deletes the subject; listed properties
/// delete just those properties.
fn delete(subjects: &mut BTreeMap<String, Map<String, Value>>, subject: Value) -> Result<(), EngineError> {
    let subject = match subject {
        Value::String(id) => json!({ "@id": id }),
        other => other,
    };
    let (id, props) = subject_parts(subject)?;
    if props.is_empty() {
        subjects.remove(&id);
    } else if let Some(existing) = subjects.get_mut(&id) {
        for key in props.keys() {
            existing.remove(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    async fn describe(engine: &MemoryEngine, id: &str) -> Vec<Value> {
        engine.read(json!({ "@describe": id })).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_describe() {
        let engine = MemoryEngine::new();
        engine.write(json!({"@id": "fred", "name": "Fred"})).await.unwrap();
        engine.write(json!({"@id": "fred", "height": 5})).await.unwrap();

        assert_eq!(
            describe(&engine, "fred").await,
            vec![json!({"@id": "fred", "name": "Fred", "height": 5})]
        );
        assert!(describe(&engine, "wilma").await.is_empty());
        assert_eq!(engine.status().await["ticks"], json!(2));
    }

    #[tokio::test]
    async fn test_array_and_describe_all() {
        let engine = MemoryEngine::new();
        engine
            .write(json!([{"@id": "b"}, {"@id": "a"}, {"@id": 3}]))
            .await
            .unwrap();
        assert_eq!(
            describe(&engine, "?s").await,
            vec![json!({"@id": "3"}), json!({"@id": "a"}), json!({"@id": "b"})]
        );
    }

    #[tokio::test]
    async fn test_delete_insert() {
        let engine = MemoryEngine::new();
        engine
            .write(json!([{"@id": "fred", "name": "Fred", "age": 40}, {"@id": "wilma"}]))
            .await
            .unwrap();
        engine
            .write(json!({
                "@delete": [{"@id": "fred", "age": 40}, "wilma"],
                "@insert": {"@id": "fred", "age": 41}
            }))
            .await
            .unwrap();

        assert_eq!(engine.len(), 1);
        assert_eq!(describe(&engine, "fred").await, vec![json!({"@id": "fred", "name": "Fred", "age": 41})]);
    }

    #[rstest]
    #[case(json!("fred"))]
    #[case(json!(42))]
    #[case(json!({"name": "no id"}))]
    #[tokio::test]
    async fn test_bad_updates(#[case] update: Value) {
        let engine = MemoryEngine::new();
        assert!(matches!(engine.write(update).await, Err(EngineError::InvalidUpdate(_))));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_query() {
        let engine = MemoryEngine::new();
        let err = engine.read(json!({"@select": "?s"})).await.unwrap_err();
        assert_eq!(err.to_string(), r#"unsupported query: {"@select":"?s"}"#);
    }

    #[tokio::test]
    async fn test_status_shape() {
        let engine = MemoryEngine::new();
        assert_eq!(
            engine.status().await,
            json!({"online": true, "outdated": false, "silo": true, "ticks": 0})
        );
    }
}

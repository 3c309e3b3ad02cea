//! Data Source Adapter — evaluates a segment definition into an ordered
//! sequence of member ids. Pure translation, no caching.

use async_trait::async_trait;
use segments_core::{MemberId, SegmentDefinition, SourceError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A named, read-only query channel into a relational data source. The
/// database itself is a black box behind this trait.
#[async_trait]
pub trait QueryConnection: Send + Sync {
    /// Execute a trusted query verbatim and return its rows.
    async fn query(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>, SourceError>;
}

/// A named external collection exposing lookup methods that enumerate
/// member ids (or objects carrying an `id` field).
#[async_trait]
pub trait ManagerSource: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, SourceError>;
}

/// Evaluates definitions against explicitly registered connections and
/// manager sources. Nothing is resolved ambiently; the host wires in every
/// channel by name.
pub struct DataSourceAdapter {
    exec_connection: String,
    connections: HashMap<String, Arc<dyn QueryConnection>>,
    managers: HashMap<String, Arc<dyn ManagerSource>>,
}

impl DataSourceAdapter {
    /// `exec_connection` names the connection raw queries run on.
    pub fn new(exec_connection: impl Into<String>) -> Self {
        Self {
            exec_connection: exec_connection.into(),
            connections: HashMap::new(),
            managers: HashMap::new(),
        }
    }

    pub fn register_connection(
        &mut self,
        name: impl Into<String>,
        connection: Arc<dyn QueryConnection>,
    ) {
        self.connections.insert(name.into(), connection);
    }

    pub fn register_manager(&mut self, name: impl Into<String>, manager: Arc<dyn ManagerSource>) {
        self.managers.insert(name.into(), manager);
    }

    /// Evaluate a definition into a deduplicated, source-ordered id sequence.
    pub async fn evaluate(
        &self,
        definition: &SegmentDefinition,
    ) -> Result<Vec<MemberId>, SourceError> {
        match definition {
            SegmentDefinition::RawQuery(sql) => self.evaluate_raw(sql).await,
            SegmentDefinition::StaticList(ids) => Ok(dedup(ids.iter().copied())),
            SegmentDefinition::ManagerLookup {
                source,
                method,
                args,
            } => self.evaluate_lookup(source, method, args).await,
        }
    }

    async fn evaluate_raw(&self, sql: &str) -> Result<Vec<MemberId>, SourceError> {
        // The query passes through unchanged, but it must at least be a
        // select before it touches the connection.
        if !sql.to_lowercase().contains("select") {
            return Err(SourceError::QueryMalformed(
                "definition is not a select query".into(),
            ));
        }

        let connection = self.connections.get(&self.exec_connection).ok_or_else(|| {
            SourceError::ConnectionFailed {
                name: self.exec_connection.clone(),
                reason: "no connection registered under this name".into(),
            }
        })?;

        debug!(connection = %self.exec_connection, query = %sql, "Running segment user query");
        let rows = connection.query(sql).await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let cell = row.into_iter().next().ok_or_else(|| {
                SourceError::QueryMalformed("query returned an empty row".into())
            })?;
            ids.push(cell.as_u64().ok_or_else(|| {
                SourceError::QueryMalformed("query returned non-integer results".into())
            })?);
        }
        Ok(dedup(ids.into_iter()))
    }

    async fn evaluate_lookup(
        &self,
        source: &str,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<Vec<MemberId>, SourceError> {
        let manager = self
            .managers
            .get(source)
            .ok_or_else(|| SourceError::MethodNotFound {
                source_name: source.to_string(),
                method: method.to_string(),
            })?;

        let result = manager.invoke(method, args).await?;
        let items = match result {
            // Null cannot be told apart from "no result at all"; an empty
            // array is the way to say "no members".
            serde_json::Value::Null => {
                return Err(SourceError::EmptyResultAmbiguous {
                    source_name: source.to_string(),
                    method: method.to_string(),
                })
            }
            serde_json::Value::Array(items) => items,
            other => {
                return Err(SourceError::QueryMalformed(format!(
                    "lookup `{source}.{method}` returned {other} instead of an enumerable"
                )))
            }
        };

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            // Accept bare ids or objects exposing an `id` field.
            let id = item
                .as_u64()
                .or_else(|| item.get("id").and_then(|id| id.as_u64()))
                .ok_or_else(|| {
                    SourceError::QueryMalformed(format!(
                        "lookup `{source}.{method}` returned a non-identifier element"
                    ))
                })?;
            ids.push(id);
        }
        Ok(dedup(ids.into_iter()))
    }
}

/// Deduplicate preserving first-occurrence order.
fn dedup(ids: impl Iterator<Item = MemberId>) -> Vec<MemberId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeConnection {
        rows: Vec<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl QueryConnection for FakeConnection {
        async fn query(&self, _sql: &str) -> Result<Vec<Vec<serde_json::Value>>, SourceError> {
            Ok(self.rows.clone())
        }
    }

    struct FakeCustomers;

    #[async_trait]
    impl ManagerSource for FakeCustomers {
        async fn invoke(
            &self,
            method: &str,
            args: &[serde_json::Value],
        ) -> Result<serde_json::Value, SourceError> {
            match method {
                "active_ids" => Ok(json!([7, 8, 7])),
                "active_records" => Ok(json!([{"id": 9, "email": "a@b.c"}, {"id": 10}])),
                "broken_shape" => Ok(json!("oops")),
                "nothing" => Ok(serde_json::Value::Null),
                "echo" => Ok(json!(args)),
                _ => Err(SourceError::MethodNotFound {
                    source_name: "customers".into(),
                    method: method.into(),
                }),
            }
        }
    }

    fn adapter_with(rows: Vec<Vec<serde_json::Value>>) -> DataSourceAdapter {
        let mut adapter = DataSourceAdapter::new("default");
        adapter.register_connection("default", Arc::new(FakeConnection { rows }));
        adapter.register_manager("customers", Arc::new(FakeCustomers));
        adapter
    }

    #[tokio::test]
    async fn raw_query_takes_first_column() {
        let adapter = adapter_with(vec![
            vec![json!(1), json!("alice")],
            vec![json!(3), json!("bob")],
            vec![json!(5), json!("carol")],
        ]);
        let ids = adapter
            .evaluate(&SegmentDefinition::RawQuery(
                "select id, name from users where active=1".into(),
            ))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn raw_query_with_zero_rows_is_an_empty_set() {
        let adapter = adapter_with(vec![]);
        let ids = adapter
            .evaluate(&SegmentDefinition::RawQuery(
                "select id from users where 1=0".into(),
            ))
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn non_select_query_is_rejected_before_the_connection() {
        let adapter = adapter_with(vec![]);
        let err = adapter
            .evaluate(&SegmentDefinition::RawQuery("drop table users".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::QueryMalformed(_)));
    }

    #[tokio::test]
    async fn non_integer_results_are_rejected() {
        let adapter = adapter_with(vec![vec![json!("alice")]]);
        let err = adapter
            .evaluate(&SegmentDefinition::RawQuery("select name from users".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::QueryMalformed(_)));
    }

    #[tokio::test]
    async fn unregistered_connection_fails() {
        let adapter = DataSourceAdapter::new("replica");
        let err = adapter
            .evaluate(&SegmentDefinition::RawQuery("select id from users".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ConnectionFailed { name, .. } if name == "replica"));
    }

    #[tokio::test]
    async fn static_list_dedups_preserving_order() {
        let adapter = adapter_with(vec![]);
        let ids = adapter
            .evaluate(&SegmentDefinition::StaticList(vec![3, 1, 3, 2, 1]))
            .await
            .unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn manager_lookup_accepts_bare_ids() {
        let adapter = adapter_with(vec![]);
        let ids = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "customers".into(),
                method: "active_ids".into(),
                args: vec![],
            })
            .await
            .unwrap();
        assert_eq!(ids, vec![7, 8]);
    }

    #[tokio::test]
    async fn manager_lookup_accepts_objects_with_id_field() {
        let adapter = adapter_with(vec![]);
        let ids = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "customers".into(),
                method: "active_records".into(),
                args: vec![],
            })
            .await
            .unwrap();
        assert_eq!(ids, vec![9, 10]);
    }

    #[tokio::test]
    async fn unknown_manager_or_method_is_method_not_found() {
        let adapter = adapter_with(vec![]);

        let err = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "orders".into(),
                method: "anything".into(),
                args: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::MethodNotFound { .. }));

        let err = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "customers".into(),
                method: "missing".into(),
                args: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn null_lookup_result_is_ambiguous() {
        let adapter = adapter_with(vec![]);
        let err = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "customers".into(),
                method: "nothing".into(),
                args: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::EmptyResultAmbiguous { .. }));
    }

    #[tokio::test]
    async fn unusable_lookup_shape_is_rejected() {
        let adapter = adapter_with(vec![]);
        let err = adapter
            .evaluate(&SegmentDefinition::ManagerLookup {
                source: "customers".into(),
                method: "broken_shape".into(),
                args: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::QueryMalformed(_)));
    }
}

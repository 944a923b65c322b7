//! SQL access: pool contract, connection gateway and composition root.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       DatabaseProvider                   │
//! │  - resolves ConnectionInfo once          │
//! │  - owns the lazily built gateway         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       ConnectionGateway                  │
//! │  - single-flight pool connect            │
//! │  - one retry on token expiry             │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       PoolFactory / SqlPool              │
//! │  - SQL Server via tiberius               │
//! └─────────────────────────────────────────┘
//! ```

use crate::error::DataError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

mod gateway;
mod mssql;
mod pool;
mod provider;

pub use gateway::{ConnectionGateway, GatewayOptions};
pub use mssql::TiberiusPoolFactory;
pub use pool::{Authentication, PoolConfig, PoolFactory, SqlPool};
pub use provider::{ConnectionInfo, DatabaseProvider};

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Named statement parameters.
pub type Parameters = BTreeMap<String, SqlValue>;

/// Parameter value bound to a statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A statement plus its named inputs, built per execution.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlRequest {
    pub statement: String,
    pub inputs: Vec<(String, SqlValue)>,
}

impl SqlRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            inputs: Vec::new(),
        }
    }

    /// Binds a named parameter (without the leading `@`).
    pub fn input(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.inputs.push((name.into(), value.into()));
        self
    }
}

/// Anything that can run a parameterised statement and hand back rows.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query_rows(
        &self,
        statement: &str,
        parameters: &Parameters,
    ) -> Result<Vec<Row>, DataError>;
}

/// Deserialize raw rows into `T`.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, DataError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row))
                .map_err(|e| DataError::Decode(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from("abc"), SqlValue::Text("abc".to_string()));
        assert_eq!(SqlValue::from(25u32), SqlValue::Int(25));
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("001")), SqlValue::Text("001".to_string()));
    }

    #[test]
    fn test_request_inputs_keep_order() {
        let request = SqlRequest::new("SELECT @id, @name")
            .input("id", 42)
            .input("name", "x");
        assert_eq!(
            request.inputs,
            vec![
                ("id".to_string(), SqlValue::Int(42)),
                ("name".to_string(), SqlValue::Text("x".to_string())),
            ]
        );
    }

    #[test]
    fn test_decode_rows() {
        #[derive(Debug, Deserialize)]
        struct Total {
            total: i64,
        }

        let row = json!({"total": 12}).as_object().unwrap().clone();
        let decoded: Vec<Total> = decode_rows(vec![row]).unwrap();
        assert_eq!(decoded[0].total, 12);

        let bad = json!({"total": "many"}).as_object().unwrap().clone();
        let err = decode_rows::<Total>(vec![bad]).unwrap_err();
        assert!(matches!(err, DataError::Decode(_)));
    }
}

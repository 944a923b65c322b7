//! SQL Server pool backed by tiberius.

use super::pool::{Authentication, PoolConfig, PoolFactory, SqlPool};
use super::{Row, SqlRequest, SqlValue};
use crate::error::DataError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

const DEFAULT_PORT: u16 = 1433;

type TdsClient = Client<Compat<TcpStream>>;

/// Opens one TDS connection per pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiberiusPoolFactory;

#[async_trait]
impl PoolFactory for TiberiusPoolFactory {
    async fn connect(&self, config: PoolConfig) -> Result<Arc<dyn SqlPool>, DataError> {
        let client = open_client(&config).await?;
        debug!(server = %config.server, database = %config.database, "SQL connection established");
        Ok(Arc::new(TiberiusPool {
            client: Mutex::new(Some(client)),
            connected: AtomicBool::new(true),
        }))
    }
}

/// Single connection; statements run one at a time.
struct TiberiusPool {
    client: Mutex<Option<TdsClient>>,
    connected: AtomicBool,
}

#[async_trait]
impl SqlPool for TiberiusPool {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: &SqlRequest) -> Result<Vec<Row>, DataError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DataError::Query("SQL pool is closed".to_string()))?;

        let sql = bind_named(request)?;
        let params: Vec<&dyn ToSql> = request
            .inputs
            .iter()
            .map(|(_, value)| value as &dyn ToSql)
            .collect();

        let rows = match run_query(client, &sql, &params).await {
            Ok(rows) => rows,
            Err(e) => {
                if matches!(e, tiberius::error::Error::Io { .. }) {
                    warn!(error = %e, "SQL connection broken");
                    self.connected.store(false, Ordering::SeqCst);
                }
                return Err(DataError::Query(e.to_string()));
            }
        };

        rows.into_iter().map(row_to_json).collect()
    }

    async fn close(&self) -> Result<(), DataError> {
        self.connected.store(false, Ordering::SeqCst);
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client
                .close()
                .await
                .map_err(|e| DataError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

async fn run_query(
    client: &mut TdsClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> tiberius::Result<Vec<tiberius::Row>> {
    client.query(sql, params).await?.into_first_result().await
}

async fn open_client(pool: &PoolConfig) -> Result<TdsClient, DataError> {
    let config = client_config(pool);

    match connect_tds(config.clone()).await {
        // Azure SQL gateways may redirect to the node hosting the database
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!(host = %host, port, "SQL connection redirected");
            let mut config = config;
            config.host(&host);
            config.port(port);
            connect_tds(config).await.map_err(connect_error)
        }
        other => other.map_err(connect_error),
    }
}

async fn connect_tds(config: Config) -> tiberius::Result<TdsClient> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

fn connect_error(e: tiberius::error::Error) -> DataError {
    DataError::Connect(e.to_string())
}

fn client_config(pool: &PoolConfig) -> Config {
    let (host, port) = split_server(&pool.server);

    let mut config = Config::new();
    config.host(host);
    config.port(port);
    config.database(&pool.database);
    config.encryption(if pool.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if pool.trust_server_certificate {
        config.trust_cert();
    }
    config.authentication(match &pool.authentication {
        Authentication::SqlPassword { user, password } => AuthMethod::sql_server(user, password),
        Authentication::AccessToken(token) => AuthMethod::aad_token(token),
    });
    config
}

/// Accepts `host`, `host,port` and the `tcp:` prefix used in Azure
/// connection strings.
fn split_server(server: &str) -> (&str, u16) {
    let server = server.trim();
    let server = server.strip_prefix("tcp:").unwrap_or(server);
    match server.split_once(',') {
        Some((host, port)) => (host.trim(), port.trim().parse().unwrap_or(DEFAULT_PORT)),
        None => (server, DEFAULT_PORT),
    }
}

/// Maps named inputs onto tiberius' positional `@P1..@Pn` by declaring each
/// name as a local variable ahead of the statement.
fn bind_named(request: &SqlRequest) -> Result<String, DataError> {
    let mut sql = String::new();
    for (index, (name, value)) in request.inputs.iter().enumerate() {
        if !is_identifier(name) {
            return Err(DataError::Query(format!(
                "Invalid parameter name '{}'",
                name
            )));
        }
        sql.push_str(&format!(
            "DECLARE @{} {} = @P{};\n",
            name,
            declared_type(value),
            index + 1
        ));
    }
    sql.push_str(&request.statement);
    Ok(sql)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn declared_type(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Bool(_) => "BIT",
        SqlValue::Int(_) => "BIGINT",
        SqlValue::Float(_) => "FLOAT",
        SqlValue::Null | SqlValue::Text(_) => "NVARCHAR(MAX)",
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(v) => ColumnData::Bit(Some(*v)),
            SqlValue::Int(v) => ColumnData::I64(Some(*v)),
            SqlValue::Float(v) => ColumnData::F64(Some(*v)),
            SqlValue::Text(v) => ColumnData::String(Some(Cow::Borrowed(v.as_str()))),
        }
    }
}

fn row_to_json(row: tiberius::Row) -> Result<Row, DataError> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let mut out = Row::new();
    for (name, data) in names.into_iter().zip(row) {
        out.insert(name, column_to_json(&data)?);
    }
    Ok(out)
}

fn column_to_json(data: &ColumnData<'static>) -> Result<Value, DataError> {
    let decode = |e: tiberius::error::Error| DataError::Decode(e.to_string());

    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::String(v) => v.as_ref().map(|s| Value::from(s.as_ref())),
        ColumnData::Guid(v) => v.map(|guid| Value::from(guid.to_string())),
        ColumnData::Numeric(v) => v.map(|n| Value::from(f64::from(n))),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)
                .map_err(decode)?
                .map(|dt| Value::from(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()))
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data)
            .map_err(decode)?
            .map(|d| Value::from(d.format("%Y-%m-%d").to_string())),
        ColumnData::Time(_) => NaiveTime::from_sql(data)
            .map_err(decode)?
            .map(|t| Value::from(t.format("%H:%M:%S%.3f").to_string())),
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(data)
            .map_err(decode)?
            .map(|dt| Value::from(dt.to_rfc3339_opts(SecondsFormat::Millis, true))),
        // Binary and XML columns are not surfaced
        _ => None,
    };

    Ok(value.unwrap_or(Value::Null))
}

use crate::database::{decode_rows, Parameters, SqlExecutor, SqlValue};
use crate::error::DataError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

const SCHEMA: &str = "M3FDBPRD";

/// Filters and window for one search. Absent filters match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomerSearchCriteria {
    pub name: Option<String>,
    pub customer_number: Option<String>,
    pub phone: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentOrder {
    pub order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSummary {
    pub customer_number: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
    pub order_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_order_date: Option<String>,
    pub recent_orders: Vec<RecentOrder>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomerSearchResult {
    pub total: i64,
    pub customers: Vec<CustomerSummary>,
}

#[derive(Deserialize)]
struct CountRow {
    #[serde(default)]
    total: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerRow {
    #[serde(deserialize_with = "text")]
    customer_number: String,
    #[serde(deserialize_with = "text")]
    customer_name: String,
    #[serde(default, deserialize_with = "optional_text")]
    phone: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    vat: Option<String>,
    #[serde(default)]
    order_count: Option<i64>,
    #[serde(default, deserialize_with = "optional_text")]
    latest_order_date: Option<String>,
    #[serde(default)]
    recent_orders_json: Option<String>,
}

impl From<CustomerRow> for CustomerSummary {
    fn from(row: CustomerRow) -> Self {
        Self {
            customer_number: row.customer_number,
            name: row.customer_name,
            phone: row.phone,
            vat_number: row.vat,
            order_count: row.order_count.unwrap_or(0),
            latest_order_date: row.latest_order_date,
            recent_orders: parse_recent_orders(row.recent_orders_json.as_deref()),
        }
    }
}

/// Customer lookups against the ERP tables.
pub struct CustomerRepository {
    executor: Arc<dyn SqlExecutor>,
}

impl CustomerRepository {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    /// Counts all matches, then fetches the requested window ordered by name.
    pub async fn search(
        &self,
        criteria: &CustomerSearchCriteria,
    ) -> Result<CustomerSearchResult, DataError> {
        let mut parameters = Parameters::new();
        parameters.insert(
            "namePattern".to_string(),
            criteria.name.as_ref().map(|name| format!("%{}%", name)).into(),
        );
        parameters.insert(
            "customerNumber".to_string(),
            criteria.customer_number.clone().into(),
        );
        parameters.insert("phone".to_string(), criteria.phone.clone().into());

        let total = decode_rows::<CountRow>(
            self.executor
                .query_rows(&count_query(), &parameters)
                .await?,
        )?
        .first()
        .map_or(0, |row| row.total);

        parameters.insert("limit".to_string(), to_int(criteria.limit));
        parameters.insert("offset".to_string(), to_int(criteria.offset));

        let rows = decode_rows::<CustomerRow>(
            self.executor.query_rows(&data_query(), &parameters).await?,
        )?;

        Ok(CustomerSearchResult {
            total,
            customers: rows.into_iter().map(CustomerSummary::from).collect(),
        })
    }
}

fn to_int(value: u64) -> SqlValue {
    SqlValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
}

const FILTERS: &str = "WHERE (@customerNumber IS NULL OR cus.OKCUNO = @customerNumber)
  AND (@namePattern IS NULL OR cus.OKCUNM LIKE @namePattern)
  AND (@phone IS NULL OR cus.OKPHNO = @phone)";

fn count_query() -> String {
    format!(
        "SELECT COUNT(*) AS total
FROM {SCHEMA}.OCUSMA AS cus
{FILTERS};"
    )
}

fn data_query() -> String {
    format!(
        "WITH CustomerOrders AS (
  SELECT
    head.OACUNO AS CustomerNumber,
    COUNT(DISTINCT head.OAORNO) AS OrderCount,
    MAX(head.OAORDT) AS LatestOrderDate
  FROM {SCHEMA}.OOHEAD AS head
  GROUP BY head.OACUNO
)
SELECT
  cus.OKCUNO AS customerNumber,
  cus.OKCUNM AS customerName,
  cus.OKPHNO AS phone,
  cus.OKVTCD AS vat,
  orders.OrderCount AS orderCount,
  orders.LatestOrderDate AS latestOrderDate,
  recentOrders.recentOrdersJson AS recentOrdersJson
FROM {SCHEMA}.OCUSMA AS cus
LEFT JOIN CustomerOrders AS orders ON orders.CustomerNumber = cus.OKCUNO
OUTER APPLY (
  SELECT TOP (5)
    head.OAORNO AS orderNumber,
    head.OACUOR AS customerOrderNumber,
    head.OAORDT AS orderDate
  FROM {SCHEMA}.OOHEAD AS head
  WHERE head.OACUNO = cus.OKCUNO
  ORDER BY head.OAORDT DESC
  FOR JSON PATH
) AS recentOrders(recentOrdersJson)
{FILTERS}
ORDER BY cus.OKCUNM
OFFSET @offset ROWS FETCH NEXT @limit ROWS ONLY;"
    )
}

/// Decodes the `FOR JSON` payload of recent orders. Anything malformed
/// yields an empty list rather than an error.
pub fn parse_recent_orders(payload: Option<&str>) -> Vec<RecentOrder> {
    let Some(payload) = payload.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };

    let Ok(Value::Array(elements)) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };

    let string_field = |order: &serde_json::Map<String, Value>, key: &str| {
        order.get(key).and_then(Value::as_str).map(str::to_string)
    };

    elements
        .iter()
        .map(|element| {
            element.as_object().map(|order| RecentOrder {
                order_number: string_field(order, "orderNumber").unwrap_or_default(),
                customer_order_number: string_field(order, "customerOrderNumber"),
                order_date: string_field(order, "orderDate"),
            })
        })
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

/// ERP columns are mostly text, but numeric codes and dates show up too.
fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_text(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Row;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers the count query and the data query from canned rows.
    struct FakeExecutor {
        count_rows: Vec<Row>,
        data_rows: Vec<Row>,
        calls: Mutex<Vec<(String, Parameters)>>,
    }

    impl FakeExecutor {
        fn new(count_rows: Vec<Value>, data_rows: Vec<Value>) -> Arc<Self> {
            let to_rows = |values: Vec<Value>| -> Vec<Row> {
                values
                    .into_iter()
                    .map(|v| v.as_object().unwrap().clone())
                    .collect()
            };
            Arc::new(Self {
                count_rows: to_rows(count_rows),
                data_rows: to_rows(data_rows),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SqlExecutor for FakeExecutor {
        async fn query_rows(
            &self,
            statement: &str,
            parameters: &Parameters,
        ) -> Result<Vec<Row>, DataError> {
            self.calls
                .lock()
                .unwrap()
                .push((statement.to_string(), parameters.clone()));
            if statement.contains("COUNT(*) AS total") {
                Ok(self.count_rows.clone())
            } else {
                Ok(self.data_rows.clone())
            }
        }
    }

    fn criteria() -> CustomerSearchCriteria {
        CustomerSearchCriteria {
            name: Some("ACME".to_string()),
            customer_number: None,
            phone: None,
            limit: 10,
            offset: 20,
        }
    }

    #[tokio::test]
    async fn test_search_maps_rows() {
        let executor = FakeExecutor::new(
            vec![json!({"total": 1})],
            vec![json!({
                "customerNumber": "C001",
                "customerName": "ACME Corp",
                "phone": "555-0100",
                "vat": null,
                "orderCount": 3,
                "latestOrderDate": "2024-01-01",
                "recentOrdersJson": "[{\"orderNumber\":\"O1\",\"customerOrderNumber\":\"PO-9\",\"orderDate\":\"2024-01-01\"}]"
            })],
        );
        let repository = CustomerRepository::new(executor.clone());

        let result = repository.search(&criteria()).await.unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(
            result.customers,
            vec![CustomerSummary {
                customer_number: "C001".to_string(),
                name: "ACME Corp".to_string(),
                phone: Some("555-0100".to_string()),
                vat_number: None,
                order_count: 3,
                latest_order_date: Some("2024-01-01".to_string()),
                recent_orders: vec![RecentOrder {
                    order_number: "O1".to_string(),
                    customer_order_number: Some("PO-9".to_string()),
                    order_date: Some("2024-01-01".to_string()),
                }],
            }]
        );
    }

    #[tokio::test]
    async fn test_search_binds_parameters() {
        let executor = FakeExecutor::new(vec![json!({"total": 0})], vec![]);
        let repository = CustomerRepository::new(executor.clone());

        repository.search(&criteria()).await.unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);

        let (count_sql, count_params) = &calls[0];
        assert!(count_sql.contains("FROM M3FDBPRD.OCUSMA AS cus"));
        assert_eq!(count_params["namePattern"], SqlValue::Text("%ACME%".to_string()));
        assert_eq!(count_params["customerNumber"], SqlValue::Null);
        assert_eq!(count_params["phone"], SqlValue::Null);
        assert!(!count_params.contains_key("limit"));

        let (data_sql, data_params) = &calls[1];
        assert!(data_sql.contains("OFFSET @offset ROWS FETCH NEXT @limit ROWS ONLY"));
        assert_eq!(data_params["limit"], SqlValue::Int(10));
        assert_eq!(data_params["offset"], SqlValue::Int(20));
        assert_eq!(data_params["namePattern"], SqlValue::Text("%ACME%".to_string()));
    }

    #[tokio::test]
    async fn test_absent_name_binds_null_pattern() {
        let executor = FakeExecutor::new(vec![], vec![]);
        let repository = CustomerRepository::new(executor.clone());

        let result = repository
            .search(&CustomerSearchCriteria {
                customer_number: Some("C001".to_string()),
                limit: 25,
                ..Default::default()
            })
            .await
            .unwrap();

        // Missing count row counts as zero
        assert_eq!(result.total, 0);

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].1["namePattern"], SqlValue::Null);
        assert_eq!(calls[0].1["customerNumber"], SqlValue::Text("C001".to_string()));
    }

    #[tokio::test]
    async fn test_missing_optional_columns() {
        let executor = FakeExecutor::new(
            vec![json!({"total": 1})],
            vec![json!({
                "customerNumber": "C002",
                "customerName": "Globex",
                "phone": null,
                "vat": null,
                "orderCount": null,
                "latestOrderDate": null,
                "recentOrdersJson": null
            })],
        );
        let repository = CustomerRepository::new(executor);

        let result = repository.search(&criteria()).await.unwrap();
        let customer = &result.customers[0];

        assert_eq!(customer.order_count, 0);
        assert!(customer.recent_orders.is_empty());

        let serialized = serde_json::to_value(customer).unwrap();
        assert_eq!(
            serialized,
            json!({
                "customerNumber": "C002",
                "name": "Globex",
                "orderCount": 0,
                "recentOrders": []
            })
        );
    }

    #[tokio::test]
    async fn test_numeric_order_date_becomes_text() {
        let executor = FakeExecutor::new(
            vec![json!({"total": 1})],
            vec![json!({
                "customerNumber": "C003",
                "customerName": "Initech",
                "orderCount": 1,
                "latestOrderDate": 20240115
            })],
        );
        let repository = CustomerRepository::new(executor);

        let result = repository.search(&criteria()).await.unwrap();
        assert_eq!(
            result.customers[0].latest_order_date.as_deref(),
            Some("20240115")
        );
    }

    #[tokio::test]
    async fn test_executor_error_propagates() {
        struct Failing;

        #[async_trait]
        impl SqlExecutor for Failing {
            async fn query_rows(&self, _: &str, _: &Parameters) -> Result<Vec<Row>, DataError> {
                Err(DataError::Query("boom".to_string()))
            }
        }

        let repository = CustomerRepository::new(Arc::new(Failing));
        let err = repository.search(&criteria()).await.unwrap_err();
        assert_eq!(err, DataError::Query("boom".to_string()));
    }

    #[test]
    fn test_parse_recent_orders_absent_or_invalid() {
        assert!(parse_recent_orders(None).is_empty());
        assert!(parse_recent_orders(Some("")).is_empty());
        assert!(parse_recent_orders(Some("not json")).is_empty());
        assert!(parse_recent_orders(Some("{\"orderNumber\":\"O1\"}")).is_empty());
    }

    #[test]
    fn test_parse_recent_orders_non_string_fields() {
        let orders = parse_recent_orders(Some(
            r#"[{"orderNumber":42,"customerOrderNumber":7,"orderDate":"2024-02-02"}]"#,
        ));
        assert_eq!(
            orders,
            vec![RecentOrder {
                order_number: String::new(),
                customer_order_number: None,
                order_date: Some("2024-02-02".to_string()),
            }]
        );
    }

    #[test]
    fn test_parse_recent_orders_non_object_element() {
        assert!(parse_recent_orders(Some(r#"[{"orderNumber":"O1"}, null]"#)).is_empty());
        assert!(parse_recent_orders(Some(r#"["O1"]"#)).is_empty());
    }
}

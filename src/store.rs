use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;

/// A stored record, in DynamoDB attribute-map form.
pub type Item = HashMap<String, AttributeValue>;

/// Number of items fetched per page when walking a partition (see
/// [query_page]).
pub const PAGE_SIZE: i32 = 20;

#[derive(Debug, thiserror::Error)]
#[error("{op} on table {table} failed: {message}")]
pub struct StoreError {
    pub op: &'static str,
    pub table: String,
    pub message: String,
    /// Set when the store rejected the call for lack of write capacity, so
    /// callers that can afford to wait may back off and retry.
    pub throttled: bool,
}

impl StoreError {
    fn new(op: &'static str, table: &str, source: impl std::fmt::Display) -> Self {
        StoreError {
            op,
            table: table.to_string(),
            message: source.to_string(),
            throttled: false,
        }
    }
}

/// Key-equality condition for [RecordStore::query], optionally against a
/// secondary index.
#[derive(Debug, Clone)]
pub struct KeyCondition {
    pub index: Option<String>,
    pub keys: Vec<(String, String)>,
}

impl KeyCondition {
    pub fn equals(name: &str, value: &str) -> Self {
        KeyCondition {
            index: None,
            keys: vec![(name.to_string(), value.to_string())],
        }
    }

    pub fn and_equals(mut self, name: &str, value: &str) -> Self {
        self.keys.push((name.to_string(), value.to_string()));
        self
    }

    pub fn on_index(mut self, index: &str) -> Self {
        self.index = Some(index.to_string());
        self
    }
}

/// One page of query results. `last_evaluated_key` is the store's opaque
/// continuation key; absent means the partition is exhausted.
#[derive(Debug, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

/// The record store collaborator. Every service takes this by constructor
/// injection so tests can substitute an in-memory fake.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, table: &str, key: Item) -> Result<Option<Item>, StoreError>;

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError>;

    async fn delete(&self, table: &str, key: Item) -> Result<(), StoreError>;

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        exclusive_start_key: Option<Item>,
        limit: Option<i32>,
    ) -> Result<QueryPage, StoreError>;

    async fn scan(&self, table: &str) -> Result<Vec<Item>, StoreError>;
}

/// DynamoDB-backed [RecordStore].
#[derive(Clone)]
pub struct DynamoStore {
    client: DynamoDbClient,
}

impl DynamoStore {
    pub fn new(client: DynamoDbClient) -> Self {
        DynamoStore { client }
    }
}

#[async_trait]
impl RecordStore for DynamoStore {
    async fn get(&self, table: &str, key: Item) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| StoreError::new("get", table, e.into_service_error()))?;

        Ok(output.item)
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                StoreError {
                    throttled: service_error.is_provisioned_throughput_exceeded_exception(),
                    ..StoreError::new("put", table, service_error)
                }
            })?;

        Ok(())
    }

    async fn delete(&self, table: &str, key: Item) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| StoreError::new("delete", table, e.into_service_error()))?;

        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        exclusive_start_key: Option<Item>,
        limit: Option<i32>,
    ) -> Result<QueryPage, StoreError> {
        let mut expression = Vec::new();
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        for (i, (name, value)) in condition.keys.iter().enumerate() {
            expression.push(format!("#k{i} = :v{i}"));
            names.insert(format!("#k{i}"), name.clone());
            values.insert(format!(":v{i}"), AttributeValue::S(value.clone()));
        }

        let output = self
            .client
            .query()
            .table_name(table)
            .set_index_name(condition.index.clone())
            .key_condition_expression(expression.join(" and "))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .set_exclusive_start_key(exclusive_start_key)
            .set_limit(limit)
            .send()
            .await
            .map_err(|e| StoreError::new("query", table, e.into_service_error()))?;

        Ok(QueryPage {
            items: output.items.unwrap_or_default(),
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn scan(&self, table: &str) -> Result<Vec<Item>, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(table)
            .send()
            .await
            .map_err(|e| StoreError::new("scan", table, e.into_service_error()))?;

        Ok(output.items.unwrap_or_default())
    }
}

/// Walks a partition in pages of [PAGE_SIZE] until `target_page` is reached.
/// A target beyond the available data yields an empty vec; the store offers no
/// random access, so every intervening page is traversed.
pub async fn query_page(
    store: &dyn RecordStore,
    table: &str,
    condition: &KeyCondition,
    target_page: usize,
) -> Result<Vec<Item>, StoreError> {
    let mut current_page = 0usize;
    let mut start_key = None;

    loop {
        let page = store
            .query(table, condition, start_key, Some(PAGE_SIZE))
            .await?;

        if current_page == target_page {
            return Ok(page.items);
        }

        match page.last_evaluated_key {
            Some(key) => {
                current_page += 1;
                start_key = Some(key);
            }
            None => return Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aws_config::BehaviorVersion;

    // Wire-level check that DynamoStore unwraps a GetItem response into the
    // raw attribute map.
    #[tokio::test]
    async fn test_get_item_replay() {
        let body = r#"{"Item":{"owner_id":{"S":"user-1"},"vin":{"S":"SAMPLEVIN123"},"nickname":{"S":"the wagon"},"odometer":{"N":"42000"}}}"#;
        let replay_event = aws_smithy_runtime::client::http::test_util::ReplayEvent::new(
            http::Request::builder()
                .body(aws_smithy_types::body::SdkBody::from(""))
                .unwrap(),
            http::Response::builder()
                .status(200)
                .body(aws_smithy_types::body::SdkBody::from(body))
                .unwrap(),
        );

        let conf = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(aws_sdk_dynamodb::config::Credentials::new(
                "SOMETESTKEYID",
                "somesecretkey",
                Some("somesessiontoken".to_string()),
                None,
                "",
            ))
            .region(aws_sdk_dynamodb::config::Region::new("eu-central-1"))
            .http_client(
                aws_smithy_runtime::client::http::test_util::StaticReplayClient::new(vec![
                    replay_event,
                ]),
            )
            .build();

        let store = DynamoStore::new(aws_sdk_dynamodb::Client::from_conf(conf));
        let mut key = Item::new();
        key.insert("owner_id".to_string(), AttributeValue::S("user-1".to_string()));
        key.insert("vin".to_string(), AttributeValue::S("SAMPLEVIN123".to_string()));

        let item = store
            .get("vehicle-owner-table", key)
            .await
            .expect("get to succeed")
            .expect("item to be present");
        assert_eq!(
            item.get("nickname"),
            Some(&AttributeValue::S("the wagon".to_string()))
        );
        assert_eq!(item.get("odometer"), Some(&AttributeValue::N("42000".to_string())));
    }

    #[test]
    fn test_key_condition_builder() {
        let condition = KeyCondition::equals("vin", "SAMPLEVIN123")
            .and_equals("trip_id", "trip-9")
            .on_index("vin-trip_id-index");
        assert_eq!(condition.keys.len(), 2);
        assert_eq!(condition.index.as_deref(), Some("vin-trip_id-index"));
    }
}

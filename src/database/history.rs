use std::cmp::Ordering;

use cyder_tools::log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{to_record, KeyValueStore, StoreError, StoreResult};
use crate::service::provider::Provider;

pub type StatRow = Map<String, Value>;

/// Everything recorded about one forecast run, as submitted by the caller.
/// Tables (`response_predicted`, `validation`, `training`) are serialized CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub model: String,
    pub provider: Provider,
    pub temperature: f64,
    pub dataset: String,
    pub columns: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub prompt_type: String,
    pub tsformat: String,
    pub tstype: String,
    #[serde(default)]
    pub examples: u32,
    #[serde(default)]
    pub sampling: Option<String>,
    pub horizon_forecast: u32,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub response_time: Option<f64>,
    pub response_raw: String,
    #[serde(default)]
    pub response_predicted: String,
    #[serde(default)]
    pub validation: String,
    #[serde(default)]
    pub metrics: Vec<StatRow>,
    #[serde(default)]
    pub statistics_val: Vec<StatRow>,
    #[serde(default)]
    pub statistics_pred: Vec<StatRow>,
    #[serde(default)]
    pub training: String,
    pub prompt: String,
}

/// A stored run. Every record has the same shape; absent values are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: HistoryEntry,
    /// Means over the per-column `metrics` rows.
    #[serde(default)]
    pub smape: Option<f64>,
    #[serde(default)]
    pub mae: Option<f64>,
    #[serde(default)]
    pub rmse: Option<f64>,
}

#[derive(Serialize)]
struct NewHistory<'a> {
    #[serde(flatten)]
    entry: &'a HistoryEntry,
    smape: Option<f64>,
    mae: Option<f64>,
    rmse: Option<f64>,
}

fn mean_metric(metrics: &[StatRow], name: &str) -> Option<f64> {
    let values: Vec<f64> = metrics
        .iter()
        .filter_map(|row| {
            row.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .and_then(|(_, value)| value.as_f64())
        })
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: values of different kinds order by kind,
/// numbers numerically, strings and arrays lexicographically.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| compare_values(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    kv: KeyValueStore,
    key: String,
}

impl HistoryStore {
    pub fn new(kv: KeyValueStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    async fn load(&self) -> StoreResult<Vec<HistoryRecord>> {
        self.kv.load(&self.key).await
    }

    async fn save(&self, records: &[HistoryRecord]) -> StoreResult<()> {
        self.kv.save(&self.key, records).await
    }

    pub async fn insert(&self, entry: HistoryEntry) -> StoreResult<HistoryRecord> {
        let smape = mean_metric(&entry.metrics, "smape");
        let mae = mean_metric(&entry.metrics, "mae");
        let rmse = mean_metric(&entry.metrics, "rmse");

        let result = async {
            let new_history = NewHistory {
                entry: &entry,
                smape,
                mae,
                rmse,
            };
            self.kv.insert(&self.key, to_record(&new_history)?).await
        }
        .await;

        match result {
            Ok(id) => {
                info!("Record inserted successfully.");
                Ok(HistoryRecord {
                    id,
                    entry,
                    smape,
                    mae,
                    rmse,
                })
            }
            Err(e) => {
                error!("Error inserting record: {}", e);
                Err(e)
            }
        }
    }

    pub async fn select_all(&self) -> Vec<HistoryRecord> {
        self.load().await.unwrap_or_else(|e| {
            error!("Error selecting records: {}", e);
            Vec::new()
        })
    }

    /// Records of `dataset` whose prompt type is one of `prompt_types`, in
    /// storage order.
    pub async fn select(&self, dataset: &str, prompt_types: &[String]) -> Vec<HistoryRecord> {
        match self.load().await {
            Ok(records) => records
                .into_iter()
                .filter(|r| {
                    r.entry.dataset == dataset && prompt_types.contains(&r.entry.prompt_type)
                })
                .collect(),
            Err(e) => {
                error!("Error selecting records: {}", e);
                Vec::new()
            }
        }
    }

    /// Records that carry all three aggregate metrics, sorted ascending by the
    /// requested columns. An unknown column or a storage failure yields an
    /// empty list.
    pub async fn group_by(&self, columns: &[String]) -> StoreResult<Vec<HistoryRecord>> {
        if columns.is_empty() {
            error!("Error grouping records: columns list cannot be empty");
            return Err(StoreError::InvalidArgument(
                "Columns list cannot be empty.".to_string(),
            ));
        }

        let sorted = async {
            let records = self.load().await?;
            let mut keyed = Vec::with_capacity(records.len());
            for record in records
                .into_iter()
                .filter(|r| r.smape.is_some() && r.mae.is_some() && r.rmse.is_some())
            {
                let fields = to_record(&record)?;
                let sort_key = columns
                    .iter()
                    .map(|column| {
                        fields.get(column).cloned().ok_or_else(|| {
                            StoreError::InvalidArgument(format!("unknown column '{}'", column))
                        })
                    })
                    .collect::<StoreResult<Vec<Value>>>()?;
                keyed.push((sort_key, record));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| compare_values(x, y))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
            Ok::<_, StoreError>(keyed.into_iter().map(|(_, record)| record).collect())
        }
        .await;

        Ok(sorted.unwrap_or_else(|e| {
            error!("Error grouping records: {}", e);
            Vec::new()
        }))
    }

    pub async fn remove(&self, record_id: i64) -> StoreResult<()> {
        let result = async {
            let mut records = self.load().await?;
            let before = records.len();
            records.retain(|r| r.id != record_id);
            if records.len() == before {
                return Err(StoreError::HistoryNotFound(record_id));
            }
            self.save(&records).await
        }
        .await;

        match &result {
            Ok(()) => info!("Record {} removed successfully.", record_id),
            Err(e) => error!("Error removing record: {}", e),
        }
        result
    }

    /// Removes every record matching both predicates and returns how many went.
    /// Matching nothing is not an error.
    pub async fn remove_many(&self, dataset: &str, prompt_types: &[String]) -> StoreResult<usize> {
        let result = async {
            let mut records = self.load().await?;
            let before = records.len();
            records.retain(|r| {
                !(r.entry.dataset == dataset && prompt_types.contains(&r.entry.prompt_type))
            });
            self.save(&records).await?;
            Ok::<_, StoreError>(before - records.len())
        }
        .await;

        match &result {
            Ok(count) => info!("{} records removed successfully.", count),
            Err(e) => error!("Error removing records: {}", e),
        }
        result
    }

    pub async fn remove_all(&self) -> StoreResult<()> {
        let result = self.save(&[]).await;
        match &result {
            Ok(()) => info!("All records removed successfully."),
            Err(e) => error!("Error clearing history: {}", e),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::test_support::memory_store;
    use serde_json::json;

    pub(crate) fn entry(dataset: &str, prompt_type: &str) -> HistoryEntry {
        HistoryEntry {
            model: "gpt-x".to_string(),
            provider: Provider::OpenAi,
            temperature: 0.7,
            dataset: dataset.to_string(),
            columns: vec!["value".to_string()],
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-03".to_string(),
            prompt_type: prompt_type.to_string(),
            tsformat: "ARRAY".to_string(),
            tstype: "NUMERIC".to_string(),
            examples: 0,
            sampling: None,
            horizon_forecast: 4,
            input_tokens: Some(120),
            output_tokens: Some(40),
            response_time: Some(1.25),
            response_raw: "[1, 2, 3, 4]".to_string(),
            response_predicted: "value\n1\n2\n3\n4\n".to_string(),
            validation: "value\n1\n2\n3\n5\n".to_string(),
            metrics: Vec::new(),
            statistics_val: Vec::new(),
            statistics_pred: Vec::new(),
            training: "value\n0\n".to_string(),
            prompt: "forecast the next 4 values".to_string(),
        }
    }

    fn with_metrics(mut entry: HistoryEntry, smape: f64, mae: f64, rmse: f64) -> HistoryEntry {
        entry.metrics = vec![json!({"sMAPE": smape, "MAE": mae, "RMSE": rmse})
            .as_object()
            .unwrap()
            .clone()];
        entry
    }

    fn store() -> HistoryStore {
        HistoryStore::new(memory_store(), "history")
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_in_order() {
        let history = store();
        for n in 1..=3 {
            let record = history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();
            assert_eq!(record.id, n);
        }
        let ids: Vec<i64> = history.select_all().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_select_filters_dataset_and_prompt_type() {
        let history = store();
        history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();
        history.insert(entry("d2", "ZERO_SHOT")).await.unwrap();
        history.insert(entry("d1", "FEW_SHOT")).await.unwrap();
        history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();

        let selected = history.select("d1", &["ZERO_SHOT".to_string()]).await;
        let ids: Vec<i64> = selected.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 4]);

        let both = history
            .select("d1", &["ZERO_SHOT".to_string(), "FEW_SHOT".to_string()])
            .await;
        assert_eq!(both.len(), 3);
    }

    #[tokio::test]
    async fn test_insert_computes_metric_means() {
        let history = store();
        let mut run = entry("d1", "ZERO_SHOT");
        run.metrics = vec![
            json!({"column": "a", "sMAPE": 10.0, "MAE": 1.0, "RMSE": 2.0})
                .as_object()
                .unwrap()
                .clone(),
            json!({"column": "b", "sMAPE": 20.0, "MAE": 3.0, "RMSE": 4.0})
                .as_object()
                .unwrap()
                .clone(),
        ];
        let record = history.insert(run).await.unwrap();
        assert_eq!(record.smape, Some(15.0));
        assert_eq!(record.mae, Some(2.0));
        assert_eq!(record.rmse, Some(3.0));

        let stored = &history.select_all().await[0];
        assert_eq!(stored, &record);
    }

    #[tokio::test]
    async fn test_group_by_requires_columns() {
        let history = store();
        assert!(matches!(
            history.group_by(&[]).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_group_by_filters_and_sorts() {
        let history = store();
        history
            .insert(with_metrics(entry("b", "FEW_SHOT"), 30.0, 3.0, 3.0))
            .await
            .unwrap();
        history.insert(entry("a", "ZERO_SHOT")).await.unwrap(); // no metrics
        history
            .insert(with_metrics(entry("a", "ZERO_SHOT"), 10.0, 1.0, 1.0))
            .await
            .unwrap();
        history
            .insert(with_metrics(entry("a", "COT"), 20.0, 2.0, 2.0))
            .await
            .unwrap();

        let grouped = history
            .group_by(&["dataset".to_string(), "prompt_type".to_string()])
            .await
            .unwrap();
        let keys: Vec<(String, String)> = grouped
            .iter()
            .map(|r| (r.entry.dataset.clone(), r.entry.prompt_type.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), "COT".to_string()),
                ("a".to_string(), "ZERO_SHOT".to_string()),
                ("b".to_string(), "FEW_SHOT".to_string()),
            ]
        );

        let by_smape = history.group_by(&["smape".to_string()]).await.unwrap();
        let smapes: Vec<f64> = by_smape.iter().filter_map(|r| r.smape).collect();
        assert_eq!(smapes, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_group_by_unknown_column_is_empty() {
        let history = store();
        history
            .insert(with_metrics(entry("a", "ZERO_SHOT"), 1.0, 1.0, 1.0))
            .await
            .unwrap();
        let grouped = history.group_by(&["nope".to_string()]).await.unwrap();
        assert!(grouped.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_id_not_reused() {
        let history = store();
        history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();
        history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();

        history.remove(2).await.unwrap();
        assert!(matches!(
            history.remove(2).await,
            Err(StoreError::HistoryNotFound(2))
        ));

        let record = history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();
        assert_eq!(record.id, 3);
    }

    #[tokio::test]
    async fn test_remove_many_and_remove_all() {
        let history = store();
        history.insert(entry("d1", "ZERO_SHOT")).await.unwrap();
        history.insert(entry("d1", "FEW_SHOT")).await.unwrap();
        history.insert(entry("d2", "ZERO_SHOT")).await.unwrap();

        let none = history.remove_many("d9", &["ZERO_SHOT".to_string()]).await.unwrap();
        assert_eq!(none, 0);

        let removed = history
            .remove_many("d1", &["ZERO_SHOT".to_string(), "FEW_SHOT".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(history.select_all().await.len(), 1);

        history.remove_all().await.unwrap();
        assert!(history.select_all().await.is_empty());
    }

    #[test]
    fn test_compare_values_orders_by_kind_then_value() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(["a", 1]), &json!(["a", 2])), Ordering::Less);
        assert_eq!(compare_values(&json!(["a"]), &json!(["a", 0])), Ordering::Less);
    }
}

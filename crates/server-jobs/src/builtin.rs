// crates/server-jobs/src/builtin.rs
//! Built-in executors used when no external collaborator is wired in.
//!
//! Input is `data.records` (an array of objects), a bare array of objects,
//! or a single object treated as one record.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::executor::{ExecutionError, Executor};
use super::plan::Stage;
use super::request::JobRequest;
use super::types::JobKind;

type Record = Map<String, Value>;

/// Computes simple statistics over the submitted records, pausing
/// `stage_delay` per stage to stand in for collaborator latency.
#[derive(Debug, Clone)]
pub struct BuiltinExecutor {
    stage_delay: Duration,
}

impl BuiltinExecutor {
    pub fn new(stage_delay: Duration) -> Self {
        Self { stage_delay }
    }

    async fn pause(&self) {
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
    }
}

#[async_trait]
impl Executor for BuiltinExecutor {
    async fn run_stage(&self, request: &JobRequest, stage: &Stage) -> Result<(), ExecutionError> {
        if stage.name == "validation" {
            records(&request.data)?;
        }
        self.pause().await;
        Ok(())
    }

    async fn execute(&self, request: &JobRequest) -> Result<Value, ExecutionError> {
        self.pause().await;
        let records = records(&request.data)?;
        let op = request.operation.as_str();
        let output = match request.kind {
            JobKind::Aggregation => aggregate(op, &records)?,
            JobKind::Mining => mine(op, &records, &request.options)?,
            JobKind::Lifecycle => lifecycle(op, &records, &request.data, &request.options)?,
        };
        Ok(json!({
            "business_id": request.business_id,
            "operation": request.operation,
            "record_count": records.len(),
            "output": output,
        }))
    }
}

fn records(data: &Value) -> Result<Vec<&Record>, ExecutionError> {
    let records = match data {
        Value::Object(map) => match map.get("records") {
            None => vec![map],
            Some(Value::Array(items)) => objects(items)?,
            Some(_) => {
                return Err(ExecutionError::InvalidPayload(
                    "records must be an array of objects".to_string(),
                ))
            }
        },
        Value::Array(items) => objects(items)?,
        _ => {
            return Err(ExecutionError::InvalidPayload(
                "data must be a JSON object or array".to_string(),
            ))
        }
    };
    if records.is_empty() {
        return Err(ExecutionError::InvalidPayload("no records to process".to_string()));
    }
    Ok(records)
}

fn objects(items: &[Value]) -> Result<Vec<&Record>, ExecutionError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object()
                .ok_or_else(|| ExecutionError::InvalidPayload(format!("record {i} is not an object")))
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct FieldStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl FieldStats {
    fn push(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn std_dev(&self) -> f64 {
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
    }

    fn to_json(&self, with_spread: bool) -> Value {
        let mut out = json!({
            "count": self.count,
            "sum": self.sum,
            "min": self.min,
            "max": self.max,
            "mean": self.mean(),
        });
        if with_spread {
            out["std_dev"] = json!(self.std_dev());
            out["range"] = json!(self.max - self.min);
        }
        out
    }
}

fn numeric_stats(records: &[&Record]) -> BTreeMap<String, FieldStats> {
    let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
    for rec in records {
        for (field, value) in rec.iter() {
            if let Some(v) = value.as_f64() {
                stats.entry(field.clone()).or_default().push(v);
            }
        }
    }
    stats
}

fn stats_json(stats: &BTreeMap<String, FieldStats>, with_spread: bool) -> Value {
    Value::Object(
        stats
            .iter()
            .map(|(field, s)| (field.clone(), s.to_json(with_spread)))
            .collect(),
    )
}

fn string_values<'a>(records: &[&'a Record]) -> BTreeMap<&'a str, HashMap<&'a str, usize>> {
    let mut values: BTreeMap<&str, HashMap<&str, usize>> = BTreeMap::new();
    for rec in records {
        for (field, value) in rec.iter() {
            if let Some(s) = value.as_str() {
                *values.entry(field.as_str()).or_default().entry(s).or_default() += 1;
            }
        }
    }
    values
}

/// Most frequent first; ties broken alphabetically.
fn ranked<'a>(counts: &HashMap<&'a str, usize>, top: usize) -> Vec<(&'a str, usize)> {
    let mut ranked: Vec<(&str, usize)> = counts.iter().map(|(v, c)| (*v, *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.truncate(top);
    ranked
}

fn option_f64(options: &Value, key: &str) -> Option<f64> {
    options.get(key).and_then(Value::as_f64)
}

fn unsupported(kind: JobKind, op: &str) -> ExecutionError {
    ExecutionError::Failed(format!("unsupported {kind} type '{op}'"))
}

fn aggregate(op: &str, records: &[&Record]) -> Result<Value, ExecutionError> {
    let stats = numeric_stats(records);
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|rec| rec.keys().map(String::as_str))
        .collect();

    match op {
        "aggregation" => Ok(json!({
            "fields": stats_json(&stats, false),
            "keys": keys,
        })),
        "statistics" => Ok(json!({
            "fields": stats_json(&stats, true),
        })),
        "summary" => {
            let cardinality: BTreeMap<&str, usize> = string_values(records)
                .into_iter()
                .map(|(field, counts)| (field, counts.len()))
                .collect();
            Ok(json!({
                "fields": stats_json(&stats, false),
                "keys": keys,
                "cardinality": cardinality,
            }))
        }
        "deduplication" => {
            let mut seen = HashSet::new();
            let duplicates: Vec<usize> = records
                .iter()
                .enumerate()
                .filter(|(_, rec)| !seen.insert(serde_json::to_string(rec).unwrap_or_default()))
                .map(|(i, _)| i)
                .collect();
            Ok(json!({
                "unique_records": records.len() - duplicates.len(),
                "duplicate_count": duplicates.len(),
                "duplicate_indices": duplicates,
            }))
        }
        other => Err(unsupported(JobKind::Aggregation, other)),
    }
}

fn mine(op: &str, records: &[&Record], options: &Value) -> Result<Value, ExecutionError> {
    let top = option_f64(options, "top").map_or(5, |t| t.max(1.0) as usize);

    match op {
        "anomaly_detection" => {
            let threshold = option_f64(options, "threshold").unwrap_or(2.0);
            let stats = numeric_stats(records);
            let mut anomalies = Vec::new();
            for (index, rec) in records.iter().enumerate() {
                for (field, value) in rec.iter() {
                    let (Some(v), Some(s)) = (value.as_f64(), stats.get(field)) else {
                        continue;
                    };
                    let sd = s.std_dev();
                    if sd == 0.0 {
                        continue;
                    }
                    let z = (v - s.mean()) / sd;
                    if z.abs() > threshold {
                        anomalies.push(json!({
                            "index": index,
                            "field": field,
                            "value": v,
                            "z_score": z,
                        }));
                    }
                }
            }
            Ok(json!({
                "threshold": threshold,
                "anomaly_count": anomalies.len(),
                "anomalies": anomalies,
            }))
        }
        "pattern_discovery" => {
            let patterns: BTreeMap<&str, Vec<Value>> = string_values(records)
                .iter()
                .map(|(field, counts)| {
                    let values = ranked(counts, top)
                        .into_iter()
                        .map(|(value, count)| json!({"value": value, "count": count}))
                        .collect();
                    (*field, values)
                })
                .collect();
            Ok(json!({ "patterns": patterns }))
        }
        "association_rules" => {
            let min_support = option_f64(options, "min_support").unwrap_or(0.3);
            let n = records.len() as f64;
            let mut item_counts: HashMap<String, usize> = HashMap::new();
            let mut pair_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
            for rec in records {
                let items: BTreeSet<String> = rec
                    .iter()
                    .filter_map(|(field, value)| value.as_str().map(|s| format!("{field}={s}")))
                    .collect();
                for item in &items {
                    *item_counts.entry(item.clone()).or_default() += 1;
                }
                let items: Vec<&String> = items.iter().collect();
                for (i, a) in items.iter().enumerate() {
                    for b in &items[i + 1..] {
                        *pair_counts.entry(((*a).clone(), (*b).clone())).or_default() += 1;
                    }
                }
            }
            let mut rules: Vec<(&(String, String), usize)> = pair_counts
                .iter()
                .filter(|(_, count)| **count as f64 / n >= min_support)
                .map(|(pair, count)| (pair, *count))
                .collect();
            rules.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
            rules.truncate(top);
            let rules: Vec<Value> = rules
                .into_iter()
                .map(|((antecedent, consequent), count)| {
                    let base = item_counts.get(antecedent).copied().unwrap_or(count).max(1);
                    json!({
                        "antecedent": antecedent,
                        "consequent": consequent,
                        "support": count as f64 / n,
                        "confidence": count as f64 / base as f64,
                    })
                })
                .collect();
            Ok(json!({ "min_support": min_support, "rules": rules }))
        }
        "clustering" => {
            let stats = numeric_stats(records);
            let field = match options.get("field").and_then(Value::as_str) {
                Some(f) => f.to_string(),
                None => stats.keys().next().cloned().ok_or_else(|| {
                    ExecutionError::Failed("clustering requires at least one numeric field".to_string())
                })?,
            };
            let Some(field_stats) = stats.get(&field) else {
                return Err(ExecutionError::Failed(format!("field '{field}' has no numeric values")));
            };
            let mean = field_stats.mean();
            let mut low = (Vec::new(), FieldStats::default());
            let mut high = (Vec::new(), FieldStats::default());
            let mut unassigned = Vec::new();
            for (index, rec) in records.iter().enumerate() {
                match rec.get(&field).and_then(Value::as_f64) {
                    Some(v) if v < mean => {
                        low.0.push(index);
                        low.1.push(v);
                    }
                    Some(v) => {
                        high.0.push(index);
                        high.1.push(v);
                    }
                    None => unassigned.push(index),
                }
            }
            let cluster = |(members, s): (Vec<usize>, FieldStats)| {
                let centroid = if s.count > 0 { Some(s.mean()) } else { None };
                json!({"members": members, "centroid": centroid})
            };
            Ok(json!({
                "field": field,
                "split": mean,
                "clusters": {"low": cluster(low), "high": cluster(high)},
                "unassigned": unassigned,
            }))
        }
        "classification" => {
            let label_field = options
                .get("label_field")
                .and_then(Value::as_str)
                .unwrap_or("label");
            let mut classes: BTreeMap<String, usize> = BTreeMap::new();
            for rec in records {
                let label = match rec.get(label_field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => "unlabeled".to_string(),
                    Some(other) => other.to_string(),
                };
                *classes.entry(label).or_default() += 1;
            }
            Ok(json!({ "label_field": label_field, "classes": classes }))
        }
        other => Err(unsupported(JobKind::Mining, other)),
    }
}

fn lifecycle(op: &str, records: &[&Record], data: &Value, options: &Value) -> Result<Value, ExecutionError> {
    let threshold_days = option_f64(options, "threshold_days")
        .or_else(|| option_f64(data, "threshold_days"))
        .unwrap_or(365.0);
    let is_old = |rec: &Record| {
        rec.get("age_days")
            .and_then(Value::as_f64)
            .is_some_and(|age| age > threshold_days)
    };

    let (eligible, action): (Vec<usize>, &str) = match op {
        "archival" => (matching(records, is_old), "archived"),
        "retention" => (matching(records, is_old), "expired"),
        "purge" => (matching(records, is_old), "purged"),
        "restore" => (
            matching(records, |rec| rec.get("archived").and_then(Value::as_bool) == Some(true)),
            "restored",
        ),
        other => return Err(unsupported(JobKind::Lifecycle, other)),
    };

    Ok(json!({
        "action": action,
        "threshold_days": threshold_days,
        "eligible_count": eligible.len(),
        "retained_count": records.len() - eligible.len(),
        "eligible_indices": eligible,
    }))
}

fn matching(records: &[&Record], pred: impl Fn(&Record) -> bool) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, rec)| pred(**rec))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StagePlan;

    fn request(kind: JobKind, operation: &str, data: Value) -> JobRequest {
        JobRequest {
            kind,
            business_id: "biz_1".to_string(),
            operation: operation.to_string(),
            data,
            options: Value::Null,
        }
    }

    fn executor() -> BuiltinExecutor {
        BuiltinExecutor::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_aggregation_field_stats() {
        let req = request(
            JobKind::Aggregation,
            "aggregation",
            json!({"records": [{"revenue": 10, "region": "eu"}, {"revenue": 30, "region": "us"}]}),
        );
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["record_count"], 2);
        let revenue = &out["output"]["fields"]["revenue"];
        assert_eq!(revenue["sum"], 40.0);
        assert_eq!(revenue["mean"], 20.0);
        assert_eq!(revenue["min"], 10.0);
        assert_eq!(out["output"]["keys"], json!(["region", "revenue"]));
    }

    #[tokio::test]
    async fn test_single_object_is_one_record() {
        let req = request(JobKind::Aggregation, "statistics", json!({"employees": 12}));
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["record_count"], 1);
        assert_eq!(out["output"]["fields"]["employees"]["std_dev"], 0.0);
    }

    #[tokio::test]
    async fn test_deduplication() {
        let req = request(
            JobKind::Aggregation,
            "deduplication",
            json!([{"a": 1}, {"a": 2}, {"a": 1}]),
        );
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["output"]["duplicate_count"], 1);
        assert_eq!(out["output"]["duplicate_indices"], json!([2]));
    }

    #[tokio::test]
    async fn test_malformed_records_fail_validation_stage() {
        let req = request(JobKind::Mining, "clustering", json!({"records": "nope"}));
        let validation = &StagePlan::for_kind(JobKind::Mining).stages()[0];
        let err = executor().run_stage(&req, validation).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_anomaly_detection_flags_outlier() {
        let mut rows: Vec<Value> = (0..20).map(|_| json!({"amount": 100})).collect();
        rows.push(json!({"amount": 10_000}));
        let req = request(JobKind::Mining, "anomaly_detection", json!({ "records": rows }));
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["output"]["anomaly_count"], 1);
        assert_eq!(out["output"]["anomalies"][0]["index"], 20);
    }

    #[tokio::test]
    async fn test_clustering_without_numeric_field_fails() {
        let req = request(JobKind::Mining, "clustering", json!({"records": [{"name": "a"}]}));
        let err = executor().execute(&req).await.unwrap_err();
        assert!(err.to_string().contains("numeric"));
    }

    #[tokio::test]
    async fn test_classification_counts_labels() {
        let req = request(
            JobKind::Mining,
            "classification",
            json!([{"label": "retail"}, {"label": "retail"}, {"other": 1}]),
        );
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["output"]["classes"], json!({"retail": 2, "unlabeled": 1}));
    }

    #[tokio::test]
    async fn test_association_rules_support() {
        let req = request(
            JobKind::Mining,
            "association_rules",
            json!([
                {"city": "paris", "tier": "gold"},
                {"city": "paris", "tier": "gold"},
                {"city": "rome", "tier": "silver"},
            ]),
        );
        let out = executor().execute(&req).await.unwrap();
        let rule = &out["output"]["rules"][0];
        assert_eq!(rule["antecedent"], "city=paris");
        assert_eq!(rule["consequent"], "tier=gold");
        assert_eq!(rule["confidence"], 1.0);
    }

    #[tokio::test]
    async fn test_lifecycle_threshold() {
        let req = request(
            JobKind::Lifecycle,
            "archival",
            json!({"threshold_days": 30, "records": [{"age_days": 10}, {"age_days": 45}]}),
        );
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["output"]["action"], "archived");
        assert_eq!(out["output"]["eligible_indices"], json!([1]));
        assert_eq!(out["output"]["retained_count"], 1);
    }

    #[tokio::test]
    async fn test_lifecycle_threshold_is_exclusive() {
        let req = request(
            JobKind::Lifecycle,
            "retention",
            json!({"threshold_days": 30, "records": [{"age_days": 30}, {"age_days": 30.5}]}),
        );
        let out = executor().execute(&req).await.unwrap();
        assert_eq!(out["output"]["action"], "expired");
        assert_eq!(out["output"]["eligible_indices"], json!([1]));
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let req = request(JobKind::Lifecycle, "shred", json!({"a": 1}));
        let err = executor().execute(&req).await.unwrap_err();
        assert_eq!(err, ExecutionError::Failed("unsupported lifecycle type 'shred'".to_string()));
    }
}

//! Data quality agent: validation, metadata, quality scoring and anomaly detection

use crate::base::{parse_params, sync_method, Agent, AgentMemory, ANALYZE, GET_STATUS};
use crate::series::{self, round2, DataPoint};
use crate::settings::AgentSettings;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_ensemble_core::agent::{AgentDescriptor, AgentType};
use grid_ensemble_core::registry::Handler;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const AGENT_ID: &str = "data-quality-agent";

pub const VALIDATE_DATA: &str = "validate_data";
pub const COMPUTE_METADATA: &str = "compute_metadata";
pub const ASSESS_DATA_QUALITY: &str = "assess_data_quality";
pub const DETECT_ANOMALIES: &str = "detect_anomalies";

const REQUIRED_FIELDS: [&str; 2] = ["timestamp", "value"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A problem found while validating a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Finding {
    MissingFields {
        fields: Vec<String>,
        severity: Severity,
    },
    InvalidType {
        field: String,
        expected: String,
        severity: Severity,
    },
    TimestampFormat {
        field: String,
        severity: Severity,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub data_source: String,
    pub timestamp: DateTime<Utc>,
    pub is_valid: bool,
    pub issues: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Excellent,
    Good,
    Poor,
    InsufficientData,
}

/// Quality dimensions, each in percent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub validity: f64,
    pub consistency: f64,
    pub timeliness: f64,
}

impl QualityMetrics {
    const WEIGHTS: [f64; 4] = [0.3, 0.3, 0.2, 0.2];

    pub fn weighted_score(&self) -> f64 {
        let dims = [
            self.completeness,
            self.validity,
            self.consistency,
            self.timeliness,
        ];
        dims.iter()
            .zip(Self::WEIGHTS.iter())
            .map(|(value, weight)| value * weight)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAssessment {
    pub quality_score: f64,
    pub status: QualityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QualityMetrics>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesMetadata {
    pub data_source: String,
    pub record_count: usize,
    pub timestamp_range: Option<TimestampRange>,
    pub value_statistics: Option<ValueStatistics>,
    pub data_quality: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub index: usize,
    pub timestamp: Option<String>,
    pub value: f64,
    pub z_score: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub count: usize,
    pub detection_method: String,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ValidateParams {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default = "unknown_source")]
    data_source: String,
}

#[derive(Debug, Deserialize)]
struct SeriesParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct MetadataParams {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    data_points: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct AnomalyParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
    threshold: Option<f64>,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

/// Scores and validates raw energy readings for the other agents
#[derive(Debug)]
pub struct DataQualityAgent {
    memory: AgentMemory,
    anomaly_threshold: f64,
}

impl DataQualityAgent {
    pub fn new(settings: &AgentSettings) -> Self {
        Self {
            memory: AgentMemory::new(settings.memory_capacity, settings.context_window),
            anomaly_threshold: settings.anomaly_z_threshold,
        }
    }

    /// Check a single record for required fields, a numeric value and a
    /// parseable timestamp
    pub fn validate_data(&self, data: &Map<String, Value>, data_source: &str) -> ValidationReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| !data.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            issues.push(Finding::MissingFields {
                fields: missing,
                severity: Severity::High,
            });
        }

        if let Some(value) = data.get("value") {
            if series::numeric(value).is_none() {
                issues.push(Finding::InvalidType {
                    field: "value".to_string(),
                    expected: "number".to_string(),
                    severity: Severity::High,
                });
            }
        }

        if let Some(timestamp) = data.get("timestamp") {
            let raw = match timestamp {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if series::parse_timestamp(&raw).is_none() {
                warnings.push(Finding::TimestampFormat {
                    field: "timestamp".to_string(),
                    severity: Severity::Medium,
                });
            }
        }

        ValidationReport {
            data_source: data_source.to_string(),
            timestamp: Utc::now(),
            is_valid: issues.is_empty(),
            issues,
            warnings,
        }
    }

    pub fn assess_data_quality(&self, points: &[DataPoint]) -> QualityAssessment {
        self.assess_data_quality_at(points, Utc::now())
    }

    /// Score `points` as of `now`
    pub fn assess_data_quality_at(&self, points: &[DataPoint], now: DateTime<Utc>) -> QualityAssessment {
        if points.is_empty() {
            return QualityAssessment {
                quality_score: 0.0,
                status: QualityStatus::InsufficientData,
                metrics: None,
                timestamp: now,
            };
        }

        let total = points.len() as f64;
        let complete = points
            .iter()
            .filter(|p| p.timestamp_str().is_some() && p.has_value())
            .count() as f64;
        let values = series::numeric_values(points);

        let metrics = QualityMetrics {
            completeness: complete / total * 100.0,
            validity: values.len() as f64 / total * 100.0,
            consistency: consistency(&values),
            timeliness: timeliness(points, now),
        };

        let quality_score = round2(metrics.weighted_score());
        let status = if quality_score >= 90.0 {
            QualityStatus::Excellent
        } else if quality_score >= 70.0 {
            QualityStatus::Good
        } else {
            QualityStatus::Poor
        };

        QualityAssessment {
            quality_score,
            status,
            metrics: Some(metrics),
            timestamp: now,
        }
    }

    pub fn compute_metadata(&self, data: &Map<String, Value>, points: &[DataPoint]) -> SeriesMetadata {
        let values = series::numeric_values(points);
        let value_statistics = match (
            values.iter().copied().reduce(f64::min),
            values.iter().copied().reduce(f64::max),
            series::mean(&values),
            series::median(&values),
            series::std_dev(&values),
        ) {
            (Some(min), Some(max), Some(mean), Some(median), Some(std)) => Some(ValueStatistics {
                min,
                max,
                mean,
                median,
                std,
                count: values.len(),
            }),
            _ => None,
        };

        let timestamps: Vec<&str> = points.iter().filter_map(DataPoint::timestamp_str).collect();
        let timestamp_range = match (timestamps.iter().min(), timestamps.iter().max()) {
            (Some(start), Some(end)) => Some(TimestampRange {
                start: start.to_string(),
                end: end.to_string(),
            }),
            _ => None,
        };

        let data_source = data
            .get("data_source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        SeriesMetadata {
            data_source,
            record_count: points.len(),
            timestamp_range,
            value_statistics,
            data_quality: self.assess_data_quality(points).quality_score,
            computed_at: Utc::now(),
        }
    }

    /// Flag readings whose z-score exceeds `threshold`
    pub fn detect_anomalies(&self, points: &[DataPoint], threshold: Option<f64>) -> AnomalyReport {
        let threshold = threshold.unwrap_or(self.anomaly_threshold);
        let values = series::numeric_values(points);

        let mut anomalies = Vec::new();
        if let (true, Some(mean), Some(std)) = (
            values.len() >= 3,
            series::mean(&values),
            series::std_dev(&values),
        ) {
            if std > 0.0 {
                for (index, point) in points.iter().enumerate() {
                    let Some(value) = point.numeric_value() else {
                        continue;
                    };
                    let z = ((value - mean) / std).abs();
                    if z > threshold {
                        anomalies.push(Anomaly {
                            index,
                            timestamp: point.timestamp.clone(),
                            value,
                            z_score: round2(z),
                            severity: if z > 5.0 {
                                Severity::High
                            } else {
                                Severity::Medium
                            },
                        });
                    }
                }
            }
        }

        AnomalyReport {
            count: anomalies.len(),
            anomalies,
            detection_method: "z_score".to_string(),
            threshold,
            timestamp: Utc::now(),
        }
    }

    fn handle_validate(&self, params: Value) -> Result<Value> {
        let params: ValidateParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.validate_data(&params.data, &params.data_source),
        )?)
    }

    fn handle_metadata(&self, params: Value) -> Result<Value> {
        let params: MetadataParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.compute_metadata(&params.data, &params.data_points),
        )?)
    }

    fn handle_assess(&self, params: Value) -> Result<Value> {
        let params: SeriesParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.assess_data_quality(&params.data_points),
        )?)
    }

    fn handle_anomalies(&self, params: Value) -> Result<Value> {
        let params: AnomalyParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.detect_anomalies(&params.data_points, params.threshold),
        )?)
    }
}

/// Share of values inside the Tukey fences, in percent
fn consistency(values: &[f64]) -> f64 {
    if values.len() <= 4 {
        return 100.0;
    }
    let (Some(q1), Some(q3)) = (
        series::percentile(values, 25.0),
        series::percentile(values, 75.0),
    ) else {
        return 100.0;
    };
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let inliers = values.iter().filter(|v| **v >= lower && **v <= upper).count();
    inliers as f64 / values.len() as f64 * 100.0
}

/// Freshness of the newest reading: 100 when current, minus 10 per hour of age
fn timeliness(points: &[DataPoint], now: DateTime<Utc>) -> f64 {
    let Some(latest) = points.iter().filter_map(DataPoint::timestamp_str).max() else {
        return 0.0;
    };
    match series::parse_timestamp(latest) {
        Some(ts) => {
            let age_hours = (now - ts).num_seconds() as f64 / 3600.0;
            (100.0 - age_hours * 10.0).clamp(0.0, 100.0)
        }
        None => 50.0,
    }
}

#[async_trait]
impl Agent for DataQualityAgent {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            id: AGENT_ID.to_string(),
            name: "Data Quality Agent".to_string(),
            agent_type: AgentType::DataQuality,
            capabilities: [
                ANALYZE,
                GET_STATUS,
                VALIDATE_DATA,
                COMPUTE_METADATA,
                ASSESS_DATA_QUALITY,
                DETECT_ANOMALIES,
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            extra: Map::new(),
            registered_at: None,
        }
    }

    fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    async fn analyze(&self, data: Value) -> Result<Value> {
        let params: SeriesParams = parse_params(data)?;
        let assessment = serde_json::to_value(self.assess_data_quality(&params.data_points))?;
        self.memory.record(assessment.clone()).await;
        Ok(assessment)
    }

    fn handlers(self: Arc<Self>) -> Vec<(&'static str, Handler)> {
        vec![
            (VALIDATE_DATA, sync_method(&self, Self::handle_validate)),
            (COMPUTE_METADATA, sync_method(&self, Self::handle_metadata)),
            (ASSESS_DATA_QUALITY, sync_method(&self, Self::handle_assess)),
            (DETECT_ANOMALIES, sync_method(&self, Self::handle_anomalies)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn agent() -> DataQualityAgent {
        DataQualityAgent::new(&AgentSettings::default())
    }

    fn hourly(values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(format!("2025-01-01T{:02}:00:00Z", i), *v))
            .collect()
    }

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_valid_record() {
        let report = agent().validate_data(
            &record(json!({ "timestamp": "2025-01-01T00:00:00Z", "value": 100.5 })),
            "test",
        );
        assert!(report.is_valid);
        assert_eq!(report.data_source, "test");
        assert!(report.issues.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_validate_accepts_boolean_value() {
        let report = agent().validate_data(
            &record(json!({ "timestamp": "2025-01-01T00:00:00Z", "value": true })),
            "breaker",
        );
        assert!(report.is_valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_validate_reports_missing_and_invalid_fields() {
        let report = agent().validate_data(&record(json!({ "value": "lots" })), "meter");
        assert!(!report.is_valid);
        assert_eq!(
            report.issues,
            vec![
                Finding::MissingFields {
                    fields: vec!["timestamp".to_string()],
                    severity: Severity::High,
                },
                Finding::InvalidType {
                    field: "value".to_string(),
                    expected: "number".to_string(),
                    severity: Severity::High,
                },
            ]
        );

        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["issues"][0]["type"], "missing_fields");
        assert_eq!(wire["issues"][1]["severity"], "high");
    }

    #[test]
    fn test_bad_timestamp_is_only_a_warning() {
        let report = agent().validate_data(
            &record(json!({ "timestamp": "last tuesday", "value": "42" })),
            "meter",
        );
        assert!(report.is_valid);
        assert_eq!(
            report.warnings,
            vec![Finding::TimestampFormat {
                field: "timestamp".to_string(),
                severity: Severity::Medium,
            }]
        );
    }

    #[test]
    fn test_assess_empty_series() {
        let assessment = agent().assess_data_quality(&[]);
        assert_eq!(assessment.quality_score, 0.0);
        assert_eq!(assessment.status, QualityStatus::InsufficientData);
        assert!(assessment.metrics.is_none());
    }

    #[test]
    fn test_assess_fresh_clean_series_is_excellent() {
        let points = hourly(&[100.0, 105.0, 98.0]);
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        let assessment = agent().assess_data_quality_at(&points, now);

        let metrics = assessment.metrics.unwrap();
        assert_eq!(metrics.completeness, 100.0);
        assert_eq!(metrics.validity, 100.0);
        assert_eq!(metrics.consistency, 100.0);
        assert_eq!(metrics.timeliness, 100.0);
        assert_eq!(assessment.quality_score, 100.0);
        assert_eq!(assessment.status, QualityStatus::Excellent);
    }

    #[test]
    fn test_assess_penalizes_stale_and_incomplete_data() {
        let mut points = hourly(&[100.0, 101.0, 99.0, 100.0, 102.0, 500.0]);
        points.push(DataPoint {
            timestamp: Some("2025-01-01T06:00:00Z".to_string()),
            value: None,
            ..Default::default()
        });
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let assessment = agent().assess_data_quality_at(&points, now);
        let metrics = assessment.metrics.unwrap();

        assert!((metrics.completeness - 600.0 / 7.0).abs() < 1e-9);
        assert!((metrics.validity - 600.0 / 7.0).abs() < 1e-9);
        assert!((metrics.consistency - 500.0 / 6.0).abs() < 1e-9);
        assert_eq!(metrics.timeliness, 50.0);
        assert_eq!(assessment.status, QualityStatus::Good);
    }

    #[test]
    fn test_timeliness_edge_cases() {
        let now = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(timeliness(&hourly(&[1.0]), now), 0.0);

        let undated = vec![DataPoint {
            value: Some(json!(1.0)),
            ..Default::default()
        }];
        assert_eq!(timeliness(&undated, now), 0.0);

        let garbled = vec![DataPoint {
            timestamp: Some("not-a-date".to_string()),
            value: Some(json!(1.0)),
            ..Default::default()
        }];
        assert_eq!(timeliness(&garbled, now), 50.0);
    }

    #[test]
    fn test_compute_metadata() {
        let points = hourly(&[10.0, 20.0, 30.0, 40.0]);
        let metadata = agent().compute_metadata(&record(json!({ "data_source": "demand_sector" })), &points);

        assert_eq!(metadata.data_source, "demand_sector");
        assert_eq!(metadata.record_count, 4);
        let stats = metadata.value_statistics.unwrap();
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 40.0);
        assert_eq!(stats.mean, 25.0);
        assert_eq!(stats.median, 25.0);
        assert_eq!(stats.count, 4);
        let range = metadata.timestamp_range.unwrap();
        assert_eq!(range.start, "2025-01-01T00:00:00Z");
        assert_eq!(range.end, "2025-01-01T03:00:00Z");
    }

    #[test]
    fn test_compute_metadata_without_points() {
        let metadata = agent().compute_metadata(&Map::new(), &[]);
        assert_eq!(metadata.data_source, "unknown");
        assert_eq!(metadata.record_count, 0);
        assert!(metadata.value_statistics.is_none());
        assert!(metadata.timestamp_range.is_none());
        assert_eq!(metadata.data_quality, 0.0);
    }

    #[test]
    fn test_detect_anomalies() {
        let mut values = vec![100.0; 20];
        values[7] = 1000.0;
        let report = agent().detect_anomalies(&hourly(&values), None);

        assert_eq!(report.count, 1);
        assert_eq!(report.threshold, 3.0);
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.index, 7);
        assert_eq!(anomaly.value, 1000.0);
        assert_eq!(anomaly.timestamp.as_deref(), Some("2025-01-01T07:00:00Z"));
        assert_eq!(anomaly.severity, Severity::Medium);
        assert!(anomaly.z_score > 4.0);
    }

    #[test]
    fn test_detect_anomalies_needs_spread_and_volume() {
        let report = agent().detect_anomalies(&hourly(&[1.0, 100.0]), Some(0.1));
        assert_eq!(report.count, 0);

        let report = agent().detect_anomalies(&hourly(&[5.0, 5.0, 5.0, 5.0]), Some(0.1));
        assert_eq!(report.count, 0);

        let report = agent().detect_anomalies(&hourly(&[1.0, 2.0, 3.0]), Some(1.0));
        assert_eq!(report.count, 2);
        assert_eq!(report.anomalies[0].z_score, 1.22);
    }

    #[tokio::test]
    async fn test_analyze_records_assessment() {
        let agent = agent();
        let result = agent
            .analyze(json!({ "data_points": [{ "timestamp": "2025-01-01T00:00:00Z", "value": 1 }] }))
            .await
            .unwrap();

        assert!(result["quality_score"].is_number());
        assert_eq!(agent.memory().len().await, 1);
    }

    #[test]
    fn test_descriptor() {
        let descriptor = agent().descriptor();
        assert_eq!(descriptor.id, "data-quality-agent");
        assert_eq!(descriptor.name, "Data Quality Agent");
        assert!(descriptor.has_capability("validate_data"));
        assert_eq!(descriptor.capability_count(), 6);
    }
}

//! Supply sector agent: solar, wind, storage and grid connection readings
//!
//! Shares cleaning and imputation with the demand agent, then clips values
//! to what the asset can physically report and forecasts per asset type.
//! Like the demand agent it reaches the data quality agent only through a
//! [`PeerClient`].

use crate::base::{parse_params, sync_method, Agent, AgentMemory, PeerClient};
use crate::base::{ANALYZE, GET_STATUS};
use crate::data_quality::{self, ValidationReport, COMPUTE_METADATA, VALIDATE_DATA};
use crate::demand_sector::{
    chart, check_horizon, fill, impute, preprocess, ForecastEngine, ImputeMethod, ImputeReport,
    PreprocessReport, IMPUTE_MISSING_VALUES, PREDICT_TIME_SERIES, PREPROCESS_DATA,
    SELECT_AI_ENGINE, VISUALIZE_DATA,
};
use crate::series::{self, round2, DataPoint};
use crate::settings::AgentSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use grid_ensemble_core::agent::{AgentDescriptor, AgentType};
use grid_ensemble_core::registry::Handler;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const AGENT_ID: &str = "supply-sector-agent";

pub const PREDICT_SOLAR_GENERATION: &str = "predict_solar_generation";
pub const PREDICT_BATTERY_STATE: &str = "predict_battery_state";

const MIN_SELECTION_VALUES: usize = 10;
/// State of charge lost per hour, in percentage points
const BATTERY_DISCHARGE_PER_HOUR: f64 = 0.5;
/// Output fraction assumed for night hours
const NIGHT_SOLAR_FACTOR: f64 = 0.1;

/// Engines scored by the supply agent, with (selected, other) accuracy
const SUPPLY_ACCURACY: [(ForecastEngine, f64, f64); 4] = [
    (ForecastEngine::Lstm, 0.91, 0.87),
    (ForecastEngine::Svr, 0.93, 0.85),
    (ForecastEngine::Prophet, 0.92, 0.88),
    (ForecastEngine::Xgboost, 0.90, 0.86),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    #[default]
    Solar,
    Wind,
    Battery,
    GridConnection,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Solar => "solar",
            AssetType::Wind => "wind",
            AssetType::Battery => "battery",
            AssetType::GridConnection => "grid_connection",
        }
    }

    /// Physical bounds of a reading, if the asset has any
    fn bounds(&self) -> Option<(f64, f64, &'static str)> {
        match self {
            AssetType::Solar => Some((0.0, f64::INFINITY, "clipped_solar_to_non_negative")),
            AssetType::Battery => Some((0.0, 100.0, "clipped_battery_to_0_100")),
            AssetType::Wind | AssetType::GridConnection => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChargeState {
    Charging,
    Discharging,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyEngineSelection {
    pub selected_engine: ForecastEngine,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_scores: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<AssetType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyForecastPoint {
    pub timestamp: String,
    pub value: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_of_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ChargeState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyForecast {
    pub predictions: Vec<SupplyForecastPoint>,
    pub engine: ForecastEngine,
    pub horizon_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<AssetType>,
    /// Last observed state of charge, for battery forecasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<f64>,
    pub forecast_start: String,
    pub forecast_end: String,
}

#[derive(Debug, Default, Deserialize)]
struct SeriesData {
    #[serde(default)]
    data_points: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct PreprocessParams {
    #[serde(default)]
    data: SeriesData,
    #[serde(default)]
    asset_type: AssetType,
}

#[derive(Debug, Deserialize)]
struct ImputeParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
    method: Option<ImputeMethod>,
}

#[derive(Debug, Deserialize)]
struct SelectParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
    #[serde(default)]
    asset_type: AssetType,
}

#[derive(Debug, Deserialize)]
struct PredictParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
    engine: Option<ForecastEngine>,
    horizon: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VisualizeParams {
    #[serde(default)]
    data_points: Vec<DataPoint>,
    #[serde(default)]
    prediction: Value,
    #[serde(default)]
    asset_type: AssetType,
}

/// Cleans generation and storage readings and forecasts them per asset
#[derive(Debug)]
pub struct SupplySectorAgent {
    memory: AgentMemory,
    peers: PeerClient,
    default_horizon: u32,
}

impl SupplySectorAgent {
    pub fn new(settings: &AgentSettings, peers: PeerClient) -> Self {
        Self {
            memory: AgentMemory::new(settings.memory_capacity, settings.context_window),
            peers,
            default_horizon: settings.default_horizon_hours,
        }
    }

    /// Shared cleaning, then clip values to the asset's physical range
    pub fn preprocess_data(&self, points: &[DataPoint], asset_type: AssetType) -> PreprocessReport {
        let mut report = preprocess(points);
        let Some(normalized) = report.steps.iter().position(|s| s == "normalized_values") else {
            return report;
        };

        if let Some((lower, upper, step)) = asset_type.bounds() {
            for point in &mut report.preprocessed_data {
                if let Some(value) = point.numeric_value() {
                    point.value = Some(Value::from(value.clamp(lower, upper)));
                }
            }
            report.steps.insert(normalized, step.to_string());
        }
        report
    }

    /// Fill gaps; forward fill also back-fills leading gaps
    pub fn impute_missing_values(&self, points: &[DataPoint], method: ImputeMethod) -> ImputeReport {
        impute(points, method, fill_supply)
    }

    pub fn select_ai_engine(&self, points: &[DataPoint], asset_type: AssetType) -> SupplyEngineSelection {
        if points.is_empty() {
            let engine = match asset_type {
                AssetType::Solar => ForecastEngine::Prophet,
                _ => ForecastEngine::Lstm,
            };
            return SupplyEngineSelection {
                selected_engine: engine,
                reason: "default_for_insufficient_data".to_string(),
                accuracy_scores: None,
                asset_type: None,
            };
        }

        if series::numeric_values(points).len() < MIN_SELECTION_VALUES {
            return SupplyEngineSelection {
                selected_engine: ForecastEngine::Prophet,
                reason: "insufficient_data".to_string(),
                accuracy_scores: None,
                asset_type: None,
            };
        }

        let (selected, reason) = match asset_type {
            AssetType::Solar => (ForecastEngine::Prophet, "solar_seasonal_patterns"),
            AssetType::Battery => (ForecastEngine::Svr, "battery_state_prediction"),
            AssetType::Wind | AssetType::GridConnection => {
                (ForecastEngine::Lstm, "general_time_series")
            }
        };
        debug!("Selected {} engine {} ({})", asset_type, selected, reason);

        let accuracy_scores = SUPPLY_ACCURACY
            .iter()
            .map(|(engine, chosen, other)| {
                let score = if *engine == selected { *chosen } else { *other };
                (engine.as_str().to_string(), score)
            })
            .collect();

        SupplyEngineSelection {
            selected_engine: selected,
            reason: reason.to_string(),
            accuracy_scores: Some(accuracy_scores),
            asset_type: Some(asset_type),
        }
    }

    pub fn predict_time_series(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
    ) -> Result<SupplyForecast> {
        self.predict_time_series_at(points, engine, horizon, Utc::now())
    }

    /// Hourly forecast drifting slowly from the last reading toward the mean
    pub fn predict_time_series_at(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
        start: DateTime<Utc>,
    ) -> Result<SupplyForecast> {
        let values = forecast_input(points, horizon)?;
        let (Some(&last), Some(mean)) = (values.last(), series::mean(&values)) else {
            return Err(Error::invalid_params("no numeric values to forecast"));
        };

        let predictions = (0..horizon)
            .map(|i| {
                let step = f64::from(i);
                SupplyForecastPoint {
                    timestamp: hour_after(start, i),
                    value: round2(last + (mean - last) * (step / f64::from(horizon)) * 0.05),
                    confidence: confidence(0.95, i),
                    hour_of_day: None,
                    state: None,
                }
            })
            .collect();

        Ok(SupplyForecast {
            predictions,
            engine,
            horizon_hours: horizon,
            asset_type: None,
            current_state: None,
            forecast_start: series::format_timestamp(start),
            forecast_end: series::format_timestamp(start + Duration::hours(i64::from(horizon))),
        })
    }

    pub fn predict_solar_generation(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
    ) -> Result<SupplyForecast> {
        self.predict_solar_generation_at(points, engine, horizon, Utc::now())
    }

    /// Series mean shaped by a daylight curve peaking at 12:00 UTC
    ///
    /// Hours 6 through 18 follow a half sine; night hours keep a tenth of
    /// the mean.
    pub fn predict_solar_generation_at(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
        start: DateTime<Utc>,
    ) -> Result<SupplyForecast> {
        let values = forecast_input(points, horizon)?;
        let Some(mean) = series::mean(&values) else {
            return Err(Error::invalid_params("no numeric values to forecast"));
        };

        let predictions = (0..horizon)
            .map(|i| {
                let at = start + Duration::hours(i64::from(i) + 1);
                let hour = at.hour();
                SupplyForecastPoint {
                    timestamp: series::format_timestamp(at),
                    value: round2((mean * daylight_factor(hour)).max(0.0)),
                    confidence: confidence(0.92, i),
                    hour_of_day: Some(hour),
                    state: None,
                }
            })
            .collect();

        Ok(SupplyForecast {
            predictions,
            engine,
            horizon_hours: horizon,
            asset_type: Some(AssetType::Solar),
            current_state: None,
            forecast_start: series::format_timestamp(start),
            forecast_end: series::format_timestamp(start + Duration::hours(i64::from(horizon))),
        })
    }

    pub fn predict_battery_state(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
    ) -> Result<SupplyForecast> {
        self.predict_battery_state_at(points, engine, horizon, Utc::now())
    }

    /// State of charge under a steady discharge, clamped to 0..=100
    pub fn predict_battery_state_at(
        &self,
        points: &[DataPoint],
        engine: ForecastEngine,
        horizon: u32,
        start: DateTime<Utc>,
    ) -> Result<SupplyForecast> {
        let values = forecast_input(points, horizon)?;
        let Some(&last) = values.last() else {
            return Err(Error::invalid_params("no numeric values to forecast"));
        };

        let predictions = (0..horizon)
            .map(|i| {
                let predicted =
                    (last - BATTERY_DISCHARGE_PER_HOUR * f64::from(i + 1)).clamp(0.0, 100.0);
                let state = if predicted < last {
                    ChargeState::Discharging
                } else {
                    ChargeState::Charging
                };
                SupplyForecastPoint {
                    timestamp: hour_after(start, i),
                    value: round2(predicted),
                    confidence: confidence(0.94, i),
                    hour_of_day: None,
                    state: Some(state),
                }
            })
            .collect();

        Ok(SupplyForecast {
            predictions,
            engine,
            horizon_hours: horizon,
            asset_type: Some(AssetType::Battery),
            current_state: Some(round2(last)),
            forecast_start: series::format_timestamp(start),
            forecast_end: series::format_timestamp(start + Duration::hours(i64::from(horizon))),
        })
    }

    /// Forecast with the model that fits `asset_type`
    pub fn predict_for_asset(
        &self,
        points: &[DataPoint],
        asset_type: AssetType,
        engine: ForecastEngine,
        horizon: u32,
    ) -> Result<SupplyForecast> {
        match asset_type {
            AssetType::Solar => self.predict_solar_generation(points, engine, horizon),
            AssetType::Battery => self.predict_battery_state(points, engine, horizon),
            AssetType::Wind | AssetType::GridConnection => {
                self.predict_time_series(points, engine, horizon)
            }
        }
    }

    pub fn visualize_data(&self, points: &[DataPoint], prediction: &Value, asset_type: AssetType) -> Value {
        let mut visualization = chart(points, prediction);
        visualization["asset_type"] = json!(asset_type);
        json!({
            "visualization": visualization,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Validate through the data quality agent, then clean, fill, describe and forecast
    pub async fn run_pipeline(&self, data: Map<String, Value>) -> Result<Value> {
        let asset_type: AssetType = match data.get("asset_type") {
            Some(raw) => parse_params(raw.clone())?,
            None => AssetType::default(),
        };
        let points: Vec<DataPoint> = match data.get("data_points") {
            Some(raw) => parse_params(raw.clone())?,
            None => Vec::new(),
        };

        let record = match points.last() {
            Some(latest) => serde_json::to_value(latest)?,
            None => Value::Object(data.clone()),
        };
        let data_source = format!("supply_sector_{}", asset_type);

        let validation: ValidationReport = match self
            .peers
            .call_as(
                data_quality::AGENT_ID,
                VALIDATE_DATA,
                json!({ "data": record, "data_source": data_source }),
            )
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("Validation unavailable for {}: {}", AGENT_ID, e);
                return Ok(json!({
                    "status": "validation_failed",
                    "issues": [],
                    "reason": e.to_string(),
                }));
            }
        };
        if !validation.is_valid {
            return Ok(json!({
                "status": "validation_failed",
                "issues": validation.issues,
            }));
        }

        let preprocessed = self.preprocess_data(&points, asset_type);
        let imputed =
            self.impute_missing_values(&preprocessed.preprocessed_data, ImputeMethod::ForwardFill);

        let metadata = match self
            .peers
            .call(
                data_quality::AGENT_ID,
                COMPUTE_METADATA,
                json!({ "data": data, "data_points": imputed.imputed_data }),
            )
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Metadata unavailable for {}: {}", AGENT_ID, e);
                Value::Null
            }
        };

        let engine = self.select_ai_engine(&imputed.imputed_data, asset_type);

        let horizon = match data.get("prediction_horizon") {
            Some(raw) => parse_params::<u32>(raw.clone())?,
            None => self.default_horizon,
        };
        let prediction = match self.predict_for_asset(
            &imputed.imputed_data,
            asset_type,
            engine.selected_engine,
            horizon,
        ) {
            Ok(forecast) => serde_json::to_value(forecast)?,
            Err(e) => json!({ "error": e.to_string() }),
        };

        let result = json!({
            "agent": "Supply Sector Agent",
            "asset_type": asset_type,
            "quality_assessment": validation,
            "metadata": metadata,
            "preprocessing": preprocessed,
            "imputation": imputed,
            "selected_engine": engine,
            "prediction": prediction,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.memory.record(result.clone()).await;
        Ok(result)
    }

    fn handle_preprocess(&self, params: Value) -> Result<Value> {
        let params: PreprocessParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.preprocess_data(&params.data.data_points, params.asset_type),
        )?)
    }

    fn handle_impute(&self, params: Value) -> Result<Value> {
        let params: ImputeParams = parse_params(params)?;
        let method = params.method.unwrap_or(ImputeMethod::ForwardFill);
        Ok(serde_json::to_value(
            self.impute_missing_values(&params.data_points, method),
        )?)
    }

    fn handle_select(&self, params: Value) -> Result<Value> {
        let params: SelectParams = parse_params(params)?;
        Ok(serde_json::to_value(
            self.select_ai_engine(&params.data_points, params.asset_type),
        )?)
    }

    fn handle_predict(&self, params: Value) -> Result<Value> {
        let params: PredictParams = parse_params(params)?;
        let engine = params.engine.unwrap_or(ForecastEngine::Prophet);
        let horizon = params.horizon.unwrap_or(self.default_horizon);
        Ok(serde_json::to_value(
            self.predict_time_series(&params.data_points, engine, horizon)?,
        )?)
    }

    fn handle_predict_solar(&self, params: Value) -> Result<Value> {
        let params: PredictParams = parse_params(params)?;
        let engine = params.engine.unwrap_or(ForecastEngine::Prophet);
        let horizon = params.horizon.unwrap_or(self.default_horizon);
        Ok(serde_json::to_value(
            self.predict_solar_generation(&params.data_points, engine, horizon)?,
        )?)
    }

    fn handle_predict_battery(&self, params: Value) -> Result<Value> {
        let params: PredictParams = parse_params(params)?;
        let engine = params.engine.unwrap_or(ForecastEngine::Svr);
        let horizon = params.horizon.unwrap_or(self.default_horizon);
        Ok(serde_json::to_value(
            self.predict_battery_state(&params.data_points, engine, horizon)?,
        )?)
    }

    fn handle_visualize(&self, params: Value) -> Result<Value> {
        let params: VisualizeParams = parse_params(params)?;
        Ok(self.visualize_data(&params.data_points, &params.prediction, params.asset_type))
    }
}

fn fill_supply(values: &mut [Option<f64>], method: ImputeMethod) {
    fill(values, method);
    if method == ImputeMethod::ForwardFill {
        fill(values, ImputeMethod::BackwardFill);
    }
}

/// Numeric values to forecast from, after checking the request shape
fn forecast_input(points: &[DataPoint], horizon: u32) -> Result<Vec<f64>> {
    check_horizon(horizon)?;
    if points.is_empty() {
        return Err(Error::invalid_params("no data points to forecast"));
    }
    Ok(series::numeric_values(points))
}

fn hour_after(start: DateTime<Utc>, step: u32) -> String {
    series::format_timestamp(start + Duration::hours(i64::from(step) + 1))
}

fn confidence(initial: f64, step: u32) -> f64 {
    round2(initial - f64::from(step) * 0.01).max(0.0)
}

fn daylight_factor(hour: u32) -> f64 {
    if (6..=18).contains(&hour) {
        ((f64::from(hour) - 6.0) * PI / 12.0).sin().max(0.0)
    } else {
        NIGHT_SOLAR_FACTOR
    }
}

#[async_trait]
impl Agent for SupplySectorAgent {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            id: AGENT_ID.to_string(),
            name: "Supply Sector Agent".to_string(),
            agent_type: AgentType::SupplySector,
            capabilities: [
                ANALYZE,
                GET_STATUS,
                PREPROCESS_DATA,
                IMPUTE_MISSING_VALUES,
                SELECT_AI_ENGINE,
                PREDICT_TIME_SERIES,
                PREDICT_SOLAR_GENERATION,
                PREDICT_BATTERY_STATE,
                VISUALIZE_DATA,
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
        let data: Map<String, Value> = parse_params(data)?;
        self.run_pipeline(data).await
    }

    fn handlers(self: Arc<Self>) -> Vec<(&'static str, Handler)> {
        vec![
            (PREPROCESS_DATA, sync_method(&self, Self::handle_preprocess)),
            (IMPUTE_MISSING_VALUES, sync_method(&self, Self::handle_impute)),
            (SELECT_AI_ENGINE, sync_method(&self, Self::handle_select)),
            (PREDICT_TIME_SERIES, sync_method(&self, Self::handle_predict)),
            (PREDICT_SOLAR_GENERATION, sync_method(&self, Self::handle_predict_solar)),
            (PREDICT_BATTERY_STATE, sync_method(&self, Self::handle_predict_battery)),
            (VISUALIZE_DATA, sync_method(&self, Self::handle_visualize)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::attach;
    use crate::data_quality::DataQualityAgent;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use grid_ensemble_core::dispatch::Dispatcher;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn hourly(values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                DataPoint::new(
                    series::format_timestamp(start() + Duration::hours(i as i64)),
                    *v,
                )
            })
            .collect()
    }

    fn points(raw: Value) -> Vec<DataPoint> {
        serde_json::from_value(raw).unwrap()
    }

    fn agent() -> SupplySectorAgent {
        SupplySectorAgent::new(&AgentSettings::default(), PeerClient::new(&Dispatcher::new()))
    }

    #[test]
    fn test_preprocess_clips_to_asset_range() {
        let raw = points(json!([
            { "timestamp": "2025-01-01T01:00:00Z", "value": 140 },
            { "timestamp": "2025-01-01T00:00:00Z", "value": -3 },
        ]));

        let report = agent().preprocess_data(&raw, AssetType::Battery);
        assert_eq!(
            report.steps,
            vec!["sorted_by_timestamp", "clipped_battery_to_0_100", "normalized_values"]
        );
        assert_eq!(report.preprocessed_data[0].numeric_value(), Some(0.0));
        assert_eq!(report.preprocessed_data[1].numeric_value(), Some(100.0));

        let report = agent().preprocess_data(&raw, AssetType::Solar);
        assert!(report.steps.contains(&"clipped_solar_to_non_negative".to_string()));
        assert_eq!(report.preprocessed_data[1].numeric_value(), Some(140.0));

        let report = agent().preprocess_data(&raw, AssetType::Wind);
        assert_eq!(report.steps, vec!["sorted_by_timestamp", "normalized_values"]);
        assert_eq!(report.preprocessed_data[0].numeric_value(), Some(-3.0));
    }

    #[test]
    fn test_forward_fill_also_fills_leading_gaps() {
        let raw = points(json!([
            { "timestamp": "2025-01-01T00:00:00Z", "value": null },
            { "timestamp": "2025-01-01T01:00:00Z", "value": 4 },
            { "timestamp": "2025-01-01T02:00:00Z" },
            { "timestamp": "2025-01-01T03:00:00Z", "value": 8 },
        ]));

        let report = agent().impute_missing_values(&raw, ImputeMethod::ForwardFill);
        let values: Vec<_> = report.imputed_data.iter().map(DataPoint::numeric_value).collect();
        assert_eq!(values, vec![Some(4.0), Some(4.0), Some(4.0), Some(8.0)]);
        assert_eq!(report.missing_before, 2);
        assert_eq!(report.missing_after, 0);
        assert_eq!(report.imputed_count, 2);

        let report = agent().impute_missing_values(&raw, ImputeMethod::Linear);
        assert_eq!(report.imputed_data[2].numeric_value(), Some(6.0));
        assert_eq!(report.missing_after, 1);
    }

    #[test]
    fn test_engine_selection_by_asset() {
        let agent = agent();
        let series = hourly(&[10.0; 12]);

        let selection = agent.select_ai_engine(&series, AssetType::Battery);
        assert_eq!(selection.selected_engine, ForecastEngine::Svr);
        assert_eq!(selection.reason, "battery_state_prediction");
        let scores = selection.accuracy_scores.unwrap();
        assert_eq!(scores["svr"], 0.93);
        assert_eq!(scores["prophet"], 0.88);
        assert!(!scores.contains_key("arima"));

        let selection = agent.select_ai_engine(&series, AssetType::GridConnection);
        assert_eq!(selection.selected_engine, ForecastEngine::Lstm);
        assert_eq!(selection.asset_type, Some(AssetType::GridConnection));

        let selection = agent.select_ai_engine(&series[..3], AssetType::Battery);
        assert_eq!(selection.selected_engine, ForecastEngine::Prophet);
        assert_eq!(selection.reason, "insufficient_data");

        let selection = agent.select_ai_engine(&[], AssetType::Wind);
        assert_eq!(selection.selected_engine, ForecastEngine::Lstm);
        assert_eq!(selection.reason, "default_for_insufficient_data");
    }

    #[test]
    fn test_battery_discharges_and_clamps() {
        let forecast = agent()
            .predict_battery_state_at(&hourly(&[80.0, 2.0]), ForecastEngine::Svr, 6, start())
            .unwrap();

        let values: Vec<f64> = forecast.predictions.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.5, 1.0, 0.5, 0.0, 0.0, 0.0]);
        assert!(forecast
            .predictions
            .iter()
            .all(|p| p.state == Some(ChargeState::Discharging)));
        assert_eq!(forecast.current_state, Some(2.0));
        assert_eq!(forecast.predictions[0].confidence, 0.94);
        assert_eq!(forecast.predictions[0].timestamp, "2025-01-01T01:00:00Z");

        let forecast = agent()
            .predict_battery_state_at(&hourly(&[0.0]), ForecastEngine::Svr, 2, start())
            .unwrap();
        assert_eq!(forecast.predictions[1].state, Some(ChargeState::Charging));

        let wire = serde_json::to_value(&forecast).unwrap();
        assert_eq!(wire["asset_type"], "battery");
        assert_eq!(wire["predictions"][0]["state"], "charging");
    }

    #[test]
    fn test_solar_follows_daylight_curve() {
        let forecast = agent()
            .predict_solar_generation_at(&hourly(&[40.0, 60.0]), ForecastEngine::Prophet, 24, start())
            .unwrap();

        let at = |hour: u32| {
            forecast
                .predictions
                .iter()
                .find(|p| p.hour_of_day == Some(hour))
                .unwrap()
                .value
        };
        assert_eq!(at(12), 50.0);
        assert_eq!(at(2), 5.0);
        assert_eq!(at(6), 0.0);
        assert_eq!(at(9), round2(50.0 * (PI / 4.0).sin()));
        assert_eq!(forecast.asset_type, Some(AssetType::Solar));
    }

    #[test]
    fn test_time_series_drift() {
        let forecast = agent()
            .predict_time_series_at(&hourly(&[0.0, 20.0]), ForecastEngine::Lstm, 2, start())
            .unwrap();
        assert_eq!(forecast.predictions[0].value, 20.0);
        assert_eq!(forecast.predictions[1].value, 19.75);
        assert_eq!(forecast.forecast_end, "2025-01-01T02:00:00Z");
        assert!(forecast.asset_type.is_none());

        let err = agent()
            .predict_time_series_at(&[], ForecastEngine::Lstm, 2, start())
            .unwrap_err();
        assert_matches!(err, Error::InvalidParams(_));
        let err = agent()
            .predict_battery_state_at(&hourly(&[1.0]), ForecastEngine::Svr, 0, start())
            .unwrap_err();
        assert_matches!(err, Error::InvalidParams(_));
    }

    #[test]
    fn test_visualize_tags_asset() {
        let chart = agent().visualize_data(&hourly(&[1.0, 2.0]), &Value::Null, AssetType::Wind);
        assert_eq!(chart["visualization"]["asset_type"], "wind");
        assert_eq!(
            chart["visualization"]["data"]["historical"].as_array().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_analyze_battery_with_peer() {
        let dispatcher = Dispatcher::new();
        let settings = AgentSettings::default();
        attach(Arc::new(DataQualityAgent::new(&settings)), &dispatcher).await;
        let supply = Arc::new(SupplySectorAgent::new(&settings, PeerClient::new(&dispatcher)));
        attach(Arc::clone(&supply), &dispatcher).await;

        let mut raw = serde_json::to_value(hourly(&[90.0; 12])).unwrap();
        raw[4]["value"] = Value::Null;
        let result = dispatcher
            .send_request(
                AGENT_ID,
                ANALYZE,
                json!({ "asset_type": "battery", "data_points": raw, "prediction_horizon": 4 }),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(result["asset_type"], "battery");
        assert_eq!(result["quality_assessment"]["data_source"], "supply_sector_battery");
        assert_eq!(result["imputation"]["imputed_count"], 1);
        assert_eq!(result["metadata"]["record_count"], 12);
        assert_eq!(result["selected_engine"]["selected_engine"], "svr");
        assert_eq!(result["prediction"]["current_state"], 90.0);
        assert_eq!(result["prediction"]["predictions"][3]["value"], 88.0);
        assert_eq!(supply.memory().len().await, 1);
    }

    #[tokio::test]
    async fn test_analyze_without_data_quality_agent() {
        let dispatcher = Dispatcher::new();
        let supply = SupplySectorAgent::new(&AgentSettings::default(), PeerClient::new(&dispatcher));
        let result = supply
            .analyze(json!({ "asset_type": "wind", "data_points": hourly(&[3.0]) }))
            .await
            .unwrap();

        assert_eq!(result["status"], "validation_failed");
        assert!(result["reason"].as_str().unwrap().contains("AGENT_NOT_FOUND"));
        assert!(supply.memory().is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_asset_type_is_rejected() {
        let err = agent()
            .analyze(json!({ "asset_type": "hamster_wheel" }))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidParams(_));
    }
}

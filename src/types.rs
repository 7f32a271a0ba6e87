//! Core types for QA ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decoded spreadsheet cell, always a trimmed string.
pub type RawCell = String;

/// Rows of cells in file order.
pub type Grid = Vec<Vec<RawCell>>;

/// QA test types with their own field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    AccuracyOfOperatingPotential,
    AccuracyOfIrradiationTime,
    LinearityOfMaLoading,
    LinearityOfMasLoading,
    ConsistencyOfRadiationOutput,
    RadiationLeakageLevel,
    RadiationProtectionSurvey,
}

impl TestType {
    pub const ALL: [TestType; 7] = [
        TestType::AccuracyOfOperatingPotential,
        TestType::AccuracyOfIrradiationTime,
        TestType::LinearityOfMaLoading,
        TestType::LinearityOfMasLoading,
        TestType::ConsistencyOfRadiationOutput,
        TestType::RadiationLeakageLevel,
        TestType::RadiationProtectionSurvey,
    ];

    /// Identifier used in config keys and backend URLs.
    pub fn slug(&self) -> &'static str {
        match self {
            TestType::AccuracyOfOperatingPotential => "accuracy_of_operating_potential",
            TestType::AccuracyOfIrradiationTime => "accuracy_of_irradiation_time",
            TestType::LinearityOfMaLoading => "linearity_of_ma_loading",
            TestType::LinearityOfMasLoading => "linearity_of_mas_loading",
            TestType::ConsistencyOfRadiationOutput => "consistency_of_radiation_output",
            TestType::RadiationLeakageLevel => "radiation_leakage_level",
            TestType::RadiationProtectionSurvey => "radiation_protection_survey",
        }
    }

    /// Human-readable title as printed on reports.
    pub fn title(&self) -> &'static str {
        match self {
            TestType::AccuracyOfOperatingPotential => "Accuracy Of Operating Potential",
            TestType::AccuracyOfIrradiationTime => "Accuracy Of Irradiation Time",
            TestType::LinearityOfMaLoading => "Linearity Of mA Loading",
            TestType::LinearityOfMasLoading => "Linearity Of mAs Loading",
            TestType::ConsistencyOfRadiationOutput => "Consistency Of Radiation Output",
            TestType::RadiationLeakageLevel => "Radiation Leakage Level",
            TestType::RadiationProtectionSurvey => "Radiation Protection Survey",
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

impl std::str::FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        TestType::ALL
            .into_iter()
            .find(|t| t.slug() == normalized)
            .ok_or_else(|| format!("Unknown test type: {}", s))
    }
}

/// Atomic output of the section parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedField {
    pub test_name: TestType,
    pub row_index: u32,
    pub field_name: String,
    pub value: String,
}

/// Raw values of one physical measurement row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub test_name: TestType,
    pub row_index: u32,
    pub values: BTreeMap<String, String>,
}

impl MeasurementRow {
    pub fn new(test_name: TestType, row_index: u32) -> Self {
        Self {
            test_name,
            row_index,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Numeric, finite value of a field, if it parses.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(parse_number)
    }
}

/// Parse a trimmed cell as a finite number.
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A derived value that may be unavailable.
///
/// Serialized as a number or `null`, never as NaN or zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Metric {
    Value(f64),
    Unavailable,
}

impl Metric {
    /// Available only for finite values.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Metric::Value(value)
        } else {
            Metric::Unavailable
        }
    }

    /// Available only for finite, strictly positive values.
    pub fn positive(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() && v > 0.0 => Metric::Value(v),
            _ => Metric::Unavailable,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(*v),
            Metric::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Value(_))
    }
}

impl From<Option<f64>> for Metric {
    fn from(value: Option<f64>) -> Self {
        value.map(Metric::from_f64).unwrap_or(Metric::Unavailable)
    }
}

impl From<Metric> for Option<f64> {
    fn from(metric: Metric) -> Self {
        metric.value()
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{:.4}", v),
            Metric::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Remark attached to a derived row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    #[serde(rename = "")]
    Unset,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "Pass"),
            Verdict::Fail => write!(f, "Fail"),
            Verdict::Unset => write!(f, ""),
        }
    }
}

/// Absolute tolerance of the `=` comparison.
pub const EQUALITY_EPSILON: f64 = 1e-9;

/// Comparison applied between a derived metric and its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "=")]
    Equal,
}

impl Comparison {
    pub fn holds(&self, metric: f64, threshold: f64) -> bool {
        match self {
            Comparison::LessOrEqual => metric <= threshold,
            Comparison::GreaterOrEqual => metric >= threshold,
            Comparison::Equal => (metric - threshold).abs() <= EQUALITY_EPSILON,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::LessOrEqual => write!(f, "<="),
            Comparison::GreaterOrEqual => write!(f, ">="),
            Comparison::Equal => write!(f, "="),
        }
    }
}

impl std::str::FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<=" | "≤" => Ok(Comparison::LessOrEqual),
            ">=" | "≥" => Ok(Comparison::GreaterOrEqual),
            "=" | "==" => Ok(Comparison::Equal),
            _ => Err(format!("Unknown comparison operator: {}", s)),
        }
    }
}

/// Threshold plus operator used to produce a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub value: f64,
    pub operator: Comparison,
}

impl Tolerance {
    pub const fn at_most(value: f64) -> Self {
        Self {
            value,
            operator: Comparison::LessOrEqual,
        }
    }

    pub fn verdict(&self, metric: Metric) -> Verdict {
        match metric {
            Metric::Value(v) if self.operator.holds(v, self.value) => Verdict::Pass,
            Metric::Value(_) => Verdict::Fail,
            Metric::Unavailable => Verdict::Unset,
        }
    }
}

impl std::fmt::Display for Tolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.operator, self.value)
    }
}

/// Unit of survey-meter readings for leakage tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureUnit {
    #[serde(rename = "mR/h")]
    MilliRoentgenPerHour,
    #[serde(rename = "mGy/h")]
    MilliGrayPerHour,
}

impl ExposureUnit {
    /// Parse unit text as written on lab sheets ("mR/hr", "mGy/h", ...).
    pub fn from_label(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase().replace(' ', "");
        match normalized.as_str() {
            "mr/h" | "mr/hr" | "mr" => Some(ExposureUnit::MilliRoentgenPerHour),
            "mgy/h" | "mgy/hr" | "mgy" => Some(ExposureUnit::MilliGrayPerHour),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExposureUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposureUnit::MilliRoentgenPerHour => write!(f, "mR/h"),
            ExposureUnit::MilliGrayPerHour => write!(f, "mGy/h"),
        }
    }
}

/// A measurement row with its computed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRow {
    pub row: MeasurementRow,
    pub average: Metric,
    pub peak: Metric,
    /// Test-specific primary metric (X, deviation %, CoV or dose).
    pub primary: Metric,
    pub x_max: Metric,
    pub x_min: Metric,
    pub coefficient: Metric,
    pub remark: Verdict,
}

/// Where a record's rows came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file_name: String,
    pub sha256: String,
    pub format: String,
}

/// Document persisted per service and test type.
///
/// Holds raw rows and tolerance only; derived rows are recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub service_id: String,
    pub test_type: TestType,
    pub rows: Vec<MeasurementRow>,
    pub tolerance: Tolerance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_slug() {
        for t in TestType::ALL {
            assert_eq!(t.slug().parse::<TestType>().unwrap(), t);
        }
        assert_eq!(
            "Linearity-Of-mA-Loading".parse::<TestType>().unwrap(),
            TestType::LinearityOfMaLoading
        );
        assert!("unknown".parse::<TestType>().is_err());
    }

    #[test]
    fn test_metric_serializes_unavailable_as_null() {
        let json = serde_json::to_string(&vec![Metric::Value(0.5), Metric::Unavailable]).unwrap();
        assert_eq!(json, "[0.5,null]");

        let back: Vec<Metric> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Metric::Value(0.5), Metric::Unavailable]);
    }

    #[test]
    fn test_metric_positive_rejects_zero_and_nan() {
        assert_eq!(Metric::positive(Some(0.0)), Metric::Unavailable);
        assert_eq!(Metric::positive(Some(-1.0)), Metric::Unavailable);
        assert_eq!(Metric::positive(Some(f64::NAN)), Metric::Unavailable);
        assert_eq!(Metric::positive(None), Metric::Unavailable);
        assert_eq!(Metric::positive(Some(2.0)), Metric::Value(2.0));
    }

    #[test]
    fn test_verdict_serializes_unset_as_empty_string() {
        assert_eq!(serde_json::to_string(&Verdict::Unset).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Verdict::Pass).unwrap(), "\"Pass\"");
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let tol = Tolerance::at_most(0.1);
        assert_eq!(tol.verdict(Metric::Value(0.1)), Verdict::Pass);
        assert_eq!(tol.verdict(Metric::Value(0.1000001)), Verdict::Fail);
        assert_eq!(tol.verdict(Metric::Unavailable), Verdict::Unset);

        let at_least = Tolerance {
            value: 2.0,
            operator: Comparison::GreaterOrEqual,
        };
        assert_eq!(at_least.verdict(Metric::Value(2.5)), Verdict::Pass);
        assert_eq!(at_least.verdict(Metric::Value(1.5)), Verdict::Fail);
    }

    #[test]
    fn test_comparison_parses_symbols() {
        assert_eq!("<=".parse::<Comparison>().unwrap(), Comparison::LessOrEqual);
        assert_eq!("≥".parse::<Comparison>().unwrap(), Comparison::GreaterOrEqual);
        assert_eq!("=".parse::<Comparison>().unwrap(), Comparison::Equal);
        assert!("<".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_equal_verdict_uses_absolute_epsilon() {
        let tolerance = Tolerance {
            value: 0.02,
            operator: Comparison::Equal,
        };

        assert_eq!(tolerance.verdict(Metric::Value(0.02)), Verdict::Pass);
        assert_eq!(tolerance.verdict(Metric::Value(0.02 + 5e-10)), Verdict::Pass);
        assert_eq!(tolerance.verdict(Metric::Value(0.02 - 5e-10)), Verdict::Pass);
        assert_eq!(tolerance.verdict(Metric::Value(0.02 + 1e-8)), Verdict::Fail);
        assert_eq!(tolerance.verdict(Metric::Value(0.02 - 1e-8)), Verdict::Fail);
        assert_eq!(tolerance.verdict(Metric::Unavailable), Verdict::Unset);

        // Sums that miss the threshold by float error still compare equal
        assert!(Comparison::Equal.holds(0.1 + 0.2, 0.3));
    }

    #[test]
    fn test_ordered_verdicts_are_inclusive() {
        let at_most = Tolerance::at_most(1.0);
        assert_eq!(at_most.verdict(Metric::Value(1.0)), Verdict::Pass);
        assert_eq!(at_most.verdict(Metric::Value(1.0 + 1e-6)), Verdict::Fail);

        let at_least = Tolerance {
            value: 1.0,
            operator: Comparison::GreaterOrEqual,
        };
        assert_eq!(at_least.verdict(Metric::Value(1.0)), Verdict::Pass);
        assert_eq!(at_least.verdict(Metric::Value(1.0 - 1e-6)), Verdict::Fail);
    }

    #[test]
    fn test_exposure_unit_labels() {
        assert_eq!(
            ExposureUnit::from_label("mGy/hr"),
            Some(ExposureUnit::MilliGrayPerHour)
        );
        assert_eq!(
            ExposureUnit::from_label(" mR / h "),
            Some(ExposureUnit::MilliRoentgenPerHour)
        );
        assert_eq!(ExposureUnit::from_label("Sv"), None);
    }
}

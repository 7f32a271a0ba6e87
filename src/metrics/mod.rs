//! Derived-metric calculator.
//!
//! Pure functions from measurement rows to derived rows. Nothing here fails:
//! values that do not parse, or that must be positive and are not, become
//! [`Metric::Unavailable`] and propagate to everything computed from them.

use serde::Serialize;
use tracing::warn;

use crate::schema::{self, Formula, Normalizer};
use crate::types::{
    DerivedRow, ExposureUnit, MeasurementRow, Metric, TestType, Tolerance, Verdict,
};

/// Milliroentgen per milligray used for survey-meter unit conversion.
pub const MR_PER_MGY: f64 = 114.0;

/// Inputs besides the rows themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedParams {
    pub formula: Formula,
    pub tolerance: Tolerance,
    pub measurement_fields: Vec<&'static str>,
    /// Reading unit when a leakage section does not state one.
    pub leakage_unit: ExposureUnit,
}

impl DerivedParams {
    pub fn new(test_type: TestType, tolerance: Tolerance, leakage_unit: ExposureUnit) -> Self {
        let schema = schema::schema(test_type);
        Self {
            formula: schema.formula,
            tolerance,
            measurement_fields: schema.measurement_fields(),
            leakage_unit,
        }
    }
}

/// Compute derived rows for one test instance.
pub fn compute(rows: &[MeasurementRow], params: &DerivedParams) -> Vec<DerivedRow> {
    let readings: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| positive_readings(row, &params.measurement_fields))
        .collect();

    let primaries: Vec<Metric> = rows
        .iter()
        .zip(&readings)
        .map(|(row, values)| primary_metric(row, values, rows, params))
        .collect();

    let available: Vec<f64> = primaries.iter().filter_map(Metric::value).collect();
    let x_max = extremum(&available, f64::max);
    let x_min = extremum(&available, f64::min);

    let coefficient = match params.formula {
        Formula::Linearity { .. } => coefficient_of_linearity(x_max, x_min),
        _ => Metric::Unavailable,
    };

    rows.iter()
        .zip(readings)
        .zip(primaries)
        .map(|((row, values), primary)| {
            let remark = match params.formula {
                // Rows without an X of their own do not share the group verdict
                Formula::Linearity { .. } if !primary.is_available() => Verdict::Unset,
                Formula::Linearity { .. } => {
                    Tolerance::at_most(params.tolerance.value).verdict(coefficient)
                }
                Formula::Deviation { .. } => params
                    .tolerance
                    .verdict(primary.value().map(f64::abs).into()),
                Formula::Consistency | Formula::Leakage { .. } => {
                    params.tolerance.verdict(primary)
                }
            };

            DerivedRow {
                row: row.clone(),
                average: mean(&values),
                peak: extremum(&values, f64::max),
                primary,
                x_max,
                x_min,
                coefficient,
                remark,
            }
        })
        .collect()
}

/// Numeric, finite, strictly positive measurement values of a row.
fn positive_readings(row: &MeasurementRow, fields: &[&'static str]) -> Vec<f64> {
    fields
        .iter()
        .filter_map(|f| row.number(f))
        .filter(|v| *v > 0.0)
        .collect()
}

fn primary_metric(
    row: &MeasurementRow,
    values: &[f64],
    group: &[MeasurementRow],
    params: &DerivedParams,
) -> Metric {
    let average = mean(values);

    match params.formula {
        Formula::Linearity { normalizer } => divide(average, normalizer_value(row, normalizer)),
        Formula::Deviation { reference } => {
            match (average, Metric::positive(row.number(reference))) {
                (Metric::Value(avg), Metric::Value(set)) => {
                    Metric::from_f64((avg - set) / set * 100.0)
                }
                _ => Metric::Unavailable,
            }
        }
        Formula::Consistency => coefficient_of_variation(values),
        Formula::Leakage {
            workload,
            reference_current,
            unit,
        } => {
            let Some(unit) = reading_unit(row, group, unit, params.leakage_unit) else {
                return Metric::Unavailable;
            };

            leakage_dose(
                setting(row, group, workload),
                extremum(values, f64::max),
                setting(row, group, reference_current),
                unit,
            )
        }
    }
}

/// Unit stated on the row, else anywhere in the group, else `fallback`.
/// `None` when the stated unit cannot be converted.
fn reading_unit(
    row: &MeasurementRow,
    group: &[MeasurementRow],
    field: &str,
    fallback: ExposureUnit,
) -> Option<ExposureUnit> {
    let Some(text) = row
        .get(field)
        .or_else(|| group.iter().find_map(|r| r.get(field)))
    else {
        return Some(fallback);
    };

    let unit = ExposureUnit::from_label(text);
    if unit.is_none() {
        warn!(
            unit = %text,
            row = row.row_index,
            "Unrecognized reading unit, dose left unavailable"
        );
    }
    unit
}

/// A positive setting from the row itself, else the first one in the group.
fn setting(row: &MeasurementRow, group: &[MeasurementRow], field: &str) -> Metric {
    let own = Metric::positive(row.number(field));
    if own.is_available() {
        return own;
    }
    group
        .iter()
        .map(|r| Metric::positive(r.number(field)))
        .find(Metric::is_available)
        .unwrap_or(Metric::Unavailable)
}

fn normalizer_value(row: &MeasurementRow, normalizer: Normalizer) -> Metric {
    match normalizer {
        Normalizer::Field(field) => Metric::positive(row.number(field)),
        Normalizer::TotalOrProduct { total, factors: (a, b) } => {
            let own = Metric::positive(row.number(total));
            if own.is_available() {
                own
            } else {
                product(row, a, b)
            }
        }
    }
}

fn product(row: &MeasurementRow, a: &str, b: &str) -> Metric {
    match (
        Metric::positive(row.number(a)),
        Metric::positive(row.number(b)),
    ) {
        (Metric::Value(x), Metric::Value(y)) => Metric::positive(Some(x * y)),
        _ => Metric::Unavailable,
    }
}

/// Leakage dose in mGy:
/// `(workload × reading_mR) / (60 × reference_current) / 114`.
pub fn leakage_dose(
    workload: Metric,
    peak_reading: Metric,
    reference_current: Metric,
    unit: ExposureUnit,
) -> Metric {
    let (Metric::Value(workload), Metric::Value(reading), Metric::Value(current)) =
        (workload, peak_reading, reference_current)
    else {
        return Metric::Unavailable;
    };
    if workload <= 0.0 || reading <= 0.0 || current <= 0.0 {
        return Metric::Unavailable;
    }

    let reading_mr = match unit {
        ExposureUnit::MilliRoentgenPerHour => reading,
        ExposureUnit::MilliGrayPerHour => reading * MR_PER_MGY,
    };
    let dose_mr = (workload * reading_mr) / (60.0 * current);
    Metric::from_f64(dose_mr / MR_PER_MGY)
}

/// `(max − min) / (max + min)`, unavailable for a non-positive denominator.
pub fn coefficient_of_linearity(x_max: Metric, x_min: Metric) -> Metric {
    match (x_max, x_min) {
        (Metric::Value(max), Metric::Value(min)) if max + min > 0.0 => {
            Metric::from_f64((max - min) / (max + min))
        }
        _ => Metric::Unavailable,
    }
}

fn divide(numerator: Metric, denominator: Metric) -> Metric {
    match (numerator, denominator) {
        (Metric::Value(n), Metric::Value(d)) if d > 0.0 => Metric::from_f64(n / d),
        _ => Metric::Unavailable,
    }
}

fn mean(values: &[f64]) -> Metric {
    if values.is_empty() {
        return Metric::Unavailable;
    }
    Metric::from_f64(values.iter().sum::<f64>() / values.len() as f64)
}

fn extremum(values: &[f64], pick: fn(f64, f64) -> f64) -> Metric {
    values
        .iter()
        .copied()
        .reduce(pick)
        .map(Metric::from_f64)
        .unwrap_or(Metric::Unavailable)
}

/// Sample standard deviation over the mean; needs at least two readings.
fn coefficient_of_variation(values: &[f64]) -> Metric {
    if values.len() < 2 {
        return Metric::Unavailable;
    }
    let Metric::Value(m) = mean(values) else {
        return Metric::Unavailable;
    };
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    divide(Metric::from_f64(variance.sqrt()), Metric::Value(m))
}

/// Pass/fail tally for a set of derived rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerdictSummary {
    pub rows: usize,
    pub passed: usize,
    pub failed: usize,
    pub unset: usize,
}

impl VerdictSummary {
    pub fn from_rows(rows: &[DerivedRow]) -> Self {
        let count = |v: Verdict| rows.iter().filter(|r| r.remark == v).count();
        Self {
            rows: rows.len(),
            passed: count(Verdict::Pass),
            failed: count(Verdict::Fail),
            unset: count(Verdict::Unset),
        }
    }

    /// Fail if any row failed, pass if every row passed, otherwise unset.
    pub fn overall(&self) -> Verdict {
        if self.failed > 0 {
            Verdict::Fail
        } else if self.rows > 0 && self.passed == self.rows {
            Verdict::Pass
        } else {
            Verdict::Unset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Schema default tolerance with mR/h readings.
    fn defaults(test_type: TestType) -> DerivedParams {
        DerivedParams::new(
            test_type,
            schema::schema(test_type).default_tolerance,
            ExposureUnit::MilliRoentgenPerHour,
        )
    }

    fn row(test: TestType, index: u32, values: &[(&str, &str)]) -> MeasurementRow {
        let mut row = MeasurementRow::new(test, index);
        for (k, v) in values {
            row.values.insert(k.to_string(), v.to_string());
        }
        row
    }

    fn approx(metric: Metric, expected: f64) {
        let value = metric.value().expect("metric should be available");
        assert!(
            (value - expected).abs() < 1e-4,
            "expected ~{}, got {}",
            expected,
            value
        );
    }

    fn ma_rows() -> Vec<MeasurementRow> {
        let t = TestType::LinearityOfMaLoading;
        vec![
            row(t, 1, &[("ma", "100"), ("measured_1", "5.0"), ("measured_2", "5.2")]),
            row(t, 2, &[("ma", "200"), ("measured_1", "10.1"), ("measured_2", "9.9")]),
        ]
    }

    #[test]
    fn test_ma_linearity_example() {
        let params = defaults(TestType::LinearityOfMaLoading);
        let derived = compute(&ma_rows(), &params);

        approx(derived[0].average, 5.1);
        approx(derived[1].average, 10.0);
        approx(derived[0].primary, 0.051);
        approx(derived[1].primary, 0.05);
        approx(derived[0].x_max, 0.051);
        approx(derived[0].x_min, 0.05);
        approx(derived[0].coefficient, 0.0099);
        assert!(derived.iter().all(|d| d.remark == Verdict::Pass));
    }

    #[test]
    fn test_empty_measurement_is_excluded_from_extrema() {
        let t = TestType::LinearityOfMaLoading;
        let mut rows = ma_rows();
        rows.push(row(t, 3, &[("ma", "300")]));

        let derived = compute(&rows, &defaults(t));

        assert_eq!(derived[2].average, Metric::Unavailable);
        assert_eq!(derived[2].primary, Metric::Unavailable);
        approx(derived[2].x_max, 0.051);
        approx(derived[2].x_min, 0.05);
        assert_eq!(derived[2].remark, Verdict::Unset);
        assert_eq!(derived[0].remark, Verdict::Pass);
        assert_eq!(derived[1].remark, Verdict::Pass);
    }

    #[test]
    fn test_label_rows_do_not_take_group_verdict() {
        let t = TestType::LinearityOfMaLoading;
        let mut rows = vec![row(t, 1, &[("kv", "80")])];
        rows.extend(ma_rows());

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].coefficient, 0.0099);
        assert_eq!(derived[0].remark, Verdict::Unset);
        assert_eq!(derived[1].remark, Verdict::Pass);
        assert_eq!(derived[2].remark, Verdict::Pass);
    }

    #[test]
    fn test_single_unavailable_row_leaves_verdict_unset() {
        let t = TestType::LinearityOfMaLoading;
        let rows = vec![row(t, 1, &[("ma", "300"), ("measured_1", "")])];

        let derived = compute(&rows, &defaults(t));

        assert_eq!(derived[0].average, Metric::Unavailable);
        assert_eq!(derived[0].x_max, Metric::Unavailable);
        assert_eq!(derived[0].coefficient, Metric::Unavailable);
        assert_eq!(derived[0].remark, Verdict::Unset);
        assert_eq!(derived[0].remark.to_string(), "");
    }

    #[test]
    fn test_non_positive_and_non_numeric_values_are_excluded() {
        let t = TestType::LinearityOfMaLoading;
        let rows = vec![row(
            t,
            1,
            &[
                ("ma", "100"),
                ("measured_1", "4.0"),
                ("measured_2", "0"),
                ("measured_3", "-2"),
                ("measured_4", "n/a"),
                ("measured_5", "6.0"),
            ],
        )];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].average, 5.0);
        approx(derived[0].peak, 6.0);
    }

    #[test]
    fn test_zero_normalizer_is_unavailable() {
        let t = TestType::LinearityOfMaLoading;
        let rows = vec![row(t, 1, &[("ma", "0"), ("measured_1", "4.0")])];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].average, 4.0);
        assert_eq!(derived[0].primary, Metric::Unavailable);
        assert_eq!(derived[0].coefficient, Metric::Unavailable);
        assert_eq!(derived[0].remark, Verdict::Unset);
    }

    #[test]
    fn test_mas_linearity_normalizes_by_ma_times_time() {
        let t = TestType::LinearityOfMasLoading;
        let rows = vec![
            row(t, 1, &[("ma", "100"), ("time", "0.1"), ("measured_1", "2.0")]),
            row(t, 2, &[("ma", "100"), ("time", "0.2"), ("measured_1", "4.4")]),
            row(t, 3, &[("ma", "100"), ("measured_1", "4.4")]),
        ];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].primary, 0.2);
        approx(derived[1].primary, 0.22);
        assert_eq!(derived[2].primary, Metric::Unavailable);
        approx(derived[0].coefficient, 0.02 / 0.42);
    }

    #[test]
    fn test_mas_linearity_uses_mas_column() {
        let t = TestType::LinearityOfMasLoading;
        let rows = vec![
            row(t, 1, &[("mas", "10"), ("measured_1", "2.0")]),
            row(t, 2, &[("mas", "20"), ("measured_1", "4.4")]),
            // mAs wins over mA x time when both are present
            row(t, 3, &[("mas", "10"), ("ma", "100"), ("time", "1"), ("measured_1", "2.0")]),
        ];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].primary, 0.2);
        approx(derived[1].primary, 0.22);
        approx(derived[2].primary, 0.2);
        approx(derived[0].coefficient, 0.02 / 0.42);
        assert!(derived.iter().all(|d| d.remark == Verdict::Pass));
    }

    #[test]
    fn test_verdict_is_inclusive_and_monotonic() {
        let t = TestType::LinearityOfMaLoading;
        let params = defaults(t);
        let pair = |high: &str, low: &str| {
            vec![
                row(t, 1, &[("ma", "1"), ("measured_1", high)]),
                row(t, 2, &[("ma", "1"), ("measured_1", low)]),
            ]
        };

        // (1.375 - 1.125) / (1.375 + 1.125) is exactly the tolerance.
        let at = compute(&pair("1.375", "1.125"), &params);
        assert_eq!(at[0].coefficient, Metric::Value(0.1));
        assert_eq!(at[0].remark, Verdict::Pass);

        let below = compute(&pair("1.3", "1.125"), &params);
        assert_eq!(below[0].remark, Verdict::Pass);

        let above = compute(&pair("1.5", "1.125"), &params);
        assert_eq!(above[0].remark, Verdict::Fail);
        assert_eq!(above[1].remark, Verdict::Fail);
    }

    #[test]
    fn test_linearity_operator_is_not_configurable() {
        let t = TestType::LinearityOfMaLoading;
        let params = DerivedParams::new(
            t,
            Tolerance {
                value: 0.1,
                operator: crate::types::Comparison::GreaterOrEqual,
            },
            ExposureUnit::MilliRoentgenPerHour,
        );
        let derived = compute(&ma_rows(), &params);
        assert!(derived.iter().all(|d| d.remark == Verdict::Pass));
    }

    #[test]
    fn test_compute_is_idempotent() {
        let params = defaults(TestType::LinearityOfMaLoading);
        let rows = ma_rows();

        let first = compute(&rows, &params);
        let second = compute(&rows, &params);

        assert_eq!(first, second);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(
                a.coefficient.value().map(f64::to_bits),
                b.coefficient.value().map(f64::to_bits)
            );
        }
    }

    #[test]
    fn test_leakage_example() {
        let t = TestType::RadiationLeakageLevel;
        let rows = vec![
            row(t, 1, &[("workload", "500"), ("reference_ma", "100")]),
            row(t, 2, &[("unit", "mGy/h")]),
            row(t, 3, &[("location", "Left"), ("measured_1", "0.02"), ("measured_2", "0.01")]),
        ];

        let derived = compute(&rows, &defaults(t));

        assert_eq!(derived[0].primary, Metric::Unavailable);
        assert_eq!(derived[0].remark, Verdict::Unset);
        approx(derived[2].peak, 0.02);
        approx(derived[2].primary, 0.19 / 114.0);
        assert_eq!(derived[2].remark, Verdict::Pass);
        approx(derived[2].x_max, 0.19 / 114.0);
    }

    #[test]
    fn test_leakage_unit_falls_back_to_configured_unit() {
        let t = TestType::RadiationLeakageLevel;
        let rows = vec![row(
            t,
            1,
            &[
                ("workload", "500"),
                ("reference_ma", "100"),
                ("measured_1", "2.28"),
            ],
        )];

        let mr = compute(&rows, &defaults(t));
        approx(mr[0].primary, 0.19 / 114.0);

        let params = DerivedParams::new(
            t,
            Tolerance::at_most(1.0),
            ExposureUnit::MilliGrayPerHour,
        );
        let mgy = compute(&rows, &params);
        approx(mgy[0].primary, 0.19);
    }

    #[test]
    fn test_unrecognized_leakage_unit_is_unavailable() {
        let t = TestType::RadiationLeakageLevel;
        let rows = vec![
            row(t, 1, &[("workload", "500"), ("reference_ma", "100")]),
            row(t, 2, &[("unit", "µGy/h")]),
            row(t, 3, &[("location", "Left"), ("measured_1", "0.02")]),
            row(t, 4, &[("location", "Top"), ("unit", "mGy/h"), ("measured_1", "0.02")]),
        ];

        let derived = compute(&rows, &defaults(t));
        assert_eq!(derived[2].primary, Metric::Unavailable);
        assert_eq!(derived[2].remark, Verdict::Unset);

        // A readable unit on the row itself still wins
        approx(derived[3].primary, 0.19 / 114.0);
        assert_eq!(derived[3].remark, Verdict::Pass);
    }

    #[test]
    fn test_leakage_missing_input_is_unavailable() {
        let t = TestType::RadiationLeakageLevel;
        let rows = vec![row(
            t,
            1,
            &[("workload", "0"), ("reference_ma", "100"), ("measured_1", "2.0")],
        )];

        let derived = compute(&rows, &defaults(t));
        assert_eq!(derived[0].primary, Metric::Unavailable);
        assert_eq!(derived[0].remark, Verdict::Unset);

        assert_eq!(
            leakage_dose(
                Metric::Value(500.0),
                Metric::Value(1.0),
                Metric::Unavailable,
                ExposureUnit::MilliRoentgenPerHour
            ),
            Metric::Unavailable
        );
    }

    #[test]
    fn test_leakage_operator_is_configurable() {
        let t = TestType::RadiationLeakageLevel;
        let rows = vec![row(
            t,
            1,
            &[("workload", "500"), ("reference_ma", "100"), ("measured_1", "2.28")],
        )];
        let params = DerivedParams::new(
            t,
            Tolerance {
                value: 1.0,
                operator: crate::types::Comparison::GreaterOrEqual,
            },
            ExposureUnit::MilliRoentgenPerHour,
        );
        assert_eq!(compute(&rows, &params)[0].remark, Verdict::Fail);
    }

    #[test]
    fn test_deviation_uses_absolute_percent() {
        let t = TestType::AccuracyOfOperatingPotential;
        let rows = vec![
            row(t, 1, &[("kv", "80"), ("measured_1", "78"), ("measured_2", "78")]),
            row(t, 2, &[("kv", "100"), ("measured_1", "108")]),
            row(t, 3, &[("measured_1", "70")]),
        ];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].primary, -2.5);
        assert_eq!(derived[0].remark, Verdict::Pass);
        approx(derived[1].primary, 8.0);
        assert_eq!(derived[1].remark, Verdict::Fail);
        assert_eq!(derived[2].primary, Metric::Unavailable);
        assert_eq!(derived[2].remark, Verdict::Unset);
        assert_eq!(derived[0].coefficient, Metric::Unavailable);
    }

    #[test]
    fn test_consistency_coefficient_of_variation() {
        let t = TestType::ConsistencyOfRadiationOutput;
        let rows = vec![
            row(t, 1, &[("measured_1", "2.0"), ("measured_2", "2.0"), ("measured_3", "2.0")]),
            row(t, 2, &[("measured_1", "1.0"), ("measured_2", "3.0")]),
            row(t, 3, &[("measured_1", "1.0")]),
        ];

        let derived = compute(&rows, &defaults(t));
        approx(derived[0].primary, 0.0);
        assert_eq!(derived[0].remark, Verdict::Pass);
        approx(derived[1].primary, 2.0_f64.sqrt() / 2.0);
        assert_eq!(derived[1].remark, Verdict::Fail);
        assert_eq!(derived[2].primary, Metric::Unavailable);
    }

    #[test]
    fn test_verdict_summary() {
        let derived = compute(
            &ma_rows(),
            &defaults(TestType::LinearityOfMaLoading),
        );
        let summary = VerdictSummary::from_rows(&derived);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.overall(), Verdict::Pass);

        let empty = VerdictSummary::from_rows(&[]);
        assert_eq!(empty.overall(), Verdict::Unset);
    }
}

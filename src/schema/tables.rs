//! Static field schemas for each supported test type.

use super::{FieldRole, FieldSpec, Formula, Normalizer, TestSchema};
use crate::types::{TestType, Tolerance};

const KV: FieldSpec = FieldSpec {
    id: "kv",
    role: FieldRole::Setting,
    headers: &["kV", "Set kV", "Applied kV"],
    labels: &[],
};

const KV_LABEL: FieldSpec = FieldSpec {
    id: "kv",
    role: FieldRole::Setting,
    headers: &[],
    labels: &["kV Setting", "Tube kV"],
};

const FDD_LABEL: FieldSpec = FieldSpec {
    id: "fdd",
    role: FieldRole::Setting,
    headers: &[],
    labels: &["FDD (cm)", "FCD (cm)"],
};

const ACCURACY_OF_OPERATING_POTENTIAL: &[FieldSpec] = &[
    KV,
    FieldSpec {
        id: "ma",
        role: FieldRole::Setting,
        headers: &["mA", "mA Station"],
        labels: &["mA Setting"],
    },
    FieldSpec {
        id: "time",
        role: FieldRole::Setting,
        headers: &[],
        labels: &["Time (s)", "Exposure Time (s)"],
    },
    FDD_LABEL,
    FieldSpec {
        id: "measured_1",
        role: FieldRole::Measurement,
        headers: &["Measured kV 1", "Measured kVp 1"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_2",
        role: FieldRole::Measurement,
        headers: &["Measured kV 2", "Measured kVp 2"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_3",
        role: FieldRole::Measurement,
        headers: &["Measured kV 3", "Measured kVp 3"],
        labels: &[],
    },
];

const ACCURACY_OF_IRRADIATION_TIME: &[FieldSpec] = &[
    KV_LABEL,
    FieldSpec {
        id: "ma",
        role: FieldRole::Setting,
        headers: &[],
        labels: &["mA Setting"],
    },
    FDD_LABEL,
    FieldSpec {
        id: "set_time",
        role: FieldRole::Setting,
        headers: &["Set Time (ms)", "Set Time"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_1",
        role: FieldRole::Measurement,
        headers: &["Measured Time 1", "Measured Time (ms) 1"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_2",
        role: FieldRole::Measurement,
        headers: &["Measured Time 2", "Measured Time (ms) 2"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_3",
        role: FieldRole::Measurement,
        headers: &["Measured Time 3", "Measured Time (ms) 3"],
        labels: &[],
    },
];

const MEASURED_MR: [FieldSpec; 5] = [
    FieldSpec {
        id: "measured_1",
        role: FieldRole::Measurement,
        headers: &["Measured mR 1", "Output 1"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_2",
        role: FieldRole::Measurement,
        headers: &["Measured mR 2", "Output 2"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_3",
        role: FieldRole::Measurement,
        headers: &["Measured mR 3", "Output 3"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_4",
        role: FieldRole::Measurement,
        headers: &["Measured mR 4", "Output 4"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_5",
        role: FieldRole::Measurement,
        headers: &["Measured mR 5", "Output 5"],
        labels: &[],
    },
];

const LINEARITY_OF_MA_LOADING: &[FieldSpec] = &[
    KV_LABEL,
    FDD_LABEL,
    FieldSpec {
        id: "time",
        role: FieldRole::Setting,
        headers: &[],
        labels: &["Time (s)", "Exposure Time (s)"],
    },
    FieldSpec {
        id: "ma",
        role: FieldRole::Setting,
        headers: &["mA Station", "mA"],
        labels: &[],
    },
    MEASURED_MR[0],
    MEASURED_MR[1],
    MEASURED_MR[2],
    MEASURED_MR[3],
    MEASURED_MR[4],
];

const LINEARITY_OF_MAS_LOADING: &[FieldSpec] = &[
    KV_LABEL,
    FDD_LABEL,
    FieldSpec {
        id: "ma",
        role: FieldRole::Setting,
        headers: &["mA Station", "mA"],
        labels: &[],
    },
    FieldSpec {
        id: "time",
        role: FieldRole::Setting,
        headers: &["Time (s)", "Time (sec)", "Time"],
        labels: &[],
    },
    FieldSpec {
        id: "mas",
        role: FieldRole::Setting,
        headers: &["mAs"],
        labels: &[],
    },
    MEASURED_MR[0],
    MEASURED_MR[1],
    MEASURED_MR[2],
    MEASURED_MR[3],
    MEASURED_MR[4],
];

const CONSISTENCY_OF_RADIATION_OUTPUT: &[FieldSpec] = &[
    KV,
    FDD_LABEL,
    FieldSpec {
        id: "mas",
        role: FieldRole::Setting,
        headers: &["mAs"],
        labels: &[],
    },
    MEASURED_MR[0],
    MEASURED_MR[1],
    MEASURED_MR[2],
    MEASURED_MR[3],
    MEASURED_MR[4],
];

const LEAKAGE_SURVEY: &[FieldSpec] = &[
    KV_LABEL,
    FieldSpec {
        id: "workload",
        role: FieldRole::Setting,
        headers: &[],
        labels: &["Workload", "Workload (mA min/week)"],
    },
    FieldSpec {
        id: "reference_ma",
        role: FieldRole::Setting,
        headers: &[],
        labels: &["Max Rated mA", "Reference Current (mA)"],
    },
    FieldSpec {
        id: "unit",
        role: FieldRole::Descriptor,
        headers: &[],
        labels: &["Unit", "Exposure Unit"],
    },
    FieldSpec {
        id: "location",
        role: FieldRole::Descriptor,
        headers: &["Location"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_1",
        role: FieldRole::Measurement,
        headers: &["Exposure 1", "Max Exposure"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_2",
        role: FieldRole::Measurement,
        headers: &["Exposure 2"],
        labels: &[],
    },
    FieldSpec {
        id: "measured_3",
        role: FieldRole::Measurement,
        headers: &["Exposure 3"],
        labels: &[],
    },
];

const LEAKAGE_FORMULA: Formula = Formula::Leakage {
    workload: "workload",
    reference_current: "reference_ma",
    unit: "unit",
};

/// All schemas, one per test type, in `TestType::ALL` order.
pub static SCHEMAS: [TestSchema; 7] = [
    TestSchema {
        test_type: TestType::AccuracyOfOperatingPotential,
        markers: &["ACCURACY OF OPERATING POTENTIAL", "KVP ACCURACY"],
        fields: ACCURACY_OF_OPERATING_POTENTIAL,
        formula: Formula::Deviation { reference: "kv" },
        default_tolerance: Tolerance::at_most(5.0),
    },
    TestSchema {
        test_type: TestType::AccuracyOfIrradiationTime,
        markers: &["ACCURACY OF IRRADIATION TIME", "TIMER ACCURACY"],
        fields: ACCURACY_OF_IRRADIATION_TIME,
        formula: Formula::Deviation {
            reference: "set_time",
        },
        default_tolerance: Tolerance::at_most(10.0),
    },
    TestSchema {
        test_type: TestType::LinearityOfMaLoading,
        markers: &["LINEARITY OF MA LOADING", "MA LINEARITY"],
        fields: LINEARITY_OF_MA_LOADING,
        formula: Formula::Linearity {
            normalizer: Normalizer::Field("ma"),
        },
        default_tolerance: Tolerance::at_most(0.1),
    },
    TestSchema {
        test_type: TestType::LinearityOfMasLoading,
        markers: &[
            "LINEARITY OF MAS LOADING",
            "LINEARITY OF TIME",
            "TIMER LINEARITY",
        ],
        fields: LINEARITY_OF_MAS_LOADING,
        formula: Formula::Linearity {
            normalizer: Normalizer::TotalOrProduct {
                total: "mas",
                factors: ("ma", "time"),
            },
        },
        default_tolerance: Tolerance::at_most(0.1),
    },
    TestSchema {
        test_type: TestType::ConsistencyOfRadiationOutput,
        markers: &[
            "CONSISTENCY OF RADIATION OUTPUT",
            "REPRODUCIBILITY OF RADIATION OUTPUT",
        ],
        fields: CONSISTENCY_OF_RADIATION_OUTPUT,
        formula: Formula::Consistency,
        default_tolerance: Tolerance::at_most(0.05),
    },
    TestSchema {
        test_type: TestType::RadiationLeakageLevel,
        markers: &["RADIATION LEAKAGE LEVEL", "TUBE HOUSING LEAKAGE"],
        fields: LEAKAGE_SURVEY,
        formula: LEAKAGE_FORMULA,
        default_tolerance: Tolerance::at_most(1.0),
    },
    TestSchema {
        test_type: TestType::RadiationProtectionSurvey,
        markers: &["RADIATION PROTECTION SURVEY"],
        fields: LEAKAGE_SURVEY,
        formula: LEAKAGE_FORMULA,
        default_tolerance: Tolerance::at_most(0.02),
    },
];

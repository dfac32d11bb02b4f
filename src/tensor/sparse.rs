//! Per-subject state series for irregularly sampled longitudinal data.

use crate::data::{CountMatrix, Metadata, Variable};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Result, TensorError};
use crate::normalize::transform::{Rclr, RowTransform};
use crate::tensor::centralize::{svd_centralize, Centralized};
use crate::tensor::replicate::{ReplicateHandling, SimpleRng};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for [`build_sparse_with_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseTensorConfig {
    /// Metadata column holding the subject id.
    pub individual_id_column: String,
    /// Numeric metadata column holding the state (e.g. time point).
    pub state_column: String,
    /// Added to every count before the transformation.
    pub pseudocount: f64,
    /// How samples sharing a (subject, state) key are resolved.
    pub replicate_handling: ReplicateHandling,
    /// Remove the subject-shared mean structure after transforming.
    pub svd_centralized: bool,
    /// Rank of the removed mean structure.
    pub n_components_centralize: usize,
    /// Seed for `random` replicate handling.
    pub seed: u64,
    /// Branch lengths parallel to the table's features, passed to the transform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_lengths: Option<Vec<f64>>,
}

impl Default for SparseTensorConfig {
    fn default() -> Self {
        Self {
            individual_id_column: String::new(),
            state_column: String::new(),
            pseudocount: 1.0,
            replicate_handling: ReplicateHandling::Sum,
            svd_centralized: true,
            n_components_centralize: 1,
            seed: 42,
            branch_lengths: None,
        }
    }
}

impl SparseTensorConfig {
    /// Create a config for the given subject and state columns.
    pub fn new(individual_id_column: &str, state_column: &str) -> Self {
        Self {
            individual_id_column: individual_id_column.to_string(),
            state_column: state_column.to_string(),
            ..Default::default()
        }
    }

    /// Set the replicate policy.
    pub fn with_replicate_handling(mut self, handling: ReplicateHandling) -> Self {
        self.replicate_handling = handling;
        self
    }

    /// Set the pseudocount.
    pub fn with_pseudocount(mut self, pseudocount: f64) -> Self {
        self.pseudocount = pseudocount;
        self
    }

    /// Enable or disable centralization and set its rank.
    pub fn with_centralization(mut self, enabled: bool, n_components: usize) -> Self {
        self.svd_centralized = enabled;
        self.n_components_centralize = n_components;
        self
    }

    /// Set the seed for `random` replicate handling.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set branch lengths (parallel to the table's feature order).
    pub fn with_branch_lengths(mut self, branch_lengths: Vec<f64>) -> Self {
        self.branch_lengths = Some(branch_lengths);
        self
    }
}

/// Per-subject transformed series.
#[derive(Debug, Clone)]
pub struct SparseTensor {
    /// Subject id -> features × states, states ascending.
    pub individual_id_tables: BTreeMap<String, DMatrix<f64>>,
    /// Subject id -> ascending state values, one per table column.
    pub individual_id_state_orders: BTreeMap<String, Vec<f64>>,
    /// Subject id -> representative sample id, one per table column.
    pub individual_id_sample_ids: BTreeMap<String, Vec<String>>,
    /// Feature ids along every table's rows (lexicographic).
    pub feature_order: Vec<String>,
    /// Branch lengths aligned to `feature_order`.
    pub branch_lengths: Option<Vec<f64>>,
    /// Name of the transformation applied.
    pub transformation: String,
    /// Centralized tables and factors, when enabled.
    pub centralized: Option<Centralized>,
    /// Excluded samples and resolved replicates.
    pub diagnostics: Vec<Diagnostic>,
}

impl SparseTensor {
    /// Number of subjects.
    pub fn n_subjects(&self) -> usize {
        self.individual_id_tables.len()
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.feature_order.len()
    }
}

/// Build per-subject series with the default rclr transform.
pub fn build_sparse(
    counts: &CountMatrix,
    metadata: &Metadata,
    individual_id_column: &str,
    state_column: &str,
) -> Result<SparseTensor> {
    build_sparse_with_config(
        counts,
        metadata,
        &SparseTensorConfig::new(individual_id_column, state_column),
    )
}

/// Build per-subject series with the rclr transform and the given config.
pub fn build_sparse_with_config(
    counts: &CountMatrix,
    metadata: &Metadata,
    config: &SparseTensorConfig,
) -> Result<SparseTensor> {
    build_sparse_with_transform(counts, metadata, config, &Rclr)
}

struct Observation {
    state: f64,
    columns: Vec<usize>,
}

/// Build per-subject series with a custom row transformation.
///
/// Table samples present in the metadata with a subject and a finite
/// numeric state participate; others are excluded and reported. Samples
/// sharing a (subject, state) key are resolved by `config.replicate_handling`. The
/// pseudocount is added to the resolved samples × features table, which is
/// then transformed row-wise, split per subject, sorted by state and
/// optionally centralized with [`svd_centralize`].
///
/// # Errors
/// * `MissingColumn` for unknown columns
/// * `Config` if the state column is not numeric, a subject has fewer than
///   two distinct states, the pseudocount is negative or not finite, or the
///   centralization rank is out of range
/// * `DimensionMismatch` if branch lengths do not match the features
/// * `Replicate` under [`ReplicateHandling::Error`] when replicates exist
/// * `Domain` if the transformed table contains NaN
pub fn build_sparse_with_transform(
    counts: &CountMatrix,
    metadata: &Metadata,
    config: &SparseTensorConfig,
    transform: &dyn RowTransform,
) -> Result<SparseTensor> {
    metadata.require_column(&config.individual_id_column)?;
    metadata.require_column(&config.state_column)?;
    let state_is_numeric = metadata
        .column_type(&config.state_column)
        .map(|t| t.is_numeric())
        .unwrap_or(false);
    if !state_is_numeric {
        return Err(TensorError::Config(format!(
            "{} is not a numeric metadata column; choose a column containing only numeric values",
            config.state_column
        )));
    }
    if !(config.pseudocount.is_finite() && config.pseudocount >= 0.0) {
        return Err(TensorError::Config(format!(
            "Pseudocount must be finite and non-negative, got {}",
            config.pseudocount
        )));
    }
    if config.svd_centralized && config.n_components_centralize == 0 {
        return Err(TensorError::Config(
            "n_components_centralize must be at least 1".to_string(),
        ));
    }
    if let Some(bl) = &config.branch_lengths {
        if bl.len() != counts.n_features() {
            return Err(TensorError::DimensionMismatch {
                expected: counts.n_features(),
                actual: bl.len(),
            });
        }
    }

    let mut diagnostics = Vec::new();
    let mut subjects: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
    for (col, sample) in counts.sample_ids().iter().enumerate() {
        let subject = metadata
            .get(sample, &config.individual_id_column)
            .and_then(Variable::label);
        let state = metadata
            .get(sample, &config.state_column)
            .and_then(Variable::as_numeric)
            .filter(|s| s.is_finite());
        let (Some(subject), Some(state)) = (subject, state) else {
            let reason = if metadata.has_sample(sample) {
                "subject or state value is missing or not finite"
            } else {
                "sample is not in the metadata"
            };
            diagnostics.push(Diagnostic::emit(
                DiagnosticKind::SampleExcluded,
                sample.as_str(),
                vec![],
                reason,
            ));
            continue;
        };
        let observations = subjects.entry(subject).or_default();
        match observations.iter_mut().find(|o| o.state == state) {
            Some(o) => o.columns.push(col),
            None => observations.push(Observation {
                state,
                columns: vec![col],
            }),
        }
    }

    if subjects.is_empty() {
        return Err(TensorError::EmptyData(
            "No table sample has a subject and state in the metadata".to_string(),
        ));
    }
    if let Some((subject, observations)) = subjects.iter().find(|(_, o)| o.len() < 2) {
        return Err(TensorError::Config(format!(
            "Subjects must have more than one distinct state; '{}' has {}",
            subject,
            observations.len()
        )));
    }
    for observations in subjects.values_mut() {
        observations.sort_by(|a, b| a.state.total_cmp(&b.state));
    }

    if config.replicate_handling == ReplicateHandling::Error {
        if let Some((subject, observations)) = subjects
            .iter()
            .find(|(_, o)| o.iter().any(|obs| obs.columns.len() > 1))
        {
            return Err(TensorError::Replicate {
                subject: subject.clone(),
                state_column: config.state_column.clone(),
                states: observations
                    .iter()
                    .filter(|o| o.columns.len() > 1)
                    .map(|o| o.state.to_string())
                    .collect(),
            });
        }
    }

    let feature_ids = counts.feature_ids();
    let mut feature_perm: Vec<usize> = (0..feature_ids.len()).collect();
    feature_perm.sort_by(|&a, &b| feature_ids[a].cmp(&feature_ids[b]));
    let feature_order: Vec<String> = feature_perm.iter().map(|&f| feature_ids[f].clone()).collect();
    let branch_lengths: Option<Vec<f64>> = config
        .branch_lengths
        .as_ref()
        .map(|bl| feature_perm.iter().map(|&f| bl[f]).collect());

    // resolve replicates into one row per (subject, state)
    let samples = counts.to_dense_samples();
    let mut rng = SimpleRng::new(config.seed);
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut representatives: Vec<String> = Vec::new();
    for (subject, observations) in &subjects {
        let mut repeated = Vec::new();
        for obs in observations {
            let column = match (obs.columns.len(), config.replicate_handling) {
                (1, _) | (_, ReplicateHandling::Error) => obs.columns[0],
                (n, ReplicateHandling::Random) => obs.columns[rng.choose(n)],
                (_, ReplicateHandling::Sum) => {
                    rows.push(
                        feature_perm
                            .iter()
                            .map(|&f| obs.columns.iter().map(|&c| samples[(c, f)]).sum::<f64>())
                            .collect(),
                    );
                    representatives.push(counts.sample_ids()[obs.columns[0]].clone());
                    repeated.push(obs.state.to_string());
                    continue;
                }
            };
            if obs.columns.len() > 1 {
                repeated.push(obs.state.to_string());
            }
            rows.push(feature_perm.iter().map(|&f| samples[(column, f)]).collect());
            representatives.push(counts.sample_ids()[column].clone());
        }
        if !repeated.is_empty() {
            let (kind, message) = match config.replicate_handling {
                ReplicateHandling::Random => (
                    DiagnosticKind::ReplicatesSubsampled,
                    "kept one replicate sample per state",
                ),
                _ => (DiagnosticKind::ReplicatesSummed, "summed replicate samples per state"),
            };
            diagnostics.push(Diagnostic::emit(kind, subject.as_str(), repeated, message));
        }
    }

    let n_features = feature_order.len();
    let resolved = DMatrix::from_fn(rows.len(), n_features, |r, f| rows[r][f] + config.pseudocount);
    let transformed = transform.transform(&resolved, branch_lengths.as_deref())?;
    if transformed.iter().any(|v| v.is_nan()) {
        return Err(TensorError::Domain(
            "Table contains NaN or missing values post transformation".to_string(),
        ));
    }

    let mut individual_id_tables = BTreeMap::new();
    let mut individual_id_state_orders = BTreeMap::new();
    let mut individual_id_sample_ids = BTreeMap::new();
    let mut offset = 0;
    for (subject, observations) in &subjects {
        let n_states = observations.len();
        let table = DMatrix::from_fn(n_features, n_states, |f, t| transformed[(offset + t, f)]);
        individual_id_tables.insert(subject.clone(), table);
        individual_id_state_orders.insert(
            subject.clone(),
            observations.iter().map(|o| o.state).collect::<Vec<f64>>(),
        );
        individual_id_sample_ids.insert(
            subject.clone(),
            representatives[offset..offset + n_states].to_vec(),
        );
        offset += n_states;
    }

    let centralized = if config.svd_centralized {
        Some(svd_centralize(
            &individual_id_tables,
            config.n_components_centralize,
        )?)
    } else {
        None
    };

    log::info!(
        "Built {} subject series over {} features with {} ({} diagnostics)",
        individual_id_tables.len(),
        n_features,
        transform.name(),
        diagnostics.len()
    );

    Ok(SparseTensor {
        individual_id_tables,
        individual_id_state_orders,
        individual_id_sample_ids,
        feature_order,
        branch_lengths,
        transformation: transform.name().to_string(),
        centralized,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::count_kind;
    use crate::error::ErrorKind;
    use crate::normalize::transform::Clr;
    use approx::assert_relative_eq;

    fn create_metadata(records: &[(&str, &str, &str)]) -> Metadata {
        Metadata::from_records(
            vec!["subject".to_string(), "time".to_string()],
            records
                .iter()
                .map(|(s, subj, t)| (s.to_string(), vec![subj.to_string(), t.to_string()]))
                .collect(),
        )
        .unwrap()
    }

    fn create_counts(samples: &[&str], columns: &[[f64; 3]]) -> CountMatrix {
        let mut triplets = Vec::new();
        for (s, column) in columns.iter().enumerate() {
            for (f, &v) in column.iter().enumerate() {
                if v > 0.0 {
                    triplets.push((f, s, v));
                }
            }
        }
        CountMatrix::from_triplets(
            &triplets,
            vec!["c".into(), "a".into(), "b".into()],
            samples.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    fn longitudinal() -> (CountMatrix, Metadata) {
        let metadata = create_metadata(&[
            ("p1", "A", "2"),
            ("p2", "A", "1"),
            ("p3", "B", "1"),
            ("p4", "B", "5"),
            ("p5", "B", "3"),
        ]);
        let counts = create_counts(
            &["p1", "p2", "p3", "p4", "p5"],
            &[
                [1.0, 2.0, 3.0],
                [4.0, 0.0, 1.0],
                [2.0, 2.0, 2.0],
                [0.0, 5.0, 1.0],
                [3.0, 1.0, 0.0],
            ],
        );
        (counts, metadata)
    }

    #[test]
    fn test_shape_consistency() {
        let (counts, metadata) = longitudinal();
        let tensor = build_sparse(&counts, &metadata, "subject", "time").unwrap();
        assert_eq!(tensor.feature_order, vec!["a", "b", "c"]);
        assert_eq!(tensor.n_subjects(), 2);
        for (subject, table) in &tensor.individual_id_tables {
            assert_eq!(table.nrows(), 3);
            assert_eq!(table.ncols(), tensor.individual_id_state_orders[subject].len());
        }
        assert_eq!(tensor.individual_id_state_orders["A"], vec![1.0, 2.0]);
        assert_eq!(tensor.individual_id_state_orders["B"], vec![1.0, 3.0, 5.0]);
        assert_eq!(tensor.individual_id_sample_ids["B"], vec!["p3", "p5", "p4"]);
        assert!(tensor.centralized.is_some());
    }

    #[test]
    fn test_columns_are_transformed_samples() {
        let (counts, metadata) = longitudinal();
        let config = SparseTensorConfig::new("subject", "time").with_centralization(false, 1);
        let tensor = build_sparse_with_config(&counts, &metadata, &config).unwrap();
        // A at time 1 is p2: (a, b, c) = (0, 1, 4) + 1
        let table = &tensor.individual_id_tables["A"];
        let logs = [1.0_f64.ln(), 2.0_f64.ln(), 5.0_f64.ln()];
        let mean = logs.iter().sum::<f64>() / 3.0;
        for f in 0..3 {
            assert_relative_eq!(table[(f, 0)], logs[f] - mean, epsilon = 1e-12);
        }
        assert!(tensor.centralized.is_none());
    }

    #[test]
    fn test_single_state_subject_is_rejected() {
        let metadata = create_metadata(&[("p1", "A", "1"), ("p2", "A", "1"), ("p3", "B", "2"), ("p4", "B", "3")]);
        let counts = create_counts(&["p1", "p2", "p3", "p4"], &[[1.0, 1.0, 1.0]; 4]);
        let err = build_sparse(&counts, &metadata, "subject", "time").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_non_numeric_state_is_rejected() {
        let metadata = create_metadata(&[("p1", "A", "early"), ("p2", "A", "late")]);
        let counts = create_counts(&["p1", "p2"], &[[1.0, 1.0, 1.0]; 2]);
        let err = build_sparse(&counts, &metadata, "subject", "time").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    fn replicated() -> (CountMatrix, Metadata) {
        let metadata = create_metadata(&[
            ("p1", "A", "1"),
            ("p2", "A", "1"),
            ("p3", "A", "2"),
            ("p4", "B", "1"),
            ("p5", "B", "2"),
        ]);
        let counts = create_counts(
            &["p1", "p2", "p3", "p4", "p5"],
            &[
                [1.0, 2.0, 3.0],
                [3.0, 2.0, 1.0],
                [1.0, 1.0, 1.0],
                [2.0, 1.0, 1.0],
                [1.0, 1.0, 2.0],
            ],
        );
        (counts, metadata)
    }

    #[test]
    fn test_replicates_error_policy() {
        let (counts, metadata) = replicated();
        let config = SparseTensorConfig::new("subject", "time")
            .with_replicate_handling(ReplicateHandling::Error);
        match build_sparse_with_config(&counts, &metadata, &config).unwrap_err() {
            TensorError::Replicate { subject, states, .. } => {
                assert_eq!(subject, "A");
                assert_eq!(states, vec!["1".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_replicates_sum_policy() {
        let (counts, metadata) = replicated();
        let config = SparseTensorConfig::new("subject", "time")
            .with_centralization(false, 1)
            .with_pseudocount(0.0);
        let tensor = build_sparse_with_config(&counts, &metadata, &config).unwrap();
        // p1 + p2 = (a, b, c) = (4, 4, 4): a flat composition
        let table = &tensor.individual_id_tables["A"];
        for f in 0..3 {
            assert_relative_eq!(table[(f, 0)], 0.0, epsilon = 1e-12);
        }
        assert_eq!(tensor.individual_id_sample_ids["A"], vec!["p1", "p3"]);
        assert_eq!(count_kind(&tensor.diagnostics, DiagnosticKind::ReplicatesSummed), 1);
    }

    #[test]
    fn test_replicates_random_policy_is_seeded() {
        let (counts, metadata) = replicated();
        let config = SparseTensorConfig::new("subject", "time")
            .with_replicate_handling(ReplicateHandling::Random)
            .with_seed(7);
        let a = build_sparse_with_config(&counts, &metadata, &config).unwrap();
        let b = build_sparse_with_config(&counts, &metadata, &config).unwrap();
        assert_eq!(a.individual_id_sample_ids, b.individual_id_sample_ids);
        assert_eq!(a.individual_id_tables, b.individual_id_tables);
        assert_eq!(a.individual_id_state_orders["A"].len(), 2);
        let kept = &a.individual_id_sample_ids["A"][0];
        assert!(kept == "p1" || kept == "p2");
        assert_eq!(count_kind(&a.diagnostics, DiagnosticKind::ReplicatesSubsampled), 1);
    }

    #[test]
    fn test_custom_transform() {
        let (counts, metadata) = longitudinal();
        let config = SparseTensorConfig::new("subject", "time").with_centralization(false, 1);
        let tensor = build_sparse_with_transform(&counts, &metadata, &config, &Clr).unwrap();
        assert_eq!(tensor.transformation, "CLR");
        for table in tensor.individual_id_tables.values() {
            for t in 0..table.ncols() {
                assert_relative_eq!(table.column(t).sum(), 0.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_zero_pseudocount_leaves_nan() {
        let (counts, metadata) = longitudinal();
        let config = SparseTensorConfig::new("subject", "time").with_pseudocount(0.0);
        let err = build_sparse_with_config(&counts, &metadata, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn test_centralization_rank_bound() {
        let (counts, metadata) = longitudinal();
        let config = SparseTensorConfig::new("subject", "time").with_centralization(true, 3);
        assert!(build_sparse_with_config(&counts, &metadata, &config).is_err());
    }

    #[test]
    fn test_non_finite_states_do_not_count_as_states() {
        let metadata = create_metadata(&[
            ("p1", "A", "1"),
            ("p2", "A", "NaN"),
            ("p3", "A", "nan"),
            ("p4", "B", "1"),
            ("p5", "B", "2"),
        ]);
        let counts = create_counts(
            &["p1", "p2", "p3", "p4", "p5"],
            &[[1.0, 1.0, 1.0]; 5],
        );
        let config = SparseTensorConfig::new("subject", "time")
            .with_replicate_handling(ReplicateHandling::Error);
        let err = build_sparse_with_config(&counts, &metadata, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_non_finite_typed_states_are_excluded() {
        let samples = ["p1", "p2", "p3", "p4", "p5", "p6"];
        let subjects = ["A", "A", "A", "B", "B", "B"];
        let states = [1.0, f64::NAN, 2.0, 1.0, f64::INFINITY, 4.0];
        let metadata = Metadata::from_columns(
            samples.iter().map(|s| s.to_string()).collect(),
            vec![
                (
                    "subject".into(),
                    subjects.iter().map(|s| Variable::Categorical(s.to_string())).collect(),
                ),
                ("time".into(), states.iter().map(|&t| Variable::Continuous(t)).collect()),
            ],
        )
        .unwrap();
        let counts = create_counts(&samples, &[[1.0, 2.0, 3.0]; 6]);
        let config = SparseTensorConfig::new("subject", "time")
            .with_replicate_handling(ReplicateHandling::Error);

        let tensor = build_sparse_with_config(&counts, &metadata, &config).unwrap();
        assert_eq!(tensor.individual_id_state_orders["A"], vec![1.0, 2.0]);
        assert_eq!(tensor.individual_id_state_orders["B"], vec![1.0, 4.0]);
        assert_eq!(count_kind(&tensor.diagnostics, DiagnosticKind::SampleExcluded), 2);
    }
}

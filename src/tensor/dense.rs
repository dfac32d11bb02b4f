//! Dense subject × feature × condition tensors.

use crate::data::{CountMatrix, Metadata, Variable};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Result, TensorError};
use crate::normalize::rclr::matrix_rclr;
use nalgebra::DMatrix;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Configuration for [`build_dense_with_config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseTensorConfig {
    /// Metadata column holding the subject id.
    pub individual_id_column: String,
    /// Metadata columns forming the condition axes, in axis order.
    pub state_columns: Vec<String>,
    /// Branch lengths parallel to the table's features, used to weight the rclr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_lengths: Option<Vec<f64>>,
}

impl DenseTensorConfig {
    /// Create a config for the given subject and condition columns.
    pub fn new(individual_id_column: &str, state_columns: &[&str]) -> Self {
        Self {
            individual_id_column: individual_id_column.to_string(),
            state_columns: state_columns.iter().map(|s| s.to_string()).collect(),
            branch_lengths: None,
        }
    }

    /// Set branch lengths (parallel to the table's feature order).
    pub fn with_branch_lengths(mut self, branch_lengths: Vec<f64>) -> Self {
        self.branch_lengths = Some(branch_lengths);
        self
    }
}

/// A dense tensor of shape `[subjects, features, condition_1, ...]`.
#[derive(Debug, Clone)]
pub struct DenseTensor {
    /// Replicate-resolved counts; absent combinations are zero.
    pub counts: ArrayD<f64>,
    /// Row-wise rclr of the counts with non-finite values set to zero.
    pub rclr: ArrayD<f64>,
    /// Subject labels along axis 0.
    pub subject_order: Vec<String>,
    /// Feature ids along axis 1.
    pub feature_order: Vec<String>,
    /// Metadata column of each condition axis.
    pub condition_columns: Vec<String>,
    /// Labels along each condition axis.
    pub condition_orders: Vec<Vec<String>>,
    /// Per condition column, `(subject, condition value) -> sample id`.
    pub condition_metadata_map: Vec<BTreeMap<(String, String), String>>,
    /// Branch lengths aligned to `feature_order`.
    pub branch_lengths: Option<Vec<f64>>,
    /// Excluded samples and averaged replicates.
    pub diagnostics: Vec<Diagnostic>,
}

impl DenseTensor {
    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        self.counts.shape()
    }

    /// Feature vector of counts for a subject and one label per condition axis.
    pub fn fiber(&self, subject: &str, conditions: &[&str]) -> Option<Vec<f64>> {
        self.fiber_of(&self.counts, subject, conditions)
    }

    /// Feature vector of rclr values for a subject and one label per condition axis.
    pub fn rclr_fiber(&self, subject: &str, conditions: &[&str]) -> Option<Vec<f64>> {
        self.fiber_of(&self.rclr, subject, conditions)
    }

    fn fiber_of(&self, tensor: &ArrayD<f64>, subject: &str, conditions: &[&str]) -> Option<Vec<f64>> {
        if conditions.len() != self.condition_orders.len() {
            return None;
        }
        let mut index = vec![0usize; 2 + conditions.len()];
        index[0] = self.subject_order.iter().position(|s| s == subject)?;
        for (c, label) in conditions.iter().enumerate() {
            index[2 + c] = self.condition_orders[c].iter().position(|l| l == label)?;
        }
        Some(
            (0..self.feature_order.len())
                .map(|j| {
                    index[1] = j;
                    tensor[&index[..]]
                })
                .collect(),
        )
    }
}

type SampleKey = (String, Vec<String>);

/// Build a dense tensor from a table and metadata.
///
/// See [`build_dense_with_config`].
pub fn build_dense(
    counts: &CountMatrix,
    metadata: &Metadata,
    individual_id_column: &str,
    state_columns: &[&str],
) -> Result<DenseTensor> {
    build_dense_with_config(
        counts,
        metadata,
        &DenseTensorConfig::new(individual_id_column, state_columns),
    )
}

/// Build a dense tensor from a table and metadata.
///
/// Axis labels are taken from every metadata sample with a subject and all
/// condition values, so subjects or conditions without table samples are
/// present as zero slices. Table samples missing from the metadata or
/// lacking a key value are excluded and reported.
///
/// Samples sharing a (subject, conditions) key are averaged and truncated
/// to whole counts. Subjects and condition labels are ordered by ascending
/// sequencing depth summed over every placed sample (replicates counted
/// before averaging), ties by label. Features are ordered by descending
/// total count over the whole table, ties by id.
///
/// # Errors
/// * `MissingColumn` for unknown columns, `Config` without condition columns
/// * `DimensionMismatch` if branch lengths do not match the features
/// * `EmptyData` if no table sample can be placed
/// * `Domain` for invalid branch lengths
pub fn build_dense_with_config(
    counts: &CountMatrix,
    metadata: &Metadata,
    config: &DenseTensorConfig,
) -> Result<DenseTensor> {
    if config.state_columns.is_empty() {
        return Err(TensorError::Config(
            "At least one condition column is required".to_string(),
        ));
    }
    metadata.require_column(&config.individual_id_column)?;
    for column in &config.state_columns {
        metadata.require_column(column)?;
    }
    if let Some(bl) = &config.branch_lengths {
        if bl.len() != counts.n_features() {
            return Err(TensorError::DimensionMismatch {
                expected: counts.n_features(),
                actual: bl.len(),
            });
        }
    }

    let n_conditions = config.state_columns.len();
    let key_of = |sample: &str| -> Option<SampleKey> {
        let subject = metadata
            .get(sample, &config.individual_id_column)
            .and_then(Variable::label)?;
        let states = config
            .state_columns
            .iter()
            .map(|c| metadata.get(sample, c).and_then(Variable::label))
            .collect::<Option<Vec<_>>>()?;
        Some((subject, states))
    };

    // axis labels with their summed depth
    let mut subject_depth: BTreeMap<String, f64> = BTreeMap::new();
    let mut condition_depth: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); n_conditions];
    for sample in metadata.sample_ids() {
        if let Some((subject, states)) = key_of(sample) {
            subject_depth.entry(subject).or_insert(0.0);
            for (c, state) in states.into_iter().enumerate() {
                condition_depth[c].entry(state).or_insert(0.0);
            }
        }
    }

    let mut diagnostics = Vec::new();
    let mut groups: Vec<(SampleKey, Vec<usize>)> = Vec::new();
    let mut group_index: HashMap<SampleKey, usize> = HashMap::new();
    for (col, sample) in counts.sample_ids().iter().enumerate() {
        if !metadata.has_sample(sample) {
            diagnostics.push(Diagnostic::emit(
                DiagnosticKind::SampleExcluded,
                sample.as_str(),
                vec![],
                "sample is not in the metadata",
            ));
            continue;
        }
        match key_of(sample) {
            Some(key) => {
                let g = *group_index.entry(key.clone()).or_insert_with(|| {
                    groups.push((key, Vec::new()));
                    groups.len() - 1
                });
                groups[g].1.push(col);
            }
            None => diagnostics.push(Diagnostic::emit(
                DiagnosticKind::SampleExcluded,
                sample.as_str(),
                vec![],
                "subject or condition value is missing",
            )),
        }
    }
    if groups.is_empty() {
        return Err(TensorError::EmptyData(
            "No table sample has a subject and condition values in the metadata".to_string(),
        ));
    }

    let samples = counts.to_dense_samples();
    let n_features = counts.n_features();
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(groups.len());
    let mut replicated: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for ((subject, states), cols) in &groups {
        if cols.len() == 1 {
            rows.push(samples.row(cols[0]).iter().copied().collect());
            continue;
        }
        let n = cols.len() as f64;
        rows.push(
            (0..n_features)
                .map(|f| (cols.iter().map(|&c| samples[(c, f)]).sum::<f64>() / n).trunc())
                .collect(),
        );
        let ids: Vec<&str> = cols.iter().map(|&c| counts.sample_ids()[c].as_str()).collect();
        replicated
            .entry(subject.clone())
            .or_default()
            .push(format!("{} [{}]", states.join("/"), ids.join(", ")));
    }
    for (subject, context) in replicated {
        diagnostics.push(Diagnostic::emit(
            DiagnosticKind::ReplicatesMeaned,
            subject,
            context,
            "replicate samples were averaged",
        ));
    }

    let feature_ids = counts.feature_ids();
    let totals = counts.row_sums();
    let mut feature_perm: Vec<usize> = (0..n_features).collect();
    feature_perm.sort_by(|&a, &b| {
        totals[b]
            .total_cmp(&totals[a])
            .then_with(|| feature_ids[a].cmp(&feature_ids[b]))
    });
    let feature_order: Vec<String> = feature_perm.iter().map(|&f| feature_ids[f].clone()).collect();
    let branch_lengths: Option<Vec<f64>> = config
        .branch_lengths
        .as_ref()
        .map(|bl| feature_perm.iter().map(|&f| bl[f]).collect());

    // depth counts every placed sample, replicates included
    let sample_depths = counts.col_sums();
    for ((subject, states), cols) in &groups {
        let depth: f64 = cols.iter().map(|&c| sample_depths[c]).sum();
        if let Some(d) = subject_depth.get_mut(subject) {
            *d += depth;
        }
        for (c, state) in states.iter().enumerate() {
            if let Some(d) = condition_depth[c].get_mut(state) {
                *d += depth;
            }
        }
    }
    let subject_order = depth_order(&subject_depth);
    let condition_orders: Vec<Vec<String>> = condition_depth.iter().map(depth_order).collect();

    let resolved = DMatrix::from_fn(groups.len(), n_features, |g, j| rows[g][feature_perm[j]]);
    let transformed = matrix_rclr(&resolved, branch_lengths.as_deref())?;

    let subject_pos = positions(&subject_order);
    let condition_pos: Vec<HashMap<&str, usize>> = condition_orders.iter().map(|o| positions(o)).collect();
    let mut shape = vec![subject_order.len(), n_features];
    shape.extend(condition_orders.iter().map(Vec::len));
    let mut count_tensor = ArrayD::<f64>::zeros(IxDyn(&shape));
    let mut rclr_tensor = ArrayD::<f64>::zeros(IxDyn(&shape));

    for (g, ((subject, states), _)) in groups.iter().enumerate() {
        let mut index = vec![0usize; shape.len()];
        index[0] = subject_pos[subject.as_str()];
        for (c, state) in states.iter().enumerate() {
            index[2 + c] = condition_pos[c][state.as_str()];
        }
        for j in 0..n_features {
            index[1] = j;
            count_tensor[&index[..]] = resolved[(g, j)];
            let value = transformed[(g, j)];
            rclr_tensor[&index[..]] = if value.is_finite() { value } else { 0.0 };
        }
    }

    let mut condition_metadata_map = vec![BTreeMap::new(); n_conditions];
    for ((subject, states), cols) in &groups {
        let sample_id = &counts.sample_ids()[cols[0]];
        for (c, state) in states.iter().enumerate() {
            condition_metadata_map[c]
                .entry((subject.clone(), state.clone()))
                .or_insert_with(|| sample_id.clone());
        }
    }

    log::info!(
        "Built dense tensor {:?} from {} samples ({} diagnostics)",
        shape,
        groups.iter().map(|(_, cols)| cols.len()).sum::<usize>(),
        diagnostics.len()
    );

    Ok(DenseTensor {
        counts: count_tensor,
        rclr: rclr_tensor,
        subject_order,
        feature_order,
        condition_columns: config.state_columns.clone(),
        condition_orders,
        condition_metadata_map,
        branch_lengths,
        diagnostics,
    })
}

/// Labels by ascending depth, ties by label.
fn depth_order(depths: &BTreeMap<String, f64>) -> Vec<String> {
    let mut entries: Vec<(&String, &f64)> = depths.iter().collect();
    entries.sort_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(label, _)| label.clone()).collect()
}

fn positions(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect()
}

//! Removal of the subject-shared mean structure from per-subject tables.

use crate::error::{Result, TensorError};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Centralized tables and the factors of the mean-structure approximation.
#[derive(Debug, Clone)]
pub struct Centralized {
    /// Per-subject tables (features × states) with the mean structure removed.
    pub tables: BTreeMap<String, DMatrix<f64>>,
    /// Left factor, subjects × k (subjects in key order).
    pub u: DMatrix<f64>,
    /// Singular values, descending.
    pub s: Vec<f64>,
    /// Right factor, k × features.
    pub v: DMatrix<f64>,
}

impl Centralized {
    /// Rank-k approximation of the subject × feature mean matrix.
    pub fn mean_approximation(&self) -> DMatrix<f64> {
        let k = self.s.len();
        let scaled = DMatrix::from_fn(self.u.nrows(), k, |i, c| self.u[(i, c)] * self.s[c]);
        scaled * &self.v
    }
}

/// Subtract a rank-`n_components` approximation of the per-subject mean
/// profiles from every subject table.
///
/// Each table is features × states. The per-feature mean over states of
/// every subject forms a subjects × features matrix whose truncated SVD
/// `U_k diag(s) V_k` is computed; row `i` of that reconstruction is then
/// subtracted from every column of subject `i`'s table.
///
/// # Errors
/// * `Shape` if the tables do not share a feature count
/// * `Config` unless `1 <= n_components <= min(subjects, features)`
pub fn svd_centralize(
    tables: &BTreeMap<String, DMatrix<f64>>,
    n_components: usize,
) -> Result<Centralized> {
    let n_features = tables.values().next().map_or(0, |m| m.nrows());
    if let Some((id, table)) = tables.iter().find(|(_, m)| m.nrows() != n_features) {
        return Err(TensorError::Shape(format!(
            "Individual tables do not have the same number of features: '{}' has {}, expected {}",
            id,
            table.nrows(),
            n_features
        )));
    }

    let n_subjects = tables.len();
    let max_rank = n_subjects.min(n_features);
    if n_components == 0 || n_components > max_rank {
        return Err(TensorError::Config(format!(
            "n_components_centralize must be between 1 and {} (subjects: {}, features: {}), got {}",
            max_rank, n_subjects, n_features, n_components
        )));
    }

    let means: Vec<Vec<f64>> = tables
        .par_iter()
        .map(|(_, table)| {
            (0..n_features)
                .map(|f| table.row(f).mean())
                .collect()
        })
        .collect();
    let mean_hat = DMatrix::from_fn(n_subjects, n_features, |i, f| means[i][f]);

    let svd = mean_hat.svd(true, true);
    let full_u = svd
        .u
        .ok_or_else(|| TensorError::Domain("SVD did not produce left singular vectors".to_string()))?;
    let full_v_t = svd
        .v_t
        .ok_or_else(|| TensorError::Domain("SVD did not produce right singular vectors".to_string()))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    order.truncate(n_components);

    let u = DMatrix::from_fn(n_subjects, n_components, |i, c| full_u[(i, order[c])]);
    let v = DMatrix::from_fn(n_components, n_features, |c, f| full_v_t[(order[c], f)]);
    let s: Vec<f64> = order.iter().map(|&c| svd.singular_values[c]).collect();

    let factors = Centralized {
        tables: BTreeMap::new(),
        u,
        s,
        v,
    };
    let reconstruction = factors.mean_approximation();

    let centralized = tables
        .iter()
        .enumerate()
        .map(|(i, (id, table))| {
            let centered =
                DMatrix::from_fn(table.nrows(), table.ncols(), |f, t| table[(f, t)] - reconstruction[(i, f)]);
            (id.clone(), centered)
        })
        .collect();

    log::debug!(
        "Centralized {} subject tables with a rank-{} mean structure",
        n_subjects,
        n_components
    );

    Ok(Centralized {
        tables: centralized,
        ..factors
    })
}

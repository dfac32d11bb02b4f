//! Taxonomy labels for tree nodes.

use crate::data::{Metadata, Variable};
use crate::error::{Result, TensorError};
use crate::tree::PhyloTree;
use serde::{Deserialize, Serialize};

/// Column names recognized as holding taxonomy strings (case-insensitive).
pub const VALID_TAXONOMY_COLUMN_NAMES: [&str; 2] = ["taxon", "taxonomy"];

/// Taxonomy assignment of one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    /// Feature (node) id.
    pub feature_id: String,
    /// Semicolon-separated taxonomy string.
    pub taxon: String,
}

/// Taxonomy metadata for the nodes of a tree.
///
/// With `traversed_taxonomy` (one string per node in preorder) each node
/// name is paired with its string. Without it a single placeholder record
/// `("None", "None")` is returned.
///
/// # Errors
/// `DimensionMismatch` if the number of strings differs from the number of
/// nodes.
pub fn create_taxonomy_metadata(
    tree: &PhyloTree,
    traversed_taxonomy: Option<&[String]>,
) -> Result<Vec<TaxonomyRecord>> {
    let Some(taxonomy) = traversed_taxonomy else {
        return Ok(vec![TaxonomyRecord {
            feature_id: "None".to_string(),
            taxon: "None".to_string(),
        }]);
    };

    let order = match tree.root() {
        Some(root) => tree.preorder(root),
        None => Vec::new(),
    };
    if order.len() != taxonomy.len() {
        return Err(TensorError::DimensionMismatch {
            expected: order.len(),
            actual: taxonomy.len(),
        });
    }

    Ok(order
        .into_iter()
        .zip(taxonomy)
        .map(|(id, taxon)| TaxonomyRecord {
            feature_id: tree[id].name_or_empty().to_string(),
            taxon: taxon.clone(),
        })
        .collect())
}

/// Find the taxonomy column among `column_names`.
///
/// # Errors
/// `Taxonomy` unless exactly one column is named `taxon` or `taxonomy`.
pub fn find_taxonomy_column(column_names: &[String]) -> Result<String> {
    let matches: Vec<&String> = column_names
        .iter()
        .filter(|name| {
            VALID_TAXONOMY_COLUMN_NAMES
                .iter()
                .any(|valid| name.eq_ignore_ascii_case(valid))
        })
        .collect();

    match matches.as_slice() {
        [column] => Ok((*column).clone()),
        [] => Err(TensorError::Taxonomy(format!(
            "No taxonomy column found; expected one of: {}",
            VALID_TAXONOMY_COLUMN_NAMES.join(", ")
        ))),
        _ => Err(TensorError::Taxonomy(format!(
            "More than one taxonomy column: {}",
            matches.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// Pad taxonomy strings so every value has the same number of ranks.
///
/// Values are split on `;`. The first value with the maximum number of
/// ranks defines the rank prefixes (first character of each level, e.g.
/// `k` for `k__Bacteria`). Missing levels become `<prefix>__` and a
/// missing value becomes a fully unassigned string. Levels are joined
/// with `"; "`.
///
/// # Errors
/// `Taxonomy` if no value is present.
pub fn normalize_rank_strings(values: &[Option<String>]) -> Result<Vec<String>> {
    let split: Vec<Option<Vec<String>>> = values
        .iter()
        .map(|v| {
            v.as_ref().map(|s| {
                s.trim()
                    .split(';')
                    .map(|level| level.trim().to_string())
                    .collect()
            })
        })
        .collect();

    let depth = split.iter().flatten().map(Vec::len).max().ok_or_else(|| {
        TensorError::Taxonomy("No taxonomy strings to normalize".to_string())
    })?;
    let prefixes: Vec<String> = split
        .iter()
        .flatten()
        .find(|levels| levels.len() == depth)
        .map(|levels| {
            levels
                .iter()
                .map(|level| level.chars().next().map(String::from).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();

    Ok(split
        .into_iter()
        .map(|levels| {
            let levels = levels.unwrap_or_default();
            prefixes
                .iter()
                .enumerate()
                .map(|(i, prefix)| match levels.get(i) {
                    Some(level) if !level.is_empty() => level.clone(),
                    _ => format!("{}__", prefix),
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .collect())
}

/// Normalized taxonomy records from a feature metadata table.
///
/// The metadata rows are features; the taxonomy column is located with
/// [`find_taxonomy_column`].
pub fn feature_taxonomy(feature_metadata: &Metadata) -> Result<Vec<TaxonomyRecord>> {
    let column = find_taxonomy_column(feature_metadata.column_names())?;
    let values: Vec<Option<String>> = feature_metadata
        .column(&column)?
        .into_iter()
        .map(Variable::label)
        .collect();
    let normalized = normalize_rank_strings(&values)?;

    Ok(feature_metadata
        .sample_ids()
        .iter()
        .cloned()
        .zip(normalized)
        .map(|(feature_id, taxon)| TaxonomyRecord { feature_id, taxon })
        .collect())
}

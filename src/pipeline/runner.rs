//! Pipeline runner for composing and executing preprocessing steps.

use crate::data::{CountMatrix, Metadata};
use crate::diagnostics::Diagnostic;
use crate::error::{Result, TensorError};
use crate::phylo::{fast_unifrac, PhyloExpansion};
use crate::tensor::{
    build_dense_with_config, build_sparse_with_config, DenseTensor, DenseTensorConfig,
    SparseTensor, SparseTensorConfig,
};
use crate::tree::{tree_topology_filter, PhyloTree};
use crate::zero::pseudocount::resolve_pseudocount;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A step in the preprocessing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PipelineStep {
    // === Tree ===
    /// Keep only tree tips present in the table and collapse single-child nodes.
    ShearTree,
    /// Dissolve clades with at most `min_depth` tips.
    FilterTopology { min_depth: usize },

    // === Table ===
    /// Replace the table by its expansion onto the tree nodes.
    PhyloExpand,
    /// Add a constant to every count; `0` uses the smallest non-zero count.
    AddPseudocount { value: f64 },

    // === Terminal ===
    /// Build a dense subject × feature × condition tensor.
    BuildDense(DenseTensorConfig),
    /// Build per-subject state series.
    BuildSparse(SparseTensorConfig),
}

impl PipelineStep {
    /// Short step name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::ShearTree => "shear_tree",
            PipelineStep::FilterTopology { .. } => "filter_topology",
            PipelineStep::PhyloExpand => "phylo_expand",
            PipelineStep::AddPseudocount { .. } => "add_pseudocount",
            PipelineStep::BuildDense(_) => "build_dense",
            PipelineStep::BuildSparse(_) => "build_sparse",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, PipelineStep::BuildDense(_) | PipelineStep::BuildSparse(_))
    }

    fn needs_tree(&self) -> bool {
        matches!(
            self,
            PipelineStep::ShearTree | PipelineStep::FilterTopology { .. } | PipelineStep::PhyloExpand
        )
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(TensorError::from)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(TensorError::from)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(TensorError::from)
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    /// The run ended with [`PipelineStep::BuildDense`].
    Dense {
        tensor: DenseTensor,
        expansion: Option<PhyloExpansion>,
        diagnostics: Vec<Diagnostic>,
    },
    /// The run ended with [`PipelineStep::BuildSparse`].
    Sparse {
        tensor: SparseTensor,
        expansion: Option<PhyloExpansion>,
        diagnostics: Vec<Diagnostic>,
    },
}

impl PipelineOutput {
    /// The dense tensor, if the run built one.
    pub fn dense(&self) -> Option<&DenseTensor> {
        match self {
            PipelineOutput::Dense { tensor, .. } => Some(tensor),
            PipelineOutput::Sparse { .. } => None,
        }
    }

    /// The sparse series, if the run built them.
    pub fn sparse(&self) -> Option<&SparseTensor> {
        match self {
            PipelineOutput::Sparse { tensor, .. } => Some(tensor),
            PipelineOutput::Dense { .. } => None,
        }
    }

    /// The phylogenetic expansion, if the run had one.
    pub fn expansion(&self) -> Option<&PhyloExpansion> {
        match self {
            PipelineOutput::Dense { expansion, .. } | PipelineOutput::Sparse { expansion, .. } => {
                expansion.as_ref()
            }
        }
    }

    /// Every diagnostic collected during the run.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            PipelineOutput::Dense { diagnostics, .. }
            | PipelineOutput::Sparse { diagnostics, .. } => diagnostics,
        }
    }
}

/// Builder for constructing and running preprocessing pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Shear the tree to the table's features.
    pub fn shear_tree(mut self) -> Self {
        self.steps.push(PipelineStep::ShearTree);
        self
    }

    /// Dissolve clades with at most `min_depth` tips.
    pub fn filter_topology(mut self, min_depth: usize) -> Self {
        self.steps.push(PipelineStep::FilterTopology { min_depth });
        self
    }

    /// Expand the table onto the tree nodes.
    ///
    /// Later build steps without explicit branch lengths use the
    /// expansion's branch lengths.
    pub fn phylo_expand(mut self) -> Self {
        self.steps.push(PipelineStep::PhyloExpand);
        self
    }

    /// Add pseudocount.
    pub fn add_pseudocount(mut self, value: f64) -> Self {
        self.steps.push(PipelineStep::AddPseudocount { value });
        self
    }

    /// Finish with a dense tensor.
    pub fn build_dense(mut self, config: DenseTensorConfig) -> Self {
        self.steps.push(PipelineStep::BuildDense(config));
        self
    }

    /// Finish with per-subject series.
    pub fn build_sparse(mut self, config: SparseTensorConfig) -> Self {
        self.steps.push(PipelineStep::BuildSparse(config));
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Check that the steps can run: exactly one build step, last, and a
    /// tree for every tree step.
    pub fn validate(&self, has_tree: bool) -> Result<()> {
        let terminals = self.steps.iter().filter(|s| s.is_terminal()).count();
        let ends_with_build = self.steps.last().map_or(false, PipelineStep::is_terminal);
        if terminals != 1 || !ends_with_build {
            return Err(TensorError::Config(format!(
                "Pipeline '{}' must end with exactly one build step",
                self.name
            )));
        }
        if !has_tree {
            if let Some(step) = self.steps.iter().find(|s| s.needs_tree()) {
                return Err(TensorError::Config(format!(
                    "Step {} requires a tree",
                    step.name()
                )));
            }
        }
        Ok(())
    }

    /// Run the pipeline on data.
    ///
    /// Tree steps mutate `tree` in place. Step failures are wrapped in
    /// [`TensorError::Pipeline`].
    pub fn run(
        &self,
        counts: &CountMatrix,
        metadata: &Metadata,
        tree: Option<&mut PhyloTree>,
    ) -> Result<PipelineOutput> {
        self.validate(tree.is_some())?;
        log::info!("Running pipeline '{}' ({} steps)", self.name, self.steps.len());

        let mut state = PipelineState::new(counts.clone(), metadata, tree);
        for (i, step) in self.steps.iter().enumerate() {
            log::debug!("Step {}: {}", i + 1, step.name());
            state = state.apply(step).map_err(|e| TensorError::Pipeline {
                step: format!("{} ({})", i + 1, step.name()),
                source: Box::new(e),
            })?;
        }

        state.finalize()
    }
}

/// Internal state during pipeline execution.
struct PipelineState<'a> {
    counts: CountMatrix,
    metadata: &'a Metadata,
    tree: Option<&'a mut PhyloTree>,
    branch_lengths: Option<Vec<f64>>,
    expansion: Option<PhyloExpansion>,
    diagnostics: Vec<Diagnostic>,
    dense: Option<DenseTensor>,
    sparse: Option<SparseTensor>,
}

impl<'a> PipelineState<'a> {
    fn new(counts: CountMatrix, metadata: &'a Metadata, tree: Option<&'a mut PhyloTree>) -> Self {
        Self {
            counts,
            metadata,
            tree,
            branch_lengths: None,
            expansion: None,
            diagnostics: Vec::new(),
            dense: None,
            sparse: None,
        }
    }

    fn tree(&mut self) -> Result<&mut PhyloTree> {
        self.tree
            .as_deref_mut()
            .ok_or_else(|| TensorError::Config("This step requires a tree".to_string()))
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            // === Tree ===
            PipelineStep::ShearTree => {
                let names: HashSet<String> = self.counts.feature_ids().iter().cloned().collect();
                let tree = self.tree()?;
                tree.shear(&names)?;
                tree.compact();
            }
            PipelineStep::FilterTopology { min_depth } => {
                tree_topology_filter(self.tree()?, *min_depth)?;
            }

            // === Table ===
            PipelineStep::PhyloExpand => {
                let expansion = match self.tree.as_deref() {
                    Some(tree) => fast_unifrac(&self.counts, tree)?,
                    None => return Err(TensorError::Config("This step requires a tree".to_string())),
                };
                self.counts = expansion.to_count_matrix()?;
                self.branch_lengths = Some(expansion.branch_lengths.clone());
                self.diagnostics.extend(expansion.diagnostics.iter().cloned());
                self.expansion = Some(expansion);
            }
            PipelineStep::AddPseudocount { value } => {
                let pseudocount = resolve_pseudocount(&self.counts, *value)?;
                self.counts = self.counts.add_scalar(pseudocount)?;
            }

            // === Terminal ===
            PipelineStep::BuildDense(config) => {
                let mut config = config.clone();
                if config.branch_lengths.is_none() {
                    config.branch_lengths = self.branch_lengths.clone();
                }
                let tensor = build_dense_with_config(&self.counts, self.metadata, &config)?;
                self.diagnostics.extend(tensor.diagnostics.iter().cloned());
                self.dense = Some(tensor);
            }
            PipelineStep::BuildSparse(config) => {
                let mut config = config.clone();
                if config.branch_lengths.is_none() {
                    config.branch_lengths = self.branch_lengths.clone();
                }
                let tensor = build_sparse_with_config(&self.counts, self.metadata, &config)?;
                self.diagnostics.extend(tensor.diagnostics.iter().cloned());
                self.sparse = Some(tensor);
            }
        }
        Ok(self)
    }

    fn finalize(self) -> Result<PipelineOutput> {
        match (self.dense, self.sparse) {
            (Some(tensor), None) => Ok(PipelineOutput::Dense {
                tensor,
                expansion: self.expansion,
                diagnostics: self.diagnostics,
            }),
            (None, Some(tensor)) => Ok(PipelineOutput::Sparse {
                tensor,
                expansion: self.expansion,
                diagnostics: self.diagnostics,
            }),
            _ => Err(TensorError::Config(
                "Pipeline must include exactly one build step".to_string(),
            )),
        }
    }
}

/// Convenience function for phylogenetically weighted per-subject series.
///
/// Shears and filters the tree, expands the table onto its nodes and
/// builds sparse series with default settings.
pub fn run_phylogenetic_sparse(
    counts: &CountMatrix,
    metadata: &Metadata,
    tree: &mut PhyloTree,
    individual_id_column: &str,
    state_column: &str,
    min_depth: usize,
) -> Result<PipelineOutput> {
    Pipeline::new()
        .name("phylogenetic-sparse")
        .shear_tree()
        .filter_topology(min_depth)
        .phylo_expand()
        .build_sparse(SparseTensorConfig::new(individual_id_column, state_column))
        .run(counts, metadata, Some(tree))
}

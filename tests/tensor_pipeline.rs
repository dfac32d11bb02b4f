//! Integration tests for the tensor preprocessing pipeline.

use compositional_tensor::prelude::*;
use sprs::TriMat;
use std::io::Write;
use tempfile::NamedTempFile;

const N_FEATURES: usize = 8;
const N_SUBJECTS: usize = 6;
const N_TIMES: usize = 4;

fn sample_id(subject: usize, time: usize) -> String {
    format!("S{}_T{}", subject, time)
}

/// Create synthetic counts for 6 subjects × 4 time points.
///
/// Adds one replicate of subject 0 at time 1 and one sample that is
/// missing from the metadata.
fn create_synthetic_counts() -> CountMatrix {
    let mut sample_ids: Vec<String> = (0..N_SUBJECTS)
        .flat_map(|s| (0..N_TIMES).map(move |t| sample_id(s, t)))
        .collect();
    sample_ids.push("S0_T1_rep".to_string());
    sample_ids.push("orphan".to_string());

    let mut tri_mat = TriMat::new((N_FEATURES, sample_ids.len()));
    for feat in 0..N_FEATURES {
        for sample in 0..sample_ids.len() {
            // sparse but never an all-zero feature
            if (feat + sample) % 5 == 0 {
                continue;
            }
            let count = 10 + (feat * 7 + sample * 3) % 20;
            tri_mat.add_triplet(feat, sample, count as f64);
        }
    }

    let feature_ids: Vec<String> = (0..N_FEATURES).map(|i| format!("taxon_{}", i)).collect();
    CountMatrix::new(tri_mat.to_csr(), feature_ids, sample_ids).unwrap()
}

/// Create metadata matching the synthetic counts (without the orphan).
fn create_synthetic_metadata() -> Metadata {
    let mut records: Vec<(String, Vec<String>)> = (0..N_SUBJECTS)
        .flat_map(|s| {
            (0..N_TIMES).map(move |t| {
                let arm = if s % 2 == 0 { "control" } else { "treatment" };
                (
                    sample_id(s, t),
                    vec![format!("subject_{}", s), t.to_string(), arm.to_string()],
                )
            })
        })
        .collect();
    records.push((
        "S0_T1_rep".to_string(),
        vec!["subject_0".to_string(), "1".to_string(), "control".to_string()],
    ));
    Metadata::from_records(
        vec!["subject".to_string(), "time".to_string(), "arm".to_string()],
        records,
    )
    .unwrap()
}

/// Balanced tree over the eight taxa plus one tip absent from the table.
///
/// `((((t0,t1)c0,(t2,t3)c1)A,((t4,t5)c2,(t6,t7)c3,unused)B)root`
fn create_tree() -> PhyloTree {
    let mut tree = PhyloTree::new();
    let root = tree.add_node(Some("root"), None);
    let mut taxon = 0;
    for clade_name in ["A", "B"] {
        let clade = tree.add_node(Some(clade_name), Some(1.0));
        tree.add_child(root, clade).unwrap();
        for _ in 0..2 {
            let cherry = tree.add_node(None, Some(0.5));
            tree.add_child(clade, cherry).unwrap();
            for _ in 0..2 {
                let name = format!("taxon_{}", taxon);
                let tip = tree.add_node(Some(&name), Some(1.0));
                tree.add_child(cherry, tip).unwrap();
                taxon += 1;
            }
        }
        if clade_name == "B" {
            let unused = tree.add_node(Some("unused"), Some(2.0));
            tree.add_child(clade, unused).unwrap();
        }
    }
    tree
}

#[test]
fn test_phylogenetic_sparse_pipeline() {
    let counts = create_synthetic_counts();
    let metadata = create_synthetic_metadata();
    let mut tree = create_tree();

    let output = Pipeline::new()
        .name("phylo-sparse-test")
        .shear_tree()
        .filter_topology(1)
        .phylo_expand()
        .build_sparse(SparseTensorConfig::new("subject", "time"))
        .run(&counts, &metadata, Some(&mut tree))
        .unwrap();

    assert!(tree.find_tip("unused").is_none());
    assert_eq!(tree.all_tips().len(), N_FEATURES);

    // 8 tips, 4 cherries, 2 clades; the root has no branch length
    let expansion = output.expansion().unwrap();
    assert_eq!(expansion.n_nodes(), 14);
    assert!(expansion.branch_lengths.iter().all(|&l| l > 0.0));

    let series = output.sparse().unwrap();
    assert_eq!(series.n_subjects(), N_SUBJECTS);
    assert_eq!(series.n_features(), 14);
    assert_eq!(series.branch_lengths.as_ref().map(Vec::len), Some(14));
    for (subject, table) in &series.individual_id_tables {
        assert_eq!(table.shape(), (14, N_TIMES), "subject {}", subject);
        assert_eq!(series.individual_id_state_orders[subject], vec![0.0, 1.0, 2.0, 3.0]);
    }

    let centralized = series.centralized.as_ref().unwrap();
    assert_eq!(centralized.tables.len(), N_SUBJECTS);
    assert_eq!(centralized.u.shape(), (N_SUBJECTS, 1));

    let diagnostics = output.diagnostics();
    assert_eq!(count_kind(diagnostics, DiagnosticKind::ZeroLengthNodeDropped), 1);
    assert_eq!(count_kind(diagnostics, DiagnosticKind::SampleExcluded), 1);
    assert_eq!(count_kind(diagnostics, DiagnosticKind::ReplicatesSummed), 1);
}

#[test]
fn test_dense_pipeline_from_yaml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"name: dense-from-file
description: Dense tensor over subject, time and arm
steps:
  - step: shear_tree
  - step: phylo_expand
  - step: build_dense
    individual_id_column: subject
    state_columns: [time, arm]"#
    )
    .unwrap();
    file.flush().unwrap();

    let config = PipelineConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.steps.len(), 3);

    let counts = create_synthetic_counts();
    let metadata = create_synthetic_metadata();
    let mut tree = create_tree();
    let output = Pipeline::from_config(&config)
        .run(&counts, &metadata, Some(&mut tree))
        .unwrap();

    let dense = output.dense().unwrap();
    assert_eq!(dense.shape(), &[N_SUBJECTS, 14, N_TIMES, 2]);
    assert_eq!(dense.branch_lengths.as_ref().map(Vec::len), Some(14));

    // each subject belongs to a single arm
    let control = dense.fiber("subject_0", &["0", "control"]).unwrap();
    let treatment = dense.fiber("subject_0", &["0", "treatment"]).unwrap();
    assert!(control.iter().any(|&v| v > 0.0));
    assert!(treatment.iter().all(|&v| v == 0.0));

    let diagnostics = output.diagnostics();
    assert_eq!(count_kind(diagnostics, DiagnosticKind::ReplicatesMeaned), 1);
    assert_eq!(count_kind(diagnostics, DiagnosticKind::SampleExcluded), 1);
}

#[test]
fn test_config_file_roundtrip() {
    let pipeline = Pipeline::new()
        .name("roundtrip")
        .shear_tree()
        .filter_topology(2)
        .phylo_expand()
        .build_sparse(
            SparseTensorConfig::new("subject", "time")
                .with_replicate_handling(ReplicateHandling::Random)
                .with_seed(7)
                .with_centralization(true, 2),
        );
    let config = pipeline.to_config(Some("Round trip through a file"));

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();
    file.flush().unwrap();

    let loaded = PipelineConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_strict_replicates_fail_with_step_context() {
    let counts = create_synthetic_counts();
    let metadata = create_synthetic_metadata();

    let err = Pipeline::new()
        .build_sparse(
            SparseTensorConfig::new("subject", "time")
                .with_replicate_handling(ReplicateHandling::Error),
        )
        .run(&counts, &metadata, None)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Replicate);
    match err {
        TensorError::Pipeline { step, source } => {
            assert_eq!(step, "1 (build_sparse)");
            assert!(matches!(*source, TensorError::Replicate { ref subject, .. } if subject == "subject_0"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_run_phylogenetic_sparse_convenience() {
    let counts = create_synthetic_counts();
    let metadata = create_synthetic_metadata();
    let mut tree = create_tree();

    let output =
        run_phylogenetic_sparse(&counts, &metadata, &mut tree, "subject", "time", 2).unwrap();
    let series = output.sparse().unwrap();

    // cherries (2 tips) are dissolved into their clades
    assert_eq!(series.n_features(), N_FEATURES + 2);
    assert_eq!(series.transformation, "rCLR");
}

#[test]
fn test_phylogenetic_rclr_transformation() {
    let counts = create_synthetic_counts();
    let mut tree = create_tree();

    let result = phylogenetic_rclr_transformation(&counts, &mut tree, 1).unwrap();
    assert_eq!(result.transformed.data.nrows(), 14);
    assert_eq!(result.transformed.data.ncols(), counts.n_samples());
    assert_eq!(result.counts_by_node.n_features(), 14);

    // observed entries of each sample are centered
    for s in 0..counts.n_samples() {
        let sum: f64 = (0..14)
            .filter(|&f| result.counts_by_node.get(f, s) > 0.0)
            .map(|f| result.transformed.get(f, s))
            .sum();
        assert!(sum.abs() < 1e-8, "sample {} sums to {}", s, sum);
    }
}

#[test]
fn test_taxonomy_for_sheared_tree() {
    let mut tree = create_tree();
    let counts = create_synthetic_counts();
    prepare_phylogeny(&counts, &mut tree, 1).unwrap();

    let placeholder = create_taxonomy_metadata(&tree, None).unwrap();
    assert_eq!(placeholder.len(), 1);
    assert_eq!(placeholder[0].taxon, "None");

    // one label per node in preorder
    let labels: Vec<String> = (0..tree.len()).map(|i| format!("k__Bacteria; p__P{}", i)).collect();
    let records = create_taxonomy_metadata(&tree, Some(labels.as_slice())).unwrap();
    assert_eq!(records.len(), tree.len());
    assert_eq!(records[0].feature_id, "root");
    assert_eq!(records[0].taxon, "k__Bacteria; p__P0");

    let err = create_taxonomy_metadata(&tree, Some(&labels[1..])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

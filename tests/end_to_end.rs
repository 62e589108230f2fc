use ancestry_features::assemble::SampleMatrix;
use ancestry_features::config::RunConfig;
use ancestry_features::explain::output::{
    read_attribution_table, write_feature_triplets, write_importance, write_region_table,
};
use ancestry_features::explain::{
    AttributionTensor, Attributor, Scorer, aggregate, call_ancestry,
};
use ancestry_features::locus::GenomeBuild;
use ancestry_features::pipeline::SampleSelection;
use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3};
use std::convert::Infallible;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Scores each sample by how many alternate alleles it carries on each half of the loci.
struct AlleleCountScorer;

impl Scorer for AlleleCountScorer {
    type Error = Infallible;

    fn predict_proba(&self, features: &SampleMatrix) -> Result<Array2<f64>, Self::Error> {
        let half = features.n_cols() / 2;
        let mut probabilities = Array2::zeros((features.n_rows(), 2));
        for (row, column, value) in features.triplets() {
            let label = usize::from(column >= half);
            probabilities[(row, label)] += f64::from(value);
        }
        for mut row in probabilities.outer_iter_mut() {
            let total: f64 = row.sum();
            if total > 0.0 {
                row /= total;
            } else {
                row.fill(0.5);
            }
        }
        Ok(probabilities)
    }
}

/// Attributes each genotype code to its own locus, signed by label.
struct GenotypeAttributor;

impl Attributor for GenotypeAttributor {
    type Error = Infallible;

    fn attribute(&self, features: &SampleMatrix) -> Result<AttributionTensor, Self::Error> {
        let dense = features.to_dense();
        let mut values = Array3::zeros((2, features.n_rows(), features.n_cols()));
        for ((row, column), value) in dense.indexed_iter() {
            values[(0, row, column)] = f64::from(*value);
            values[(1, row, column)] = -f64::from(*value);
        }
        Ok(AttributionTensor::new(values))
    }
}

fn write_fixture(dir: &Path) {
    fs::write(
        dir.join("run.toml"),
        r#"
model_build = "GRCh37"
labels = ["afr", "eur"]

[resources]
feature_order = "model/order.txt"
locus_converter = "model/hg38_to_b37.json"

[region_maps]
gene = "model/genes.json"
"#,
    )
    .unwrap();
    fs::create_dir_all(dir.join("model")).unwrap();
    fs::write(
        dir.join("model/order.txt"),
        "1_100_A_G\n1_200_C_T\n2_300_G_A\n2_400_T_C\n",
    )
    .unwrap();
    fs::write(
        dir.join("model/hg38_to_b37.json"),
        r#"{"1_1100_A_G": "1_100_A_G", "1_1200_C_T": "1_200_C_T", "2_1300_G_A": "2_300_G_A", "2_1400_T_C": "2_400_T_C"}"#,
    )
    .unwrap();
    fs::write(
        dir.join("model/genes.json"),
        r#"{"1_100_A_G": "GENE_A", "1_200_C_T": "GENE_A", "2_300_G_A": "GENE_B"}"#,
    )
    .unwrap();
    fs::write(
        dir.join("cohort.vcf"),
        "##fileformat=VCFv4.2\n\
         #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tnorth\tsouth\n\
         1\t1100\t.\tA\tG\t.\tPASS\t.\tGT\t1/1\t0/0\n\
         1\t1200\t.\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0\n\
         2\t1300\t.\tG\tA\t.\tPASS\t.\tGT\t0/0\t1/1\n\
         2\t1400\t.\tT\tC\t.\tPASS\t.\tGT\t0/0\t1|1\n\
         3\t50\t.\tA\tT\t.\tPASS\t.\tGT\t1/1\t1/1\n",
    )
    .unwrap();
}

#[test]
fn hg38_cohort_runs_from_matrix_to_region_tables() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path());

    let config = RunConfig::load(&dir.path().join("run.toml")).unwrap();
    let resources = config.load_resources(GenomeBuild::Grch38).unwrap();
    assert!(resources.converter.is_some());

    let features = resources
        .matrix_builder()
        .build_path(&dir.path().join("cohort.vcf"), &SampleSelection::All)
        .unwrap();
    assert_eq!(features.samples, vec!["north", "south"]);
    assert_eq!(features.matrix.to_dense().row(0).to_vec(), vec![2.0, 1.0, 0.0, 0.0]);
    assert_eq!(features.matrix.to_dense().row(1).to_vec(), vec![0.0, 0.0, 2.0, 2.0]);

    let mut triplets = Vec::new();
    write_feature_triplets(&mut triplets, &features, &resources.order).unwrap();
    let triplets = String::from_utf8(triplets).unwrap();
    assert_eq!(
        triplets.lines().collect::<Vec<_>>(),
        vec![
            "sample\tlocus\tgenotype",
            "north\t1_100_A_G\t2",
            "north\t1_200_C_T\t1",
            "south\t2_300_G_A\t2",
            "south\t2_400_T_C\t2",
        ]
    );

    let probabilities = AlleleCountScorer.predict_proba(&features.matrix).unwrap();
    let calls = call_ancestry(probabilities.view(), &features.samples, &resources.labels).unwrap();
    assert_eq!(calls[0].label, "afr");
    assert_eq!(calls[1].label, "eur");

    let attributions = GenotypeAttributor.attribute(&features.matrix).unwrap();
    let region_maps = config.load_region_maps().unwrap();
    let (name, gene_map) = &region_maps[0];
    assert_eq!(name, "gene");
    let regions = aggregate(
        &attributions,
        resources.order.keys(),
        &features.samples,
        gene_map,
        &resources.labels,
    )
    .unwrap();

    assert_eq!(regions.regions(), ["GENE_A", "GENE_B"]);
    assert_abs_diff_eq!(regions.label_matrix(0)[(0, 0)], 1.5);
    assert_abs_diff_eq!(regions.label_matrix(1)[(1, 1)], -2.0);
    let profile = regions.sample_profile("south").unwrap();
    assert_eq!(profile.dim(), (2, 2));
    assert_abs_diff_eq!(profile[(1, 0)], 2.0);

    let mut table = Vec::new();
    write_region_table(&mut table, &regions).unwrap();
    let table = String::from_utf8(table).unwrap();
    assert!(table.starts_with("label\tsample\tGENE_A\tGENE_B\n"));
    assert_eq!(table.lines().count(), 1 + 2 * 2);

    let mut importance = Vec::new();
    write_importance(&mut importance, &regions, None).unwrap();
    let importance = String::from_utf8(importance).unwrap();
    assert_eq!(
        importance.lines().skip(1).collect::<Vec<_>>(),
        vec!["1\tGENE_B\t1", "2\tGENE_A\t0.75"]
    );
}

#[test]
fn attribution_table_round_trips_through_aggregation() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path());
    let config = RunConfig::load(&dir.path().join("run.toml")).unwrap();
    let labels = config.label_dictionary().unwrap();
    let gene_map = config.load_region_map("gene").unwrap().unwrap();
    assert!(config.load_region_map("cyto").unwrap().is_none());

    let text = "label\tsample\t1_100_A_G\t1_200_C_T\t2_300_G_A\n\
                afr\tnorth\t0.2\t0.4\t-1\n\
                afr\tsouth\t0\t0\t0.5\n\
                eur\tnorth\t-0.2\t-0.4\t1\n\
                eur\tsouth\t0\t0\t-0.5\n";
    let table = read_attribution_table(text.as_bytes()).unwrap();
    let regions = aggregate(&table.tensor, &table.features, &table.samples, &gene_map, &labels).unwrap();

    assert_abs_diff_eq!(regions.label_matrix(0)[(0, 0)], 0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(regions.label_matrix(1)[(1, 1)], -0.5, epsilon = 1e-12);
}

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use ancestry_features::config::RunConfig;
use ancestry_features::explain::aggregate;
use ancestry_features::explain::output::{
    create_output, read_attribution_table, write_feature_triplets, write_importance,
    write_region_table,
};
use ancestry_features::files::{list_variant_paths, output_stems};
use ancestry_features::locus::GenomeBuild;
use ancestry_features::pipeline::SampleSelection;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "ancestry-features",
    about = "Model-ordered genotype feature matrices and region-level attributions",
    long_about = "Builds sparse genotype feature matrices from VCF files in the column order \
                  of a pretrained ancestry model, and averages per-variant attributions into \
                  genes or cytobands."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build feature matrices from a VCF file or a directory of VCF files
    #[command(about = "Build model-ordered feature matrices (outputs: <name>.features.tsv)")]
    Matrix {
        /// VCF file (.vcf, .g.vcf, .gvcf, optionally .gz) or a directory of them
        #[arg(value_name = "VCF_PATH")]
        input_path: PathBuf,

        /// Run configuration (TOML)
        #[arg(long, value_name = "TOML")]
        config: PathBuf,

        /// Samples to include: "all", 1-based positions, or names, comma separated
        #[arg(long, default_value = "all")]
        samples: SampleSelection,

        /// Genome build of the input (hg19/GRCh37 or hg38/GRCh38); defaults to the model build
        #[arg(long)]
        build: Option<GenomeBuild>,

        /// Directory receiving one sparse triplet table per input file
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,
    },

    /// Aggregate per-variant attributions into every configured region map
    #[command(about = "Average attributions into regions (outputs: region_<map>.tsv, importance_<map>.tsv)")]
    Aggregate {
        /// Run configuration (TOML)
        #[arg(long, value_name = "TOML")]
        config: PathBuf,

        /// Combined attribution table: label, sample, then one column per locus
        #[arg(long, value_name = "TSV")]
        attributions: PathBuf,

        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Only keep the N most important regions in the importance tables
        #[arg(long, value_name = "N")]
        top: Option<usize>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Matrix {
            input_path,
            config,
            samples,
            build,
            output_dir,
        } => run_matrix(input_path, config, samples, build, output_dir),
        Commands::Aggregate {
            config,
            attributions,
            output_dir,
            top,
        } => run_aggregate(config, attributions, output_dir, top),
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

fn run_matrix(
    input_path: PathBuf,
    config_path: PathBuf,
    samples: SampleSelection,
    build: Option<GenomeBuild>,
    output_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(&config_path)?;
    let input_build = build.unwrap_or(config.model_build);
    let resources = config.load_resources(input_build)?;
    let paths = list_variant_paths(&input_path)?;
    if paths.is_empty() {
        return Err(format!("no variant files found in {}", input_path.display()).into());
    }
    fs::create_dir_all(&output_dir)?;

    let builder = resources.matrix_builder();
    let stems = output_stems(&paths);
    let mut failures = 0usize;
    for ((path, result), stem) in builder.build_many(&paths, &samples).into_iter().zip(&stems) {
        match result {
            Ok(features) => {
                let out_path = output_dir.join(format!("{stem}.features.tsv"));
                write_feature_triplets(create_output(&out_path)?, &features, &resources.order)?;
                info!(
                    "Wrote {} sample(s), {} non-zero genotype(s) to {}",
                    features.samples.len(),
                    features.matrix.nnz(),
                    out_path.display()
                );
            }
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                failures += 1;
            }
        }
    }

    if failures == paths.len() {
        return Err(format!("all {failures} input file(s) failed").into());
    }
    Ok(())
}

fn run_aggregate(
    config_path: PathBuf,
    attributions_path: PathBuf,
    output_dir: PathBuf,
    top: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(&config_path)?;
    let labels = config.label_dictionary()?;
    let order = config.load_feature_order()?;

    let file = fs::File::open(&attributions_path).map_err(|e| {
        io::Error::new(e.kind(), format!("{}: {e}", attributions_path.display()))
    })?;
    let table = read_attribution_table(BufReader::new(file))?;
    if table.labels != labels.names() {
        return Err(format!(
            "attribution labels {:?} do not match the configured labels {:?}",
            table.labels,
            labels.names()
        )
        .into());
    }
    if table.features != order.keys() {
        warn!("Attribution columns differ from the model's feature order; using the table's own column labels");
    }
    info!(
        "Aggregating {} label(s) x {} sample(s) x {} feature(s)",
        table.labels.len(),
        table.samples.len(),
        table.features.len()
    );

    fs::create_dir_all(&output_dir)?;
    for (name, region_map) in config.load_region_maps()? {
        let regions = aggregate(&table.tensor, &table.features, &table.samples, &region_map, &labels)?;
        write_region_table(create_output(&output_dir.join(format!("region_{name}.tsv")))?, &regions)?;
        write_importance(
            create_output(&output_dir.join(format!("importance_{name}.tsv")))?,
            &regions,
            top,
        )?;
        info!("Region map '{name}': {} region(s)", regions.regions().len());
    }
    Ok(())
}

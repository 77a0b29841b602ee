//! expression-explorer command-line interface

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use log::{info, LevelFilter};

use expression_explorer::cli::{parse_group_spec, Cli, Commands};
use expression_explorer::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Pca {
            counts,
            metadata,
            output,
            config,
            min_count,
            min_samples,
            no_log,
            components,
        } => load_config(config.as_deref()).and_then(|mut cfg| {
            if let Some(v) = min_count {
                cfg.filter.min_count = v;
            }
            if let Some(v) = min_samples {
                cfg.filter.min_samples = v;
            }
            if no_log {
                cfg.filter.log_transform = false;
            }
            if let Some(k) = components {
                cfg.pca.n_components = k;
            }
            run_pca_command(&counts, metadata.as_deref(), &output, &cfg)
        }),
        Commands::De {
            counts,
            metadata,
            group1,
            group2,
            category_column,
            hide,
            output_dir,
            config,
            timeout_secs,
        } => load_config(config.as_deref()).and_then(|cfg| {
            run_de_command(
                &counts,
                &metadata,
                (&group1, &group2),
                category_column.as_deref(),
                &hide,
                &output_dir,
                &cfg,
                timeout_secs,
            )
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => {
            info!("Loading configuration from: {}", p);
            AnalysisConfig::from_json_file(p)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn run_pca_command(
    counts_path: &str,
    metadata_path: Option<&str>,
    output_path: &str,
    config: &AnalysisConfig,
) -> Result<()> {
    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_matrix(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    let pca = expression_explorer::run_pca(&counts, &config.filter, &config.pca)?;
    for axis in 0..pca.n_components() {
        if let Some(label) = pca.axis_label(axis) {
            info!("  {}", label);
        }
    }

    let metadata = match metadata_path {
        Some(p) => {
            info!("Loading metadata from: {}", p);
            read_metadata(p)?
        }
        None => SampleMetadata::new(Vec::new())?,
    };

    info!("Writing PCA scores to: {}", output_path);
    write_pca(File::create(output_path)?, &pca.join_metadata(&metadata))?;
    Ok(())
}

/// Category label per sample, taken from a metadata column, plus the
/// trace labels in first-appearance order
fn sample_categories(metadata: &SampleMetadata, column: Option<&str>) -> Result<(Vec<usize>, TraceLabels)> {
    let Some(name) = column else {
        return Ok((vec![0; metadata.n_samples()], TraceLabels::from_ordered(["all"])));
    };
    let values = metadata.column(name).ok_or_else(|| AnalysisError::InvalidMetadata {
        reason: format!("no metadata column named '{}'", name),
    })?;

    let mut order: Vec<String> = Vec::new();
    let mut traces = Vec::with_capacity(metadata.n_samples());
    for idx in 0..metadata.n_samples() {
        let label = values.display(idx);
        let trace = match order.iter().position(|l| *l == label) {
            Some(t) => t,
            None => {
                order.push(label);
                order.len() - 1
            }
        };
        traces.push(trace);
    }
    Ok((traces, TraceLabels::from_ordered(order)))
}

#[allow(clippy::too_many_arguments)]
fn run_de_command(
    counts_path: &str,
    metadata_path: &str,
    groups: (&str, &str),
    category_column: Option<&str>,
    hidden: &[String],
    output_dir: &str,
    config: &AnalysisConfig,
    timeout_secs: Option<u64>,
) -> Result<()> {
    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_matrix(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    info!("Loading metadata from: {}", metadata_path);
    let metadata = read_metadata(metadata_path)?;

    let (traces, labels) = sample_categories(&metadata, category_column)?;
    let hidden: HashSet<String> = hidden.iter().cloned().collect();
    let unknown_trace = traces.iter().max().map_or(0, |t| t + 1);

    let mut store = GroupAssignmentStore::new();
    for (slot, spec) in [(GroupSlot::Group1, groups.0), (GroupSlot::Group2, groups.1)] {
        let (name, samples) = parse_group_spec(spec)?;
        let selection: Vec<SelectedPoint> = samples
            .iter()
            .map(|s| {
                let trace = metadata.sample_index(s).map_or(unknown_trace, |i| traces[i]);
                SelectedPoint::new(s.as_str(), trace)
            })
            .collect();
        store.define_group(slot, Some(&selection), &hidden, &labels, &name);
    }

    let token = match timeout_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    let provider = NegativeBinomialProvider::new(config.de.clone());
    let results = expression_explorer::run_differential_expression(&store, &counts, &metadata, &provider, &token)?;
    let (group1, group2) = store.require_both()?;

    let dir = Path::new(output_dir);
    std::fs::create_dir_all(dir)?;

    let results_path = dir.join(format!(
        "{}.csv",
        export_file_stem(&group1.name, &group2.name, ExportKind::DeResults)
    ));
    info!("Writing results to: {}", results_path.display());
    write_de_results(File::create(&results_path)?, &results)?;

    let metadata_out = dir.join(format!(
        "{}.csv",
        export_file_stem(&group1.name, &group2.name, ExportKind::Metadata)
    ));
    info!("Writing group metadata to: {}", metadata_out.display());
    write_group_metadata(File::create(&metadata_out)?, &metadata, group1, group2)?;

    println!("{}", results.summary(config.de.alpha));
    Ok(())
}

//! Command-line interface for expression_explorer

use clap::{Parser, Subcommand};

use crate::error::{AnalysisError, Result};

#[derive(Parser)]
#[command(name = "expression-explorer")]
#[command(version)]
#[command(about = "Sample PCA and two-group differential expression for RNA-seq counts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Filter the count matrix and project samples onto principal components
    #[command(after_long_help = "\
Examples:
  expression-explorer pca -c counts.csv -m metadata.csv -o pca.csv
  expression-explorer pca -c counts.tsv.gz -o pca.csv --min-count 5 --components 3")]
    Pca {
        /// Count table (.csv, .tsv, optionally gzipped): genes as rows, samples as columns
        #[arg(short, long)]
        counts: String,

        /// Sample metadata joined onto the scores
        #[arg(short, long)]
        metadata: Option<String>,

        /// Output CSV path
        #[arg(short, long)]
        output: String,

        /// JSON file with analysis parameters
        #[arg(long)]
        config: Option<String>,

        /// A sample counts toward prevalence when its count is above this
        #[arg(long)]
        min_count: Option<f64>,

        /// Samples that must exceed --min-count for a gene to be kept
        #[arg(long)]
        min_samples: Option<usize>,

        /// Skip the log(1 + x) transform
        #[arg(long)]
        no_log: bool,

        /// Number of principal components
        #[arg(long)]
        components: Option<usize>,
    },

    /// Test every gene for a difference between two sample groups
    #[command(after_long_help = "\
Examples:
  expression-explorer de -c counts.csv -m metadata.csv \\
    --group1 control=s1,s2,s3 --group2 treated=s4,s5,s6 --output-dir results/

  # pick samples by category and drop a hidden category
  expression-explorer de -c counts.csv -m metadata.csv --category-column batch \\
    --group1 control=s1,s2,s3,s7 --group2 treated=s4,s5,s6 --hide b3")]
    De {
        /// Count table (.csv, .tsv, optionally gzipped)
        #[arg(short, long)]
        counts: String,

        /// Sample metadata covering every grouped sample
        #[arg(short, long)]
        metadata: String,

        /// Reference group as NAME=SAMPLE,SAMPLE,...
        #[arg(long)]
        group1: String,

        /// Comparison group as NAME=SAMPLE,SAMPLE,...
        #[arg(long)]
        group2: String,

        /// Categorical metadata column used to label selected samples
        #[arg(long)]
        category_column: Option<String>,

        /// Category of --category-column to exclude from both groups (repeatable)
        #[arg(long)]
        hide: Vec<String>,

        /// Directory for the result and metadata exports
        #[arg(long, default_value = ".")]
        output_dir: String,

        /// JSON file with analysis parameters
        #[arg(long)]
        config: Option<String>,

        /// Abort the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

/// Split `NAME=S1,S2,...` into the group name and its sample ids
pub fn parse_group_spec(spec: &str) -> Result<(String, Vec<String>)> {
    let (name, samples) = spec.split_once('=').ok_or_else(|| AnalysisError::InvalidInput {
        reason: format!("group '{}' must look like NAME=SAMPLE1,SAMPLE2", spec),
    })?;
    let samples: Vec<String> = samples
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok((name.trim().to_string(), samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_spec() {
        let (name, samples) = parse_group_spec("treated = s4, s5,,s6").unwrap();
        assert_eq!(name, "treated");
        assert_eq!(samples, vec!["s4", "s5", "s6"]);
        assert!(parse_group_spec("s1,s2").is_err());
    }

    #[test]
    fn test_cli_parses_de() {
        let cli = Cli::try_parse_from([
            "expression-explorer",
            "-v",
            "de",
            "-c",
            "counts.csv",
            "-m",
            "meta.csv",
            "--group1",
            "a=s1,s2",
            "--group2",
            "b=s3,s4",
            "--hide",
            "x",
            "--hide",
            "y",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::De { hide, output_dir, .. } => {
                assert_eq!(hide, vec!["x", "y"]);
                assert_eq!(output_dir, ".");
            }
            _ => panic!("expected de"),
        }
    }
}

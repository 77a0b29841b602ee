//! Writing result tables for download

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::data::SampleMetadata;
use crate::de::DeResults;
use crate::error::{AnalysisError, Result};
use crate::groups::GroupAssignment;
use crate::pca::AnnotatedPca;

use super::csv::read_table;

/// Columns of an exported DE table, after the gene id
pub const DE_COLUMNS: [&str; 6] = ["baseMean", "log2FoldChange", "lfcSE", "stat", "pvalue", "padj"];

/// Which export a file name is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    DeResults,
    Metadata,
}

impl ExportKind {
    fn suffix(self) -> &'static str {
        match self {
            ExportKind::DeResults => "de_results",
            ExportKind::Metadata => "metadata",
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<group2>_v_<group1>_de_results` or `<group2>_v_<group1>_metadata`,
/// without extension
pub fn export_file_stem(group1_name: &str, group2_name: &str, kind: ExportKind) -> String {
    format!("{}_v_{}_{}", sanitize(group2_name), sanitize(group1_name), kind.suffix())
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        v.to_string()
    }
}

/// Write the DE table as CSV: `gene_id` then [`DE_COLUMNS`]. Missing values
/// are written as `NA`.
pub fn write_de_results<W: Write>(writer: W, results: &DeResults) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["gene_id"];
    header.extend(DE_COLUMNS);
    out.write_record(&header)?;

    for i in 0..results.n_genes() {
        let row = [
            results.base_means[i],
            results.log2_fold_changes[i],
            results.lfc_se[i],
            results.stat[i],
            results.pvalues[i],
            results.padj[i],
        ];
        let mut record = vec![results.gene_ids[i].clone()];
        record.extend(row.iter().map(|&v| format_value(v)));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_de_results_file<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    write_de_results(File::create(path)?, results)
}

/// Parse a table written by [`write_de_results`]. Only the exported columns
/// are filled; group names are left empty.
pub fn read_de_results<P: AsRef<Path>>(path: P) -> Result<DeResults> {
    let table = read_table(path)?;
    let positions = DE_COLUMNS
        .iter()
        .map(|name| {
            table
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| AnalysisError::InvalidFileFormat {
                    reason: format!("result table has no '{}' column", name),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut results = DeResults::new(table.row_labels.clone(), "", "");
    for (i, row) in table.cells.iter().enumerate() {
        let mut values = [f64::NAN; 6];
        for (k, &col) in positions.iter().enumerate() {
            let cell = row[col].as_str();
            values[k] = if cell == "NA" {
                f64::NAN
            } else {
                cell.parse::<f64>().map_err(|_| AnalysisError::InvalidFileFormat {
                    reason: format!(
                        "value '{}' for gene '{}' in column {} is not a number",
                        cell, table.row_labels[i], DE_COLUMNS[k]
                    ),
                })?
            };
        }
        results.base_means[i] = values[0];
        results.log2_fold_changes[i] = values[1];
        results.lfc_se[i] = values[2];
        results.stat[i] = values[3];
        results.pvalues[i] = values[4];
        results.padj[i] = values[5];
    }
    Ok(results)
}

/// Write the metadata rows of both groups, group1 samples first, with a
/// `group` column holding each sample's group name
pub fn write_group_metadata<W: Write>(
    writer: W,
    metadata: &SampleMetadata,
    group1: &GroupAssignment,
    group2: &GroupAssignment,
) -> Result<()> {
    let ordered: Vec<String> = group1
        .sample_ids
        .iter()
        .chain(group2.sample_ids.iter())
        .cloned()
        .collect();
    let subset = metadata.select_samples(&ordered)?;

    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["sample_id".to_string()];
    header.extend(subset.column_names().iter().map(|s| s.to_string()));
    header.push("group".to_string());
    out.write_record(&header)?;

    for (idx, sample_id) in subset.sample_ids().iter().enumerate() {
        let group = if idx < group1.len() { &group1.name } else { &group2.name };
        let mut record = vec![sample_id.clone()];
        record.extend(subset.row_display(idx));
        record.push(group.clone());
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Sample scores with one column per component, followed by any joined
/// metadata columns
pub fn write_pca<W: Write>(writer: W, annotated: &AnnotatedPca) -> Result<()> {
    let pca = &annotated.pca;
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["sample_id".to_string()];
    header.extend((1..=pca.n_components()).map(|k| format!("PC{}", k)));
    header.extend(annotated.columns.iter().cloned());
    out.write_record(&header)?;

    for (i, sample_id) in pca.sample_ids().iter().enumerate() {
        let mut record = vec![sample_id.clone()];
        record.extend(pca.scores().row(i).iter().map(|v| v.to_string()));
        record.extend(annotated.rows[i].iter().cloned());
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use crate::filter::{filter_counts, FilterParams};
    use crate::pca::{compute_pca, PcaParams};
    use ndarray::array;
    use tempfile::TempDir;

    fn assignment(name: &str, ids: &[&str]) -> GroupAssignment {
        GroupAssignment {
            name: name.to_string(),
            sample_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_export_file_stem() {
        assert_eq!(
            export_file_stem("control", "treated", ExportKind::DeResults),
            "treated_v_control_de_results"
        );
        assert_eq!(
            export_file_stem("wild type", "KO/1", ExportKind::Metadata),
            "KO_1_v_wild_type_metadata"
        );
    }

    #[test]
    fn test_de_table_round_trip() {
        let mut res = DeResults::new(vec!["g1".into(), "g2".into()], "A", "B");
        res.base_means = vec![123.456789, 0.0];
        res.log2_fold_changes = vec![-2.5e-3, f64::NAN];
        res.lfc_se = vec![0.1234567890123, f64::NAN];
        res.stat = vec![-0.02025, f64::NAN];
        res.pvalues = vec![0.98384, f64::NAN];
        res.padj = vec![0.98384, f64::NAN];

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_de_results_file(&path, &res).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("gene_id,baseMean,log2FoldChange,lfcSE,stat,pvalue,padj\n"));
        assert!(text.contains("g2,0,NA,NA,NA,NA,NA"));

        let back = read_de_results(&path).unwrap();
        assert_eq!(back.gene_ids, res.gene_ids);
        for (a, b) in back.lfc_se.iter().zip(&res.lfc_se) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12);
        }
        assert!((back.base_means[0] - 123.456789).abs() < 1e-12);
        assert!(back.padj[1].is_nan());
    }

    #[test]
    fn test_group_metadata_export() {
        let mut meta =
            SampleMetadata::new(vec!["s1".into(), "s2".into(), "s3".into(), "s4".into(), "s5".into()]).unwrap();
        meta.add_condition("batch", vec!["x".into(), "y".into(), "x".into(), "y".into(), "x".into()])
            .unwrap();

        let mut buf = Vec::new();
        write_group_metadata(
            &mut buf,
            &meta,
            &assignment("ctrl", &["s3", "s1"]),
            &assignment("treat", &["s4", "s2"]),
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sample_id,batch,group");
        assert_eq!(lines[1], "s3,x,ctrl");
        assert_eq!(lines[2], "s1,x,ctrl");
        assert_eq!(lines[4], "s2,y,treat");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_write_pca_with_metadata() {
        let counts = CountMatrix::new(
            array![[100.0, 200.0, 50.0], [30.0, 10.0, 80.0], [500.0, 520.0, 480.0]],
            vec!["g1".into(), "g2".into(), "g3".into()],
            vec!["s1".into(), "s2".into(), "s3".into()],
        )
        .unwrap();
        let filtered = filter_counts(&counts, &FilterParams::default()).unwrap();
        let pca = compute_pca(&filtered, &PcaParams::default()).unwrap();

        let mut meta = SampleMetadata::new(vec!["s1".into(), "s2".into()]).unwrap();
        meta.add_condition("condition", vec!["a".into(), "b".into()]).unwrap();

        let mut buf = Vec::new();
        write_pca(&mut buf, &pca.join_metadata(&meta)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sample_id,PC1,PC2,condition");
        assert!(lines[1].starts_with("s1,") && lines[1].ends_with(",a"));
        assert!(lines[3].ends_with(','));
    }
}

//! Reading input tables and writing exports

mod csv;
mod export;

pub use self::csv::{read_count_matrix, read_metadata, read_table, Table};
pub use export::{
    export_file_stem, read_de_results, write_de_results, write_de_results_file, write_group_metadata, write_pca,
    ExportKind, DE_COLUMNS,
};

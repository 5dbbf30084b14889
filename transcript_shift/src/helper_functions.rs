use std::env;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info};

use crate::models::polars_err;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

/// Read a tab-separated table with a header row. `NA` and empty fields are null.
pub fn read_tsv(file_path: &str) -> PolarsResult<DataFrame> {
    let parse_options = CsvParseOptions::default()
        .with_separator(b'\t')
        .with_null_values(Some(NullValues::AllColumnsSingle("NA".into())));

    CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(parse_options)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Write `df` as a tab-separated table into `output_dir/file_name`.
pub fn dataframe_to_tsv(df: &mut DataFrame, output_dir: &str, file_name: &str) -> PolarsResult<PathBuf> {
    create_dir_all(output_dir).map_err(|e| polars_err(Box::new(e)))?;
    let path = Path::new(output_dir).join(file_name);

    debug!("Writing {:?} frame to {}", df.shape(), path.display());
    let mut file = File::create(&path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)?;

    info!("Saved {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tsv_round_trip_keeps_na_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.tsv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "id\ta\tb").unwrap();
        writeln!(f, "p1\t1\tNA").unwrap();
        writeln!(f, "p2\t3\t4").unwrap();
        drop(f);

        let mut df = read_tsv(path.to_str().unwrap()).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.column("b").unwrap().null_count(), 1);

        let out = dir.path().to_str().unwrap();
        let written = dataframe_to_tsv(&mut df, out, "out.tsv").unwrap();
        let reread = read_tsv(written.to_str().unwrap()).unwrap();
        assert_eq!(reread.shape(), (2, 3));
    }
}

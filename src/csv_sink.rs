use csv::{Terminator, Writer, WriterBuilder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, debug};
use crate::error::ExtractError;

/// Output file for a property: the `{}` in `template` becomes the lower-cased property name.
pub fn output_path(dir: &str, template: &str, property_name: &str) -> PathBuf {
    let filename = template.replace("{}", &property_name.to_lowercase());
    Path::new(dir).join(filename)
}

/// One property's delimited output file, open for the whole date-range loop.
///
/// The underlying writer is flushed when this value is dropped, so early
/// returns still leave every row written so far on disk; `finish` does the
/// same but surfaces the flush error.
pub struct PropertyOutput {
    path: PathBuf,
    writer: Writer<File>,
    header_written: bool,
    rows_written: usize,
}

impl PropertyOutput {
    pub fn create(path: &Path, delimiter: u8, ensure_directories: bool) -> Result<Self, ExtractError> {
        if ensure_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {:?}", parent);
            }
        }

        let file = File::create(path)?;
        let writer = WriterBuilder::new()
            .delimiter(delimiter)
            .terminator(Terminator::Any(b'\n'))
            .flexible(true)
            .from_writer(file);

        info!("Opened output file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            header_written: false,
            rows_written: 0,
        })
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Writes the header row. Only the first call has any effect.
    pub fn write_header(&mut self, headers: &[String]) -> Result<(), ExtractError> {
        if self.header_written {
            return Ok(());
        }
        if self.rows_written > 0 {
            return Err(ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "header must precede data rows",
            )));
        }
        info!("Writing CSV header to {}", self.path.display());
        self.writer.write_record(headers)?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[Vec<String>]) -> Result<usize, ExtractError> {
        for row in rows {
            self.writer.write_record(row)?;
        }
        self.rows_written += rows.len();
        debug!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }

    pub fn finish(mut self) -> Result<usize, ExtractError> {
        self.writer.flush()?;
        info!("Closed {} after {} rows", self.path.display(), self.rows_written);
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_output_path_lowercases_property_name() {
        let path = output_path("/data", "google_analytics_data_{}_1.csv", "Solidworks Prod");
        assert_eq!(path, PathBuf::from("/data/google_analytics_data_solidworks prod_1.csv"));
    }

    #[test]
    fn test_writes_header_then_rows_with_newline_terminator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("north.csv");

        let mut out = PropertyOutput::create(&path, b',', true).unwrap();
        out.write_header(&row(&["ga:pagePath", "ga:sessions"])).unwrap();
        out.write_rows(&[row(&["/", "10"]), row(&["/a,b", "3"])]).unwrap();
        out.write_header(&row(&["ignored", "header"])).unwrap();
        assert_eq!(out.finish().unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ga:pagePath,ga:sessions\n/,10\n\"/a,b\",3\n");
    }

    #[test]
    fn test_custom_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tabs.tsv");

        let mut out = PropertyOutput::create(&path, b'\t', false).unwrap();
        out.write_header(&row(&["a", "b"])).unwrap();
        out.write_rows(&[row(&["1", "2"])]).unwrap();
        out.finish().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\tb\n1\t2\n");
    }

    #[test]
    fn test_drop_flushes_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.csv");
        {
            let mut out = PropertyOutput::create(&path, b',', false).unwrap();
            out.write_header(&row(&["h"])).unwrap();
            out.write_rows(&[row(&["v"])]).unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "h\nv\n");
    }

    #[test]
    fn test_header_after_rows_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut out = PropertyOutput::create(&dir.path().join("x.csv"), b',', false).unwrap();
        out.write_rows(&[row(&["v"])]).unwrap();
        assert!(out.write_header(&row(&["h"])).is_err());
    }
}

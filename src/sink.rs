use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::SinkError;
use crate::model::OutputRow;

pub const CSV_HEADER: [&str; 5] = [
    "timestamp_window_start",
    "cliente_ip",
    "protocolo",
    "bytes_entrada",
    "bytes_saida",
];

/// 汇总行输出端
pub trait RowSink: Send {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// 追加写入的 CSV 文件，表头只在文件为空时写一次
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<(File, bool), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        Ok((file, needs_header))
    }
}

impl RowSink for CsvSink {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }

        let (file, needs_header) = self.open()?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(CSV_HEADER)?;
        }
        for row in rows {
            writer.write_record([
                row.window_start_iso(),
                row.client_address.clone(),
                row.protocol.clone(),
                row.bytes_in.to_string(),
                row.bytes_out.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

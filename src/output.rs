use crate::metrics::latency::{LatencySnapshot, SnapshotRow};
use anyhow::{Context, Result};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Sink for per-window snapshots, one CSV row each.
pub enum OutputWriter {
    Csv {
        writer: BufWriter<File>,
        header_written: bool,
    },
    Stdout {
        header_written: bool,
    },
}

impl OutputWriter {
    /// `-` selects stdout, anything else is a file path.
    pub async fn open(target: &str) -> Result<Self> {
        if target == "-" {
            Ok(Self::new_stdout())
        } else {
            Self::new_csv(target).await
        }
    }

    pub async fn new_csv(path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.ok();
            }
        }
        let file = File::create(path)
            .await
            .with_context(|| format!("create csv output {path}"))?;
        tracing::info!(path, "writing latency snapshots as csv");
        Ok(Self::Csv {
            writer: BufWriter::new(file),
            header_written: false,
        })
    }

    pub fn new_stdout() -> Self {
        Self::Stdout {
            header_written: false,
        }
    }

    pub async fn write_snapshot(&mut self, snapshot: &LatencySnapshot) -> Result<()> {
        let row = snapshot.row();
        match self {
            Self::Csv {
                writer,
                header_written,
            } => {
                let bytes = encode(&row, !*header_written)?;
                writer.write_all(&bytes).await?;
                // Flush so external tail/readers see progress promptly
                writer.flush().await?;
                *header_written = true;
            }
            Self::Stdout { header_written } => {
                let bytes = encode(&row, !*header_written)?;
                print!("{}", String::from_utf8_lossy(&bytes));
                *header_written = true;
            }
        }
        Ok(())
    }
}

fn encode(row: &SnapshotRow, with_header: bool) -> Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    wtr.serialize(row)?;
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush: {}", e.error()))
}

use anyhow::{Context, Result};
use dupe_sieve_core::{DetectionOutcome, ResultRow};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}

/// One CSV line per file, in file id order.
pub fn write_csv<'a>(path: &Path, rows: impl Iterator<Item = &'a ResultRow>) -> Result<usize> {
    ensure_parent(path)?;
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut written = 0;
    for row in rows {
        writer.serialize(row)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// The full outcome (status, groups with evidence-bearing edges, stats) as JSON.
pub fn write_json(path: &Path, outcome: &DetectionOutcome) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, outcome)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dupe_sieve_core::{FileRecord, RunStats};
    use tempfile::tempdir;

    #[test]
    fn test_csv_has_header_and_one_line_per_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/rows.csv");
        let mtime = Utc.timestamp_opt(0, 0).unwrap();
        let rows: Vec<ResultRow> = (1..=3)
            .map(|id| FileRecord::new(id, format!("/a/{}.txt", id), 1, mtime))
            .map(|record| ResultRow::from_record(&record))
            .collect();

        assert_eq!(write_csv(&path, rows.iter()).unwrap(), 3);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("file_id,short_path,size,mtime"));
    }

    #[test]
    fn test_json_round_trips_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outcome.json");
        let outcome = DetectionOutcome::failed("boom", RunStats::default());
        write_json(&path, &outcome).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["error"], "boom");
    }
}

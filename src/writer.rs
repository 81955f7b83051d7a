use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::mpsc::Receiver,
};

use log::warn;

use crate::{PaddockError, info::InfoSnapshot};

/// Append every snapshot received on `snapshots` to `file` as one JSON line, until the sender
/// is dropped.
pub fn write_snapshots(
    file: &Path,
    snapshots: Receiver<InfoSnapshot>,
) -> Result<(), PaddockError> {
    let snapshot_file = File::create(file).map_err(|e| PaddockError::WriterError { source: e })?;
    let mut snapshot_writer = BufWriter::new(snapshot_file);
    for snapshot in &snapshots {
        let line = match serde_json::to_string(&snapshot) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not serialize snapshot: {}", e);
                continue;
            }
        };
        if let Err(e) = writeln!(snapshot_writer, "{}", line) {
            warn!("Error while writing snapshot to output file: {}", e);
        }
    }
    snapshot_writer
        .flush()
        .map_err(|e| PaddockError::WriterError { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ModuleInfo;
    use std::sync::mpsc;

    #[test]
    fn test_writes_one_line_per_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.jsonl");
        let info = ModuleInfo::new();
        let (tx, rx) = mpsc::channel();
        tx.send(info.snapshot(1)).unwrap();
        info.delta.update(|delta| delta.delta_best = 0.5);
        tx.send(info.snapshot(2)).unwrap();
        drop(tx);

        write_snapshots(&path, rx).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["timestamp_ms"], 2);
        assert_eq!(lines[1]["delta"]["delta_best"], 0.5);
    }
}

//! Export the analysis history as JSON.
//!
//! Produces a single document with every stored entry, most recent first,
//! suitable for backups or loading into a spreadsheet.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::history::HistoryStore;
use crate::models::HistoryEntry;

const PAGE: usize = 500;

#[derive(Serialize)]
struct ExportData {
    exported_at: String,
    version: &'static str,
    count: usize,
    entries: Vec<HistoryEntry>,
}

/// Collect every entry, paging through the store.
pub async fn collect_all(store: &dyn HistoryStore) -> Result<Vec<HistoryEntry>> {
    let mut all = Vec::new();
    loop {
        let page = store.list(PAGE, all.len()).await?;
        let done = page.len() < PAGE;
        all.extend(page);
        if done {
            return Ok(all);
        }
    }
}

/// Export history as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(store: &dyn HistoryStore, output: Option<&Path>) -> Result<()> {
    let entries = collect_all(store).await?;
    let data = ExportData {
        exported_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        count: entries.len(),
        entries,
    };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &json)?;
            eprintln!("Exported {} entries to {}", data.count, path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::entry_at;
    use crate::history::InMemoryHistoryStore;
    use crate::models::Band;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_writes_all_entries() {
        let store = InMemoryHistoryStore::new(0);
        let now = Utc::now();
        for i in 0..3 {
            store
                .append(entry_at(
                    &format!("id-{}", i),
                    "Granola",
                    50,
                    Band::Medium,
                    now + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }

        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("exports").join("history.json");
        run_export(&store, Some(out.as_path())).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["count"], 3);
        assert_eq!(written["entries"][0]["product_identity"], "id-2");
    }
}

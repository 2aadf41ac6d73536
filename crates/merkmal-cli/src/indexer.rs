//! Recursive directory indexer.
//!
//! Walks a tree, pushes every file onto a job channel and lets a small
//! worker pool run the dispatcher over each one. Results append to a JSONL
//! file (one record per object) and/or a CSV summary. Output files are
//! shared across workers behind a mutex; each record is written in one
//! locked step so lines never interleave.

use anyhow::{Context, Result};
use merkmal::actions::DigestAlgorithm;
use merkmal::{
    ActionDispatcher, Capabilities, FileMapper, IndexResult, MerkmalConfig, build_dispatcher,
    index_with_copy,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Serialize)]
struct IndexRecord<'a> {
    path: String,
    folder: String,
    basename: String,
    indexer: &'a IndexResult,
}

struct Outputs {
    jsonl: Option<Mutex<std::fs::File>>,
    csv: Option<Mutex<std::fs::File>>,
}

const CSV_HEADER: &str =
    "path,folder,basename,size,mimetype,pronom,type,subtype,checksum,width,height,duration";

/// Minimal CSV quoting: wrap fields containing separators or quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Outputs {
    fn open(jsonl: Option<&Path>, csv: Option<&Path>) -> Result<Self> {
        let jsonl = match jsonl {
            Some(path) => Some(Mutex::new(
                std::fs::File::create(path)
                    .with_context(|| format!("cannot create json file {}", path.display()))?,
            )),
            None => None,
        };
        let csv = match csv {
            Some(path) => {
                let mut file = std::fs::File::create(path)
                    .with_context(|| format!("cannot create csv file {}", path.display()))?;
                writeln!(file, "{CSV_HEADER}")?;
                Some(Mutex::new(file))
            }
            None => None,
        };
        Ok(Self { jsonl, csv })
    }

    fn write(&self, path: &str, result: &IndexResult, checksum: &str) -> Result<()> {
        let folder = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let basename = Path::new(path)
            .file_name()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(jsonl) = &self.jsonl {
            let record = IndexRecord {
                path: path.to_string(),
                folder: folder.clone(),
                basename: basename.clone(),
                indexer: result,
            };
            let line = serde_json::to_string(&record)?;
            let mut file = jsonl.lock().expect("jsonl writer poisoned");
            writeln!(file, "{line}")?;
        }
        if let Some(csv) = &self.csv {
            let row = [
                path,
                folder.as_str(),
                basename.as_str(),
                &result.size.to_string(),
                &result.mimetype,
                &result.pronom,
                &result.kind,
                &result.subtype,
                checksum,
                &result.width.to_string(),
                &result.height.to_string(),
                &result.duration.to_string(),
            ]
            .map(csv_field)
            .join(",");
            let mut file = csv.lock().expect("csv writer poisoned");
            writeln!(file, "{row}")?;
        }
        Ok(())
    }
}

fn collect_files(root: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("cannot walk {}", root.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

async fn index_one(
    id: usize,
    dispatcher: &ActionDispatcher,
    actions: &[String],
    outputs: &Outputs,
    root: &Path,
    path: &Path,
) {
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    tracing::info!("worker {} processing {}", id, relative);

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let (result, digests) = match index_with_copy(
        dispatcher,
        file,
        &relative,
        actions,
        &[DigestAlgorithm::Sha512],
        tokio::io::sink(),
    )
    .await
    {
        Ok(indexed) => indexed,
        Err(e) => {
            tracing::error!("cannot index {}: {}", relative, e);
            return;
        }
    };
    let checksum = digests.get("sha512").cloned().unwrap_or_default();

    println!("#{id:03}: {relative}\n           [{}] - {}", result.mimetype, checksum);
    if result.kind == "image" {
        println!("           image: {}x{}", result.width, result.height);
    }
    if let Err(e) = outputs.write(&relative, &result, &checksum) {
        tracing::error!("cannot write output for {}: {}", relative, e);
    }
}

pub async fn run(
    config: &MerkmalConfig,
    path: &Path,
    jsonl: Option<&Path>,
    csv: Option<&Path>,
    workers: usize,
    actions: Option<Vec<String>>,
) -> Result<()> {
    let mapper = Arc::new(FileMapper::new(config.file_map.clone()));
    let dispatcher = Arc::new(build_dispatcher(config, mapper).context("cannot init indexer")?);

    let mut action_names = match actions {
        Some(actions) => actions,
        None => dispatcher.names_by_caps(Capabilities::STREAM),
    };
    action_names.sort();
    action_names.dedup();
    let action_names = Arc::new(action_names);

    let outputs = Arc::new(Outputs::open(jsonl, csv)?);
    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let mut files = Vec::new();
    collect_files(&root, &mut files)?;
    tracing::info!("{} files under {}", files.len(), root.display());

    let (tx, rx) = mpsc::channel::<PathBuf>(100);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut handles = Vec::new();
    for id in 1..=workers.max(1) {
        let dispatcher = Arc::clone(&dispatcher);
        let actions = Arc::clone(&action_names);
        let outputs = Arc::clone(&outputs);
        let root = root.clone();
        let rx = Arc::clone(&rx);
        handles.push(tokio::spawn(async move {
            loop {
                let job = rx.lock().await.recv().await;
                let Some(path) = job else { break };
                index_one(id, &dispatcher, &actions, &outputs, &root, &path).await;
            }
        }));
    }

    for file in files {
        tx.send(file).await.ok();
    }
    drop(tx);

    for handle in handles {
        handle.await.context("worker panicked")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_index_tree_writes_jsonl_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"beta content").unwrap();

        let out = tempfile::tempdir().unwrap();
        let jsonl_path = out.path().join("out.jsonl");
        let csv_path = out.path().join("out.csv");

        let config = MerkmalConfig::default();
        run(
            &config,
            dir.path(),
            Some(&jsonl_path),
            Some(&csv_path),
            2,
            None,
        )
        .await
        .unwrap();

        let jsonl = std::fs::read_to_string(&jsonl_path).unwrap();
        assert_eq!(jsonl.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
        assert!(first["indexer"]["checksum"]["sha512"].is_string());

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.lines().next().unwrap().starts_with("path,folder"));
    }
}

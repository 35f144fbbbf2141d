use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use harbor_db::{DetailFile, Store};

/// In-memory view of the content-addressed detail blobs, mirrored from a
/// filesystem directory at boot and kept in step with the store afterwards.
///
/// The on-disk set is authoritative at boot: CIDs absent from disk are
/// removed from the store. Runtime registrations (virtual providers and
/// their offers) write both the file and the row so the next boot keeps them.
pub struct DetailRegistry {
    store: Store,
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl DetailRegistry {
    pub async fn sync_from_disk(store: Store, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => {
                    let cid = harbor_chain::generate_cid(content.as_bytes());
                    files.push(DetailFile { cid, content });
                }
                Err(e) => {
                    warn!(
                        "Skipping unreadable detail file {}: {}",
                        entry.path().display(),
                        e
                    );
                }
            }
        }

        store.sync_detail_files(&files).await?;
        info!("📁 Synced {} detail files from {}", files.len(), dir.display());

        let cache = files.into_iter().map(|f| (f.cid, f.content)).collect();
        Ok(Self {
            store,
            dir,
            cache: RwLock::new(cache),
        })
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.cache.read().unwrap().contains_key(cid)
    }

    pub fn resolve(&self, cid: &str) -> Option<String> {
        self.cache.read().unwrap().get(cid).cloned()
    }

    pub fn resolve_many(&self, cids: &[String]) -> Vec<DetailFile> {
        let cache = self.cache.read().unwrap();
        cids.iter()
            .filter_map(|cid| {
                cache.get(cid).map(|content| DetailFile {
                    cid: cid.clone(),
                    content: content.clone(),
                })
            })
            .collect()
    }

    /// Persist a new blob: file on disk, row in the store, entry in the
    /// cache. Returns the content's CID.
    pub async fn register(&self, file_name: &str, content: &str) -> Result<String> {
        let cid = harbor_chain::generate_cid(content.as_bytes());
        let path = self.dir.join(file_name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.store.insert_detail_file(&cid, content).await?;
        self.cache
            .write()
            .unwrap()
            .insert(cid.clone(), content.to_string());
        info!("Registered detail file {} ({})", file_name, cid);
        Ok(cid)
    }
}

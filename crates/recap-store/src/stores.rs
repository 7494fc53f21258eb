use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recap_protocol::{CollectionRef, DocumentStorePort, RetrievalError, StoredDocument};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Documents kept as `<root>/<collection path>/<id>.json`, one JSON object per file.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &CollectionRef) -> PathBuf {
        collection
            .as_str()
            .split('/')
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }
}

fn io_error(error: std::io::Error, dir: &Path) -> RetrievalError {
    match error.kind() {
        ErrorKind::PermissionDenied => RetrievalError::PermissionDenied(dir.display().to_string()),
        _ => RetrievalError::Unavailable(format!("{}: {error}", dir.display())),
    }
}

#[async_trait]
impl DocumentStorePort for FileDocumentStore {
    #[instrument(skip(self), fields(collection = %collection))]
    async fn list_recent(
        &self,
        collection: &CollectionRef,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, RetrievalError> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "collection directory missing");
                return Ok(Vec::new());
            }
            Err(error) => return Err(io_error(error, &dir)),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(e, &dir))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()).map(str::to_owned) else {
                continue;
            };
            let raw = fs::read_to_string(&path)
                .await
                .map_err(|e| io_error(e, &path))?;
            let fields = match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(fields)) => fields,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "skipping unreadable workflow document");
                    continue;
                }
            };
            let updated_at = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(DateTime::<Utc>::from);
            documents.push(StoredDocument {
                path: collection.document_path(&id),
                id,
                fields,
                updated_at,
            });
        }

        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        documents.truncate(limit);
        debug!(count = documents.len(), "documents listed");
        Ok(documents)
    }
}

#[derive(Debug, Clone)]
enum StaticContents {
    Documents(Vec<StoredDocument>),
    Failure(RetrievalError),
}

/// Fixed in-memory store, optionally slow or failing.
#[derive(Debug, Clone)]
pub struct StaticDocumentStore {
    contents: StaticContents,
    delay: Duration,
}

impl StaticDocumentStore {
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        Self {
            contents: StaticContents::Documents(documents),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self {
            contents: StaticContents::Failure(error),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DocumentStorePort for StaticDocumentStore {
    async fn list_recent(
        &self,
        _collection: &CollectionRef,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, RetrievalError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.contents {
            StaticContents::Documents(documents) => {
                Ok(documents.iter().take(limit).cloned().collect())
            }
            StaticContents::Failure(error) => Err(error.clone()),
        }
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use recap_protocol::{SessionId, TriggerDocument};
use tokio::fs;

/// Keeps a copy of every submitted trigger as `trigger_<session>.json`.
#[derive(Debug, Clone)]
pub struct TriggerArchive {
    dir: PathBuf,
}

impl TriggerArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("trigger_{session_id}.json"))
    }

    pub async fn write(&self, session_id: &SessionId, trigger: &TriggerDocument) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create trigger dir {:?}", self.dir))?;
        let path = self.path_for(session_id);
        let body = serde_json::to_vec_pretty(trigger).context("failed serializing trigger")?;
        fs::write(&path, body)
            .await
            .with_context(|| format!("failed writing trigger {path:?}"))?;
        Ok(path)
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Stage, WorkflowState};
use crate::utils::time::{format_unix_ms, unix_timestamp_ms};

pub const SESSION_SCHEMA_VERSION: &str = "sqlagent.session.v1";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session token `{0}`")]
    InvalidToken(String),

    #[error("session `{0}` not found")]
    NotFound(String),

    #[error("session `{token}` is not waiting at a confirmation gate (stage: {stage})")]
    NotAtGate { token: String, stage: Stage },

    #[error("session store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {path} could not be decoded: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    schema_version: String,
    token: String,
    saved_at_utc: String,
    state: WorkflowState,
}

/// Suspended workflows, one JSON file per token under `<out_dir>/sessions`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(out_dir: &Path) -> Self {
        Self {
            dir: out_dir.join("sessions"),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a suspended state under a fresh token.
    pub fn create(&self, state: &WorkflowState) -> Result<String, SessionError> {
        let token = Uuid::new_v4().to_string();
        self.save(&token, state)?;
        Ok(token)
    }

    /// Overwrites the session file for `token`. Only gate stages are saved.
    pub fn save(&self, token: &str, state: &WorkflowState) -> Result<(), SessionError> {
        let path = self.path_for(token)?;
        if state.stage.gate().is_none() {
            return Err(SessionError::NotAtGate {
                token: token.to_string(),
                stage: state.stage,
            });
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let record = SessionRecord {
            schema_version: SESSION_SCHEMA_VERSION.to_string(),
            token: token.to_string(),
            saved_at_utc: format_unix_ms(unix_timestamp_ms()),
            state: state.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&record).map_err(|source| SessionError::Decode {
            path: path.clone(),
            source,
        })?;

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, encoded).map_err(|source| SessionError::Io {
            path: staging.clone(),
            source,
        })?;
        std::fs::rename(&staging, &path).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;

        info!(%token, stage = %state.stage, "session saved");
        Ok(())
    }

    /// Loads a session that is waiting at a gate.
    pub fn load(&self, token: &str) -> Result<WorkflowState, SessionError> {
        let path = self.path_for(token)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(token.to_string()));
            }
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        let record: SessionRecord = serde_json::from_slice(&raw)
            .map_err(|source| SessionError::Decode { path, source })?;

        if record.state.stage.gate().is_none() {
            return Err(SessionError::NotAtGate {
                token: token.to_string(),
                stage: record.state.stage,
            });
        }
        debug!(%token, stage = %record.state.stage, "session loaded");
        Ok(record.state)
    }

    /// Discards a session. Missing files are not an error.
    pub fn remove(&self, token: &str) -> Result<(), SessionError> {
        let path = self.path_for(token)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(%token, "session discarded");
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }

    fn path_for(&self, token: &str) -> Result<PathBuf, SessionError> {
        let uuid = Uuid::parse_str(token.trim())
            .map_err(|_| SessionError::InvalidToken(token.to_string()))?;
        Ok(self.dir.join(format!("{uuid}.json")))
    }
}

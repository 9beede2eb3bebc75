//! Durable store: one JSON document per board plus a mirrored backup.
//!
//! DESIGN
//! ======
//! `<dir>/<board_id>.json` holds the `Board` aggregate verbatim.
//! `<dir>/<board_id>.backup.json` is rewritten after every successful primary
//! write. Both writes go through a temp file and a rename so a crash mid-write
//! never leaves a truncated document behind. Every write gets its own temp
//! name, so overlapping saves of one board never share a temp file; the last
//! rename wins.
//!
//! ERROR HANDLING
//! ==============
//! Loading prefers the primary. If the primary is missing or fails to parse,
//! the backup is tried before giving up. Board ids are validated before they
//! are used as file names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::Board;

const PRIMARY_EXT: &str = "json";
const BACKUP_EXT: &str = "backup.json";
const TEMP_EXT: &str = "tmp";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid board id: {0:?}")]
    InvalidBoardId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed board document: {0}")]
    Json(#[from] serde_json::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBoardId(_) => "E_INVALID_BOARD_ID",
            Self::Io(_) => "E_IO",
            Self::Json(_) => "E_MALFORMED_BOARD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Board ids become file names: ASCII alphanumerics, `-` and `_` only.
#[must_use]
pub fn is_valid_board_id(board_id: &str) -> bool {
    !board_id.is_empty()
        && board_id.len() <= 128
        && board_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Filesystem-backed board storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct BoardStore {
    dir: Arc<PathBuf>,
}

impl BoardStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Arc::new(dir.into()) }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, board_id: &str, ext: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_board_id(board_id) {
            return Err(StoreError::InvalidBoardId(board_id.to_owned()));
        }
        Ok(self.dir.join(format!("{board_id}.{ext}")))
    }

    /// Primary document path for a board.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBoardId` if the id cannot be used as a file name.
    pub fn primary_path(&self, board_id: &str) -> Result<PathBuf, StoreError> {
        self.path_for(board_id, PRIMARY_EXT)
    }

    /// Backup document path for a board.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBoardId` if the id cannot be used as a file name.
    pub fn backup_path(&self, board_id: &str) -> Result<PathBuf, StoreError> {
        self.path_for(board_id, BACKUP_EXT)
    }

    /// Load a board. `Ok(None)` means neither file exists.
    ///
    /// # Errors
    ///
    /// Returns `Json` when the primary and the backup are both unreadable,
    /// or `Io` for filesystem failures other than a missing file.
    pub async fn load(&self, board_id: &str) -> Result<Option<Board>, StoreError> {
        let primary = self.primary_path(board_id)?;
        let backup = self.backup_path(board_id)?;

        let primary_err = match read_board(&primary).await {
            Ok(Some(board)) => return Ok(Some(board)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, path = %primary.display(), "primary board file unreadable; trying backup");
                Some(e)
            }
        };

        match read_board(&backup).await {
            Ok(Some(board)) => {
                warn!(%board_id, "recovered board from backup");
                Ok(Some(board))
            }
            Ok(None) => match primary_err {
                Some(e) => Err(e),
                None => Ok(None),
            },
            Err(backup_err) => Err(primary_err.unwrap_or(backup_err)),
        }
    }

    /// Write the primary document, then mirror it into the backup.
    ///
    /// # Errors
    ///
    /// Returns `Io` if either write fails; the backup is left untouched when
    /// the primary write fails.
    pub async fn save(&self, board_id: &str, board: &Board) -> Result<(), StoreError> {
        let primary = self.primary_path(board_id)?;
        let backup = self.backup_path(board_id)?;
        let bytes = serde_json::to_vec_pretty(board)?;

        tokio::fs::create_dir_all(self.dir.as_path()).await?;
        atomic_write(&primary, &bytes).await?;
        atomic_write(&backup, &bytes).await?;

        debug!(%board_id, bytes = bytes.len(), "board saved");
        Ok(())
    }
}

async fn read_board(path: &Path) -> Result<Option<Board>, StoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

/// Write to a uniquely named sibling temp file, fsync, then rename over the
/// target.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let tmp_path = path.with_extension(format!("{}.{TEMP_EXT}", Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

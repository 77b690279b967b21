//! Text file access on behalf of the agent.

use std::path::Path;

use tracing::debug;

use crate::protocol::client_ops::{ReadTextFileParams, WriteTextFileParams};
use crate::{AppError, Result};

/// Return lines `[line, line + limit)` of `content`, 1-based.
///
/// `line` defaults to 1 and `limit` to "to the end". Line terminators are
/// preserved.
#[must_use]
pub fn slice_lines(content: &str, line: Option<u32>, limit: Option<u32>) -> String {
    if line.is_none() && limit.is_none() {
        return content.to_owned();
    }

    let skip = line.map_or(0, |l| l.saturating_sub(1) as usize);
    let take = limit.map_or(usize::MAX, |l| l as usize);
    content
        .split_inclusive('\n')
        .skip(skip)
        .take(take)
        .collect()
}

/// Read a text file, optionally windowed by line.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if the file does not exist and
/// [`AppError::Io`] for any other read failure.
pub async fn read_text_file(params: &ReadTextFileParams) -> Result<String> {
    let content = tokio::fs::read_to_string(&params.path)
        .await
        .map_err(|err| map_io(&params.path, &err))?;
    debug!(path = %params.path.display(), line = ?params.line, limit = ?params.limit, "read text file");
    Ok(slice_lines(&content, params.line, params.limit))
}

/// Write a text file, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`AppError::Io`] if a directory or the file cannot be written.
pub async fn write_text_file(params: &WriteTextFileParams) -> Result<()> {
    if let Some(parent) = params.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| map_io(parent, &err))?;
    }
    tokio::fs::write(&params.path, params.content.as_bytes())
        .await
        .map_err(|err| map_io(&params.path, &err))?;
    debug!(path = %params.path.display(), bytes = params.content.len(), "wrote text file");
    Ok(())
}

fn map_io(path: &Path, err: &std::io::Error) -> AppError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound(format!("{}: {err}", path.display()))
    } else {
        AppError::Io(format!("{}: {err}", path.display()))
    }
}

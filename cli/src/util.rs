use std::future::Future;
use std::path::PathBuf;

use anyhow::{Error, Result};
use tokio::{
    fs::{create_dir_all, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;

fn token_path() -> Result<PathBuf> {
    let dirs = match directories::ProjectDirs::from("", "", "hearth") {
        Some(dirs) => dirs,
        None => return Err(Error::msg("couldn't access default directory on system")),
    };
    Ok(dirs.config_dir().join("token"))
}

/// Stores provided token in the target location where it can be read.
pub async fn store_token(token: &str) -> Result<()> {
    let path = token_path()?;
    if let Some(dir) = path.parent() {
        create_dir_all(dir).await?;
    }

    let mut file = File::create(&path).await?;
    file.write_all(token.trim().as_bytes()).await?;

    Ok(())
}

pub async fn retrieve_token() -> Result<String> {
    let path = token_path()?;
    let mut file = File::open(&path)
        .await
        .map_err(|_| Error::msg("token not found, log in first"))?;

    let mut token = String::new();
    file.read_to_string(&mut token).await?;
    Ok(token.trim().to_string())
}

/// Removes the stored token. Returns false if there was none.
pub async fn remove_token() -> Result<bool> {
    match tokio::fs::remove_file(token_path()?).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Runs `fut` unless the token fires first.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(Error::msg("cancelled")),
    }
}

/// Puts the user facing message of a library error in front of its details.
pub fn explain(e: hearth::Error) -> Error {
    let message = e.user_message();
    Error::new(e).context(message)
}

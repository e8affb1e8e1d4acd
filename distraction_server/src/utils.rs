//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory where downloaded models are kept.
pub fn model_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("distraction_server"))
}

/// Find a model file, downloading it into the cache directory if allowed.
///
/// An existing `path` always wins. Without a `url` a missing file is an error.
pub async fn resolve_model_path(path: &Path, url: Option<&str>) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_owned());
    }

    let Some(url) = url else {
        bail!(
            "model file {} not found, ensure it is in the correct location",
            path.display()
        );
    };

    let cache_dir = model_cache_dir().context("no cache directory available")?;
    let file_name = path
        .file_name()
        .with_context(|| format!("{} is not a file path", path.display()))?;
    let cached_path = cache_dir.join(file_name);
    if cached_path.exists() {
        log::debug!("Using cached model {}", cached_path.display());
        return Ok(cached_path);
    }

    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create {}", cache_dir.display()))?;

    log::info!("Downloading model from {url} to {}", cached_path.display());
    let partial_path = cached_path.with_extension("part");
    download_file(&Client::new(), url, &partial_path)
        .await
        .with_context(|| format!("failed to download {url}"))?;
    std::fs::rename(&partial_path, &cached_path)?;

    Ok(cached_path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_existing_path_is_used() -> Result<()> {
        let path = std::env::temp_dir().join(format!("model-test-{}.onnx", std::process::id()));
        std::fs::write(&path, b"onnx")?;

        let resolved = resolve_model_path(&path, Some("http://127.0.0.1:9/never")).await?;
        assert_eq!(resolved, path);

        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_path_without_url_is_an_error() {
        let path = Path::new("definitely-missing-face-model.onnx");
        let err = resolve_model_path(path, None).await.unwrap_err();
        assert!(err.to_string().contains("definitely-missing-face-model.onnx"));
    }
}

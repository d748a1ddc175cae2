use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    client::MlflowClient,
    error::{Result, TrackingError},
};

pub trait ArtifactStore: Send + Sync {
    fn log_artifact(&self, local_file: &Path, artifact_path: &str) -> Result<()>;

    /// Stores a directory tree so that `local_dir/a/b` lands at `artifact_path/a/b`.
    fn log_artifacts(&self, local_dir: &Path, artifact_path: &str) -> Result<()> {
        for file in list_files(local_dir)? {
            let parent = file
                .parent()
                .and_then(|p| p.strip_prefix(local_dir).ok())
                .map(relative_to_artifact_path)
                .unwrap_or_default();
            self.log_artifact(&file, &join_artifact_path(&[artifact_path, &parent]))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn log_artifact(&self, local_file: &Path, artifact_path: &str) -> Result<()> {
        let dir = artifact_path
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |dir, part| dir.join(part));
        fs::create_dir_all(&dir).map_err(|e| TrackingError::io(&dir, e))?;
        let name = file_name(local_file)?;
        let dest = dir.join(name);
        fs::copy(local_file, &dest).map_err(|e| TrackingError::io(local_file, e))?;
        debug!(src = %local_file.display(), dest = %dest.display(), "copied artifact");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ProxyArtifactStore {
    client: MlflowClient,
    base_url: String,
}

impl ProxyArtifactStore {
    pub fn new(client: MlflowClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn proxied(client: MlflowClient, path: &str) -> Self {
        let base_url = client.artifacts_url(path);
        Self::new(client, base_url)
    }

    pub fn file_url(&self, artifact_path: &str, name: &str) -> String {
        let rel = join_artifact_path(&[artifact_path, name]);
        format!("{}/{}", self.base_url, rel)
    }
}

impl ArtifactStore for ProxyArtifactStore {
    fn log_artifact(&self, local_file: &Path, artifact_path: &str) -> Result<()> {
        let bytes = fs::read(local_file).map_err(|e| TrackingError::io(local_file, e))?;
        let url = self.file_url(artifact_path, file_name(local_file)?);
        self.client.put_bytes(&url, bytes)
    }
}

pub fn store_for(client: &MlflowClient, artifact_uri: &str) -> Result<Box<dyn ArtifactStore>> {
    if let Some(rest) = artifact_uri.strip_prefix("mlflow-artifacts:") {
        // `mlflow-artifacts://host:port/path` names a server; uploads still go
        // through the tracking server we talk to.
        let path = match rest.strip_prefix("//") {
            Some(authority_path) => authority_path
                .find('/')
                .map_or("", |at| &authority_path[at..]),
            None => rest,
        };
        return Ok(Box::new(ProxyArtifactStore::proxied(client.clone(), path)));
    }
    if artifact_uri.starts_with("http://") || artifact_uri.starts_with("https://") {
        return Ok(Box::new(ProxyArtifactStore::new(client.clone(), artifact_uri)));
    }
    if let Some(path) = artifact_uri.strip_prefix("file://") {
        let path = path.strip_prefix("localhost").unwrap_or(path);
        return Ok(Box::new(LocalArtifactStore::new(path)));
    }
    if Path::new(artifact_uri).is_absolute() {
        return Ok(Box::new(LocalArtifactStore::new(artifact_uri)));
    }
    Err(TrackingError::UnsupportedArtifactUri(artifact_uri.to_string()))
}

pub fn join_artifact_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn relative_to_artifact_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        TrackingError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file name"),
        )
    })
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| TrackingError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| TrackingError::io(&dir, e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

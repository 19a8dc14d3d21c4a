// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

// Node configuration loaded from YAML or JSON, by file extension.
pub trait Config: Serialize + DeserializeOwned {
    fn persisted(self, path: &Path) -> PersistedConfig<Self>
    where
        Self: Sized,
    {
        PersistedConfig {
            inner: self,
            path: path.to_path_buf(),
        }
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

pub struct PersistedConfig<C> {
    inner: C,
    path: PathBuf,
}

impl<C: Config> PersistedConfig<C> {
    pub fn read(&self) -> Result<C> {
        C::load(&self.path)
    }

    pub fn save(&self) -> Result<()> {
        self.inner.save(&self.path)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

/// Header and version pair identifying the layout of a persisted JSON file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub header: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    header: &'a str,
    version: &'a str,
    #[serde(flatten)]
    data: &'a T,
}

#[derive(Deserialize)]
struct Versioned<T> {
    header: String,
    version: String,
    #[serde(flatten)]
    data: T,
}

/// Writes `data` to `path` wrapped in the metadata header. The file is
/// replaced atomically, so a crash mid-write leaves the previous content.
pub fn save_json<T: Serialize>(meta: Metadata, data: &T, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let content = serde_json::to_vec_pretty(&VersionedRef {
        header: meta.header,
        version: meta.version,
        data,
    })?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(&content)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .map_err(|e| anyhow!("failed to persist {}: {}", path.display(), e.error))?;
    tracing::debug!("Saved {} to {}", meta.header, path.display());
    Ok(())
}

/// Reads a file written by [`save_json`], rejecting a mismatched header or version.
pub fn load_json<T: DeserializeOwned>(meta: Metadata, path: &Path) -> Result<T> {
    let content = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let versioned: Versioned<T> = serde_json::from_slice(&content)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    if versioned.header != meta.header {
        return Err(anyhow!(
            "wrong header in {}: expected {:?}, found {:?}",
            path.display(),
            meta.header,
            versioned.header
        ));
    }
    if versioned.version != meta.version {
        return Err(anyhow!(
            "wrong version in {}: expected {:?}, found {:?}",
            path.display(),
            meta.version,
            versioned.version
        ));
    }
    Ok(versioned.data)
}

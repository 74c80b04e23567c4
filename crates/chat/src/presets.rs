//! Preset files on disk and the `role: text` entries they contain.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    parley_config::PresetConfig,
    parley_service_traits::{PresetError, PresetStore},
    tracing::{debug, warn},
};

/// Presets registered from configured keywords and a scanned directory.
#[derive(Debug, Clone, Default)]
pub struct DirPresetStore {
    files: BTreeMap<String, PathBuf>,
}

impl DirPresetStore {
    /// Register every `*.txt` in `scan_dir` under its file stem, then the
    /// configured keywords, which replace scanned entries of the same name.
    #[must_use]
    pub fn from_config(config: &PresetConfig) -> Self {
        let mut store = Self::scan(Path::new(&config.scan_dir));
        for (keyword, path) in &config.keywords {
            store.files.insert(keyword.clone(), PathBuf::from(path));
        }
        store
    }

    #[must_use]
    pub fn scan(dir: &Path) -> Self {
        let mut files = BTreeMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "preset directory not readable");
                return Self { files };
            },
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                files.insert(stem.to_string(), path.clone());
            }
        }
        debug!(dir = %dir.display(), count = files.len(), "scanned presets");
        Self { files }
    }

    #[must_use]
    pub fn path(&self, keyword: &str) -> Option<&Path> {
        self.files.get(keyword).map(PathBuf::as_path)
    }
}

/// Split preset text into entries on blank lines.
#[must_use]
pub fn split_entries(content: &str) -> Vec<String> {
    content
        .replace("<|im_end|>", "")
        .replace('\r', "")
        .split("\n\n")
        .map(str::to_string)
        .collect()
}

/// One scripted line of a preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetEntry {
    pub role: String,
    pub text: String,
}

impl PresetEntry {
    /// Parse `role: text`. Comments (`#`) and blank entries yield `None`;
    /// an entry without a colon is a system line.
    #[must_use]
    pub fn parse(entry: &str) -> Option<Self> {
        if entry.trim().is_empty() || entry.starts_with('#') {
            return None;
        }
        let (role, text) = entry.split_once(':').unwrap_or(("system", entry));
        Some(Self {
            role: role.trim().to_lowercase(),
            text: text.trim().to_string(),
        })
    }
}

#[async_trait]
impl PresetStore for DirPresetStore {
    async fn load_preset(&self, keyword: &str) -> Result<Vec<String>, PresetError> {
        let path = self
            .files
            .get(keyword)
            .ok_or_else(|| PresetError::NotFound(keyword.to_string()))?;
        let content = tokio::fs::read(path).await.map_err(|source| {
            warn!(keyword, path = %path.display(), error = %source, "failed to read preset");
            PresetError::Io {
                keyword: keyword.to_string(),
                source,
            }
        })?;
        Ok(split_entries(&String::from_utf8_lossy(&content)))
    }

    fn keywords(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

//! Locating `config.json` and `model.safetensors` for a pretrained encoder,
//! either in a local directory or through the Hugging Face Hub cache.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;

use crate::error::{ActaError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Paths of the files needed to build an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Resolve model files for `model_name_or_path`.
///
/// A local directory is used as is. Anything else is treated as a hub id and
/// downloaded into `cache_dir` (or the default hub cache). When
/// `config_name_or_path` is given, `config.json` comes from there instead; it
/// may also point straight at a JSON file.
pub fn resolve_model_files(
    model_name_or_path: &str,
    config_name_or_path: Option<&str>,
    cache_dir: Option<&Path>,
) -> Result<ModelFiles> {
    let weights = resolve_file(model_name_or_path, WEIGHTS_FILE, cache_dir)?;
    let config_source = config_name_or_path.unwrap_or(model_name_or_path);
    let config = if Path::new(config_source).is_file() {
        PathBuf::from(config_source)
    } else {
        resolve_file(config_source, CONFIG_FILE, cache_dir)?
    };
    tracing::debug!(config = %config.display(), weights = %weights.display(), "resolved model files");
    Ok(ModelFiles { config, weights })
}

fn resolve_file(name_or_path: &str, file: &str, cache_dir: Option<&Path>) -> Result<PathBuf> {
    let local = Path::new(name_or_path);
    if local.is_dir() {
        let path = local.join(file);
        if !path.is_file() {
            return Err(ActaError::ModelLoad(format!(
                "{} has no {file}",
                local.display()
            )));
        }
        return Ok(path);
    }

    let mut builder = ApiBuilder::new().with_progress(false);
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.to_path_buf());
    }
    let api = builder
        .build()
        .map_err(|e| ActaError::ModelLoad(format!("failed to initialize hub client: {e}")))?;
    api.model(name_or_path.to_string())
        .get(file)
        .map_err(|e| ActaError::ModelLoad(format!("failed to fetch {file} for {name_or_path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("acta-hub-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_local_directory() {
        let dir = scratch_dir("local");
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.join(WEIGHTS_FILE), b"").unwrap();

        let files = resolve_model_files(dir.to_str().unwrap(), None, None).unwrap();
        assert_eq!(files.config, dir.join(CONFIG_FILE));
        assert_eq!(files.weights, dir.join(WEIGHTS_FILE));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_separate_config_file() {
        let dir = scratch_dir("separate");
        std::fs::write(dir.join(WEIGHTS_FILE), b"").unwrap();
        let config = dir.join("tagger-config.json");
        std::fs::write(&config, "{}").unwrap();

        let files =
            resolve_model_files(dir.to_str().unwrap(), Some(config.to_str().unwrap()), None)
                .unwrap();
        assert_eq!(files.config, config);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_local_directory_missing_weights() {
        let dir = scratch_dir("missing");
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();

        let err = resolve_model_files(dir.to_str().unwrap(), None, None).unwrap_err();
        assert!(matches!(err, ActaError::ModelLoad(msg) if msg.contains(WEIGHTS_FILE)));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

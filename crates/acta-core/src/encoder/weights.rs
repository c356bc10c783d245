//! Copying a safetensors checkpoint into the variables of a [`VarMap`].
//!
//! Layers are created first with fresh initial values, then overwritten from
//! the checkpoint. Variables the checkpoint does not cover keep their fresh
//! values and are reported, which is the normal case for the projection, GRU
//! and CRF heads when starting from a base encoder.

use std::path::Path;

use candle_core::Device;
use candle_core::safetensors::Load;
use candle_nn::VarMap;
use safetensors::SafeTensors;

use crate::error::{ActaError, Result};

/// Outcome of [`load_checkpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of variables overwritten from the checkpoint.
    pub loaded: usize,
    /// Variables left at their initial values, sorted by name.
    pub initialized: Vec<String>,
    /// Checkpoint tensors with no matching variable, sorted by name.
    pub unused: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.initialized.is_empty()
    }
}

/// Older BERT checkpoints store LayerNorm parameters as `gamma` and `beta`.
fn legacy_layer_norm_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".gamma") {
        format!("{stem}.weight")
    } else if let Some(stem) = name.strip_suffix(".beta") {
        format!("{stem}.bias")
    } else {
        name.to_string()
    }
}

/// Load `path` into `varmap`.
///
/// A checkpoint name matches a variable either as is or after removing one of
/// `strip_prefixes`, so `bert.encoder.layer.0...` from a task checkpoint fills
/// `encoder.layer.0...`. Trailing `gamma`/`beta` are read as `weight`/`bias`.
pub fn load_checkpoint(
    varmap: &VarMap,
    path: impl AsRef<Path>,
    strip_prefixes: &[&str],
    device: &Device,
) -> Result<LoadReport> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let checkpoint = SafeTensors::deserialize(&bytes)
        .map_err(|e| ActaError::ModelLoad(format!("{}: {e}", path.display())))?;

    let data = varmap
        .data()
        .lock()
        .map_err(|_| ActaError::ModelLoad("variable store lock poisoned".into()))?;

    let mut loaded_names = Vec::new();
    let mut unused = Vec::new();
    for (name, view) in checkpoint.tensors() {
        let renamed = legacy_layer_norm_name(&name);
        let target = if data.contains_key(renamed.as_str()) {
            Some(renamed.clone())
        } else {
            strip_prefixes
                .iter()
                .filter_map(|prefix| renamed.strip_prefix(prefix))
                .find(|stripped| data.contains_key(*stripped))
                .map(str::to_string)
        };
        let Some(target) = target else {
            unused.push(name);
            continue;
        };

        let var = &data[&target];
        if view.shape() != var.dims() {
            let err = if target.starts_with("classifier.") {
                ActaError::LabelCountMismatch {
                    expected: var.dims()[0],
                    found: view.shape()[0],
                }
            } else {
                ActaError::ModelLoad(format!(
                    "{name}: checkpoint shape {:?} does not match {:?}",
                    view.shape(),
                    var.dims()
                ))
            };
            return Err(err);
        }
        let tensor = view.load(device)?.to_dtype(var.dtype())?;
        var.set(&tensor)?;
        loaded_names.push(target);
    }

    let mut initialized: Vec<String> = data
        .keys()
        .filter(|name| !loaded_names.contains(*name))
        .cloned()
        .collect();
    initialized.sort();
    unused.sort();

    tracing::info!(
        checkpoint = %path.display(),
        loaded = loaded_names.len(),
        initialized = initialized.len(),
        unused = unused.len(),
        "loaded checkpoint"
    );
    if !initialized.is_empty() {
        tracing::warn!(
            names = ?initialized,
            "some weights were not in the checkpoint and are newly initialized"
        );
    }
    if !unused.is_empty() {
        tracing::debug!(names = ?unused, "checkpoint tensors without a matching variable");
    }

    Ok(LoadReport {
        loaded: loaded_names.len(),
        initialized,
        unused,
    })
}

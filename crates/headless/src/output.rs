//! Writing placed layers out as PNG files.

use std::path::{Path, PathBuf};

use cyanic_core::document::MemoryDocument;
use cyanic_core::error::CoreError;
use cyanic_core::imaging::{encode_png, Pixels};
use cyanic_core::types::LayerId;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Layer {0} has no pixels")]
    Empty(LayerId),

    #[error("Layer {0} no longer exists")]
    Missing(LayerId),

    #[error(transparent)]
    Encode(#[from] CoreError),

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Write each layer to `<dir>/<n>-<name>.png`, numbered from 1 in the
/// given order. Returns the files written.
pub fn write_layers(document: &MemoryDocument, layers: &[LayerId], dir: &Path) -> Result<Vec<PathBuf>, OutputError> {
    std::fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(layers.len());
    for (index, &id) in layers.iter().enumerate() {
        let layer = document.layer(id).ok_or(OutputError::Missing(id))?;
        let (region, rgba) = layer.pixels.as_ref().ok_or(OutputError::Empty(id))?;
        let png = encode_png(&Pixels {
            size: region.size(),
            rgba: rgba.clone(),
        })?;

        let path = dir.join(format!("{}-{}.png", index + 1, file_stem(&layer.name)));
        std::fs::write(&path, png).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), layer = %id, "Wrote layer");
        written.push(path);
    }
    Ok(written)
}

/// Layer names like `Seed: 1234` made safe for a file name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "layer".to_string()
    } else {
        stem.to_string()
    }
}

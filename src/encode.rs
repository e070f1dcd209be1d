//! Turns a directory of keyframes into a corpus directory.
//!
//! Images are encoded in file name order and written as numbered vector
//! files, so image `n` of the sorted listing becomes corpus item `n - 1`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use crate::corpus::VectorFile;
use crate::embeddings::EmbeddingProvider;
use crate::storage::{BackendLocal, StorageManager};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

/// Image files of `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Encode every image of `images` into `out`. Returns the number of items.
///
/// Any unreadable image aborts the run; skipping it would shift the ids of
/// every later item.
pub fn encode_dir(
    provider: &dyn EmbeddingProvider,
    images: &Path,
    out: &Path,
    show_progress: bool,
) -> anyhow::Result<usize> {
    let files = list_images(images)
        .with_context(|| format!("Failed to list images in {}", images.display()))?;
    if files.is_empty() {
        anyhow::bail!("No images found in {}", images.display());
    }

    let store = BackendLocal::new(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let model_id = provider.model_id_hash();
    let total = files.len();

    log::info!(
        "encoding {total} images from {} into {}",
        images.display(),
        out.display()
    );

    let progress = if show_progress {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}] {msg}")?
                .progress_chars("=> "),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    for (idx, path) in files.iter().enumerate() {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let embedding = provider
            .encode_image(&bytes)
            .with_context(|| format!("Failed to encode {}", path.display()))?;

        let file = VectorFile::new(model_id, embedding);
        store.write(&VectorFile::file_name(idx + 1, total), &file.encode())?;

        progress.inc(1);
    }

    progress.finish_with_message("done");
    Ok(total)
}

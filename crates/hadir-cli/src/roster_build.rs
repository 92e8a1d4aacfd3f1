//! Roster snapshot builder.
//!
//! Walks `dataset/<name>/*.{jpg,jpeg,png}`, runs every image through the
//! same fallback extraction chain the daemon uses, averages the samples
//! into one reference embedding per identity, and writes the JSON
//! snapshot the daemon loads.

use std::path::{Path, PathBuf};

use anyhow::Context;
use hadir_core::pipeline::FacePipeline;
use hadir_core::{Embedding, FallbackExtractor, RosterEntry};

pub struct BuildOptions {
    pub dataset_dir: PathBuf,
    pub output_path: PathBuf,
    pub model_dir: PathBuf,
}

pub fn run(options: &BuildOptions) -> anyhow::Result<()> {
    let pipeline = FacePipeline::load_from_dir(&options.model_dir)?;
    let mut extractor = FallbackExtractor::new(pipeline);

    let mut person_dirs: Vec<PathBuf> = std::fs::read_dir(&options.dataset_dir)
        .with_context(|| format!("dataset directory {}", options.dataset_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    person_dirs.sort();

    let mut entries: Vec<RosterEntry> = Vec::new();

    for person_dir in person_dirs {
        let Some(name) = person_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let mut image_paths: Vec<PathBuf> = std::fs::read_dir(&person_dir)
            .with_context(|| format!("person directory {}", person_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_image_file(path))
            .collect();
        image_paths.sort();

        let mut samples: Vec<Embedding> = Vec::new();
        let mut failed = 0usize;

        for path in &image_paths {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "image not readable, skipped");
                    failed += 1;
                    continue;
                }
            };
            match extractor.extract(&bytes) {
                Ok(embedding) => samples.push(embedding),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "no embedding for sample");
                    failed += 1;
                }
            }
        }

        match Embedding::mean(&samples) {
            Some(reference) => {
                tracing::info!(
                    %name,
                    samples = samples.len(),
                    failed,
                    total = image_paths.len(),
                    "reference embedding built"
                );
                entries.push(RosterEntry {
                    name,
                    embedding: reference,
                });
            }
            None => {
                tracing::warn!(%name, failed, "no usable samples, identity skipped");
            }
        }
    }

    anyhow::ensure!(
        !entries.is_empty(),
        "no identity produced a reference embedding; check the dataset and model files"
    );

    let json = serde_json::to_vec_pretty(&entries)?;
    std::fs::write(&options.output_path, json)
        .with_context(|| format!("writing {}", options.output_path.display()))?;

    tracing::info!(
        identities = entries.len(),
        path = %options.output_path.display(),
        "roster snapshot written"
    );
    Ok(())
}

fn is_image_file(path: &Path) -> bool {
    path.is_file() && has_image_extension(path)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extensions_accepted() {
        for name in ["a.jpg", "b.JPEG", "c.png"] {
            assert!(has_image_extension(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn test_non_image_extensions_rejected() {
        for name in ["d.txt", "e", "f.bmp", "g.onnx"] {
            assert!(!has_image_extension(Path::new(name)), "{name}");
        }
    }
}

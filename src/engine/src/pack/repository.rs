//! Repacking of a whole image: merge its layers, re-split them, and rebuild
//! the repository around the new layers.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ocipack_core::config::RepackConfig;
use ocipack_core::error::{PackError, Result};
use tempfile::TempDir;

use super::packer::OciLayerPacker;
use super::tar_writer::WrittenTarInfo;
use super::unpack::OciLayerUnpacker;
use crate::oci::builder::{BuiltOciRepository, OciRepositoryBuilder};
use crate::oci::data::{OciImageLayer, OciImageLayerKind};
use crate::oci::data_ref::DataRef;
use crate::oci::digest::SHA256_PREFIX;
use crate::oci::loader::load_root_index;
use crate::oci::repository::FileOciRepository;

/// A repacked repository and the files backing its new layers.
#[derive(Debug)]
pub struct PackedOciRepository {
    pub built: BuiltOciRepository,
    /// Output layer tars in application order, with their totals. Outputs
    /// left empty after the first are dropped.
    pub outputs: Vec<(PathBuf, WrittenTarInfo)>,
    /// Per-build scratch directory holding the new layers; removed on drop
    scratch: TempDir,
}

impl PackedOciRepository {
    /// Directory holding the output layer tars.
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }
}

/// Repacks the single image of a repository into
/// `config.num_output_files` layers.
pub struct PackedRepositoryBuilder<R: FileOciRepository + ?Sized> {
    repo: Arc<R>,
    config: RepackConfig,
}

impl<R: FileOciRepository + ?Sized + 'static> PackedRepositoryBuilder<R> {
    pub fn new(repo: Arc<R>, config: RepackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { repo, config })
    }

    /// Run the repack on the blocking thread pool.
    pub async fn build_in_background(self) -> Result<PackedOciRepository> {
        tokio::task::spawn_blocking(move || self.build())
            .await
            .map_err(|e| PackError::Other(format!("Repack task failed: {}", e)))?
    }

    /// Run the repack on the current thread.
    pub fn build(&self) -> Result<PackedOciRepository> {
        // One directory per build, inside scratch_dir when configured
        let scratch = match &self.config.scratch_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| PackError::io_context(dir.display(), e))?;
                tempfile::Builder::new()
                    .prefix("repack-")
                    .tempdir_in(dir)
                    .map_err(|e| PackError::io_context(dir.display(), e))?
            }
            None => tempfile::Builder::new()
                .prefix("repack-")
                .tempdir()
                .map_err(|e| PackError::io_context("creating scratch directory", e))?,
        };
        let work_dir = scratch.path().to_path_buf();

        let mut index = load_root_index(&*self.repo)?;
        let manifest = index.single_manifest_mut()?;

        tracing::info!(
            layers = manifest.layers.len(),
            outputs = self.config.num_output_files,
            compression = ?self.config.compression,
            "Repacking image"
        );

        let mut materialized = Vec::with_capacity(manifest.layers.len());
        let mut copies = Vec::new();
        for (i, layer) in manifest.layers.iter().enumerate() {
            match layer.data.as_file_path() {
                Some(path) => materialized.push(path.to_path_buf()),
                None => {
                    let path = work_dir.join(format!("input-{}.tar", i));
                    copy_to_file(&layer.data, &path)?;
                    materialized.push(path.clone());
                    copies.push(path);
                }
            }
        }

        let merged = work_dir.join("merged.tar");
        OciLayerUnpacker::new(materialized, &merged)
            .with_scratch_dir(&work_dir)
            .write()?;
        remove_scratch_files(&copies);

        let extension = self
            .config
            .compression
            .map(|c| c.file_extension())
            .unwrap_or("tar");
        let output_paths = (0..self.config.num_output_files)
            .map(|i| work_dir.join(format!("packed-{}.{}", i, extension)))
            .collect();

        let packed = OciLayerPacker::new(&merged, output_paths)
            .with_compression(self.config.compression, self.config.effective_level())
            .write()?;
        remove_scratch_files(std::slice::from_ref(&merged));

        // Empty outputs would all share one digest; only the first is kept
        let (outputs, empty): (Vec<_>, Vec<_>) = packed
            .into_iter()
            .enumerate()
            .partition(|(i, (_, info))| *i == 0 || info.entry_count > 0);
        let outputs: Vec<_> = outputs.into_iter().map(|(_, output)| output).collect();
        if !empty.is_empty() {
            tracing::debug!(dropped = empty.len(), "Dropping empty output layers");
            let paths: Vec<PathBuf> = empty.into_iter().map(|(_, (path, _))| path).collect();
            remove_scratch_files(&paths);
        }

        let kind = OciImageLayerKind::from_compression(self.config.compression);
        manifest.config.history = None;
        manifest.config.rootfs.diff_ids = outputs
            .iter()
            .map(|(_, info)| format!("{}{}", SHA256_PREFIX, info.uncompressed_sha256))
            .collect();
        manifest.layers = outputs
            .iter()
            .map(|(path, _)| OciImageLayer {
                kind,
                data: DataRef::from_path(path),
            })
            .collect();

        let built = OciRepositoryBuilder::new().build_index_repository(&index)?;

        tracing::info!(
            root = %built.media_index_descriptor.digest,
            layers = outputs.len(),
            "Repacked image"
        );

        Ok(PackedOciRepository {
            built,
            outputs,
            scratch,
        })
    }
}

fn copy_to_file(data: &DataRef, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| PackError::io_context(path.display(), e))?;
    let mut out = BufWriter::new(file);
    io::copy(&mut data.open()?, &mut out).map_err(|e| PackError::io_context(path.display(), e))?;
    out.flush()
        .map_err(|e| PackError::io_context(path.display(), e))?;

    tracing::debug!(path = %path.display(), "Materialized layer");
    Ok(())
}

fn remove_scratch_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}

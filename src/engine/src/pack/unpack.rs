//! Merging of stacked layer tars into one tar.
//!
//! Layers are applied bottom first onto a virtual directory tree. Whiteout
//! entries (`.wh.<name>`) delete a sibling from the layers below; each layer's
//! whiteouts are applied after its own entries are in place. The surviving
//! tree is written out depth first in name order, a directory's own entry
//! before its children.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use ocipack_core::error::{PackError, Result};
use tempfile::NamedTempFile;

use super::tar_writer::{OciDataTarWriter, WrittenTarInfo};
use crate::archive::{decompressor, detect_compression, scan_members, split_name, TarMember};

/// Basename prefix of a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Basename marking its directory opaque.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// An input layer opened for positional reads.
struct LayerSource {
    label: String,
    file: File,
    /// Decompressed copy backing `file`, removed on drop
    _scratch: Option<NamedTempFile>,
}

impl LayerSource {
    fn open(path: &Path, scratch_dir: Option<&Path>) -> Result<Self> {
        let label = path.display().to_string();
        let file = File::open(path).map_err(|e| PackError::io_context(&label, e))?;

        let compression =
            detect_compression(&file).map_err(|e| PackError::io_context(&label, e))?;
        let Some(compression) = compression else {
            return Ok(Self {
                label,
                file,
                _scratch: None,
            });
        };

        let mut scratch = match scratch_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| PackError::io_context("creating scratch file", e))?;

        let mut reader =
            decompressor(&file, Some(compression)).map_err(|e| PackError::io_context(&label, e))?;
        io::copy(&mut reader, scratch.as_file_mut())
            .map_err(|e| PackError::io_context(format!("decompressing {}", label), e))?;

        tracing::debug!(layer = %label, %compression, "Decompressed layer to scratch file");

        let file = scratch
            .reopen()
            .map_err(|e| PackError::io_context(scratch.path().display(), e))?;
        Ok(Self {
            label,
            file,
            _scratch: Some(scratch),
        })
    }
}

/// A surviving entry and the layer it came from.
struct MergedEntry {
    source: usize,
    member: TarMember,
}

/// A node of the merged tree.
#[derive(Debug, Default)]
struct Node {
    /// Entry for this path itself; `None` for implicit directories
    entry: Option<usize>,
    children: BTreeMap<String, Node>,
}

impl Node {
    /// Walk to the directory `dir`, creating implicit directories and
    /// replacing non-directory entries found on the way.
    fn dir_mut<'a>(&'a mut self, dir: &str, entries: &[MergedEntry]) -> &'a mut Node {
        let mut cur = self;
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            let node = cur.children.entry(part.to_string()).or_default();
            if let Some(idx) = node.entry {
                if !entries[idx].member.is_dir() {
                    *node = Node::default();
                }
            }
            cur = node;
        }
        cur
    }

    fn find_dir_mut(&mut self, dir: &str) -> Option<&mut Node> {
        let mut cur = self;
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            cur = cur.children.get_mut(part)?;
        }
        Some(cur)
    }

    fn flatten(&self, out: &mut Vec<usize>) {
        for child in self.children.values() {
            if let Some(idx) = child.entry {
                out.push(idx);
            }
            child.flatten(out);
        }
    }
}

/// Merges stacked layer tars, bottom layer first, into one uncompressed tar.
pub struct OciLayerUnpacker {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl OciLayerUnpacker {
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output: output.into(),
            scratch_dir: None,
        }
    }

    /// Directory for decompressed copies of compressed inputs.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Merge the inputs and write the output tar.
    pub fn write(&self) -> Result<WrittenTarInfo> {
        let sources = self
            .inputs
            .iter()
            .map(|path| LayerSource::open(path, self.scratch_dir.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let mut entries: Vec<MergedEntry> = Vec::new();
        let mut root = Node::default();

        for (source_idx, source) in sources.iter().enumerate() {
            let mut members = scan_members(&source.file, &source.label)?;
            members.sort_by(|a, b| a.name.cmp(&b.name));

            if let Some(pair) = members.windows(2).find(|w| w[0].name == w[1].name) {
                return Err(PackError::MalformedArchive(format!(
                    "duplicate entry {} in {}",
                    pair[0].name, source.label
                )));
            }

            let mut whiteouts = Vec::new();
            let mut inserted = 0usize;

            for member in members {
                let (dir, base) = split_name(&member.name);

                if base == OPAQUE_WHITEOUT {
                    return Err(PackError::UnsupportedFeature(format!(
                        "opaque whiteout {} in {}",
                        member.name, source.label
                    )));
                }

                if let Some(target) = base.strip_prefix(WHITEOUT_PREFIX) {
                    whiteouts.push((dir.to_string(), target.to_string()));
                    continue;
                }

                let base = base.to_string();
                let is_dir = member.is_dir();
                let idx = entries.len();
                let parent = root.dir_mut(dir, &entries);

                if is_dir {
                    let node = parent.children.entry(base).or_default();
                    if let Some(existing) = node.entry {
                        if !entries[existing].member.is_dir() {
                            node.children.clear();
                        }
                    }
                    node.entry = Some(idx);
                } else {
                    parent.children.insert(
                        base,
                        Node {
                            entry: Some(idx),
                            children: BTreeMap::new(),
                        },
                    );
                }

                entries.push(MergedEntry {
                    source: source_idx,
                    member,
                });
                inserted += 1;
            }

            whiteouts.sort();
            whiteouts.dedup();
            for (dir, target) in whiteouts.iter().rev() {
                let removed = root
                    .find_dir_mut(dir)
                    .and_then(|parent| parent.children.remove(target));
                if removed.is_none() {
                    tracing::debug!(
                        dir = %dir,
                        name = %target,
                        layer = %source.label,
                        "Whiteout names nothing below it"
                    );
                }
            }

            tracing::debug!(
                layer = %source.label,
                entries = inserted,
                whiteouts = whiteouts.len(),
                "Applied layer"
            );
        }

        let mut order = Vec::with_capacity(entries.len());
        root.flatten(&mut order);

        let mut writer = OciDataTarWriter::create(&self.output, None, None)?;
        for idx in &order {
            let entry = &entries[*idx];
            writer.add_member(&sources[entry.source].file, &entry.member)?;
        }
        let info = writer.finish()?;

        tracing::info!(
            layers = sources.len(),
            entries = order.len(),
            size = info.uncompressed_size,
            output = %self.output.display(),
            "Merged layers"
        );

        Ok(info)
    }
}

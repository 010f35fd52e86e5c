//! Splitting of one merged tar into several size-balanced tars.
//!
//! Non-file entries all go to the first output. Regular files are placed
//! largest first, each into the output that is currently smallest
//! (longest-processing-time-first). Hardlinks go last, into the output
//! that holds their target. All outputs together form one logical layer
//! set and must be applied in output order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::path::PathBuf;

use ocipack_core::config::OciCompression;
use ocipack_core::error::{PackError, Result};

use super::tar_writer::{OciDataTarWriter, WrittenTarInfo};
use crate::archive::{scan_members, TarMember};

/// Uncompressed bytes a writer may buffer before it is flushed so its
/// compressed size catches up.
const FLUSH_INTERVAL: u64 = 1 << 20;

/// Min-heap of `(size, bin)`; ties go to the lower bin index.
#[derive(Debug, Clone)]
pub struct LptBins {
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl LptBins {
    /// Bins with the given starting sizes.
    pub fn new(sizes: impl IntoIterator<Item = u64>) -> Self {
        Self {
            heap: sizes
                .into_iter()
                .enumerate()
                .map(|(bin, size)| Reverse((size, bin)))
                .collect(),
        }
    }

    /// Take the smallest bin out of the heap.
    pub fn pop_smallest(&mut self) -> Option<(u64, usize)> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Return a bin with its updated size.
    pub fn push(&mut self, size: u64, bin: usize) {
        self.heap.push(Reverse((size, bin)));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Result of [`assign_lpt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LptPlacement {
    /// Bin of each item, in input order
    pub assignments: Vec<usize>,
    /// Total size per bin
    pub totals: Vec<u64>,
}

/// Place items into `bins` bins, largest first, each into the smallest bin.
pub fn assign_lpt(sizes: &[u64], bins: usize) -> LptPlacement {
    let mut assignments = vec![0; sizes.len()];
    let mut totals = vec![0u64; bins];
    if bins == 0 {
        return LptPlacement {
            assignments,
            totals,
        };
    }

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| Reverse(sizes[i]));

    let mut heap = LptBins::new(totals.iter().copied());
    for i in order {
        if let Some((size, bin)) = heap.pop_smallest() {
            let size = size + sizes[i];
            assignments[i] = bin;
            totals[bin] = size;
            heap.push(size, bin);
        }
    }

    LptPlacement {
        assignments,
        totals,
    }
}

/// Output writers plus the bin every written name went to.
struct OutputBins<'a> {
    input: &'a File,
    label: &'a str,
    writers: Vec<OciDataTarWriter>,
    placed: HashMap<String, usize>,
}

impl OutputBins<'_> {
    fn place(&mut self, member: &TarMember, bin: usize) -> Result<()> {
        if self.placed.contains_key(&member.name) {
            return Err(PackError::MalformedArchive(format!(
                "duplicate entry {} in {}",
                member.name, self.label
            )));
        }
        self.writers[bin].add_member(self.input, member)?;
        self.placed.insert(member.name.clone(), bin);
        Ok(())
    }
}

/// Splits one uncompressed merged tar into `outputs.len()` tars.
pub struct OciLayerPacker {
    input: PathBuf,
    outputs: Vec<PathBuf>,
    compression: Option<OciCompression>,
    compression_level: Option<u32>,
}

impl OciLayerPacker {
    pub fn new(input: impl Into<PathBuf>, outputs: Vec<PathBuf>) -> Self {
        Self {
            input: input.into(),
            outputs,
            compression: None,
            compression_level: None,
        }
    }

    pub fn with_compression(mut self, compression: Option<OciCompression>, level: Option<u32>) -> Self {
        self.compression = compression;
        self.compression_level = level;
        self
    }

    /// Write every output, returning each path with its final totals.
    pub fn write(&self) -> Result<Vec<(PathBuf, WrittenTarInfo)>> {
        if self.outputs.is_empty() {
            return Err(PackError::Config(
                "at least one output file is required".to_string(),
            ));
        }

        let label = self.input.display().to_string();
        let input = File::open(&self.input).map_err(|e| PackError::io_context(&label, e))?;
        let members = scan_members(&input, &label)?;

        let mut non_files: Vec<&TarMember> = Vec::new();
        let mut files: Vec<&TarMember> = Vec::new();
        let mut links: Vec<&TarMember> = Vec::new();
        for member in &members {
            if member.is_regular() {
                files.push(member);
            } else if member.is_hardlink() {
                links.push(member);
            } else {
                non_files.push(member);
            }
        }

        non_files.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));

        let writers = self
            .outputs
            .iter()
            .map(|path| OciDataTarWriter::create(path, self.compression, self.compression_level))
            .collect::<Result<Vec<_>>>()?;
        let mut bins_out = OutputBins {
            input: &input,
            label: &label,
            writers,
            placed: HashMap::with_capacity(members.len()),
        };

        for member in &non_files {
            bins_out.place(member, 0)?;
        }

        let mut bins = LptBins::new(bins_out.writers.iter().map(|w| w.estimated_size()));
        for member in &files {
            let Some((_, bin)) = bins.pop_smallest() else {
                break;
            };
            bins_out.place(member, bin)?;
            let writer = &mut bins_out.writers[bin];
            if writer.unflushed_size() >= FLUSH_INTERVAL {
                writer.flush()?;
            }
            bins.push(writer.estimated_size(), bin);
        }

        // A link may target another link; place in passes until chains resolve
        let mut pending: Vec<&TarMember> = links.clone();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            for &member in &pending {
                let target = member.link_name.as_deref().ok_or_else(|| {
                    PackError::MalformedArchive(format!("hardlink {} has no target", member.name))
                })?;
                match bins_out.placed.get(target) {
                    Some(&bin) => bins_out.place(member, bin)?,
                    None => deferred.push(member),
                }
            }
            if deferred.len() == pending.len() {
                let member = deferred[0];
                return Err(PackError::MalformedArchive(format!(
                    "hardlink {} targets {}, which was never written",
                    member.name,
                    member.link_name.as_deref().unwrap_or_default()
                )));
            }
            pending = deferred;
        }

        tracing::debug!(
            non_files = non_files.len(),
            files = files.len(),
            links = links.len(),
            outputs = bins_out.writers.len(),
            "Distributed entries"
        );

        let mut results = Vec::with_capacity(bins_out.writers.len());
        for writer in bins_out.writers {
            let path = writer.path().to_path_buf();
            let info = writer.finish()?;
            results.push((path, info));
        }

        tracing::info!(
            input = %self.input.display(),
            outputs = results.len(),
            compression = ?self.compression,
            "Packed layer"
        );

        Ok(results)
    }
}

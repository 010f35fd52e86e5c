//! Layer repacking.
//!
//! ```text
//! layer tars (bottom first)
//!     │  OciLayerUnpacker   whiteouts applied, one canonical tar
//!     ▼
//! merged.tar
//!     │  OciLayerPacker     LPT size balancing, hardlinks kept with targets
//!     ▼
//! packed-0.tar.gz … packed-{M-1}.tar.gz
//! ```
//!
//! [`PackedRepositoryBuilder`] runs both steps for the single image of a
//! repository and rebuilds the repository around the new layers.

pub mod packer;
pub mod repository;
pub mod tar_writer;
pub mod unpack;

pub use packer::{assign_lpt, LptBins, LptPlacement, OciLayerPacker};
pub use repository::{PackedOciRepository, PackedRepositoryBuilder};
pub use tar_writer::{OciDataTarWriter, WrittenTarInfo};
pub use unpack::OciLayerUnpacker;

//! ocipack engine - OCI repository model and layer repacking.
//!
//! Loads an image from an OCI layout (directory or `docker save` tar),
//! merges its layers under whiteout semantics, re-splits the result into a
//! chosen number of size-balanced layers and content-addresses the rewritten
//! image back into a repository.

pub mod archive;
pub mod oci;
pub mod pack;

pub use oci::{
    build_data_server_routes, build_oci_index_repository, load_root_index, open_repository,
    BuiltOciRepository, DataRef, FileOciRepository, OciImageIndex, OciRepository,
};
pub use pack::{PackedOciRepository, PackedRepositoryBuilder, WrittenTarInfo};

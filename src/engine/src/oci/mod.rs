//! OCI repository model.
//!
//! Two views of an image are kept apart:
//!
//! - the media model ([`media`]): wire-format JSON objects that point at
//!   each other through descriptors
//! - the data model ([`data`]): the dereferenced graph, editable in place
//!
//! [`OciRepositoryLoader`] turns a repository into the data model, and
//! [`OciRepositoryBuilder`] content-addresses the data model back into blobs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   load    ┌──────────────┐   build   ┌────────────────────┐
//! │ Repository   │ ────────▶ │ OciImageIndex│ ────────▶ │ BuiltOciRepository │
//! │ (dir / tar / │           │  (data model)│           │  digest -> Blob    │
//! │  in-memory)  │           └──────────────┘           └────────────────────┘
//! └──────────────┘                                          │          │
//!        ▲                                        write_layout    routes
//!        │                                                  ▼          ▼
//!   index.json                                         image layout  data server
//!   blobs/sha256/<hex>
//! ```

pub mod builder;
pub mod data;
pub mod data_ref;
pub mod digest;
pub mod loader;
pub mod media;
pub mod repository;
pub mod routes;

pub use builder::{build_oci_index_repository, Blob, BuiltOciRepository, OciRepositoryBuilder};
pub use data::{
    OciImageConfig, OciImageIndex, OciImageIndexItem, OciImageLayer, OciImageLayerKind,
    OciImageManifest, OciImageRootFs,
};
pub use data_ref::{DataRef, DataRefInfo, TarEntryRef};
pub use loader::{load_root_index, read_root_index, OciRepositoryLoader};
pub use media::{MediaObject, OciMediaDescriptor};
pub use repository::{
    open_repository, DictOciRepository, DirectoryOciRepository, FileOciRepository, OciRepository,
    TarFileOciRepository,
};
pub use routes::{build_data_server_routes, DataServerRoute, DataServerTarget};

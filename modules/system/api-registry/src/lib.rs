//! API Registry
//!
//! Version-aware codecs and REST mappings shared by the API server, the
//! authorization pipeline and the controllers.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod domain;
pub mod error;
pub mod latest;

pub use domain::codec::{Codec, JsonCodec};
pub use domain::mapper::{
    DefaultRestMapper, MultiRestMapper, RestMapper, RestMapping, RestScope, kind_to_resource,
};
pub use domain::meta::{JsonMetadataAccessor, MetadataAccessor};
pub use domain::path::{ResourcePath, parse_resource_path};
pub use domain::scheme::{ObjectConverter, Scheme};
pub use domain::storage::StorageHelper;
pub use domain::version::{VersionInterfaces, VersionRegistry};
pub use error::RegistryError;

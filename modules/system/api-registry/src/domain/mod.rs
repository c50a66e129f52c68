//! Domain layer for the API registry.

pub mod codec;
pub mod mapper;
pub mod meta;
pub mod path;
pub mod scheme;
pub mod storage;
pub mod version;

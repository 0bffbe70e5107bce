//! Remote object stores.
//!
//! The [`backend::RemoteStore`] trait is the blocking capability set the
//! rest of the crate is written against.  [`s3::S3Store`] talks to any
//! S3-compatible service; [`memory::MemoryStore`] keeps everything in
//! process for tests and local runs.

pub mod backend;
pub mod memory;
pub mod s3;

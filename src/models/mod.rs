//! Core data models for the file bin service.
//!
//! These entities describe objects, the bins that group them and the derived
//! image variants generated from them. They serialize naturally as JSON via
//! `serde`; none of them is persisted, the filesystem is the only record.

pub mod bin;
pub mod derived;
pub mod link;
pub mod object;

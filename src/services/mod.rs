pub mod archive;
pub mod bin_view;
pub mod capture;
pub mod derived_assets;
pub mod metadata_index;
pub mod naming;
pub mod object_store;
pub mod storage_service;
pub mod triggers;

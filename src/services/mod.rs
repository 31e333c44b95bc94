//! Service layer: the share lifecycle engine and the stores it orchestrates.

pub mod blob_store;
pub mod metadata_store;
pub mod password;
pub mod policy;
pub mod reaper;
pub mod share_service;

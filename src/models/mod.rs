//! Core data models for the ephemeral file-sharing service.
//!
//! The only persistent entity is the [`share::ShareRecord`]; it maps to the
//! `shares` table via `sqlx::FromRow` and serializes as JSON via `serde`.

pub mod share;

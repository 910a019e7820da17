// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # tokendump Core
//!
//! Core types, collaborator traits, and errors for the tokendump harvester.
//!
//! This crate provides the foundational abstractions used across all other
//! tokendump crates:
//!
//! - Catalog identifiers ([`AppId`], [`PackageId`], [`DepotId`], [`BotId`])
//! - RPC result models ([`AccessTokenBatch`], [`ProductInfo`], [`PackageData`])
//! - Collaborator traits for the services the harvester consumes
//!   ([`Bot`], [`CatalogStore`], [`RemoteCatalogClient`])
//! - Paging helpers for batched remote lookups
//! - The shared [`CoreError`] type

pub mod error;
pub mod ids;
pub mod models;
pub mod paging;
pub mod traits;

pub use error::CoreError;
pub use ids::{AccessToken, AppId, BotId, ChangeNumber, DepotId, PackageId};
pub use models::{depot_ids, AccessTokenBatch, LicenseEvent, PackageData, ProductInfo};
pub use paging::pages;
pub use traits::{Bot, CatalogStore, RemoteCatalogClient};

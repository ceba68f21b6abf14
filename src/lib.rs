//! Procedural terrain map generation service
//!
//! Seeds are turned into noise-driven tile grids, rendered to PNG on a separate
//! worker, and cached on disk. [`service::MapService`] is the entry point used by
//! the HTTP routes in [`server`].

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod noise_field;
pub mod protocol;
pub mod raster;
pub mod seeds;
pub mod server;
pub mod service;
pub mod terrain;
pub mod worker;

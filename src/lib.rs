//! Template Workflows Library
//!
//! Named workflow instances materialized from templated job definitions: the
//! template engine, the instance registry and the control plane over them.

pub mod api;
pub mod cli;
pub mod config;
pub mod container;
pub mod db;
pub mod error;
pub mod gate;
pub mod logging;
pub mod materialize;
pub mod registry;
pub mod store;
pub mod template;
pub mod types;

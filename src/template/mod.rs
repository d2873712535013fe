//! Template engine: discovery, placeholder scanning and substitution.
//!
//! A template is not stored anywhere. It is the set of jobs whose membership
//! marker names it, re-derived from the job store on every call so it can never
//! go stale.
//!
//! # Flow
//!
//! 1. [`resolver::resolve`] finds the template's jobs in host order
//! 2. [`scanner::scan`] collects the `@@NAME@@` parameters they reference
//! 3. [`substitute::Substitution`] rewrites each definition with the caller's
//!    job-name remapping and parameter values

pub mod resolver;
pub mod scanner;
pub mod substitute;

pub use resolver::{resolve, template_names};
pub use scanner::scan;
pub use substitute::Substitution;

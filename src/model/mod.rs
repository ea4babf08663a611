// src/model/mod.rs

//! Deployment data model.
//!
//! A [`Deployment`] maps a source directory to a target location inside the
//! exploded deployment. Deployments form a forest keyed by child source
//! path; the watcher consumes the forest read-only for the lifetime of one
//! watch session.

pub mod deployment;
pub mod path_range;

pub use deployment::{Deployment, DeploymentSpec, build_forest};
pub use path_range::intermediate_chain;

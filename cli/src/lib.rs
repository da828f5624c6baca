//! ukpack CLI - package unikernels as OCI images and push them to registries.

pub mod commands;
pub mod output;

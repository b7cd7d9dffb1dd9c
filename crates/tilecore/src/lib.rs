//! Download, install and launch pipeline for a game library.
//!
//! Each catalog item is driven by an [`controller::ItemController`]; a
//! [`library::Library`] hosts many of them on one interactive thread.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod download;
pub mod install;
pub mod launcher;
pub mod library;
pub mod paths;

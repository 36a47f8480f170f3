//! Resumable batch harvester for booru-style tag search APIs.
//!
//! A run reads tag queries from a text file, pages through each query's
//! search results, downloads and normalizes the assets, and writes them with
//! a metadata record to a folder tree or a zip + CSV pair. Progress is
//! checkpointed by line number: a failing tag makes the next attempt resume at
//! that line, and the output store doubles as the dedup index.

pub mod app;
pub mod booru;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod materialize;
pub mod output;
pub mod retry;
pub mod state;
pub mod store;
pub mod tags;
pub mod walker;

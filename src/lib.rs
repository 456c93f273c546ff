//! pagefarm: template-driven page generation behind a hash-sharded file
//! cache, with crawler verification and an edge reader that reports visits
//! back to the origin asynchronously.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub mod spider;
pub mod template;

//! Application services: rendering, visit recording and the collaborator
//! traits they depend on.

pub mod error;
pub mod render;
pub mod repos;
pub mod visits;

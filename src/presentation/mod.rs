//! HTML served by pagefarm itself rather than by site templates.

pub mod views;

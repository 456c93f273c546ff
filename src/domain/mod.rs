//! Domain layer types and invariants.

pub mod entities;
pub mod pinyin;
pub mod slug;
pub mod types;

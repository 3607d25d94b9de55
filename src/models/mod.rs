//! Domain model module declarations.

pub mod context;
pub mod conversation;
pub mod options;

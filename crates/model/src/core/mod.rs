pub mod context;
pub mod identifiers;

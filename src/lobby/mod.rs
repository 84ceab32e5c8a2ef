pub mod actor;
pub mod directory;

pub mod config;
pub mod format;
pub mod index;
pub mod runtime;
pub mod sections;
pub mod splice;
pub mod sync;

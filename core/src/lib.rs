// Shared building blocks for the companion supervisor:
// - Settings loading and the live settings store
// - Shared error types
// - Owner (module) context model
// - User-facing message catalogue

pub mod config;
pub use config::*;

pub mod errors;
pub use errors::*;

pub mod messages;
pub use messages::{message, MessageKey};

pub mod module;
pub use module::{normalize_library_path, ModuleLayout, OwnerContext};

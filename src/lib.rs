pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod folders;
pub mod gateway;
pub mod model;
pub mod mutation;
pub mod selection;
pub mod workspace;

pub use error::CoreError;
pub use workspace::Workspace;

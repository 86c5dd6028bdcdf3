//! Runtime adapters connecting the scheduler to external processes.

pub mod command_implementer;

pub use command_implementer::{CommandImplementer, BACKEND_ADDRESS_ENV, BACKEND_ENV};

//! CLI command implementations

pub mod cache;
pub mod compose;
pub mod config;
pub mod env;
pub mod hash;
pub mod mount;

pub use cache::execute as cache;
pub use compose::{render, run};
pub use config::execute as config;
pub use env::execute as env;
pub use hash::execute as hash;
pub use mount::execute as mount;

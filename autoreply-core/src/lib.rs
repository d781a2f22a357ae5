pub mod config;
pub mod dedup;
pub mod error;
pub mod error_utils;
pub mod platform;
pub mod selector;
pub mod stream;
pub mod trigger;
pub mod types;

pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use platform::Platform;
pub use stream::{ItemStream, StreamOptions};
pub use types::*;

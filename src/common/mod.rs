pub mod errors;
pub mod http;
pub mod logger;
pub mod time;
pub mod types;

pub use errors::*;
pub use http::*;
pub use time::*;
pub use types::*;

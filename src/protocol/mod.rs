pub mod events;
pub mod filters;
pub mod info;
pub mod models;
pub mod session;
pub mod stats;
pub mod tracks;

pub use events::*;
pub use filters::*;
pub use info::*;
pub use models::*;
pub use session::*;
pub use stats::*;
pub use tracks::*;

pub mod analysis;
pub mod config;
pub mod session;

pub use analysis::*;
pub use config::*;
pub use session::*;

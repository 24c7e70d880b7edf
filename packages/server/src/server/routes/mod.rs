// HTTP routes
pub mod health;
pub mod scans;

pub use health::*;
pub use scans::*;

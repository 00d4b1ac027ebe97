//! HTTP request handlers.

pub mod capabilities;
pub mod health;
pub mod imports;
pub mod uploads;

pub use capabilities::*;
pub use health::*;
pub use imports::*;
pub use uploads::*;

#![forbid(unsafe_code)]

pub mod curriculum;
pub mod error;
pub mod evaluation;
pub mod matcher;
pub mod model;
pub mod scheduler;
pub mod time;

pub use error::Error;
pub use time::Clock;

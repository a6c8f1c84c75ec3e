pub mod error;
pub mod exposition;
pub mod logging;

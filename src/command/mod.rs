mod error;
pub mod inspect;
pub mod serve;

pub use error::Error;

pub mod error;
pub mod files;
pub mod lock;
pub mod marshal;
pub mod message;
pub mod package;

pub use error::{SaveError, SaveResult};

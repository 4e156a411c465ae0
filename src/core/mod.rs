pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{State, normalize_spaces};
pub use value::Value;

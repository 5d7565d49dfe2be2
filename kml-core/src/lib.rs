pub mod error;
pub mod http;
pub mod recipe;
pub mod util;

pub use error::{KmlError, Result};
pub use recipe::{BuildRecipe, RailsRuntimeRecipe};

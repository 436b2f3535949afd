pub mod settings;
pub mod types;

pub use settings::*;
pub use types::*;

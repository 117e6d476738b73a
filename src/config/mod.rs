pub mod types;
pub mod loader;
pub mod options;
pub mod validator;

pub use types::*;
pub use loader::*;
pub use options::MappingOptions;
pub use validator::*;

pub mod content;
pub mod file;
pub mod share;
pub mod stats;
pub mod user;

pub use content::*;
pub use file::*;
pub use share::*;
pub use stats::*;
pub use user::*;

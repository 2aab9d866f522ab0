pub mod content;
pub mod file;
pub mod locks;
pub mod mime;
pub mod share;
pub mod stats;
pub mod user;

pub use content::ContentStore;
pub use file::FileService;
pub use share::ShareService;
pub use stats::StatsService;
pub use user::UserService;

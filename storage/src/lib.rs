mod error;
mod schema;
mod db;
mod session;
mod datadir;

pub use error::{Result, StorageError};
pub use db::{Database, FindingFilter};
pub use session::ImportSession;
pub use datadir::DataDir;

pub mod fjall;
pub mod keys;
pub mod mem;
pub mod traits;
pub mod types;

pub use self::fjall::{FjallDirectoryStore, FjallStore};
pub use mem::MemDirectoryStore;
pub use traits::DirectoryStore;
pub use types::{InsertOutcome, ReplaceOutcome};

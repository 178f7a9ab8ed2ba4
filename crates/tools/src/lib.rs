//! Built-in tools for convoke.
//!
//! The one capability shipped here is sandboxed file access: read, write,
//! edit, list and find, all confined by a
//! [`convoke_security::AccessPolicy`] and guarded so that existing files are
//! only overwritten after the model has seen their current contents.
//!
//! ```no_run
//! use std::sync::Arc;
//! use convoke_security::AccessPolicy;
//! use convoke_tools::FileAccess;
//!
//! let policy = AccessPolicy::new("/srv/project", Vec::new(), vec!["*.env".into()]).unwrap();
//! let registry = Arc::new(FileAccess::new(policy)).registry();
//! ```

pub mod file_access;
pub mod file_read;
pub mod file_write;
pub mod listing;
pub mod read_registry;
pub mod validate;

pub use file_access::{
    DEFAULT_FIND_LIMIT, EDIT_FILE, FIND_FILES, FileAccess, LIST_DIRECTORY, READ_FILE, WRITE_FILE,
};
pub use listing::EntryKind;
pub use read_registry::{ReadRegistry, StaleWrite};
pub use validate::{CommandOutcome, CommandRunner, Language, ProcessRunner, ValidationReport, Validator};

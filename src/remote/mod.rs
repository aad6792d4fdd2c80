//! Remote filesystem adapter: a POSIX-like directory tree over a REST
//! object store, with a directory listing cache and a download-on-open
//! content cache.

mod dircache;
mod drive;
mod filecache;
mod oauth;
pub mod rest;

pub use dircache::{wildcard_match, DirCache, DirEntry, DIR_OPT_DIRS_FIRST};
pub use drive::{DriveConfig, DriveFs, RemoteFsError, SCHEME};
pub use filecache::{CacheSlot, FileCache, FileMode};
pub use oauth::Authenticator;

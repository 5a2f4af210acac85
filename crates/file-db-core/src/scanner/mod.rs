pub mod probe;

pub use probe::{DirListing, FilesystemProbe, LocalProbe};

use std::path::PathBuf;
use thiserror::Error;

/// Error type for include resolution.
///
/// The preprocessing pipeline itself never fails; resolution errors are
/// recorded on the [`Includer`](crate::Includer) and surface as inline
/// `#warning` diagnostics in the generated source.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("the include path was not found: {0:?}")]
    IncludePathNotFound(PathBuf),
    #[error("the file could not be read: {0:?}")]
    IOError(PathBuf, #[source] std::io::Error),
    #[error("unable to resolve include key '{0}'")]
    UnresolvedKey(String),
    #[error("no section '{section}' defined in {path:?}")]
    MissingSection { section: String, path: PathBuf },
}

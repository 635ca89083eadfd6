use std::path::PathBuf;

use thiserror::Error;

pub type MemberResult<T> = Result<T, MemberError>;

#[derive(Debug, Error)]
pub enum MemberError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_at(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> MemberError + '_ {
    move |source| MemberError::Io {
        path: path.to_path_buf(),
        source,
    }
}

use saga::StepError;
use thiserror::Error;

use crate::kernel::RemoteError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThingError {
    #[error("thing payload must contain an 'attributes' object")]
    MissingAttributes,

    #[error("thing payload is missing unique attribute '{0}'")]
    MissingUniqueKey(String),

    #[error("thing with {key}={value} already exists")]
    AlreadyExists {
        key: String,
        value: String,
        /// Known when the pre-check found it; absent when the remote refused the create.
        thing_id: Option<String>,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<ThingError> for StepError {
    fn from(err: ThingError) -> Self {
        match err {
            ThingError::MissingAttributes | ThingError::MissingUniqueKey(_) => {
                StepError::validation(err.to_string())
            }
            ThingError::AlreadyExists { .. } => StepError::already_exists(err.to_string()),
            ThingError::Remote(remote) => remote.into(),
        }
    }
}

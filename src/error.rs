use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SchedulerError {
    pub fn item_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "item",
            id: id.to_string(),
        }
    }

    pub fn user_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "user",
            id: id.to_string(),
        }
    }

    pub fn deck_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "deck",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

//! Error types for the library domain.

use duplex_engine::ItemIdentity;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] duplex_engine::Error),

    #[error("{0} is not a person")]
    NotAPerson(ItemIdentity),

    #[error("{0} is not a book")]
    NotABook(ItemIdentity),

    #[error("no such item: {0}")]
    NotFound(ItemIdentity),
}

pub type Result<T> = std::result::Result<T, Error>;

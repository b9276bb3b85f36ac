use thiserror::Error;
use crate::types::Cid;

/// Errors raised by marketplace participants and their collaborators
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("record is missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("no machine with key {0}")]
    KeyNotFound(String),

    #[error("unknown deal {0}")]
    UnknownDeal(Cid),

    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("deposit {offered} is below the required timeout deposit {required}")]
    InsufficientDeposit {
        required: u64,
        offered: u64,
    },

    #[error("{sender} is not the resource provider of {id}")]
    WrongSender {
        sender: String,
        id: Cid,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

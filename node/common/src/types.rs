use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use crate::{crypto::cid_of, MarketError};

/// Well-known record fields
pub mod fields {
    pub const RESOURCE_PROVIDER_ADDRESS: &str = "resource_provider_address";
    pub const CLIENT_ADDRESS: &str = "client_address";
    pub const TIMEOUT_DEPOSIT: &str = "timeout_deposit";
    pub const ACTUAL_HONEST_TIME_TO_COMPLETION: &str = "actual_honest_time_to_completion";
    pub const MATCH_ID: &str = "match_id";
    pub const DEAL_ID: &str = "deal_id";
    pub const RESULT_ID: &str = "result_id";
}

/// Content identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cid {
    pub hash: String,
}

impl Cid {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// Value transfer accompanying a contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub sender: String,
    pub value: u64,
}

impl Tx {
    pub fn new(sender: impl Into<String>, value: u64) -> Self {
        Self { sender: sender.into(), value }
    }
}

/// Key/value record with an optional content identifier.
///
/// Matches, deals and results all share this shape; the typed wrappers
/// below only add field accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: Option<Cid>,
    data: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: Cid) -> Self {
        Self { id: Some(id), data: Map::new() }
    }

    /// Builder form of [`Record::add_data`]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.add_data(key, value);
        self
    }

    pub fn add_data(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    pub fn get_data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Derive the id from the current data
    pub fn set_id(&mut self) -> Result<&Cid, MarketError> {
        let cid = cid_of(&self.data)?;
        Ok(self.id.insert(cid))
    }

    pub fn get_id(&self) -> Option<&Cid> {
        self.id.as_ref()
    }

    /// Id of a record that must already have one
    pub fn id(&self) -> Result<&Cid, MarketError> {
        self.id.as_ref().ok_or_else(|| MarketError::MissingField("id".into()))
    }

    pub fn require(&self, key: &str) -> Result<&Value, MarketError> {
        self.data.get(key).ok_or_else(|| MarketError::MissingField(key.into()))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, MarketError> {
        self.require(key)?.as_str().ok_or_else(|| MarketError::InvalidField {
            field: key.into(),
            reason: "expected a string".into(),
        })
    }

    pub fn require_u64(&self, key: &str) -> Result<u64, MarketError> {
        self.require(key)?.as_u64().ok_or_else(|| MarketError::InvalidField {
            field: key.into(),
            reason: "expected a non-negative integer".into(),
        })
    }
}

/// Pairing of a resource provider and a client proposed by the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match(Record);

impl Match {
    pub fn record(&self) -> &Record {
        &self.0
    }

    pub fn id(&self) -> Result<&Cid, MarketError> {
        self.0.id()
    }

    pub fn resource_provider_address(&self) -> Result<&str, MarketError> {
        self.0.require_str(fields::RESOURCE_PROVIDER_ADDRESS)
    }

    pub fn timeout_deposit(&self) -> Result<u64, MarketError> {
        self.0.require_u64(fields::TIMEOUT_DEPOSIT)
    }
}

impl From<Record> for Match {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Match confirmed by the smart contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal(Record);

impl Deal {
    pub fn record(&self) -> &Record {
        &self.0
    }

    pub fn id(&self) -> Result<&Cid, MarketError> {
        self.0.id()
    }

    pub fn resource_provider_address(&self) -> Result<&str, MarketError> {
        self.0.require_str(fields::RESOURCE_PROVIDER_ADDRESS)
    }

    /// Ticks an honest provider needs to finish the job
    pub fn actual_honest_time_to_completion(&self) -> Result<u64, MarketError> {
        self.0.require_u64(fields::ACTUAL_HONEST_TIME_TO_COMPLETION)
    }
}

impl From<Record> for Deal {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Outcome of a job, posted once per completed deal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult(Record);

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> &Record {
        &self.0
    }

    pub fn add_data(&mut self, key: &str, value: impl Into<Value>) {
        self.0.add_data(key, value);
    }

    pub fn set_id(&mut self) -> Result<&Cid, MarketError> {
        self.0.set_id()
    }

    pub fn get_id(&self) -> Option<&Cid> {
        self.0.get_id()
    }

    pub fn deal_id(&self) -> Result<Cid, MarketError> {
        self.0.require_str(fields::DEAL_ID).map(Cid::new)
    }
}

/// Opaque capacity descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub metadata: Map<String, Value>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Content identifier of the metadata
    pub fn cid(&self) -> Result<Cid, MarketError> {
        cid_of(&self.metadata)
    }
}

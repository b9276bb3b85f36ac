use serde::{Deserialize, Serialize};
use std::str::FromStr;
use market_common::MarketError;

/// What to do with a deal once its result has been posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPosting {
    /// Post one result, then stop advancing the deal
    #[default]
    Once,
    /// Keep advancing and post again on every tick past completion
    EveryTick,
}

impl FromStr for ResultPosting {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "every_tick" | "every-tick" => Ok(Self::EveryTick),
            other => Err(MarketError::InvalidField {
                field: "result_posting".into(),
                reason: format!("unknown policy `{}`", other),
            }),
        }
    }
}

/// Resource provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Identity used as match/deal address and transaction sender
    pub public_key: String,
    /// Solver endpoint, if known before connecting
    pub solver_url: Option<String>,
    /// Value attached to every posted result
    pub result_tx_value: u64,
    pub result_posting: ResultPosting,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            solver_url: None,
            result_tx_value: 1,
            result_posting: ResultPosting::Once,
        }
    }
}

impl ProviderConfig {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MarketError> {
        let config: Self = serde_json::from_str(json)?;
        if config.public_key.is_empty() {
            return Err(MarketError::MissingField("public_key".into()));
        }
        Ok(config)
    }
}

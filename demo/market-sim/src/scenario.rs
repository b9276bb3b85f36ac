use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use market_provider::{ProviderConfig, ResultPosting};

fn default_client() -> String {
    "client".to_string()
}

/// Match the solver emits at a given tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMatch {
    pub resource_provider: String,
    #[serde(default = "default_client")]
    pub client: String,
    pub timeout_deposit: u64,
    pub time_to_completion: u64,
    #[serde(default)]
    pub at_tick: u64,
}

/// Simulation input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub ticks: u64,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub machines_per_provider: u32,
    #[serde(default)]
    pub matches: Vec<PlannedMatch>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Round-robin scenario: match `i` goes to provider `i % providers`
    pub fn generate(
        providers: usize,
        matches: usize,
        ticks: u64,
        posting: ResultPosting,
    ) -> Result<Self> {
        if providers == 0 {
            bail!("scenario has no providers");
        }

        let providers: Vec<ProviderConfig> = (0..providers)
            .map(|i| ProviderConfig {
                result_posting: posting,
                ..ProviderConfig::new(format!("rp-{}", i))
            })
            .collect();

        let matches = (0..matches)
            .map(|i| PlannedMatch {
                resource_provider: providers[i % providers.len()].public_key.clone(),
                client: format!("client-{}", i),
                timeout_deposit: 10 + i as u64,
                time_to_completion: 2 + (i % 4) as u64,
                at_tick: (i / providers.len()) as u64,
            })
            .collect();

        Ok(Self {
            ticks,
            providers,
            machines_per_provider: 2,
            matches,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            bail!("scenario has no providers");
        }

        let mut keys = BTreeSet::new();
        for provider in &self.providers {
            if provider.public_key.is_empty() {
                bail!("provider without public_key");
            }
            if !keys.insert(provider.public_key.as_str()) {
                bail!("duplicate provider {}", provider.public_key);
            }
        }

        for planned in &self.matches {
            if planned.at_tick >= self.ticks {
                bail!(
                    "match for {} at tick {} is past the last tick {}",
                    planned.resource_provider,
                    planned.at_tick,
                    self.ticks
                );
            }
        }
        Ok(())
    }
}

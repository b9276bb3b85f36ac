use anyhow::{Context, Result};
use serde::Serialize;
use std::rc::Rc;
use market_common::{LedgerContract, Machine, ScriptedSolver};
use market_provider::{DealPhase, ResourceProvider};
use tracing::{debug, info};
use crate::scenario::{PlannedMatch, Scenario};

const SOLVER_URL: &str = "sim://solver";

/// Per-provider outcome
#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub public_key: String,
    pub machines: usize,
    pub observed_deals: usize,
    pub running: usize,
    pub completed: usize,
    pub deposited: u64,
    pub fees: u64,
}

/// Outcome of a run
#[derive(Debug, Serialize)]
pub struct Summary {
    pub ticks: u64,
    pub agreements: usize,
    pub deals: usize,
    pub results: usize,
    pub providers: Vec<ProviderSummary>,
}

/// Clock driver: owns the collaborators and advances every provider
pub struct Simulation {
    solver: Rc<ScriptedSolver>,
    contract: Rc<LedgerContract>,
    providers: Vec<ResourceProvider>,
    plan: Vec<PlannedMatch>,
    tick: u64,
}

impl Simulation {
    pub fn new(scenario: &Scenario) -> Result<Self> {
        let solver = Rc::new(ScriptedSolver::new());
        let contract = Rc::new(LedgerContract::new());

        let mut providers = Vec::with_capacity(scenario.providers.len());
        for config in &scenario.providers {
            let provider = ResourceProvider::with_config(config.clone());
            let url = config.solver_url.clone().unwrap_or_else(|| SOLVER_URL.to_string());
            provider.connect_to_solver(&url, solver.clone());
            provider.connect_to_smart_contract(contract.clone());

            for slot in 0..scenario.machines_per_provider {
                let machine = Machine::new()
                    .with("owner", config.public_key.as_str())
                    .with("slot", slot)
                    .with("cpu_cores", 8);
                let id = machine.cid()?;
                provider.add_machine(&id, machine);
            }
            providers.push(provider);
        }

        Ok(Self {
            solver,
            contract,
            providers,
            plan: scenario.matches.clone(),
            tick: 0,
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Run one simulated tick.
    ///
    /// Order: scheduled matches, solver events, contract events (deals),
    /// provider clocks, contract events (results). Returns the number of
    /// results posted during the tick.
    pub fn step(&mut self) -> Result<usize> {
        let tick = self.tick;
        for planned in self.plan.iter().filter(|m| m.at_tick == tick) {
            self.solver.propose(
                &planned.resource_provider,
                &planned.client,
                planned.timeout_deposit,
                planned.time_to_completion,
            )?;
        }

        self.solver
            .events()
            .dispatch_all()
            .with_context(|| format!("delivering solver events at tick {}", tick))?;
        self.contract
            .events()
            .dispatch_all()
            .with_context(|| format!("delivering contract events at tick {}", tick))?;

        let mut posted = 0;
        for provider in &self.providers {
            posted += provider
                .update_job_running_times()
                .with_context(|| format!("advancing {} at tick {}", provider.get_public_key(), tick))?
                .len();
        }
        self.contract.events().dispatch_all()?;

        debug!("Tick {} posted {} results", tick, posted);
        self.tick += 1;
        Ok(posted)
    }

    pub fn summary(&self) -> Summary {
        let providers = self
            .providers
            .iter()
            .map(|provider| {
                let public_key = provider.get_public_key();
                let tracked: Vec<_> = provider.job_running_times().keys().cloned().collect();
                let completed = tracked
                    .iter()
                    .filter(|id| matches!(provider.deal_phase(id), DealPhase::Completed { .. }))
                    .count();

                ProviderSummary {
                    machines: provider.get_machines().len(),
                    observed_deals: provider.current_deals().len(),
                    running: tracked.len() - completed,
                    completed,
                    deposited: self.contract.deposits_of(&public_key),
                    fees: self.contract.fees_of(&public_key),
                    public_key,
                }
            })
            .collect();

        Summary {
            ticks: self.tick,
            agreements: self.contract.agreements().len(),
            deals: self.contract.deals().len(),
            results: self.contract.posted_results().len(),
            providers,
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(
            "Simulation finished after {} ticks: {} agreements, {} deals, {} results",
            summary.ticks, summary.agreements, summary.deals, summary.results
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_provider::ResultPosting;

    #[test]
    fn test_generated_scenario_completes_every_match() {
        let scenario = Scenario::generate(3, 6, 10, ResultPosting::Once).unwrap();
        let mut sim = Simulation::new(&scenario).unwrap();
        for _ in 0..scenario.ticks {
            sim.step().unwrap();
        }

        let summary = sim.summary();
        assert_eq!(summary.agreements, 6);
        assert_eq!(summary.deals, 6);
        assert_eq!(summary.results, 6);
        for provider in &summary.providers {
            assert_eq!(provider.machines, 2);
            assert_eq!(provider.observed_deals, 6);
            assert_eq!(provider.completed, 2);
            assert_eq!(provider.running, 0);
        }
    }

    #[test]
    fn test_every_tick_policy_keeps_posting() {
        let scenario = Scenario::from_json(
            r#"{
                "ticks": 5,
                "providers": [{"public_key": "P", "result_posting": "every_tick"}],
                "matches": [{"resource_provider": "P", "timeout_deposit": 3, "time_to_completion": 2}]
            }"#,
        )
        .unwrap();
        let mut sim = Simulation::new(&scenario).unwrap();

        let posted: Vec<usize> = (0..5).map(|_| sim.step().unwrap()).collect();
        assert_eq!(posted, vec![0, 1, 1, 1, 1]);

        let summary = sim.summary();
        assert_eq!(summary.results, 4);
        assert_eq!(summary.providers[0].deposited, 3);
        assert_eq!(summary.providers[0].fees, 4);
    }

    #[test]
    fn test_unassigned_match_is_never_agreed() {
        let scenario = Scenario::from_json(
            r#"{
                "ticks": 3,
                "providers": [{"public_key": "P"}],
                "matches": [{"resource_provider": "nobody", "timeout_deposit": 3, "time_to_completion": 1}]
            }"#,
        )
        .unwrap();
        let mut sim = Simulation::new(&scenario).unwrap();
        for _ in 0..3 {
            sim.step().unwrap();
        }

        let summary = sim.summary();
        assert_eq!(summary.agreements, 0);
        assert_eq!(summary.results, 0);
        assert_eq!(sim.tick(), 3);
    }
}

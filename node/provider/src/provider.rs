use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use market_common::{
    event_names, fields, Cid, Deal, Event, EventHandler, JobResult, Machine, MarketError, Match,
    SmartContract, Solver, Subscription, Tx,
};
use tracing::{debug, info};
use crate::{
    config::{ProviderConfig, ResultPosting},
    inventory::MachineInventory,
};

/// Identity shared by every service provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProvider {
    public_key: String,
}

impl ServiceProvider {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self { public_key: public_key.into() }
    }

    pub fn get_public_key(&self) -> &str {
        &self.public_key
    }
}

/// Where a deal stands from one provider's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealPhase {
    /// No `deal` event observed
    Unseen,
    /// Confirmed for another provider
    Foreign,
    /// Ours, result not posted yet
    Running { elapsed: u64 },
    /// Ours, result posted; `elapsed` has reached the expected completion time
    Completed { elapsed: u64 },
}

struct Connection<T: ?Sized> {
    source: Rc<T>,
    subscription: Subscription,
}

struct ProviderState {
    identity: ServiceProvider,
    config: ProviderConfig,
    machines: MachineInventory,
    solver_url: Option<String>,
    solver: Option<Connection<dyn Solver>>,
    smart_contract: Option<Connection<dyn SmartContract>>,
    current_deals: BTreeMap<Cid, Deal>,
    job_running_times: BTreeMap<Cid, u64>,
    completed: BTreeSet<Cid>,
}

/// Resource provider participant.
///
/// Agrees to matches the solver assigns to it, tracks the running time of
/// every deal the contract confirms for it and posts a result once a deal
/// reaches its expected completion time.
///
/// The type is a cheap handle: clones share the same state. Everything runs
/// on the caller's thread; handlers registered with the solver and contract
/// hold only a weak reference and do nothing once every handle is dropped.
#[derive(Clone)]
pub struct ResourceProvider {
    state: Rc<RefCell<ProviderState>>,
}

impl ResourceProvider {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self::with_config(ProviderConfig::new(public_key))
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        let state = ProviderState {
            identity: ServiceProvider::new(config.public_key.clone()),
            solver_url: config.solver_url.clone(),
            config,
            machines: MachineInventory::new(),
            solver: None,
            smart_contract: None,
            current_deals: BTreeMap::new(),
            job_running_times: BTreeMap::new(),
            completed: BTreeSet::new(),
        };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    pub fn get_public_key(&self) -> String {
        self.state.borrow().identity.get_public_key().to_string()
    }

    pub fn config(&self) -> ProviderConfig {
        self.state.borrow().config.clone()
    }

    pub fn get_solver(&self) -> Option<Rc<dyn Solver>> {
        self.state.borrow().solver.as_ref().map(|c| c.source.clone())
    }

    pub fn solver_url(&self) -> Option<String> {
        self.state.borrow().solver_url.clone()
    }

    pub fn get_smart_contract(&self) -> Option<Rc<dyn SmartContract>> {
        self.state.borrow().smart_contract.as_ref().map(|c| c.source.clone())
    }

    /// Add a machine, replacing any machine already stored under `id`
    pub fn add_machine(&self, id: &Cid, machine: Machine) {
        if self.state.borrow_mut().machines.add(id, machine).is_some() {
            debug!("Replaced machine {}", id);
        }
    }

    pub fn remove_machine(&self, id: &str) -> Result<Machine, MarketError> {
        self.state.borrow_mut().machines.remove(id)
    }

    /// Live view of the inventory; release it before calling back into the provider
    pub fn get_machines(&self) -> Ref<'_, BTreeMap<String, Machine>> {
        Ref::map(self.state.borrow(), |s| s.machines.machines())
    }

    /// Every deal observed on the contract stream, ours or not
    pub fn current_deals(&self) -> Ref<'_, BTreeMap<Cid, Deal>> {
        Ref::map(self.state.borrow(), |s| &s.current_deals)
    }

    /// Elapsed ticks of the deals assigned to this provider
    pub fn job_running_times(&self) -> Ref<'_, BTreeMap<Cid, u64>> {
        Ref::map(self.state.borrow(), |s| &s.job_running_times)
    }

    pub fn job_running_time(&self, deal_id: &Cid) -> Option<u64> {
        self.state.borrow().job_running_times.get(deal_id).copied()
    }

    pub fn deal_phase(&self, deal_id: &Cid) -> DealPhase {
        let state = self.state.borrow();
        match state.job_running_times.get(deal_id) {
            Some(&elapsed) if state.completed.contains(deal_id) => DealPhase::Completed { elapsed },
            Some(&elapsed) => DealPhase::Running { elapsed },
            None if state.current_deals.contains_key(deal_id) => DealPhase::Foreign,
            None => DealPhase::Unseen,
        }
    }

    /// Subscribe to `solver`, dropping the subscription to any previous solver
    pub fn connect_to_solver(&self, url: &str, solver: Rc<dyn Solver>) {
        let previous = {
            let mut state = self.state.borrow_mut();
            state.solver_url = Some(url.to_string());
            state.solver.take()
        };
        if let Some(previous) = previous {
            previous.source.unsubscribe_event(previous.subscription);
            debug!("Dropped previous solver subscription");
        }

        let subscription = solver.subscribe_event(self.subscriber(Self::handle_solver_event));
        self.state.borrow_mut().solver = Some(Connection { source: solver, subscription });
        info!("Provider {} connected to solver at {}", self.get_public_key(), url);
    }

    /// Subscribe to `contract`, dropping the subscription to any previous contract
    pub fn connect_to_smart_contract(&self, contract: Rc<dyn SmartContract>) {
        let previous = self.state.borrow_mut().smart_contract.take();
        if let Some(previous) = previous {
            previous.source.unsubscribe_event(previous.subscription);
            debug!("Dropped previous contract subscription");
        }

        let subscription =
            contract.subscribe_event(self.subscriber(Self::handle_smart_contract_event));
        self.state.borrow_mut().smart_contract = Some(Connection { source: contract, subscription });
        info!("Provider {} connected to smart contract", self.get_public_key());
    }

    fn subscriber(&self, handle: fn(&Self, &Event) -> Result<(), MarketError>) -> EventHandler {
        let state = Rc::downgrade(&self.state);
        Box::new(move |event: &Event| match state.upgrade() {
            Some(state) => handle(&ResourceProvider { state }, event),
            None => Ok(()),
        })
    }

    fn contract(&self) -> Result<Rc<dyn SmartContract>, MarketError> {
        self.get_smart_contract()
            .ok_or(MarketError::NotConnected("smart contract"))
    }

    /// Agree to matches assigned to this provider. Other events are ignored.
    ///
    /// Redelivered matches are agreed to again; deduplication is left to the
    /// contract.
    pub fn handle_solver_event(&self, event: &Event) -> Result<(), MarketError> {
        let public_key = self.get_public_key();
        debug!(
            "Provider {} has solver event {} {}",
            public_key,
            event.get_name(),
            record_id(event)
        );
        if event.get_name() != event_names::MATCH {
            return Ok(());
        }

        let matched = Match::from(event.get_data().clone());
        if matched.resource_provider_address()? != public_key {
            return Ok(());
        }

        let tx = Tx::new(public_key.clone(), matched.timeout_deposit()?);
        info!(
            "Provider {} agreeing to match {} with deposit {}",
            public_key,
            record_id(event),
            tx.value
        );
        self.contract()?.agree_to_match(&matched, tx)
    }

    /// Record confirmed deals and start the clock on our own.
    ///
    /// A redelivered deal restarts a running clock at 0. A completed deal
    /// keeps its clock.
    pub fn handle_smart_contract_event(&self, event: &Event) -> Result<(), MarketError> {
        let mut state = self.state.borrow_mut();
        debug!(
            "Provider {} has smart contract event {} {}",
            state.identity.get_public_key(),
            event.get_name(),
            record_id(event)
        );
        if event.get_name() != event_names::DEAL {
            return Ok(());
        }

        let deal = Deal::from(event.get_data().clone());
        let deal_id = deal.id()?.clone();
        let assignee = deal.resource_provider_address().map(str::to_string);
        state.current_deals.insert(deal_id.clone(), deal);

        if assignee? != state.identity.get_public_key() {
            return Ok(());
        }
        if state.completed.contains(&deal_id) {
            debug!("Deal {} already completed, keeping its clock", deal_id);
        } else {
            info!("Provider {} starting deal {}", state.identity.get_public_key(), deal_id);
            state.job_running_times.insert(deal_id, 0);
        }
        Ok(())
    }

    /// Build the result of `deal_id` and post it with its transaction
    pub fn create_result(&self, deal_id: &Cid) -> Result<JobResult, MarketError> {
        let contract = self.contract()?;
        let (public_key, value) = {
            let state = self.state.borrow();
            (state.identity.get_public_key().to_string(), state.config.result_tx_value)
        };

        let mut result = JobResult::new();
        result.add_data(fields::DEAL_ID, deal_id.hash.clone());
        let result_id = result.set_id()?.hash.clone();
        result.add_data(fields::RESULT_ID, result_id);

        info!("Provider {} posting result for deal {}", public_key, deal_id);
        contract.post_result(&result, Tx::new(public_key, value))?;

        self.state.borrow_mut().completed.insert(deal_id.clone());
        Ok(result)
    }

    /// Advance every tracked deal by one tick and post the results that
    /// became due. Returns the deals a result was posted for.
    ///
    /// Deals are visited in id order. The first error stops the tick: deals
    /// before the failing one have advanced, later ones have not. A contract
    /// that keeps rejecting one deal therefore stalls every deal after it.
    pub fn update_job_running_times(&self) -> Result<Vec<Cid>, MarketError> {
        let deal_ids: Vec<Cid> = self.state.borrow().job_running_times.keys().cloned().collect();

        let mut posted = Vec::new();
        for deal_id in deal_ids {
            if self.advance(&deal_id)? {
                self.create_result(&deal_id)?;
                posted.push(deal_id);
            }
        }
        Ok(posted)
    }

    /// Count one tick for `deal_id`; true when its result is due
    fn advance(&self, deal_id: &Cid) -> Result<bool, MarketError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        if state.config.result_posting == ResultPosting::Once && state.completed.contains(deal_id) {
            return Ok(false);
        }

        let elapsed = match state.job_running_times.get_mut(deal_id) {
            Some(elapsed) => {
                *elapsed += 1;
                *elapsed
            }
            None => return Ok(false),
        };
        let expected = state
            .current_deals
            .get(deal_id)
            .ok_or_else(|| MarketError::UnknownDeal(deal_id.clone()))?
            .actual_honest_time_to_completion()?;

        debug!("Deal {} at {}/{}", deal_id, elapsed, expected);
        Ok(elapsed >= expected)
    }
}

fn record_id(event: &Event) -> &str {
    event.get_data().get_id().map(|id| id.hash.as_str()).unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_common::{LedgerContract, Record, ScriptedSolver};

    fn deal_event(id: &str, provider: &str, duration: u64) -> Event {
        let record = Record::with_id(Cid::new(id))
            .with(fields::RESOURCE_PROVIDER_ADDRESS, provider)
            .with(fields::ACTUAL_HONEST_TIME_TO_COMPLETION, duration);
        Event::new(event_names::DEAL, record)
    }

    #[test]
    fn test_machine_add_then_remove() {
        let provider = ResourceProvider::new("P");
        let machine = Machine::new().with("gpus", 2);
        let id = machine.cid().unwrap();

        provider.add_machine(&id, machine.clone());
        assert_eq!(provider.get_machines().get(&id.hash), Some(&machine));

        assert_eq!(provider.remove_machine(&id.hash).unwrap(), machine);
        assert!(!provider.get_machines().contains_key(&id.hash));
        assert!(matches!(
            provider.remove_machine(&id.hash),
            Err(MarketError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_events_ignored() {
        let provider = ResourceProvider::new("P");
        let event = Event::new("mediation", Record::new());

        provider.handle_solver_event(&event).unwrap();
        provider.handle_smart_contract_event(&event).unwrap();
        assert!(provider.current_deals().is_empty());
    }

    #[test]
    fn test_deal_phases() {
        let provider = ResourceProvider::new("P");
        let ours = Cid::new("D1");
        let theirs = Cid::new("D2");

        assert_eq!(provider.deal_phase(&ours), DealPhase::Unseen);
        provider.handle_smart_contract_event(&deal_event("D1", "P", 5)).unwrap();
        provider.handle_smart_contract_event(&deal_event("D2", "Q", 5)).unwrap();

        assert_eq!(provider.deal_phase(&ours), DealPhase::Running { elapsed: 0 });
        assert_eq!(provider.deal_phase(&theirs), DealPhase::Foreign);
    }

    #[test]
    fn test_match_without_contract_is_not_connected() {
        let provider = ResourceProvider::new("P");
        let record = Record::with_id(Cid::new("M1"))
            .with(fields::RESOURCE_PROVIDER_ADDRESS, "P")
            .with(fields::TIMEOUT_DEPOSIT, 10u64);

        let err = provider
            .handle_solver_event(&Event::new(event_names::MATCH, record))
            .unwrap_err();
        assert!(matches!(err, MarketError::NotConnected(_)));
    }

    #[test]
    fn test_tick_reports_missing_duration() {
        let provider = ResourceProvider::new("P");
        let record = Record::with_id(Cid::new("D1")).with(fields::RESOURCE_PROVIDER_ADDRESS, "P");
        provider
            .handle_smart_contract_event(&Event::new(event_names::DEAL, record))
            .unwrap();

        let err = provider.update_job_running_times().unwrap_err();
        assert!(matches!(err, MarketError::MissingField(field) if field == fields::ACTUAL_HONEST_TIME_TO_COMPLETION));
    }

    #[test]
    fn test_reconnect_replaces_subscription() {
        let provider = ResourceProvider::new("P");
        let first = Rc::new(ScriptedSolver::new());
        let second = Rc::new(ScriptedSolver::new());

        provider.connect_to_solver("sim://first", first.clone());
        assert_eq!(first.events().subscriber_count(), 1);

        provider.connect_to_solver("sim://second", second.clone());
        assert_eq!(first.events().subscriber_count(), 0);
        assert_eq!(second.events().subscriber_count(), 1);
        assert_eq!(provider.solver_url().as_deref(), Some("sim://second"));

        let contract = Rc::new(LedgerContract::new());
        provider.connect_to_smart_contract(contract.clone());
        provider.connect_to_smart_contract(contract.clone());
        assert_eq!(contract.events().subscriber_count(), 1);
        assert!(provider.get_smart_contract().is_some());
    }

    #[test]
    fn test_dropped_provider_ignores_events() {
        let solver = Rc::new(ScriptedSolver::new());
        let provider = ResourceProvider::new("P");
        provider.connect_to_solver("sim://solver", solver.clone());
        drop(provider);

        solver.propose("P", "client", 10, 3).unwrap();
        assert_eq!(solver.events().dispatch_all().unwrap(), 1);
    }
}

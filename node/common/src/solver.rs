use tracing::info;
use crate::{
    events::{event_names, Event, EventBus, EventHandler, EventSource, Subscription},
    types::{fields, Match, Record},
    MarketError,
};

/// Matching service participants subscribe to
pub trait Solver: EventSource {}

/// Solver whose matches are chosen by the simulation driver
#[derive(Default)]
pub struct ScriptedSolver {
    events: EventBus,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Build a match between `resource_provider` and `client` and emit it
    pub fn propose(
        &self,
        resource_provider: &str,
        client: &str,
        timeout_deposit: u64,
        time_to_completion: u64,
    ) -> Result<Match, MarketError> {
        let mut record = Record::new()
            .with(fields::RESOURCE_PROVIDER_ADDRESS, resource_provider)
            .with(fields::CLIENT_ADDRESS, client)
            .with(fields::TIMEOUT_DEPOSIT, timeout_deposit)
            .with(fields::ACTUAL_HONEST_TIME_TO_COMPLETION, time_to_completion);
        record.set_id()?;

        let matched = Match::from(record);
        self.emit_match(&matched);
        Ok(matched)
    }

    pub fn emit_match(&self, matched: &Match) {
        if let Some(id) = matched.record().get_id() {
            info!("Solver emitting match {}", id);
        }
        self.events.publish(Event::new(event_names::MATCH, matched.record().clone()));
    }
}

impl EventSource for ScriptedSolver {
    fn subscribe_event(&self, handler: EventHandler) -> Subscription {
        self.events.subscribe(handler)
    }

    fn unsubscribe_event(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }
}

impl Solver for ScriptedSolver {}

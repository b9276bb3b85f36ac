use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::{info, warn};
use crate::{
    events::{event_names, Event, EventBus, EventHandler, EventSource, Subscription},
    types::{fields, Cid, Deal, JobResult, Match, Record, Tx},
    MarketError,
};

/// Smart contract surface used by marketplace participants
pub trait SmartContract: EventSource {
    /// Commit to a match, depositing `tx.value` as timeout collateral
    fn agree_to_match(&self, matched: &Match, tx: Tx) -> Result<(), MarketError>;

    /// Submit the result of a deal's job
    fn post_result(&self, result: &JobResult, tx: Tx) -> Result<(), MarketError>;
}

/// Agreement recorded by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Agreement {
    pub match_id: Cid,
    pub tx: Tx,
}

/// Result recorded by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct PostedResult {
    pub result: JobResult,
    pub tx: Tx,
}

#[derive(Default)]
struct Ledger {
    agreements: Vec<Agreement>,
    results: Vec<PostedResult>,
    deals: BTreeMap<Cid, Deal>,
    deal_for_match: BTreeMap<Cid, Cid>,
    deposits: BTreeMap<String, u64>,
    fees: BTreeMap<String, u64>,
}

/// In-memory contract for simulations.
///
/// Records every agreement and result, confirms the first sufficient
/// agreement per match with a `deal` event and announces accepted results
/// with a `result` event. Nothing settles: agreement deposits and result
/// fees accumulate in separate per-sender totals.
#[derive(Default)]
pub struct LedgerContract {
    events: EventBus,
    ledger: RefCell<Ledger>,
}

impl LedgerContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event stream of this contract
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn agreements(&self) -> Vec<Agreement> {
        self.ledger.borrow().agreements.clone()
    }

    pub fn posted_results(&self) -> Vec<PostedResult> {
        self.ledger.borrow().results.clone()
    }

    pub fn deals(&self) -> Vec<Deal> {
        self.ledger.borrow().deals.values().cloned().collect()
    }

    /// Total deposited by `sender` across all calls
    pub fn deposits_of(&self, sender: &str) -> u64 {
        self.ledger.borrow().deposits.get(sender).copied().unwrap_or(0)
    }

    /// Total paid by `sender` with accepted results
    pub fn fees_of(&self, sender: &str) -> u64 {
        self.ledger.borrow().fees.get(sender).copied().unwrap_or(0)
    }

    fn confirm(matched: &Match) -> Result<Deal, MarketError> {
        let mut record = Record::new();
        for (key, value) in matched.record().get_data() {
            record.add_data(key, value.clone());
        }
        record.add_data(fields::MATCH_ID, matched.id()?.hash.clone());
        record.set_id()?;
        Ok(Deal::from(record))
    }
}

impl EventSource for LedgerContract {
    fn subscribe_event(&self, handler: EventHandler) -> Subscription {
        self.events.subscribe(handler)
    }

    fn unsubscribe_event(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }
}

impl SmartContract for LedgerContract {
    fn agree_to_match(&self, matched: &Match, tx: Tx) -> Result<(), MarketError> {
        let match_id = matched.id()?.clone();
        let provider = matched.resource_provider_address()?;
        let required = matched.timeout_deposit()?;

        if tx.sender != provider {
            warn!("Rejected agreement from {} for match {}", tx.sender, match_id);
            return Err(MarketError::WrongSender { sender: tx.sender, id: match_id });
        }
        if tx.value < required {
            warn!("Rejected agreement for match {}: deposit {} < {}", match_id, tx.value, required);
            return Err(MarketError::InsufficientDeposit { required, offered: tx.value });
        }

        let mut ledger = self.ledger.borrow_mut();
        *ledger.deposits.entry(tx.sender.clone()).or_default() += tx.value;
        ledger.agreements.push(Agreement { match_id: match_id.clone(), tx });

        // Redelivered agreements keep their deposit but confirm nothing new
        if ledger.deal_for_match.contains_key(&match_id) {
            info!("Match {} already confirmed", match_id);
            return Ok(());
        }

        let deal = Self::confirm(matched)?;
        let deal_id = deal.id()?.clone();
        info!("Confirmed match {} as deal {}", match_id, deal_id);

        ledger.deal_for_match.insert(match_id, deal_id.clone());
        ledger.deals.insert(deal_id, deal.clone());
        drop(ledger);

        self.events.publish(Event::new(event_names::DEAL, deal.record().clone()));
        Ok(())
    }

    fn post_result(&self, result: &JobResult, tx: Tx) -> Result<(), MarketError> {
        let deal_id = result.deal_id()?;

        let mut ledger = self.ledger.borrow_mut();
        let deal = ledger
            .deals
            .get(&deal_id)
            .ok_or_else(|| MarketError::UnknownDeal(deal_id.clone()))?;
        if deal.resource_provider_address()? != tx.sender {
            warn!("Rejected result from {} for deal {}", tx.sender, deal_id);
            return Err(MarketError::WrongSender { sender: tx.sender, id: deal_id });
        }

        *ledger.fees.entry(tx.sender.clone()).or_default() += tx.value;
        ledger.results.push(PostedResult { result: result.clone(), tx });
        drop(ledger);

        info!("Accepted result for deal {}", deal_id);
        self.events.publish(Event::new(event_names::RESULT, result.record().clone()));
        Ok(())
    }
}

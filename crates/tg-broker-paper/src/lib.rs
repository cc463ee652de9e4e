//! Paper venue for the trading process and the watchdog.
//!
//! - One `PaperVenue` holds the account, positions, orders and fills.
//! - Each process connects with its own client id via [`PaperVenue::connect`].
//! - With a state file, every call reloads and rewrites the file (temp file
//!   plus rename), so two processes pointed at the same path see one venue.
//! - Placement is idempotent by client order id: a repeat returns the first
//!   ack without mutation.
//! - Faults (outage, latency, targeted rejections) can be injected for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tg_execution::{
    trade_id_of, AccountSnapshot, BrokerAdapter, BrokerError, BrokerOrderStatus, BrokerPosition,
    OpenOrder, PlaceOrderAck, PlaceOrderRequest,
};
use tg_schemas::{ContractDescriptor, FillReport};
use tokio::sync::Mutex;

mod state;

pub use state::{FillMode, PaperFill, PaperOrder, VenueState};

/// Account value a fresh venue file starts with.
pub const DEFAULT_PAPER_ACCOUNT_VALUE_MICROS: i64 = tg_schemas::usd(100_000);

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Injected misbehavior. Held in memory only; never written to the file.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Every call fails with `Unavailable` while set.
    pub down: bool,
    /// Scripted results for the next calls, consumed front to back.
    pub next_errors: VecDeque<BrokerError>,
    /// Placements whose client order id ends with any of these are rejected.
    pub reject_client_suffixes: Vec<String>,
    /// Sleep before answering every call.
    pub latency: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PaperVenue {
    state: Mutex<VenueState>,
    path: Option<PathBuf>,
    faults: Mutex<FaultPlan>,
}

impl PaperVenue {
    pub fn in_memory(account_value_micros: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(VenueState::new(account_value_micros)),
            path: None,
            faults: Mutex::new(FaultPlan::default()),
        })
    }

    /// Open the venue file at `path`, creating it with `initial_account_value_micros`
    /// when missing.
    pub fn open(path: impl AsRef<Path>, initial_account_value_micros: i64) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let st = match VenueState::load(&path)? {
            Some(st) => st,
            None => {
                let st = VenueState::new(initial_account_value_micros);
                st.save(&path)?;
                st
            }
        };
        Ok(Arc::new(Self {
            state: Mutex::new(st),
            path: Some(path),
            faults: Mutex::new(FaultPlan::default()),
        }))
    }

    /// Connection for one process.
    pub fn connect(self: &Arc<Self>, client_id: impl Into<String>) -> PaperBroker {
        PaperBroker {
            client_id: client_id.into(),
            venue: Arc::clone(self),
            atomic_multileg: false,
        }
    }

    /// Run `f` against the current state (reloaded from file if file-backed)
    /// and persist the result.
    pub async fn update<T>(&self, f: impl FnOnce(&mut VenueState) -> T) -> Result<T> {
        let mut st = self.state.lock().await;
        if let Some(path) = &self.path {
            if let Some(disk) = VenueState::load(path)? {
                *st = disk;
            }
        }
        let out = f(&mut st);
        if let Some(path) = &self.path {
            st.save(path)?;
        }
        Ok(out)
    }

    pub async fn snapshot(&self) -> Result<VenueState> {
        self.update(|st| st.clone()).await
    }

    pub async fn set_account_value(&self, micros: i64) -> Result<()> {
        self.update(|st| st.account_value_micros = micros).await
    }

    pub async fn set_fill_mode(&self, mode: FillMode) -> Result<()> {
        self.update(|st| st.fill_mode = mode).await
    }

    /// Seed or overwrite a position directly (test setup).
    pub async fn set_position(
        &self,
        contract: ContractDescriptor,
        quantity: i64,
        mark_price_micros: i64,
    ) -> Result<()> {
        self.update(|st| {
            let key = contract.occ_symbol();
            if quantity == 0 {
                st.positions.remove(&key);
            } else {
                st.positions.insert(
                    key,
                    BrokerPosition {
                        contract,
                        quantity,
                        mark_price_micros,
                    },
                );
            }
        })
        .await
    }

    /// Execute a working order at its limit prices. Returns `false` when the
    /// order is unknown or not working.
    pub async fn fill_working(&self, broker_order_id: &str) -> Result<bool> {
        self.update(|st| {
            let key = st
                .orders
                .iter()
                .find(|(_, o)| o.broker_order_id == broker_order_id)
                .map(|(k, _)| k.clone());
            match key {
                Some(k) if st.orders[&k].status == BrokerOrderStatus::Accepted => {
                    execute(st, &k);
                    true
                }
                _ => false,
            }
        })
        .await
    }

    pub async fn faults(&self) -> tokio::sync::MutexGuard<'_, FaultPlan> {
        self.faults.lock().await
    }

    pub async fn set_down(&self, down: bool) {
        self.faults.lock().await.down = down;
    }

    pub async fn fail_next(&self, e: BrokerError) {
        self.faults.lock().await.next_errors.push_back(e);
    }

    pub async fn reject_client_suffix(&self, suffix: impl Into<String>) {
        self.faults.lock().await.reject_client_suffixes.push(suffix.into());
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().await.latency = latency;
    }

    /// Apply injected latency and outage faults for one call.
    async fn gate_call(&self) -> Result<(), BrokerError> {
        let (latency, res) = {
            let mut f = self.faults.lock().await;
            let res = if f.down {
                Err(BrokerError::Unavailable("paper venue down".into()))
            } else if let Some(e) = f.next_errors.pop_front() {
                Err(e)
            } else {
                Ok(())
            };
            (f.latency, res)
        };
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        res
    }

    async fn io<T>(&self, f: impl FnOnce(&mut VenueState) -> T) -> Result<T, BrokerError> {
        self.update(f)
            .await
            .map_err(|e| BrokerError::Unavailable(format!("paper venue io: {e:#}")))
    }
}

/// Fill every leg of order `client_order_id` at its limit price.
fn execute(st: &mut VenueState, client_order_id: &str) {
    let Some(order) = st.orders.get(client_order_id).cloned() else {
        return;
    };
    let trade_id = trade_id_of(client_order_id)
        .unwrap_or(client_order_id)
        .to_string();
    for leg in &order.legs {
        st.apply_execution(leg, leg.limit_price_micros);
        st.next_fill_seq += 1;
        st.fills.push(PaperFill {
            owner: order.owner.clone(),
            report: FillReport {
                trade_id: trade_id.clone(),
                broker_order_id: order.broker_order_id.clone(),
                fill_id: format!("paper-fill-{}", st.next_fill_seq),
                contract_symbol: leg.contract.occ_symbol(),
                action: leg.action,
                quantity: leg.quantity,
                price_micros: leg.limit_price_micros,
                filled_at: Utc::now(),
            },
        });
    }
    if let Some(o) = st.orders.get_mut(client_order_id) {
        o.status = BrokerOrderStatus::Filled;
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaperBroker {
    client_id: String,
    venue: Arc<PaperVenue>,
    atomic_multileg: bool,
}

impl PaperBroker {
    /// Accept multi-leg orders as one atomic placement.
    pub fn with_atomic_multileg(mut self, atomic: bool) -> Self {
        self.atomic_multileg = atomic;
        self
    }

    pub fn venue(&self) -> &Arc<PaperVenue> {
        &self.venue
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn supports_atomic_multileg(&self) -> bool {
        self.atomic_multileg
    }

    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        self.venue.gate_call().await?;
        self.venue
            .io(|st| AccountSnapshot {
                account_value_micros: st.account_value_micros,
                buying_power_micros: st.buying_power_micros,
            })
            .await
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.venue.gate_call().await?;
        self.venue
            .io(|st| st.positions.values().cloned().collect())
            .await
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, BrokerError> {
        self.venue.gate_call().await?;
        self.venue
            .io(|st| {
                st.orders
                    .values()
                    .filter(|o| o.status == BrokerOrderStatus::Accepted)
                    .map(|o| OpenOrder {
                        broker_order_id: o.broker_order_id.clone(),
                        client_order_id: o.client_order_id.clone(),
                        legs: o.legs.clone(),
                        status: o.status,
                    })
                    .collect()
            })
            .await
    }

    async fn place_order(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderAck, BrokerError> {
        self.venue.gate_call().await?;
        if req.legs.is_empty() {
            return Err(BrokerError::Rejected("order has no legs".into()));
        }
        if req.legs.len() > 1 && !self.atomic_multileg {
            return Err(BrokerError::Rejected(
                "multi-leg orders not supported on this connection".into(),
            ));
        }
        let rejected = {
            let f = self.venue.faults.lock().await;
            f.reject_client_suffixes
                .iter()
                .any(|s| req.client_order_id.ends_with(s.as_str()))
        };

        let owner = self.client_id.clone();
        let ack = self
            .venue
            .io(move |st| -> Result<PlaceOrderAck, BrokerError> {
                if let Some(existing) = st.orders.get(&req.client_order_id) {
                    return Ok(PlaceOrderAck {
                        broker_order_id: existing.broker_order_id.clone(),
                        client_order_id: existing.client_order_id.clone(),
                        status: existing.status,
                    });
                }
                if rejected {
                    return Err(BrokerError::Rejected(format!(
                        "paper venue rejected {}",
                        req.client_order_id
                    )));
                }
                st.next_order_seq += 1;
                let broker_order_id = format!("paper-{}", st.next_order_seq);
                st.orders.insert(
                    req.client_order_id.clone(),
                    PaperOrder {
                        broker_order_id: broker_order_id.clone(),
                        client_order_id: req.client_order_id.clone(),
                        owner,
                        legs: req.legs.clone(),
                        status: BrokerOrderStatus::Accepted,
                    },
                );
                if st.fill_mode == FillMode::Immediate {
                    execute(st, &req.client_order_id);
                }
                let status = st.orders[&req.client_order_id].status;
                Ok(PlaceOrderAck {
                    broker_order_id,
                    client_order_id: req.client_order_id.clone(),
                    status,
                })
            })
            .await??;

        tracing::debug!(
            client_id = %self.client_id,
            client_order_id = %ack.client_order_id,
            broker_order_id = %ack.broker_order_id,
            status = ?ack.status,
            "paper order placed"
        );
        Ok(ack)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.venue.gate_call().await?;
        self.venue
            .io(|st| -> Result<(), BrokerError> {
                let order = st
                    .orders
                    .values_mut()
                    .find(|o| o.broker_order_id == broker_order_id)
                    .ok_or_else(|| BrokerError::Rejected(format!("unknown order {broker_order_id}")))?;
                match order.status {
                    BrokerOrderStatus::Accepted | BrokerOrderStatus::Canceled => {
                        order.status = BrokerOrderStatus::Canceled;
                        Ok(())
                    }
                    BrokerOrderStatus::Filled => Err(BrokerError::Rejected(format!(
                        "order {broker_order_id} already filled"
                    ))),
                }
            })
            .await?
    }

    async fn fills(&self) -> Result<Vec<FillReport>, BrokerError> {
        self.venue.gate_call().await?;
        let owner = self.client_id.clone();
        self.venue
            .io(move |st| {
                st.fills
                    .iter()
                    .filter(|f| f.owner == owner)
                    .map(|f| f.report.clone())
                    .collect()
            })
            .await
    }
}

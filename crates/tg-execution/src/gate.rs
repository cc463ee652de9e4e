//! Execution gate: the only path from an upstream order to the broker.
//!
//! Per order: derive the trade id, serialize on the symbol, load durable
//! risk state, snapshot the portfolio (positions plus working orders),
//! validate, persist VALIDATED, place, persist the outcome. Every path appends an audit event before returning.
//! Risk state is never touched by submission; only fills and closes move it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tg_audit::{AuditEventType, NewAuditEvent};
use tg_risk::{validate, worst_case_loss, Decision};
use tg_schemas::{
    FillReport, NewTradeRecord, Order, PortfolioView, ReasonCode, Rejection, RiskState,
    SafetyLimits, TradeOutcome, TradeRecord, OPTION_CONTRACT_MULTIPLIER,
};

use crate::alert::{raise, Alert, Alerter};
use crate::broker::{
    AccountSnapshot, BrokerAdapter, BrokerError, BrokerOrderStatus, BrokerPosition, OpenOrder,
    OrderLegRequest, PlaceOrderAck, PlaceOrderRequest,
};
use crate::ids::{
    combo_client_order_id, leg_client_order_id, trade_id, trade_id_of, unwind_client_order_id,
};
use crate::locks::SymbolLocks;
use crate::prices::{liquidating_limit_micros, DEFAULT_UNWIND_SLIPPAGE_BPS};
use crate::retry::{call_with_retry, RetryPolicy};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub success: bool,
    pub trade_id: String,
    pub broker_order_ids: Vec<String>,
    /// Stable code + message when `success` is false.
    pub error: Option<Rejection>,
    /// True when this result was replayed from an earlier submission.
    pub replayed: bool,
}

impl SubmitOutcome {
    fn ok(trade_id: String, broker_order_ids: Vec<String>) -> Self {
        Self {
            success: true,
            trade_id,
            broker_order_ids,
            error: None,
            replayed: false,
        }
    }

    fn failed(trade_id: String, error: Rejection) -> Self {
        Self {
            success: false,
            trade_id,
            broker_order_ids: Vec::new(),
            error: Some(error),
            replayed: false,
        }
    }

    pub fn code(&self) -> Option<ReasonCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Dry-run result: what `submit` would decide right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub trade_id: String,
    pub accepted: bool,
    pub rejection: Option<Rejection>,
    pub worst_case_loss_micros: i64,
    pub risk_state: RiskState,
    pub portfolio: PortfolioView,
}

/// Build the validator's portfolio view: gross market value per underlying.
pub fn portfolio_view(account: &AccountSnapshot, positions: &[BrokerPosition]) -> PortfolioView {
    positions.iter().fold(
        PortfolioView::new(account.account_value_micros),
        |view, p| {
            let value = i64::try_from(p.market_value_micros()).unwrap_or(i64::MAX);
            view.with_exposure(p.contract.underlying.clone(), value)
        },
    )
}

/// Gross notional of a working order no trade record accounts for, per
/// underlying.
fn with_working_order(view: PortfolioView, order: &OpenOrder) -> PortfolioView {
    order.legs.iter().fold(view, |view, leg| {
        let notional = leg.limit_price_micros as i128
            * leg.quantity.unsigned_abs() as i128
            * OPTION_CONTRACT_MULTIPLIER as i128;
        view.with_exposure(leg.contract.underlying.clone(), clamp_i64(notional))
    })
}

/// What the broker reports before the store is consulted.
struct BrokerSnapshot {
    account: AccountSnapshot,
    positions: Vec<BrokerPosition>,
    open_orders: Vec<OpenOrder>,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct ExecutionGate {
    pool: SqlitePool,
    broker: Arc<dyn BrokerAdapter>,
    alerter: Arc<dyn Alerter>,
    limits: SafetyLimits,
    retry: RetryPolicy,
    locks: SymbolLocks,
    unwind_slippage_bps: u32,
}

enum Placement {
    Submitted(Vec<PlaceOrderAck>),
    /// Nothing reached the venue.
    Failed(BrokerError),
    /// Legs `0..accepted.len()` were accepted, leg `accepted.len()` failed.
    Partial {
        accepted: Vec<PlaceOrderAck>,
        error: BrokerError,
    },
}

#[derive(Debug, Clone, Serialize)]
struct UnwindStep {
    leg_index: usize,
    broker_order_id: String,
    action: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    compensating_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ExecutionGate {
    pub fn new(
        pool: SqlitePool,
        broker: Arc<dyn BrokerAdapter>,
        alerter: Arc<dyn Alerter>,
        limits: SafetyLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            broker,
            alerter,
            limits,
            retry,
            locks: SymbolLocks::new(),
            unwind_slippage_bps: DEFAULT_UNWIND_SLIPPAGE_BPS,
        }
    }

    /// Slippage allowed when closing an already-filled leg of a failed
    /// multi-leg order.
    pub fn with_unwind_slippage_bps(mut self, bps: u32) -> Self {
        self.unwind_slippage_bps = bps;
        self
    }

    pub fn client_id(&self) -> &str {
        self.broker.client_id()
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let trade_id = trade_id(order)?;
        let _symbol_guard = self.locks.lock(&order.symbol).await;

        if let Some(prior) = self.replay(&trade_id).await? {
            tracing::info!(trade_id = %trade_id, success = prior.success, "submission replayed");
            return Ok(prior);
        }

        let state = tg_db::load_risk_state(&self.pool).await?;
        let portfolio = match self.fetch_broker_snapshot().await {
            Ok(snap) => self.portfolio(&snap).await?,
            Err(e) => return self.portfolio_unavailable(order, trade_id, e).await,
        };

        if let Decision::Reject(rejection) = validate(order, &state, &self.limits, &portfolio) {
            return self.reject(order, trade_id, rejection).await;
        }

        let now = Utc::now();
        tg_db::append_trade_record(
            &self.pool,
            &self.record(order, &trade_id, TradeOutcome::Validated, now),
            Some(
                self.event(now, AuditEventType::OrderValidated, &trade_id, json!({
                    "symbol": order.symbol,
                    "strategy": order.strategy,
                    "legs": order.legs.len(),
                    "worst_case_loss_micros": clamp_i64(worst_case_loss(order)),
                })),
            ),
        )
        .await?;
        tracing::info!(trade_id = %trade_id, symbol = %order.symbol, "order validated");

        match self.place(order, &trade_id).await {
            Placement::Submitted(acks) => self.submitted(order, trade_id, acks).await,
            Placement::Failed(e) => self.submit_failed(trade_id, e).await,
            Placement::Partial { accepted, error } => {
                self.partial_failure(order, trade_id, accepted, error).await
            }
        }
    }

    /// Validate against live state and portfolio without writing anything.
    pub async fn preview(&self, order: &Order) -> Result<Preview> {
        let trade_id = trade_id(order)?;
        let state = tg_db::load_risk_state(&self.pool).await?;
        let snap = self
            .fetch_broker_snapshot()
            .await
            .map_err(|e| anyhow!(e).context("preview: portfolio snapshot failed"))?;
        let portfolio = self.portfolio(&snap).await?;
        let decision = validate(order, &state, &self.limits, &portfolio);
        Ok(Preview {
            trade_id,
            accepted: decision.is_accept(),
            rejection: decision.rejection().cloned(),
            worst_case_loss_micros: clamp_i64(worst_case_loss(order)),
            risk_state: state,
            portfolio,
        })
    }

    /// Record one broker fill as a FILLED trade record. Returns `false` for a
    /// fill id that was already recorded.
    pub async fn record_fill(&self, fill: &FillReport) -> Result<bool> {
        let prior = tg_db::latest_trade_record(&self.pool, &fill.trade_id)
            .await?
            .ok_or_else(|| anyhow!("fill {} for unknown trade {}", fill.fill_id, fill.trade_id))?;

        let now = Utc::now();
        let filled = NewTradeRecord {
            trade_id: fill.trade_id.clone(),
            outcome: TradeOutcome::Filled,
            reason_code: None,
            reason: None,
            order: prior.order,
            broker_order_ids: vec![fill.broker_order_id.clone()],
            needs_review: false,
            recorded_at: now,
        };
        let ev = self.event(
            now,
            AuditEventType::FillRecorded,
            &fill.trade_id,
            serde_json::to_value(fill)?,
        );
        let stored = tg_db::insert_fill_once(&self.pool, fill, now, &filled, ev).await?;
        if stored.is_some() {
            tracing::info!(
                trade_id = %fill.trade_id,
                fill_id = %fill.fill_id,
                contract = %fill.contract_symbol,
                qty = fill.quantity,
                "fill recorded"
            );
        }
        Ok(stored.is_some())
    }

    /// Apply a closed trade's realized P&L to the fill-driven counters.
    /// `None` when this trade's close was already applied.
    pub async fn record_close(
        &self,
        trade_id: &str,
        realized_pnl_micros: i64,
    ) -> Result<Option<RiskState>> {
        let st = tg_db::record_realized_pnl(
            &self.pool,
            trade_id,
            realized_pnl_micros,
            Utc::now(),
            self.client_id(),
        )
        .await?;
        if let Some(st) = &st {
            tracing::info!(
                trade_id,
                realized_pnl_micros,
                daily_realized_loss_micros = st.daily_realized_loss_micros,
                consecutive_losses = st.consecutive_losses,
                "trade closed"
            );
        }
        Ok(st)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Earlier terminal outcome for this trade id, if any. A SUBMITTED trade
    /// replays its broker ids; a PARTIAL_FAILURE stays failed until reviewed.
    async fn replay(&self, trade_id: &str) -> Result<Option<SubmitOutcome>> {
        let records = tg_db::trade_records(&self.pool, trade_id).await?;
        let find = |o: TradeOutcome| records.iter().find(|r| r.outcome == o);

        if let Some(r) = find(TradeOutcome::Submitted) {
            return Ok(Some(SubmitOutcome {
                replayed: true,
                ..SubmitOutcome::ok(trade_id.to_string(), r.broker_order_ids.clone())
            }));
        }
        if let Some(r) = find(TradeOutcome::PartialFailure) {
            return Ok(Some(replayed_failure(trade_id, r)));
        }
        Ok(None)
    }

    async fn fetch_broker_snapshot(&self) -> Result<BrokerSnapshot, BrokerError> {
        let account = call_with_retry(&self.retry, "account", || self.broker.account()).await?;
        let positions = call_with_retry(&self.retry, "positions", || self.broker.positions()).await?;
        let open_orders =
            call_with_retry(&self.retry, "open_orders", || self.broker.open_orders()).await?;
        Ok(BrokerSnapshot {
            account,
            positions,
            open_orders,
        })
    }

    /// Held positions plus capital committed by orders still working at the
    /// venue. A working order counts its trade's `capital_required_micros`
    /// once per trade; orders with no trade record (flatten, foreign) count
    /// their gross notional.
    async fn portfolio(&self, snap: &BrokerSnapshot) -> Result<PortfolioView> {
        let mut view = portfolio_view(&snap.account, &snap.positions);
        let mut counted = HashSet::new();
        for o in &snap.open_orders {
            let record = match trade_id_of(&o.client_order_id) {
                Some(t) => {
                    if !counted.insert(t) {
                        continue;
                    }
                    tg_db::latest_trade_record(&self.pool, t).await?
                }
                None => None,
            };
            view = match record {
                Some(r) => view.with_exposure(r.order.symbol, r.order.capital_required_micros),
                None => with_working_order(view, o),
            };
        }
        Ok(view)
    }

    async fn portfolio_unavailable(
        &self,
        order: &Order,
        trade_id: String,
        e: BrokerError,
    ) -> Result<SubmitOutcome> {
        tracing::warn!(trade_id = %trade_id, symbol = %order.symbol, error = %e, "portfolio snapshot failed");
        let now = Utc::now();
        tg_db::append_audit_event(
            &self.pool,
            self.event(now, AuditEventType::BrokerUnavailable, &trade_id, json!({
                "stage": "portfolio",
                "error": e.to_string(),
            })),
        )
        .await?;
        Ok(SubmitOutcome::failed(
            trade_id,
            Rejection::new(ReasonCode::BrokerUnavailable, e.to_string()),
        ))
    }

    async fn reject(
        &self,
        order: &Order,
        trade_id: String,
        rejection: Rejection,
    ) -> Result<SubmitOutcome> {
        let now = Utc::now();
        let mut rec = self.record(order, &trade_id, TradeOutcome::Rejected, now);
        rec.reason_code = Some(rejection.code);
        rec.reason = Some(rejection.message.clone());
        tg_db::append_trade_record(
            &self.pool,
            &rec,
            Some(self.event(now, AuditEventType::OrderRejected, &trade_id, json!({
                "code": rejection.code.as_str(),
                "message": rejection.message,
                "symbol": order.symbol,
            }))),
        )
        .await?;
        tracing::info!(
            trade_id = %trade_id,
            symbol = %order.symbol,
            code = rejection.code.as_str(),
            "order rejected: {}",
            rejection.message
        );
        Ok(SubmitOutcome::failed(trade_id, rejection))
    }

    async fn place(&self, order: &Order, trade_id: &str) -> Placement {
        let leg_request = |i: usize| OrderLegRequest {
            action: order.legs[i].action,
            contract: order.legs[i].contract.clone(),
            quantity: order.legs[i].quantity,
            limit_price_micros: order.legs[i].price_micros,
        };

        if order.legs.len() > 1 && self.broker.supports_atomic_multileg() {
            let req = PlaceOrderRequest {
                client_order_id: combo_client_order_id(trade_id),
                legs: (0..order.legs.len()).map(leg_request).collect(),
            };
            return match self.place_one(&req).await {
                Ok(ack) => Placement::Submitted(vec![ack]),
                Err(e) => Placement::Failed(e),
            };
        }

        let mut accepted = Vec::with_capacity(order.legs.len());
        for i in 0..order.legs.len() {
            let req = PlaceOrderRequest {
                client_order_id: leg_client_order_id(trade_id, i),
                legs: vec![leg_request(i)],
            };
            match self.place_one(&req).await {
                Ok(ack) => accepted.push(ack),
                Err(error) if accepted.is_empty() => return Placement::Failed(error),
                Err(error) => return Placement::Partial { accepted, error },
            }
        }
        Placement::Submitted(accepted)
    }

    async fn place_one(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderAck, BrokerError> {
        call_with_retry(&self.retry, "place_order", || self.broker.place_order(req)).await
    }

    async fn submitted(
        &self,
        order: &Order,
        trade_id: String,
        acks: Vec<PlaceOrderAck>,
    ) -> Result<SubmitOutcome> {
        let ids: Vec<String> = acks.iter().map(|a| a.broker_order_id.clone()).collect();
        let now = Utc::now();
        let mut rec = self.record(order, &trade_id, TradeOutcome::Submitted, now);
        rec.broker_order_ids = ids.clone();
        tg_db::append_trade_record(
            &self.pool,
            &rec,
            Some(self.event(now, AuditEventType::OrderSubmitted, &trade_id, json!({
                "broker_order_ids": ids,
                "atomic": acks.len() == 1 && order.legs.len() > 1,
            }))),
        )
        .await?;
        tracing::info!(trade_id = %trade_id, broker_order_ids = ?ids, "order submitted");
        Ok(SubmitOutcome::ok(trade_id, ids))
    }

    /// Nothing was accepted: only VALIDATED remains, plus a SUBMIT_FAILED event.
    async fn submit_failed(&self, trade_id: String, e: BrokerError) -> Result<SubmitOutcome> {
        tracing::warn!(trade_id = %trade_id, error = %e, "submission failed before any leg was accepted");
        let code = e.reason_code();
        tg_db::append_audit_event(
            &self.pool,
            self.event(Utc::now(), AuditEventType::SubmitFailed, &trade_id, json!({
                "code": code.as_str(),
                "error": e.to_string(),
            })),
        )
        .await?;
        Ok(SubmitOutcome::failed(trade_id, Rejection::new(code, e.to_string())))
    }

    async fn partial_failure(
        &self,
        order: &Order,
        trade_id: String,
        accepted: Vec<PlaceOrderAck>,
        error: BrokerError,
    ) -> Result<SubmitOutcome> {
        let failed_leg = accepted.len();
        tracing::error!(
            trade_id = %trade_id,
            failed_leg,
            accepted_legs = accepted.len(),
            error = %error,
            "multi-leg order partially placed; unwinding"
        );

        let steps = self.unwind(order, &trade_id, &accepted).await;
        let mut ids: Vec<String> = accepted.iter().map(|a| a.broker_order_id.clone()).collect();
        ids.extend(steps.iter().filter_map(|s| s.compensating_order_id.clone()));
        let unwind_clean = steps.iter().all(|s| s.ok);

        let code = error.reason_code();
        let message = format!(
            "leg {failed_leg} failed after {} leg(s) accepted: {error}",
            accepted.len()
        );
        let now = Utc::now();
        let details = json!({
            "code": code.as_str(),
            "failed_leg": failed_leg,
            "error": error.to_string(),
            "unwind": steps,
            "unwind_clean": unwind_clean,
        });

        let mut rec = self.record(order, &trade_id, TradeOutcome::PartialFailure, now);
        rec.reason_code = Some(code);
        rec.reason = Some(message.clone());
        rec.broker_order_ids = ids.clone();
        rec.needs_review = true;
        tg_db::append_trade_record(
            &self.pool,
            &rec,
            Some(self.event(now, AuditEventType::OrderPartialFailure, &trade_id, details.clone())),
        )
        .await?;

        raise(
            self.alerter.as_ref(),
            Alert::critical(now, "PARTIAL_FAILURE", self.client_id(), message.clone())
                .with_trade_id(trade_id.clone())
                .with_details(details),
        )
        .await;

        Ok(SubmitOutcome {
            broker_order_ids: ids,
            ..SubmitOutcome::failed(trade_id, Rejection::new(code, message))
        })
    }

    /// Best effort: cancel legs still working, close legs already filled.
    async fn unwind(
        &self,
        order: &Order,
        trade_id: &str,
        accepted: &[PlaceOrderAck],
    ) -> Vec<UnwindStep> {
        let marks = if accepted.iter().any(|a| a.status == BrokerOrderStatus::Filled) {
            self.marks(trade_id).await
        } else {
            HashMap::new()
        };

        let mut steps = Vec::with_capacity(accepted.len());
        for (i, ack) in accepted.iter().enumerate() {
            let step = match ack.status {
                BrokerOrderStatus::Filled => {
                    let leg = &order.legs[i];
                    let action = leg.action.opposite();
                    let mark = marks
                        .get(&leg.contract.occ_symbol())
                        .copied()
                        .unwrap_or(leg.price_micros);
                    let req = PlaceOrderRequest {
                        client_order_id: unwind_client_order_id(trade_id, i),
                        legs: vec![OrderLegRequest {
                            action,
                            contract: leg.contract.clone(),
                            quantity: leg.quantity,
                            limit_price_micros: liquidating_limit_micros(
                                mark,
                                action,
                                self.unwind_slippage_bps,
                            ),
                        }],
                    };
                    match self.place_one(&req).await {
                        Ok(close) => UnwindStep {
                            leg_index: i,
                            broker_order_id: ack.broker_order_id.clone(),
                            action: "CLOSE",
                            ok: true,
                            compensating_order_id: Some(close.broker_order_id),
                            error: None,
                        },
                        Err(e) => UnwindStep {
                            leg_index: i,
                            broker_order_id: ack.broker_order_id.clone(),
                            action: "CLOSE",
                            ok: false,
                            compensating_order_id: None,
                            error: Some(e.to_string()),
                        },
                    }
                }
                BrokerOrderStatus::Accepted => {
                    let res = call_with_retry(&self.retry, "cancel_order", || {
                        self.broker.cancel_order(&ack.broker_order_id)
                    })
                    .await;
                    UnwindStep {
                        leg_index: i,
                        broker_order_id: ack.broker_order_id.clone(),
                        action: "CANCEL",
                        ok: res.is_ok(),
                        compensating_order_id: None,
                        error: res.err().map(|e| e.to_string()),
                    }
                }
                BrokerOrderStatus::Canceled => UnwindStep {
                    leg_index: i,
                    broker_order_id: ack.broker_order_id.clone(),
                    action: "NONE",
                    ok: true,
                    compensating_order_id: None,
                    error: None,
                },
            };
            if !step.ok {
                tracing::error!(
                    trade_id,
                    leg_index = i,
                    action = step.action,
                    error = step.error.as_deref().unwrap_or(""),
                    "unwind step failed"
                );
            }
            steps.push(step);
        }
        steps
    }

    /// Current per-contract marks. Empty when positions cannot be read; the
    /// unwind then prices off the entry limits.
    async fn marks(&self, trade_id: &str) -> HashMap<String, i64> {
        match call_with_retry(&self.retry, "positions", || self.broker.positions()).await {
            Ok(ps) => ps
                .into_iter()
                .map(|p| (p.contract_symbol(), p.mark_price_micros))
                .collect(),
            Err(e) => {
                tracing::warn!(trade_id, error = %e, "no marks for unwind; using entry limits");
                HashMap::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    fn record(
        &self,
        order: &Order,
        trade_id: &str,
        outcome: TradeOutcome,
        now: DateTime<Utc>,
    ) -> NewTradeRecord {
        NewTradeRecord {
            trade_id: trade_id.to_string(),
            outcome,
            reason_code: None,
            reason: None,
            order: order.clone(),
            broker_order_ids: Vec::new(),
            needs_review: false,
            recorded_at: now,
        }
    }

    fn event(
        &self,
        now: DateTime<Utc>,
        event_type: AuditEventType,
        trade_id: &str,
        payload: serde_json::Value,
    ) -> NewAuditEvent {
        NewAuditEvent::new(now, event_type, self.client_id(), payload).with_trade_id(trade_id)
    }
}

fn replayed_failure(trade_id: &str, r: &TradeRecord) -> SubmitOutcome {
    let code = r.reason_code.unwrap_or(ReasonCode::BrokerRejected);
    let message = format!(
        "trade needs review: {}",
        r.reason.as_deref().unwrap_or("partial failure")
    );
    SubmitOutcome {
        success: false,
        trade_id: trade_id.to_string(),
        broker_order_ids: r.broker_order_ids.clone(),
        error: Some(Rejection::new(code, message)),
        replayed: true,
    }
}

fn clamp_i64(v: i128) -> i64 {
    i64::try_from(v).unwrap_or(if v < 0 { i64::MIN } else { i64::MAX })
}

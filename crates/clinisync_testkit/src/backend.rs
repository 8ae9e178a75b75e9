//! Scripted fake of the clinic backend.
//!
//! [`FakeBackend`] implements [`RequestDispatcher`] with:
//!
//! - idempotent apply: a key that was applied once returns the stored
//!   acknowledgement and changes nothing
//! - a small rule set mirroring the real API (shifts, breaks, patients,
//!   sales, stock)
//! - a linearizable call log
//! - failure injection, both before and after apply

use async_trait::async_trait;
use clinisync_engine::{DispatchAck, DispatchError, RequestDispatcher};
use clinisync_protocol::{OperationId, OperationKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// How a call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// First application of the key.
    Applied,
    /// The key was applied before; nothing changed.
    Replayed,
    /// The backend applied the request but the caller saw a failure.
    AppliedThenFailed(DispatchError),
    /// The request was refused or failed.
    Failed(DispatchError),
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Position in the log.
    pub seq: usize,
    /// Operation kind.
    pub kind: OperationKind,
    /// Idempotency key.
    pub key: OperationId,
    /// Request body.
    pub payload: Value,
    /// Outcome.
    pub outcome: CallOutcome,
}

#[derive(Debug, Clone)]
enum Injected {
    Before(DispatchError),
    After(DispatchError),
}

#[derive(Debug, Default)]
struct State {
    reachable: bool,
    latency: Option<Duration>,
    injected: VecDeque<Injected>,
    log: Vec<CallRecord>,
    applied: HashMap<OperationId, DispatchAck>,
    applied_order: Vec<OperationId>,
    open_shifts: HashSet<String>,
    on_break: HashSet<String>,
    completed_shifts: HashMap<String, usize>,
    patients: Vec<Value>,
    sales: Vec<Value>,
    stock: HashMap<String, i64>,
}

/// In-process fake backend.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a reachable, empty backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                ..State::default()
            }),
        }
    }

    /// Makes every call fail as unreachable, or restores service.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Delays every dispatch.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Fails the next `count` calls with `error` without applying them.
    pub fn fail_next(&self, error: DispatchError, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.injected.push_back(Injected::Before(error.clone()));
        }
    }

    /// Applies the next call but reports `error` to the caller, the way a
    /// response lost on the wire looks.
    pub fn fail_next_after_apply(&self, error: DispatchError) {
        self.state.lock().injected.push_back(Injected::After(error));
    }

    /// Seeds stock for a SKU.
    pub fn set_stock(&self, sku: &str, quantity: i64) {
        self.state.lock().stock.insert(sku.to_string(), quantity);
    }

    /// Returns the call log.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().log.clone()
    }

    /// Returns the number of calls received.
    pub fn call_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Returns applied keys in the order they were first applied.
    pub fn applied_keys(&self) -> Vec<OperationId> {
        self.state.lock().applied_order.clone()
    }

    /// Returns how many times `key` was applied (0 or 1).
    pub fn apply_count(&self, key: OperationId) -> usize {
        self.state
            .lock()
            .applied_order
            .iter()
            .filter(|k| **k == key)
            .count()
    }

    /// Returns true if the employee has an open shift.
    pub fn is_clocked_in(&self, employee: &str) -> bool {
        self.state.lock().open_shifts.contains(employee)
    }

    /// Returns the number of completed shifts of an employee.
    pub fn completed_shifts(&self, employee: &str) -> usize {
        self.state
            .lock()
            .completed_shifts
            .get(employee)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the registered patients.
    pub fn patients(&self) -> Vec<Value> {
        self.state.lock().patients.clone()
    }

    /// Returns the recorded sales.
    pub fn sales(&self) -> Vec<Value> {
        self.state.lock().sales.clone()
    }

    /// Returns the stock of a SKU.
    pub fn stock(&self, sku: &str) -> i64 {
        self.state.lock().stock.get(sku).copied().unwrap_or(0)
    }

    fn handle(
        &self,
        kind: OperationKind,
        payload: &Value,
        key: OperationId,
    ) -> Result<DispatchAck, DispatchError> {
        let mut state = self.state.lock();
        let seq = state.log.len();
        let mut record = CallRecord {
            seq,
            kind,
            key,
            payload: payload.clone(),
            outcome: CallOutcome::Applied,
        };

        if !state.reachable {
            let err = DispatchError::Unreachable("connection refused".into());
            record.outcome = CallOutcome::Failed(err.clone());
            state.log.push(record);
            return Err(err);
        }

        let injected = state.injected.pop_front();
        if let Some(Injected::Before(err)) = &injected {
            record.outcome = CallOutcome::Failed(err.clone());
            state.log.push(record);
            return Err(err.clone());
        }

        if let Some(ack) = state.applied.get(&key).cloned() {
            record.outcome = CallOutcome::Replayed;
            state.log.push(record);
            return Ok(ack);
        }

        let result = apply(&mut state, kind, payload);
        match result {
            Ok(ack) => {
                state.applied.insert(key, ack.clone());
                state.applied_order.push(key);
                if let Some(Injected::After(err)) = injected {
                    record.outcome = CallOutcome::AppliedThenFailed(err.clone());
                    state.log.push(record);
                    return Err(err);
                }
                state.log.push(record);
                Ok(ack)
            }
            Err(err) => {
                record.outcome = CallOutcome::Failed(err.clone());
                state.log.push(record);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl RequestDispatcher for FakeBackend {
    async fn dispatch(
        &self,
        kind: OperationKind,
        payload: &Value,
        idempotency_key: &OperationId,
    ) -> Result<DispatchAck, DispatchError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.handle(kind, payload, *idempotency_key)
    }

    async fn probe(&self) -> Result<(), DispatchError> {
        if self.state.lock().reachable {
            Ok(())
        } else {
            Err(DispatchError::Unreachable("connection refused".into()))
        }
    }
}

fn text(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn employee(payload: &Value) -> Result<String, DispatchError> {
    text(payload, "employee_id").ok_or_else(|| DispatchError::Rejected("employee_id is required".into()))
}

fn apply(state: &mut State, kind: OperationKind, payload: &Value) -> Result<DispatchAck, DispatchError> {
    match kind {
        OperationKind::ClockIn => {
            let employee = employee(payload)?;
            if !state.open_shifts.insert(employee.clone()) {
                return Err(DispatchError::Conflict("already clocked in".into()));
            }
            Ok(DispatchAck::new(201, json!({"employee_id": employee, "status": "on_shift"})))
        }
        OperationKind::ClockOut => {
            let employee = employee(payload)?;
            if !state.open_shifts.remove(&employee) {
                return Err(DispatchError::Conflict("not clocked in".into()));
            }
            state.on_break.remove(&employee);
            *state.completed_shifts.entry(employee.clone()).or_insert(0) += 1;
            Ok(DispatchAck::new(200, json!({"employee_id": employee, "status": "completed"})))
        }
        OperationKind::BreakStart => {
            let employee = employee(payload)?;
            if !state.open_shifts.contains(&employee) {
                return Err(DispatchError::Conflict("not clocked in".into()));
            }
            if !state.on_break.insert(employee.clone()) {
                return Err(DispatchError::Conflict("already on break".into()));
            }
            Ok(DispatchAck::new(200, json!({"employee_id": employee, "status": "on_break"})))
        }
        OperationKind::BreakEnd => {
            let employee = employee(payload)?;
            if !state.on_break.remove(&employee) {
                return Err(DispatchError::Conflict("not on break".into()));
            }
            Ok(DispatchAck::new(200, json!({"employee_id": employee, "status": "on_shift"})))
        }
        OperationKind::PatientRegister => {
            if text(payload, "name").is_none() {
                return Err(DispatchError::Rejected("name is required".into()));
            }
            let id = state.patients.len() + 1;
            state.patients.push(payload.clone());
            Ok(DispatchAck::new(201, json!({"patient_id": id})))
        }
        OperationKind::PatientUpdate => {
            let exists = payload
                .get("patient_id")
                .and_then(Value::as_u64)
                .and_then(|id| usize::try_from(id).ok())
                .is_some_and(|id| id >= 1 && id <= state.patients.len());
            if !exists {
                return Err(DispatchError::Rejected("unknown patient".into()));
            }
            Ok(DispatchAck::new(200, json!({"updated": true})))
        }
        OperationKind::SaleCreate => {
            let has_items = payload
                .get("items")
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty());
            if !has_items {
                return Err(DispatchError::Rejected("sale has no items".into()));
            }
            state.sales.push(payload.clone());
            Ok(DispatchAck::new(201, json!({"sale_id": state.sales.len()})))
        }
        OperationKind::InventoryAdjust => {
            let sku = text(payload, "sku").ok_or_else(|| DispatchError::Rejected("sku is required".into()))?;
            let delta = payload
                .get("delta")
                .and_then(Value::as_i64)
                .ok_or_else(|| DispatchError::Rejected("delta is required".into()))?;
            let current = state.stock.get(&sku).copied().unwrap_or(0);
            if current + delta < 0 {
                return Err(DispatchError::Conflict("insufficient stock".into()));
            }
            state.stock.insert(sku.clone(), current + delta);
            Ok(DispatchAck::new(200, json!({"sku": sku, "quantity": current + delta})))
        }
    }
}

//! Property-based test generators using proptest.
//!
//! Provides strategies for operation kinds, payloads and whole queue
//! entries, plus scripts of operations the fake backend always accepts.

use clinisync_protocol::{
    FailureClass, LastError, OperationId, OperationKind, OperationStatus, PendingOperation,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

/// Strategy for operation ids.
pub fn operation_id_strategy() -> impl Strategy<Value = OperationId> {
    any::<u128>().prop_map(|bits| OperationId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for operation kinds.
pub fn operation_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop::sample::select(OperationKind::ALL.to_vec())
}

/// Strategy for operation statuses that can be persisted.
pub fn status_strategy() -> impl Strategy<Value = OperationStatus> {
    prop::sample::select(vec![
        OperationStatus::Queued,
        OperationStatus::InFlight,
        OperationStatus::FailedTransient,
        OperationStatus::FailedPermanent,
    ])
}

/// Strategy for small JSON payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z_]{1,12}").expect("Invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::from),
        ],
        0..6,
    )
    .prop_map(|fields| Value::Object(fields.into_iter().collect()))
}

/// Strategy for arbitrary queue entries.
pub fn pending_operation_strategy() -> impl Strategy<Value = PendingOperation> {
    (
        operation_id_strategy(),
        operation_kind_strategy(),
        payload_strategy(),
        0u64..4_000_000_000_000,
        any::<u64>(),
        0u32..20,
        status_strategy(),
        prop::option::of("[ -~]{0,40}"),
    )
        .prop_map(
            |(id, kind, payload, created_at_ms, sequence, attempt, status, message)| {
                let mut op = PendingOperation::new(id, kind, payload, created_at_ms, sequence);
                op.attempt = attempt;
                op.status = status;
                op.last_error = message.map(|m| LastError::new(FailureClass::Transient, m, created_at_ms));
                op
            },
        )
}

/// Strategy for a script of `len` operations the fake backend accepts in
/// any order: patient registrations, sales and stock receipts.
pub fn accepted_script_strategy(
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<(OperationKind, Value)>> {
    prop::collection::vec(
        prop_oneof![
            "[A-Z][a-z]{2,10}".prop_map(|name| (
                OperationKind::PatientRegister,
                json!({"name": name})
            )),
            ("[A-Z]{3}-[0-9]{2}", 1u32..10).prop_map(|(sku, qty)| (
                OperationKind::SaleCreate,
                json!({"items": [{"sku": sku, "qty": qty}]})
            )),
            ("[A-Z]{3}-[0-9]{2}", 1i64..50).prop_map(|(sku, delta)| (
                OperationKind::InventoryAdjust,
                json!({"sku": sku, "delta": delta})
            )),
        ],
        len,
    )
}

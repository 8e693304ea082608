use chrono::{DateTime, Utc};

/// A domain event: a fact that happened in the domain.
///
/// Events are immutable, serializable records emitted by aggregate
/// operations. They are written to the outbox in the same transaction as the
/// state change that produced them and dispatched asynchronously by a relay.
///
/// Events must be:
/// - **Serializable**: payloads are stored as JSON
/// - **Cloneable**: events are copied into outbox messages
/// - **Send + Sync + 'static**: events cross thread boundaries and own all
///   their data
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier.
    ///
    /// Used for routing and filtering by the relay and any consumer. The
    /// identifier should be stable (changing it breaks consumers of
    /// historical messages), descriptive, and namespaced with dot notation.
    ///
    /// Convention: `{module}.{aggregate}.{action}`
    /// (e.g. "ledger.account.charge_recorded").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    ///
    /// This is the domain time of the fact, not the time the row was
    /// persisted; the two can differ under retries or clock skew. The relay
    /// orders dispatch by this value.
    fn occurred_at(&self) -> DateTime<Utc>;
}

use rideledger_core::TenantId;

/// Helper trait for tenant-scoped messages.
///
/// Marks types carrying an associated tenant ID, enabling tenant-aware
/// processing in infrastructure components. Every domain event implements
/// this so outbox payloads always embed the tenant they belong to, and
/// relays can filter or validate by tenant as defense in depth.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

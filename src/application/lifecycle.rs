use chrono::Utc;

use crate::domain::{
    next_status, CustomerId, DomainEvent, InvoiceId, MoneyValue, ServiceDetails, ServiceEvent,
    ServiceId, ServiceRecord, ServiceStatus, ServiceStatusAudit,
};
use crate::storage::Repository;

use super::{CoreError, UnitOfWork};

#[derive(Debug, Clone)]
pub struct NewService {
    pub customer_id: CustomerId,
    pub cost: MoneyValue,
    pub sale: MoneyValue,
    pub details: ServiceDetails,
    pub note: Option<String>,
}

/// Drives service records through the lifecycle transition table and keeps
/// the append-only audit trail. Every successful transition writes its
/// audit row and buffers the status-change event in the same unit of work.
#[derive(Clone)]
pub struct ServiceLifecycle {
    repo: Repository,
}

impl ServiceLifecycle {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create a service in `Pending`, with a creation audit row
    /// (no previous status).
    pub async fn create_service(
        &self,
        uow: &mut UnitOfWork,
        new: NewService,
    ) -> Result<ServiceRecord, CoreError> {
        if new.cost.is_negative() || new.sale.is_negative() {
            return Err(CoreError::Validation(
                "service cost and sale must not be negative".into(),
            ));
        }

        let service = ServiceRecord::new(new.customer_id, new.cost, new.sale, new.details);
        self.repo.insert_service(uow.conn(), &service).await?;

        let audit = ServiceStatusAudit::new(
            service.id,
            None,
            ServiceStatus::Pending,
            service.created_at,
            new.note,
        );
        self.repo.insert_audit(uow.conn(), &audit).await?;

        Ok(service)
    }

    /// Apply a lifecycle event. An event outside the transition table
    /// fails with `InvalidTransition` and performs no mutation; a valid
    /// one persists the new status, appends the audit row, and buffers the
    /// `ServiceStatusChanged` event.
    pub async fn transition(
        &self,
        uow: &mut UnitOfWork,
        service_id: ServiceId,
        event: ServiceEvent,
        note: Option<String>,
    ) -> Result<ServiceRecord, CoreError> {
        let mut service = self.require_service(uow, service_id).await?;
        let new_status = next_status(service.status, event)?;
        let previous = service.status;

        self.repo
            .update_service_status(uow.conn(), service.id, new_status)
            .await?;

        let audit =
            ServiceStatusAudit::new(service.id, Some(previous), new_status, Utc::now(), note);
        self.repo.insert_audit(uow.conn(), &audit).await?;

        uow.defer_event(DomainEvent::ServiceStatusChanged {
            service_id: service.id,
            previous_status: Some(previous),
            new_status,
        });

        service.status = new_status;
        Ok(service)
    }

    /// Link the purchase invoice covering the service's cost. This is the
    /// business trigger that moves a pending service to `OnProgress`.
    pub async fn link_purchase_invoice(
        &self,
        uow: &mut UnitOfWork,
        service_id: ServiceId,
        invoice_id: InvoiceId,
        note: Option<String>,
    ) -> Result<ServiceRecord, CoreError> {
        // Validate the transition before touching the link.
        let service = self.require_service(uow, service_id).await?;
        next_status(service.status, ServiceEvent::PurchaseLinked)?;

        self.repo
            .link_service_purchase_invoice(uow.conn(), service_id, invoice_id)
            .await?;
        let mut service = self
            .transition(uow, service_id, ServiceEvent::PurchaseLinked, note)
            .await?;
        service.purchase_invoice_id = Some(invoice_id);
        Ok(service)
    }

    /// Link the sale invoice issued to the customer. No status effect.
    pub async fn link_sale_invoice(
        &self,
        uow: &mut UnitOfWork,
        service_id: ServiceId,
        invoice_id: InvoiceId,
    ) -> Result<ServiceRecord, CoreError> {
        let mut service = self.require_service(uow, service_id).await?;
        self.repo
            .link_service_sale_invoice(uow.conn(), service_id, invoice_id)
            .await?;
        service.sale_invoice_id = Some(invoice_id);
        Ok(service)
    }

    pub async fn get_service(&self, service_id: ServiceId) -> Result<ServiceRecord, CoreError> {
        let mut conn = self.repo.conn().await?;
        self.repo
            .get_service(&mut conn, service_id)
            .await?
            .ok_or(CoreError::ServiceNotFound(service_id))
    }

    /// The full audit trail for a service, oldest first.
    pub async fn history(
        &self,
        service_id: ServiceId,
    ) -> Result<Vec<ServiceStatusAudit>, CoreError> {
        let mut conn = self.repo.conn().await?;
        if self.repo.get_service(&mut conn, service_id).await?.is_none() {
            return Err(CoreError::ServiceNotFound(service_id));
        }
        Ok(self.repo.list_audits_for_service(&mut conn, service_id).await?)
    }

    async fn require_service(
        &self,
        uow: &mut UnitOfWork,
        service_id: ServiceId,
    ) -> Result<ServiceRecord, CoreError> {
        self.repo
            .get_service(uow.conn(), service_id)
            .await?
            .ok_or(CoreError::ServiceNotFound(service_id))
    }
}

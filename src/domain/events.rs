use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InvoiceId, MoneyValue, PaymentId, ServiceId, ServiceStatus};

/// Events handed to the notification collaborator after a unit of work
/// commits. Rolled-back work never produces an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ServiceStatusChanged {
        service_id: ServiceId,
        previous_status: Option<ServiceStatus>,
        new_status: ServiceStatus,
    },
    InvoiceBecameOverdue {
        invoice_id: InvoiceId,
        due_date: DateTime<Utc>,
    },
    PaymentAllocated {
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: MoneyValue,
    },
}

/// Receiver for committed domain events. Implementations must not block;
/// delivery happens on the committing task.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent);
}

/// Default sink: events are dropped.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &DomainEvent) {}
}

/// Collects events in memory; used by tests to observe delivery order.
#[derive(Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<DomainEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        let first = DomainEvent::ServiceStatusChanged {
            service_id: Uuid::new_v4(),
            previous_status: Some(ServiceStatus::Pending),
            new_status: ServiceStatus::OnProgress,
        };
        let second = DomainEvent::InvoiceBecameOverdue {
            invoice_id: Uuid::new_v4(),
            due_date: Utc::now(),
        };
        sink.publish(&first);
        sink.publish(&second);

        assert_eq!(sink.drain(), vec![first, second]);
        assert!(sink.is_empty());
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InvoiceId, MoneyValue};

pub type ServiceId = Uuid;
pub type CustomerId = Uuid;
pub type AuditId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Umrah,
    Visa,
    Ticket,
    Passport,
    Other,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Umrah => "umrah",
            ServiceType::Visa => "visa",
            ServiceType::Ticket => "ticket",
            ServiceType::Passport => "passport",
            ServiceType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "umrah" => Some(ServiceType::Umrah),
            "visa" => Some(ServiceType::Visa),
            "ticket" => Some(ServiceType::Ticket),
            "passport" => Some(ServiceType::Passport),
            "other" => Some(ServiceType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    OnProgress,
    Completed,
    Delivered,
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::OnProgress => "on_progress",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Delivered => "delivered",
            ServiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ServiceStatus::Pending),
            "on_progress" => Some(ServiceStatus::OnProgress),
            "completed" => Some(ServiceStatus::Completed),
            "delivered" => Some(ServiceStatus::Delivered),
            "cancelled" => Some(ServiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Delivered and cancelled services accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceStatus::Delivered | ServiceStatus::Cancelled)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business events that drive the service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A purchase invoice was linked to the service.
    PurchaseLinked,
    /// The business confirms the service was rendered.
    Complete,
    /// Delivery to the customer was confirmed.
    Deliver,
    /// Explicit cancellation.
    Cancel,
}

impl ServiceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEvent::PurchaseLinked => "purchase_linked",
            ServiceEvent::Complete => "complete",
            ServiceEvent::Deliver => "deliver",
            ServiceEvent::Cancel => "cancel",
        }
    }
}

/// The lifecycle transition table. Every (status, event) pair not listed
/// here is invalid; callers get the attempted pair back in the error.
pub fn next_status(
    current: ServiceStatus,
    event: ServiceEvent,
) -> Result<ServiceStatus, TransitionError> {
    use ServiceEvent::*;
    use ServiceStatus::*;

    match (current, event) {
        (Pending, PurchaseLinked) => Ok(OnProgress),
        (OnProgress, Complete) => Ok(Completed),
        (Completed, Deliver) => Ok(Delivered),
        (Pending | OnProgress | Completed, Cancel) => Ok(Cancelled),
        _ => Err(TransitionError { current, event }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub current: ServiceStatus,
    pub event: ServiceEvent,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition: event {} in status {}",
            self.event.as_str(),
            self.current
        )
    }
}

impl std::error::Error for TransitionError {}

/// Type-specific detail payload; exactly one variant per service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceDetails {
    Umrah(UmrahDetails),
    Visa(VisaDetails),
    Ticket(TicketDetails),
    Passport(PassportDetails),
    Other(OtherDetails),
}

impl ServiceDetails {
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceDetails::Umrah(_) => ServiceType::Umrah,
            ServiceDetails::Visa(_) => ServiceType::Visa,
            ServiceDetails::Ticket(_) => ServiceType::Ticket,
            ServiceDetails::Passport(_) => ServiceType::Passport,
            ServiceDetails::Other(_) => ServiceType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmrahDetails {
    pub package_name: String,
    pub group_number: Option<String>,
    pub departure_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisaDetails {
    pub visa_kind: String,
    pub destination_country: String,
    pub passport_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDetails {
    pub carrier: String,
    pub route: String,
    pub travel_date: Option<NaiveDate>,
    pub pnr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassportDetails {
    pub passport_kind: String,
    pub id_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherDetails {
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub customer_id: CustomerId,
    pub sale_invoice_id: Option<InvoiceId>,
    pub purchase_invoice_id: Option<InvoiceId>,
    pub cost: MoneyValue,
    pub sale: MoneyValue,
    pub status: ServiceStatus,
    pub details: ServiceDetails,
    pub created_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn new(
        customer_id: CustomerId,
        cost: MoneyValue,
        sale: MoneyValue,
        details: ServiceDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            sale_invoice_id: None,
            purchase_invoice_id: None,
            cost,
            sale,
            status: ServiceStatus::Pending,
            details,
            created_at: Utc::now(),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.details.service_type()
    }
}

/// Append-only audit record; one row per successful transition, plus a
/// creation row with no previous status. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusAudit {
    pub id: AuditId,
    pub service_id: ServiceId,
    pub previous_status: Option<ServiceStatus>,
    pub new_status: ServiceStatus,
    pub changed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl ServiceStatusAudit {
    pub fn new(
        service_id: ServiceId,
        previous_status: Option<ServiceStatus>,
        new_status: ServiceStatus,
        changed_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            previous_status,
            new_status,
            changed_at,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [ServiceStatus; 5] = [
        ServiceStatus::Pending,
        ServiceStatus::OnProgress,
        ServiceStatus::Completed,
        ServiceStatus::Delivered,
        ServiceStatus::Cancelled,
    ];

    const ALL_EVENTS: [ServiceEvent; 4] = [
        ServiceEvent::PurchaseLinked,
        ServiceEvent::Complete,
        ServiceEvent::Deliver,
        ServiceEvent::Cancel,
    ];

    #[test]
    fn test_happy_path() {
        let mut status = ServiceStatus::Pending;
        for event in [
            ServiceEvent::PurchaseLinked,
            ServiceEvent::Complete,
            ServiceEvent::Deliver,
        ] {
            status = next_status(status, event).unwrap();
        }
        assert_eq!(status, ServiceStatus::Delivered);
    }

    #[test]
    fn test_cancel_from_any_non_terminal_status() {
        for status in [
            ServiceStatus::Pending,
            ServiceStatus::OnProgress,
            ServiceStatus::Completed,
        ] {
            assert_eq!(
                next_status(status, ServiceEvent::Cancel).unwrap(),
                ServiceStatus::Cancelled
            );
        }
    }

    #[test]
    fn test_terminal_statuses_reject_every_event() {
        for status in [ServiceStatus::Delivered, ServiceStatus::Cancelled] {
            for event in ALL_EVENTS {
                assert_eq!(
                    next_status(status, event),
                    Err(TransitionError {
                        current: status,
                        event
                    })
                );
            }
        }
    }

    #[test]
    fn test_table_is_total_and_deterministic() {
        // Exactly 6 of the 20 (status, event) pairs are valid.
        let mut valid = 0;
        for status in ALL_STATUSES {
            for event in ALL_EVENTS {
                let first = next_status(status, event);
                assert_eq!(first, next_status(status, event));
                if first.is_ok() {
                    valid += 1;
                }
            }
        }
        assert_eq!(valid, 6);
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert!(next_status(ServiceStatus::Pending, ServiceEvent::Complete).is_err());
        assert!(next_status(ServiceStatus::Pending, ServiceEvent::Deliver).is_err());
        assert!(next_status(ServiceStatus::OnProgress, ServiceEvent::Deliver).is_err());
    }

    #[test]
    fn test_details_tag_matches_service_type() {
        let details = ServiceDetails::Visa(VisaDetails {
            visa_kind: "umrah".into(),
            destination_country: "SA".into(),
            passport_number: "P12345".into(),
        });
        assert_eq!(details.service_type(), ServiceType::Visa);
    }

    #[test]
    fn test_details_json_roundtrip() {
        let details = ServiceDetails::Ticket(TicketDetails {
            carrier: "Yemenia".into(),
            route: "SAH-JED".into(),
            travel_date: None,
            pnr: Some("ABC123".into()),
        });
        let json = serde_json::to_string(&details).unwrap();
        let back: ServiceDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn test_new_service_starts_pending() {
        use crate::domain::Currency;
        use rust_decimal_macros::dec;

        let service = ServiceRecord::new(
            Uuid::new_v4(),
            MoneyValue::new(dec!(800), Currency::Sar),
            MoneyValue::new(dec!(1000), Currency::Sar),
            ServiceDetails::Other(OtherDetails {
                summary: "Hotel booking".into(),
            }),
        );
        assert_eq!(service.status, ServiceStatus::Pending);
        assert_eq!(service.service_type(), ServiceType::Other);
    }
}

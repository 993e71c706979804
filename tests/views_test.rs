mod common;

use anyhow::Result;
use chrono::Utc;
use common::{account_id, draft_sale, other_details, parse_date, sar, test_core};
use rust_decimal_macros::dec;

use qayd::application::{NewPayment, NewService};
use qayd::domain::{
    system_codes, Direction, InvoiceDirection, InvoiceStatus, PaymentDirection, PaymentTerms,
    ServiceDetails, ServiceEvent, ServiceStatus, ServiceType, SettlementMethod, VisaDetails,
};

#[tokio::test]
async fn test_account_statement_lists_lines_in_posting_order() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let receivable = account_id(&core, system_codes::ACCOUNTS_RECEIVABLE).await?;

    let mut uow = core.coordinator.begin().await?;
    let mut new = draft_sale(sar(dec!(300)));
    new.issued_at = parse_date("2026-03-01");
    let invoice = core.invoices.create_draft(&mut uow, new).await?;
    core.invoices
        .post_invoice(&mut uow, invoice.id, parse_date("2026-03-01"))
        .await?;
    let payment = core
        .invoices
        .record_payment(
            &mut uow,
            NewPayment {
                direction: PaymentDirection::Receipt,
                settlement_method: SettlementMethod::Cash,
                amount: sar(dec!(120)),
                conversion_ratio: None,
                deferred: false,
                received_at: parse_date("2026-03-10"),
            },
        )
        .await?;
    core.allocator
        .allocate(&mut uow, payment.id, invoice.id, sar(dec!(120)), None)
        .await?;
    uow.commit().await?;

    let statement = core
        .views
        .account_statement(receivable, parse_date("2026-03-01"), parse_date("2026-04-01"))
        .await?;

    assert_eq!(statement.len(), 2);
    assert_eq!(statement[0].direction, Direction::Debit);
    assert_eq!(statement[0].amount.amount, dec!(300));
    assert_eq!(statement[1].direction, Direction::Credit);
    assert_eq!(statement[1].amount.amount, dec!(120));

    // Outside the window nothing shows up.
    let empty = core
        .views
        .account_statement(receivable, parse_date("2026-05-01"), parse_date("2026-06-01"))
        .await?;
    assert!(empty.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_sales_view_carries_allocation_arithmetic() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let mut uow = core.coordinator.begin().await?;
    let mut new = draft_sale(sar(dec!(500)));
    new.issued_at = parse_date("2026-03-05");
    let sale = core.invoices.create_draft(&mut uow, new).await?;
    core.invoices
        .post_invoice(&mut uow, sale.id, parse_date("2026-03-05"))
        .await?;

    let mut new = draft_sale(sar(dec!(200)));
    new.direction = InvoiceDirection::Purchase;
    new.issued_at = parse_date("2026-03-06");
    let purchase = core.invoices.create_draft(&mut uow, new).await?;
    core.invoices
        .post_invoice(&mut uow, purchase.id, parse_date("2026-03-06"))
        .await?;

    let payment = core
        .invoices
        .record_payment(
            &mut uow,
            NewPayment {
                direction: PaymentDirection::Receipt,
                settlement_method: SettlementMethod::BankTransfer,
                amount: sar(dec!(150)),
                conversion_ratio: None,
                deferred: false,
                received_at: parse_date("2026-03-07"),
            },
        )
        .await?;
    core.allocator
        .allocate(&mut uow, payment.id, sale.id, sar(dec!(150)), None)
        .await?;
    uow.commit().await?;

    let all = core
        .views
        .sales_view(parse_date("2026-03-01"), parse_date("2026-04-01"), None, None)
        .await?;
    assert_eq!(all.len(), 2);

    let sales_only = core
        .views
        .sales_view(
            parse_date("2026-03-01"),
            parse_date("2026-04-01"),
            Some(InvoiceDirection::Sale),
            None,
        )
        .await?;
    assert_eq!(sales_only.len(), 1);
    assert_eq!(sales_only[0].invoice.id, sale.id);
    assert_eq!(sales_only[0].allocated.amount, dec!(150));
    assert_eq!(sales_only[0].remaining.amount, dec!(350));

    let partially_paid = core
        .views
        .sales_view(
            parse_date("2026-03-01"),
            parse_date("2026-04-01"),
            None,
            Some(InvoiceStatus::PartiallyPaid),
        )
        .await?;
    assert_eq!(partially_paid.len(), 1);
    assert_eq!(partially_paid[0].invoice.id, sale.id);

    Ok(())
}

#[tokio::test]
async fn test_services_by_status_filters_on_both_axes() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let mut uow = core.coordinator.begin().await?;
    let umrah = core
        .lifecycle
        .create_service(
            &mut uow,
            NewService {
                customer_id: uuid::Uuid::new_v4(),
                cost: sar(dec!(3000)),
                sale: sar(dec!(4500)),
                details: other_details("umrah stand-in"),
                note: None,
            },
        )
        .await?;
    let visa = core
        .lifecycle
        .create_service(
            &mut uow,
            NewService {
                customer_id: uuid::Uuid::new_v4(),
                cost: sar(dec!(400)),
                sale: sar(dec!(650)),
                details: ServiceDetails::Visa(VisaDetails {
                    visa_kind: "tourist".to_string(),
                    destination_country: "SA".to_string(),
                    passport_number: "P1234567".to_string(),
                }),
                note: None,
            },
        )
        .await?;
    core.lifecycle
        .transition(&mut uow, visa.id, ServiceEvent::PurchaseLinked, None)
        .await?;
    uow.commit().await?;

    let all = core.views.services_by_status(None, None).await?;
    assert_eq!(all.len(), 2);

    let pending = core
        .views
        .services_by_status(None, Some(ServiceStatus::Pending))
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, umrah.id);

    let visas = core
        .views
        .services_by_status(Some(ServiceType::Visa), None)
        .await?;
    assert_eq!(visas.len(), 1);
    assert_eq!(visas[0].id, visa.id);
    assert_eq!(visas[0].status, ServiceStatus::OnProgress);

    let none = core
        .views
        .services_by_status(Some(ServiceType::Ticket), Some(ServiceStatus::Pending))
        .await?;
    assert!(none.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_chart_of_accounts_lists_the_seeded_chart() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let chart = core.views.chart_of_accounts().await?;
    assert_eq!(chart.len(), 6);
    assert!(chart.iter().all(|a| a.is_system));
    // Ordered by code.
    let codes: Vec<&str> = chart.iter().map(|a| a.code.as_str()).collect();
    let mut sorted = codes.clone();
    sorted.sort();
    assert_eq!(codes, sorted);

    Ok(())
}

#[tokio::test]
async fn test_purchase_invoice_posting_hits_cost_and_payable() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let cost = account_id(&core, system_codes::SERVICE_COST).await?;
    let payable = account_id(&core, system_codes::ACCOUNTS_PAYABLE).await?;

    let mut uow = core.coordinator.begin().await?;
    let invoice = core
        .invoices
        .create_draft(
            &mut uow,
            qayd::application::NewInvoice {
                direction: InvoiceDirection::Purchase,
                counterparty_id: uuid::Uuid::new_v4(),
                total: sar(dec!(1200)),
                payment_terms: PaymentTerms::Deferred,
                due_date: None,
                conversion_ratio: None,
                issued_at: Utc::now(),
            },
        )
        .await?;
    core.invoices
        .post_invoice(&mut uow, invoice.id, Utc::now())
        .await?;
    uow.commit().await?;

    let cost_balance = core
        .ledger
        .account_balance(cost, qayd::domain::Currency::Sar)
        .await?;
    let payable_balance = core
        .ledger
        .account_balance(payable, qayd::domain::Currency::Sar)
        .await?;
    assert_eq!(cost_balance.amount, dec!(1200));
    assert_eq!(payable_balance.amount, dec!(-1200));

    Ok(())
}

//! Invoice synthesis from billing terms and usage. Nothing here does I/O.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};

use crate::{
    clickup::BillingProfile,
    types::{Customer, Invoice, Line, NtRef, SalesItemLineDetail},
};

pub const MANAGED_SERVICES_ITEM: (&str, &str) = ("11", "Managed Automation Services");
pub const OVERAGE_ITEM: (&str, &str) = ("1010000001", "Runtime Overage Minutes");
/// "Net 0" sales term.
pub const SALES_TERM: &str = "1";

const LINE_DETAIL: &str = "SalesItemLineDetail";

/// A calendar month, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    first_of_month(first_of_month(date) + Days::new(31))
}

impl BillingPeriod {
    /// The month containing `date`.
    #[must_use]
    pub fn containing(date: NaiveDate) -> Self {
        let start = first_of_month(date);
        Self {
            start,
            end: first_of_next_month(start),
        }
    }

    /// The calendar month before the one containing `today`.
    #[must_use]
    pub fn prior_month(today: NaiveDate) -> Self {
        Self::containing(first_of_month(today) - Days::new(1))
    }

    /// Parses `YYYY-MM`.
    ///
    /// # Errors
    ///
    /// If `value` is not a valid year and month.
    pub fn parse(value: &str) -> Result<Self, chrono::ParseError> {
        let start = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")?;
        Ok(Self::containing(start))
    }

    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day inside the period.
    #[must_use]
    pub fn last_day(&self) -> NaiveDate {
        self.end - Days::new(1)
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let date = ts.date_naive();
        self.start <= date && date < self.end
    }

    /// "September 2025"
    #[must_use]
    pub fn label(&self) -> String {
        self.start.format("%B %Y").to_string()
    }

    /// "2025-09"
    #[must_use]
    pub fn key(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

#[must_use]
pub fn overage_minutes(total: u64, included: u64) -> u64 {
    total.saturating_sub(included)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Invoice date: the billing day of `today`'s month, clamped to the month's length.
#[must_use]
pub fn invoice_date(day_to_bill: u32, today: NaiveDate) -> NaiveDate {
    let start = first_of_month(today);
    let last = first_of_next_month(start) - Days::new(1);
    let day = start + Days::new(u64::from(day_to_bill.saturating_sub(1)));
    day.min(last)
}

fn service_description(profile: &BillingProfile, txn_date: NaiveDate) -> Option<String> {
    let kind = match (profile.service_type.as_deref(), profile.client_type.as_deref()) {
        (Some("Managed Service"), Some("Client")) => "Services",
        (Some("Managed Service"), Some("Client (Maintenance)")) => "Maintenance",
        _ => return None,
    };
    let through = txn_date
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(txn_date);
    Some(format!(
        "Managed Automation {kind} for the period from {} to {}.",
        txn_date.format("%B %d, %Y"),
        through.format("%B %d, %Y")
    ))
}

/// Builds the monthly invoice for one client.
///
/// The managed-services line always bills the monthly rate. An overage line is
/// added only when usage exceeds the included minutes.
#[must_use]
pub fn build_invoice(
    customer: &Customer,
    profile: &BillingProfile,
    usage_minutes: u64,
    period: &BillingPeriod,
    today: NaiveDate,
) -> Invoice {
    let txn_date = invoice_date(profile.day_to_bill, today);

    let mut line = vec![Line {
        description: service_description(profile, txn_date),
        amount: round_cents(profile.monthly_rate),
        detail_type: LINE_DETAIL.into(),
        sales_item_line_detail: Some(SalesItemLineDetail {
            item_ref: Some(NtRef::named(MANAGED_SERVICES_ITEM.0, MANAGED_SERVICES_ITEM.1)),
            ..Default::default()
        }),
        ..Default::default()
    }];

    let overage = overage_minutes(usage_minutes, profile.included_minutes);
    if overage > 0 {
        #[allow(clippy::cast_precision_loss)]
        let qty = overage as f64;
        line.push(Line {
            description: Some(format!("Runtime Overage for {}", period.label())),
            amount: round_cents(qty * profile.consumption_rate),
            detail_type: LINE_DETAIL.into(),
            sales_item_line_detail: Some(SalesItemLineDetail {
                item_ref: Some(NtRef::named(OVERAGE_ITEM.0, OVERAGE_ITEM.1)),
                unit_price: Some(profile.consumption_rate),
                qty: Some(qty),
            }),
            ..Default::default()
        });
    }

    Invoice {
        txn_date: Some(txn_date),
        due_date: Some(txn_date),
        line,
        customer_ref: Some(NtRef::new(customer.id.clone().unwrap_or_default())),
        sales_term_ref: Some(NtRef::new(SALES_TERM)),
        bill_email: customer.primary_email_addr.clone(),
        bill_email_cc: profile.billing_cc.as_deref().map(crate::types::Email::new),
        allow_ipn_payment: Some(true),
        allow_online_credit_card_payment: Some(false),
        allow_online_ach_payment: Some(true),
        ..Default::default()
    }
}

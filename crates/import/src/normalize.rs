use chrono::NaiveDate;
use kesef_core::{Direction, Money, NewTransaction, StatementId, TransactionKind};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::bank::BankProfile;
use crate::row::{RawRow, RowSkipReason};

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_bidi, r"[\u{200E}\u{200F}\u{202A}-\u{202E}\u{2066}-\u{2069}\u{061C}]");
re!(re_reference_prefix, r"^[\d\-\s]+");
re!(re_non_numeric, r"[^0-9.,\-]");
re!(re_decimal_comma, r"^-?\d*,\d{1,2}$");

pub const UNKNOWN_MERCHANT: &str = "Unknown Merchant";

/// Date layouts some exports use instead of `D/M/YYYY`.
const EXTRA_DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// Rewrite `D/M/YYYY` as `YYYY-MM-DD`. Anything that is not three
/// slash-separated parts is returned unchanged.
pub fn normalize_date(text: &str) -> String {
    let text = text.trim();
    let parts: Vec<&str> = text.split('/').map(str::trim).collect();
    let [day, month, year] = parts.as_slice() else {
        return text.to_string();
    };
    let year = if year.len() == 2 {
        format!("20{year}")
    } else {
        year.to_string()
    };
    format!("{year}-{month:0>2}-{day:0>2}")
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let normalized = normalize_date(text);
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            EXTRA_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text.trim(), fmt).ok())
        })
}

/// Strip direction marks and a leading reference number from a merchant string.
///
/// `"117-2712169/SuperMarket Co"` becomes `"SuperMarket Co"`.
pub fn clean_merchant(text: &str) -> String {
    let stripped = re_bidi().replace_all(text, "");
    let tail = stripped.rsplit('/').next().unwrap_or_default();
    let cleaned = re_reference_prefix().replace(tail, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        UNKNOWN_MERCHANT.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Keep digits, `-` and the separators, then parse what is left.
///
/// Whichever of `.` and `,` comes last is the decimal separator, so both
/// `"1,234.56"` and `"1.234,56"` read as 1234.56. A lone comma followed by
/// one or two digits (`"-23,10"`) is a decimal comma; any other comma or
/// repeated dot groups thousands.
pub fn parse_amount(text: &str) -> Result<Decimal, RowSkipReason> {
    let kept = re_non_numeric().replace_all(text, "");
    let cleaned = match (kept.rfind('.'), kept.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (None, Some(_)) if re_decimal_comma().is_match(&kept) => kept.replace(',', "."),
        (None, Some(_)) => kept.replace(',', ""),
        (Some(_), None) if kept.matches('.').count() > 1 => kept.replace('.', ""),
        _ => kept.into_owned(),
    };
    if cleaned.is_empty() {
        return Err(RowSkipReason::InvalidAmount(text.to_string()));
    }
    Decimal::from_str(&cleaned).map_err(|_| RowSkipReason::InvalidAmount(text.to_string()))
}

/// Amounts are stored as whole cents; anything that does not fit is unusable.
fn storable(amount: Money, text: &str) -> Result<Money, RowSkipReason> {
    match amount.to_cents() {
        Some(_) => Ok(amount),
        None => Err(RowSkipReason::InvalidAmount(text.to_string())),
    }
}

/// A row after normalization, before it is tied to a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub transaction_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub merchant_name: String,
    /// Description text as it appeared in the source, bidi marks removed.
    pub description: String,
    pub original_amount: Money,
    pub original_currency: String,
    pub amount_base: Money,
    pub direction: Direction,
    pub kind: TransactionKind,
    pub fee: Option<Money>,
    pub exchange_rate: Option<Decimal>,
    /// Category supplied by the extraction service, if any.
    pub category_hint: Option<String>,
}

impl NormalizedTransaction {
    pub fn into_new_transaction(
        self,
        owner: &str,
        statement_id: StatementId,
        category: String,
        source_bank: &str,
    ) -> NewTransaction {
        NewTransaction {
            owner: owner.to_string(),
            statement_id,
            transaction_date: self.transaction_date,
            payment_date: self.payment_date,
            merchant_name: self.merchant_name,
            category,
            original_amount: self.original_amount,
            original_currency: self.original_currency,
            amount_base: self.amount_base,
            direction: self.direction,
            kind: self.kind,
            fee: self.fee,
            exchange_rate: self.exchange_rate,
            description: Some(self.description),
            source_bank: Some(source_bank.to_string()),
        }
    }
}

pub struct Normalizer<'a> {
    profile: &'a BankProfile,
    default_currency: String,
}

impl<'a> Normalizer<'a> {
    pub fn new(profile: &'a BankProfile, default_currency: &str) -> Self {
        Self {
            profile,
            default_currency: default_currency.trim().to_uppercase(),
        }
    }

    fn direction(&self, row: &RawRow, kind: TransactionKind) -> Direction {
        if let Some(marker) = row.direction.as_deref() {
            if let Ok(direction) = Direction::from_str(marker) {
                return direction;
            }
            if let Some(direction) = self.profile.direction_of(marker) {
                return direction;
            }
        }
        match (&row.details, kind) {
            (Some(_), TransactionKind::Refund) => Direction::Income,
            _ => Direction::Expense,
        }
    }

    pub fn normalize(&self, row: &RawRow) -> Result<NormalizedTransaction, RowSkipReason> {
        let transaction_date =
            parse_date(&row.date).ok_or_else(|| RowSkipReason::InvalidDate(row.date.clone()))?;
        let amount = parse_amount(&row.amount)?;
        let original_amount = storable(Money::from_decimal(amount).abs(), &row.amount)?;

        let kind = row
            .details
            .as_ref()
            .map(|d| d.kind)
            .unwrap_or_default();
        let direction = self.direction(row, kind);

        let original_currency = row
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.default_currency.clone());

        let description = re_bidi().replace_all(&row.description, "").trim().to_string();

        let mut normalized = NormalizedTransaction {
            transaction_date,
            payment_date: None,
            merchant_name: clean_merchant(&row.description),
            description,
            original_amount,
            original_currency,
            amount_base: original_amount,
            direction,
            kind,
            fee: None,
            exchange_rate: None,
            category_hint: None,
        };

        if let Some(details) = &row.details {
            if let Some(base) = details.amount_base {
                normalized.amount_base =
                    storable(Money::from_decimal(base).abs(), &base.to_string())?;
            }
            let payment_date = details.payment_date.as_deref().and_then(|d| {
                let parsed = parse_date(d);
                if parsed.is_none() {
                    tracing::debug!(line = row.line, payment_date = d, "ignoring unparseable payment date");
                }
                parsed
            });
            normalized.payment_date = payment_date.or(Some(transaction_date));
            normalized.fee = details
                .fee
                .map(|f| storable(Money::from_decimal(f).abs(), &f.to_string()))
                .transpose()?;
            normalized.exchange_rate = details.exchange_rate;
            normalized.category_hint = details
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
        }

        Ok(normalized)
    }
}

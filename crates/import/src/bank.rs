//! Per-bank export layouts.
//!
//! A profile names the header vocabulary a bank's export tool uses and the
//! column positions to fall back on when a header is missing or renamed. Exports
//! vary in header presence and order across banks but are positionally stable
//! within one bank's tool.

use kesef_core::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::fold_key;

pub const UNKNOWN_BANK: &str = "Unknown Bank";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub date: Vec<String>,
    pub description: Vec<String>,
    pub amount: Vec<String>,
    pub currency: Vec<String>,
    pub direction: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnPositions {
    pub date: usize,
    pub description: usize,
    pub amount: usize,
    #[serde(default)]
    pub currency: Option<usize>,
    #[serde(default)]
    pub direction: Option<usize>,
}

impl Default for ColumnPositions {
    fn default() -> Self {
        Self {
            date: 0,
            description: 3,
            amount: 4,
            currency: Some(5),
            direction: Some(6),
        }
    }
}

/// Column indices resolved for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: usize,
    pub description: usize,
    pub amount: usize,
    pub currency: Option<usize>,
    pub direction: Option<usize>,
}

impl ColumnMap {
    /// Number of fields a row needs before its date, description and amount can be read.
    pub fn required_fields(&self) -> usize {
        self.date.max(self.description).max(self.amount) + 1
    }
}

fn default_min_fields() -> usize {
    4
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankProfile {
    pub name: String,
    #[serde(default)]
    pub file_name_markers: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub aliases: ColumnAliases,
    #[serde(default)]
    pub fallback: ColumnPositions,
    #[serde(default = "default_min_fields")]
    pub min_fields: usize,
    #[serde(default)]
    pub income_markers: Vec<String>,
    #[serde(default)]
    pub expense_markers: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl BankProfile {
    /// Profile used for banks without a dedicated entry.
    pub fn generic() -> Self {
        BankProfile {
            name: UNKNOWN_BANK.to_string(),
            file_name_markers: Vec::new(),
            delimiter: ',',
            aliases: ColumnAliases {
                date: strings(&["date", "transaction date", "תאריך תנועה", "תאריך"]),
                description: strings(&["description", "merchant", "details", "תיאור"]),
                amount: strings(&["amount", "transaction amount", "סכום פעולה", "סכום"]),
                currency: strings(&["currency", "מטבע"]),
                direction: strings(&["direction", "debit/credit", "חיוב/זיכוי"]),
            },
            fallback: ColumnPositions::default(),
            min_fields: default_min_fields(),
            income_markers: strings(&["זיכוי", "credit", "income"]),
            expense_markers: strings(&["חיוב", "debit", "expense"]),
        }
    }

    pub fn one_zero() -> Self {
        BankProfile {
            name: "One Zero".to_string(),
            file_name_markers: strings(&["One_Zero", "OneZero"]),
            aliases: ColumnAliases {
                date: strings(&["תאריך תנועה", "transaction date"]),
                description: strings(&["תיאור", "description"]),
                amount: strings(&["סכום פעולה", "amount"]),
                currency: strings(&["מטבע", "currency"]),
                direction: strings(&["חיוב/זיכוי", "direction"]),
            },
            ..Self::generic()
        }
    }

    pub fn millennium_bcp() -> Self {
        BankProfile {
            name: "Millennium BCP".to_string(),
            file_name_markers: strings(&["Millennium", "BCP"]),
            aliases: ColumnAliases {
                date: strings(&["data lançamento", "data movimento", "date"]),
                description: strings(&["descrição", "description"]),
                amount: strings(&["montante", "amount"]),
                currency: strings(&["moeda", "currency"]),
                direction: strings(&["tipo", "direction"]),
            },
            fallback: ColumnPositions {
                date: 0,
                description: 2,
                amount: 3,
                currency: None,
                direction: Some(4),
            },
            income_markers: strings(&["crédito", "credito", "credit"]),
            expense_markers: strings(&["débito", "debito", "debit"]),
            ..Self::generic()
        }
    }

    /// Header-name matching first, then this bank's positional fallback for any
    /// column the header did not name.
    pub fn resolve_columns(&self, header: &[String]) -> ColumnMap {
        let find = |aliases: &[String]| -> Option<usize> {
            let folded: Vec<String> = aliases.iter().map(|a| fold_key(a)).collect();
            header
                .iter()
                .position(|h| folded.iter().any(|a| *a == fold_key(h)))
        };

        ColumnMap {
            date: find(&self.aliases.date).unwrap_or(self.fallback.date),
            description: find(&self.aliases.description).unwrap_or(self.fallback.description),
            amount: find(&self.aliases.amount).unwrap_or(self.fallback.amount),
            currency: find(&self.aliases.currency).or(self.fallback.currency),
            direction: find(&self.aliases.direction).or(self.fallback.direction),
        }
    }

    /// Interpret a debit/credit marker. `None` when the marker is unrecognised.
    pub fn direction_of(&self, marker: &str) -> Option<Direction> {
        let marker = fold_key(marker);
        if marker.is_empty() {
            return None;
        }
        let hit = |markers: &[String]| markers.iter().any(|m| marker.contains(&fold_key(m)));
        if hit(&self.income_markers) {
            Some(Direction::Income)
        } else if hit(&self.expense_markers) {
            Some(Direction::Expense)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum BankConfigError {
    #[error("Failed to parse bank profiles: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Bank profile has an empty name")]
    EmptyName,
}

#[derive(Deserialize)]
struct BankFile {
    #[serde(default)]
    bank: Vec<BankProfile>,
}

/// Profiles selectable by a statement's declared bank name.
#[derive(Debug, Clone)]
pub struct BankRegistry {
    profiles: Vec<BankProfile>,
    generic: BankProfile,
}

impl Default for BankRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BankRegistry {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![BankProfile::one_zero(), BankProfile::millennium_bcp()],
            generic: BankProfile::generic(),
        }
    }

    /// Built-in profiles overlaid with `[[bank]]` tables; a table whose name
    /// matches a built-in replaces it.
    pub fn from_toml(toml_content: &str) -> Result<Self, BankConfigError> {
        let file: BankFile = toml::from_str(toml_content)?;
        let mut registry = Self::builtin();
        for profile in file.bank {
            registry.insert(profile)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, profile: BankProfile) -> Result<(), BankConfigError> {
        if profile.name.trim().is_empty() {
            return Err(BankConfigError::EmptyName);
        }
        let key = fold_key(&profile.name);
        self.profiles.retain(|p| fold_key(&p.name) != key);
        self.profiles.push(profile);
        Ok(())
    }

    pub fn get(&self, bank_name: &str) -> &BankProfile {
        let key = fold_key(bank_name);
        self.profiles
            .iter()
            .find(|p| fold_key(&p.name) == key)
            .unwrap_or(&self.generic)
    }

    /// Guess the bank from an uploaded file's name.
    pub fn detect_from_file_name(&self, file_name: &str) -> &str {
        self.profiles
            .iter()
            .find(|p| p.file_name_markers.iter().any(|m| file_name.contains(m.as_str())))
            .map(|p| p.name.as_str())
            .unwrap_or(UNKNOWN_BANK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        strings(cols)
    }

    #[test]
    fn hebrew_headers_resolve_exactly() {
        let p = BankProfile::one_zero();
        let cols = p.resolve_columns(&header(&[
            "תאריך ערך",
            "תאריך תנועה",
            "תיאור",
            "סכום פעולה",
            "מטבע",
            "חיוב/זיכוי",
        ]));
        // "תאריך ערך" (value date) must not be taken as the transaction date.
        assert_eq!(cols.date, 1);
        assert_eq!(cols.description, 2);
        assert_eq!(cols.amount, 3);
        assert_eq!(cols.currency, Some(4));
        assert_eq!(cols.direction, Some(5));
    }

    #[test]
    fn unknown_headers_fall_back_to_positions() {
        let p = BankProfile::one_zero();
        let cols = p.resolve_columns(&header(&["a", "b", "c", "d", "e", "f", "g"]));
        assert_eq!(
            cols,
            ColumnMap {
                date: 0,
                description: 3,
                amount: 4,
                currency: Some(5),
                direction: Some(6),
            }
        );
        assert_eq!(cols.required_fields(), 5);
    }

    #[test]
    fn partial_header_mixes_match_and_fallback() {
        let p = BankProfile::generic();
        let cols = p.resolve_columns(&header(&[
            "date", "x", "y", "Description", "AMOUNT", "currency", "direction",
        ]));
        assert_eq!(cols.date, 0);
        assert_eq!(cols.description, 3);
        assert_eq!(cols.amount, 4);
        assert_eq!(cols.currency, Some(5));
        assert_eq!(cols.direction, Some(6));
    }

    #[test]
    fn direction_markers() {
        let p = BankProfile::generic();
        assert_eq!(p.direction_of("זיכוי"), Some(Direction::Income));
        assert_eq!(p.direction_of(" Credit "), Some(Direction::Income));
        assert_eq!(p.direction_of("חיוב"), Some(Direction::Expense));
        assert_eq!(p.direction_of("???"), None);
        assert_eq!(p.direction_of(""), None);
    }

    #[test]
    fn registry_lookup_is_case_insensitive_with_generic_fallback() {
        let r = BankRegistry::builtin();
        assert_eq!(r.get("one zero").name, "One Zero");
        assert_eq!(r.get("Some Other Bank").name, UNKNOWN_BANK);
    }

    #[test]
    fn detect_bank_from_file_name() {
        let r = BankRegistry::builtin();
        assert_eq!(r.detect_from_file_name("One_Zero_2024_03.csv"), "One Zero");
        assert_eq!(r.detect_from_file_name("extrato_Millennium.csv"), "Millennium BCP");
        assert_eq!(r.detect_from_file_name("statement.csv"), UNKNOWN_BANK);
    }

    #[test]
    fn toml_profiles_overlay_builtins() {
        let toml = r#"
            [[bank]]
            name = "Leumi"
            file_name_markers = ["leumi"]
            min_fields = 5

            [bank.aliases]
            date = ["תאריך"]

            [bank.fallback]
            date = 0
            description = 1
            amount = 2

            [[bank]]
            name = "One Zero"
            [bank.fallback]
            date = 1
            description = 2
            amount = 3
        "#;
        let r = BankRegistry::from_toml(toml).unwrap();
        let leumi = r.get("leumi");
        assert_eq!(leumi.min_fields, 5);
        assert_eq!(leumi.delimiter, ',');
        assert_eq!(leumi.fallback.currency, None);
        assert_eq!(r.get("One Zero").fallback.date, 1);
        assert_eq!(r.detect_from_file_name("leumi-2024.csv"), "Leumi");
    }

    #[test]
    fn toml_rejects_empty_name() {
        let toml = "[[bank]]\nname = \"  \"\n";
        assert!(matches!(
            BankRegistry::from_toml(toml),
            Err(BankConfigError::EmptyName)
        ));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<i64>,
    pub name: String,
    /// Icon identifier understood by the presentation layer.
    pub icon: String,
    pub color: String,
    /// At most one level of nesting.
    pub parent: Option<String>,
}

impl Category {
    pub fn new(name: &str, icon: &str, color: &str) -> Self {
        Category {
            id: None,
            name: name.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            parent: None,
        }
    }
}

/// Fallback label for unmatched expenses.
pub const OTHER: &str = "Other";
/// Fallback label for unmatched income.
pub const OTHER_INCOME: &str = "Other Income";

/// (name, icon, color, parent)
pub const DEFAULT_CATEGORIES: &[(&str, &str, &str, Option<&str>)] = &[
    ("Salary", "Briefcase", "hsl(142, 71%, 45%)", None),
    (OTHER_INCOME, "MoreHorizontal", "hsl(160, 60%, 45%)", None),
    ("Credit Card Payment", "Building", "hsl(221, 83%, 53%)", None),
    ("Loan Payment", "Building", "hsl(262, 83%, 58%)", None),
    ("Bank Fees", "Building", "hsl(0, 72%, 51%)", None),
    ("Transfer", "MoreHorizontal", "hsl(199, 89%, 48%)", None),
    ("Transportation", "Car", "hsl(25, 95%, 53%)", None),
    ("Accommodation", "Hotel", "hsl(280, 65%, 60%)", None),
    ("Shopping", "ShoppingBag", "hsl(330, 81%, 60%)", None),
    ("Food & Dining", "UtensilsCrossed", "hsl(38, 92%, 50%)", None),
    ("Groceries", "ShoppingBag", "hsl(84, 81%, 44%)", Some("Food & Dining")),
    ("Services", "Briefcase", "hsl(173, 58%, 39%)", None),
    ("Entertainment", "Film", "hsl(291, 64%, 42%)", None),
    ("Travel", "Plane", "hsl(204, 94%, 44%)", None),
    ("Co-working", "Laptop", "hsl(215, 25%, 27%)", Some("Services")),
    ("Health & Wellness", "Heart", "hsl(350, 89%, 60%)", None),
    ("Technology", "Laptop", "hsl(243, 75%, 59%)", None),
    (OTHER, "MoreHorizontal", "hsl(215, 20%, 65%)", None),
];

//! Pricing calculator.
//!
//! Picks the cheapest usable tier for a [`DateRange`]:
//!
//! ```text
//! d = end - start + 1
//!
//! tier     unit days   eligible when
//! daily    1           always
//! weekly   7           d >= 7
//! monthly  30          d >= 30
//!
//! amount(tier) = ceil(d / unit_days) * price(tier)
//! ```
//!
//! A tier is usable only when it is enabled and carries a positive price. Ties go to the
//! coarser tier (monthly, then weekly, then daily).

use crate::types::{DateRange, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pricing failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingError {
    /// Every eligible tier is disabled or unpriced
    #[error("No pricing available for the requested range")]
    NoPricingAvailable,
}

/// Billing granularity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingTier {
    /// Per day
    Daily,
    /// Per 7 days
    Weekly,
    /// Per 30 days
    Monthly,
}

impl PricingTier {
    /// Coarsest first; this is also the tie-break order.
    pub const PREFERENCE: [Self; 3] = [Self::Monthly, Self::Weekly, Self::Daily];

    /// Days covered by one unit of this tier
    #[must_use]
    pub const fn unit_days(&self) -> u32 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }

    /// Shortest range this tier may price
    #[must_use]
    pub const fn min_days(&self) -> u32 {
        self.unit_days()
    }

    /// Whether a range of `days` satisfies the minimum duration
    #[must_use]
    pub const fn is_eligible(&self, days: u32) -> bool {
        days >= self.min_days()
    }

    /// Units billed for `days`, rounded up
    #[must_use]
    pub const fn units_for(&self, days: u32) -> u32 {
        days.div_ceil(self.unit_days())
    }

    /// String form used in API responses
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// One tier in a merchant price table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPrice {
    /// Merchant toggle
    pub enabled: bool,
    /// Price per unit, absent when never configured
    pub price: Option<Money>,
}

impl TierPrice {
    /// Enabled tier with the given price
    #[must_use]
    pub const fn enabled(price: Money) -> Self {
        Self {
            enabled: true,
            price: Some(price),
        }
    }

    /// Unit price when the tier may be used
    #[must_use]
    pub fn usable_price(&self) -> Option<Money> {
        self.price.filter(|p| self.enabled && !p.is_zero())
    }
}

/// Merchant-defined daily/weekly/monthly prices for a resource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    /// Daily tier
    #[serde(default)]
    pub daily: TierPrice,
    /// Weekly tier
    #[serde(default)]
    pub weekly: TierPrice,
    /// Monthly tier
    #[serde(default)]
    pub monthly: TierPrice,
}

impl PriceTable {
    /// Empty table: nothing enabled
    #[must_use]
    pub const fn new() -> Self {
        Self {
            daily: TierPrice {
                enabled: false,
                price: None,
            },
            weekly: TierPrice {
                enabled: false,
                price: None,
            },
            monthly: TierPrice {
                enabled: false,
                price: None,
            },
        }
    }

    /// Enable the daily tier
    #[must_use]
    pub const fn with_daily(mut self, price: Money) -> Self {
        self.daily = TierPrice::enabled(price);
        self
    }

    /// Enable the weekly tier
    #[must_use]
    pub const fn with_weekly(mut self, price: Money) -> Self {
        self.weekly = TierPrice::enabled(price);
        self
    }

    /// Enable the monthly tier
    #[must_use]
    pub const fn with_monthly(mut self, price: Money) -> Self {
        self.monthly = TierPrice::enabled(price);
        self
    }

    /// Entry for a tier
    #[must_use]
    pub const fn tier(&self, tier: PricingTier) -> &TierPrice {
        match tier {
            PricingTier::Daily => &self.daily,
            PricingTier::Weekly => &self.weekly,
            PricingTier::Monthly => &self.monthly,
        }
    }
}

/// Result of pricing a range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Total to charge
    pub amount: Money,
    /// Tier that produced the amount
    pub tier: PricingTier,
    /// Price of one unit of that tier
    pub unit_price: Money,
    /// Booked days
    pub days: u32,
    /// Units billed
    pub units: u32,
}

/// Amount a single tier would charge, if usable and eligible.
#[must_use]
pub fn tier_quote(range: DateRange, table: &PriceTable, tier: PricingTier) -> Option<Quote> {
    let days = range.days();
    if !tier.is_eligible(days) {
        return None;
    }
    let unit_price = table.tier(tier).usable_price()?;
    let units = tier.units_for(days);
    let amount = unit_price.checked_multiply(units)?;
    Some(Quote {
        amount,
        tier,
        unit_price,
        days,
        units,
    })
}

/// Cheapest quote for `range`.
///
/// # Errors
///
/// Returns [`PricingError::NoPricingAvailable`] when no eligible tier is usable.
pub fn quote(range: DateRange, table: &PriceTable) -> Result<Quote, PricingError> {
    let mut best: Option<Quote> = None;
    for tier in PricingTier::PREFERENCE {
        if let Some(candidate) = tier_quote(range, table, tier) {
            // strict: an equal amount keeps the coarser tier seen first
            if best.is_none_or(|b| candidate.amount < b.amount) {
                best = Some(candidate);
            }
        }
    }
    best.ok_or(PricingError::NoPricingAvailable)
}

//! Cart line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::LineId;

/// One line in the cart.
///
/// Identity is derived from the product and its selected options (see
/// [`LineId::derive`]); quantity is always positive - a line that would drop
/// to zero is removed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Derived line identity.
    pub id: LineId,
    /// Remote product identifier.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Unit price in the store currency. Never negative.
    pub unit_price: Decimal,
    /// Line quantity. Always >= 1 once stored in a replica.
    pub quantity: u32,
    /// Product image reference for presentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Digital goods skip shipping at checkout. Does not affect sync.
    #[serde(default)]
    pub is_digital_good: bool,
    /// Product slug, used by collaborators for stock lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_ref: Option<String>,
}

impl CartItem {
    /// Create a cart item, deriving its line id from the product and the
    /// given discriminators. A negative unit price is clamped to zero.
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        name: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
        variant_id: Option<&str>,
        language: Option<&str>,
    ) -> Self {
        let product_id = product_id.into();
        Self {
            id: LineId::derive(&product_id, variant_id, language),
            product_id,
            name: name.into(),
            unit_price: unit_price.max(Decimal::ZERO),
            quantity,
            image_ref: None,
            is_digital_good: false,
            slug_ref: None,
        }
    }

    /// Set the image reference.
    #[must_use]
    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    /// Set the slug reference.
    #[must_use]
    pub fn with_slug_ref(mut self, slug_ref: impl Into<String>) -> Self {
        self.slug_ref = Some(slug_ref.into());
        self
    }

    /// Mark the item as a digital good.
    #[must_use]
    pub const fn digital(mut self) -> Self {
        self.is_digital_good = true;
        self
    }

    /// Price of the whole line (unit price x quantity).
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

//! In-memory cart replica.
//!
//! The aggregate the rest of the application reads and mutates. All
//! mutations are synchronous and total - they never panic and never return
//! an error - and each one reports the line ids it touched so the sync
//! coordinator can schedule a debounced remote write. Derived queries
//! (`total`, `count`) are recomputed on demand, never cached.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;

use meridian_core::{CartItem, LineId};

/// The in-memory cart aggregate.
///
/// Holds the ordered item list, the selection set used by bulk operations
/// (always a subset of the item ids), and the saved-for-later side list
/// (excluded from totals and from remote sync).
#[derive(Debug, Default, Clone)]
pub struct CartReplica {
    items: Vec<CartItem>,
    selected: HashSet<LineId>,
    saved_for_later: Vec<CartItem>,
}

impl CartReplica {
    /// Create an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Item Mutations
    // =========================================================================

    /// Add `qty` of `item` to the cart.
    ///
    /// If a line with the same id already exists its quantity is
    /// incremented; the cart never holds duplicate ids. Adding zero is a
    /// no-op.
    pub fn add_item(&mut self, item: CartItem, qty: u32) -> Vec<LineId> {
        if qty == 0 {
            return Vec::new();
        }

        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            existing.quantity = existing.quantity.saturating_add(qty);
            return vec![item.id];
        }

        let mut item = item;
        item.quantity = qty;
        let id = item.id.clone();
        self.items.push(item);
        vec![id]
    }

    /// Remove the line with `id`. Removing an absent id is a no-op and
    /// reports nothing dirty.
    pub fn remove_item(&mut self, id: &LineId) -> Vec<LineId> {
        let before = self.items.len();
        self.items.retain(|i| i.id != *id);
        self.selected.remove(id);
        if self.items.len() == before {
            return Vec::new();
        }
        vec![id.clone()]
    }

    /// Set the quantity of the line with `id`.
    ///
    /// A quantity of zero removes the line - a zero-quantity line is never
    /// stored. Setting quantity on an absent id is a no-op.
    pub fn set_quantity(&mut self, id: &LineId, qty: u32) -> Vec<LineId> {
        if qty == 0 {
            return self.remove_item(id);
        }
        match self.items.iter_mut().find(|i| i.id == *id) {
            Some(item) => {
                item.quantity = qty;
                vec![id.clone()]
            }
            None => Vec::new(),
        }
    }

    /// Remove every line and clear the selection. Saved-for-later is kept.
    pub fn clear(&mut self) -> Vec<LineId> {
        let dirty: Vec<LineId> = self.items.iter().map(|i| i.id.clone()).collect();
        self.items.clear();
        self.selected.clear();
        dirty
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Select a line for bulk operations. Selecting an absent id is a
    /// no-op.
    pub fn select(&mut self, id: &LineId) {
        if self.items.iter().any(|i| i.id == *id) {
            self.selected.insert(id.clone());
        }
    }

    /// Deselect a line.
    pub fn deselect(&mut self, id: &LineId) {
        self.selected.remove(id);
    }

    /// Select every line in the cart.
    pub fn select_all(&mut self) {
        self.selected = self.items.iter().map(|i| i.id.clone()).collect();
    }

    /// Clear the selection without touching the items.
    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Remove every selected line. Reports one dirty id per removed line.
    pub fn remove_selected(&mut self) -> Vec<LineId> {
        let dirty: Vec<LineId> = self.selected.drain().collect();
        self.items.retain(|i| !dirty.contains(&i.id));
        dirty
    }

    /// Set the quantity of every selected line.
    ///
    /// A quantity of zero removes the selected lines. Reports one dirty id
    /// per affected line, not one event for the whole batch.
    pub fn set_quantity_for_selected(&mut self, qty: u32) -> Vec<LineId> {
        let targets: Vec<LineId> = self.selected.iter().cloned().collect();
        let mut dirty = Vec::with_capacity(targets.len());
        for id in targets {
            dirty.extend(self.set_quantity(&id, qty));
        }
        dirty
    }

    // =========================================================================
    // Saved For Later
    // =========================================================================

    /// Move every selected line to the saved-for-later list.
    ///
    /// Saved lines leave the cart (and therefore the remote sync and the
    /// totals) until restored. Reports one dirty id per moved line.
    pub fn move_selected_to_saved(&mut self) -> Vec<LineId> {
        let moving: Vec<LineId> = self.selected.drain().collect();
        let mut dirty = Vec::with_capacity(moving.len());

        let mut remaining = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if moving.contains(&item.id) {
                dirty.push(item.id.clone());
                // The same line saved twice folds into one entry.
                if let Some(saved) = self.saved_for_later.iter_mut().find(|s| s.id == item.id) {
                    saved.quantity = saved.quantity.saturating_add(item.quantity);
                } else {
                    self.saved_for_later.push(item);
                }
            } else {
                remaining.push(item);
            }
        }
        self.items = remaining;
        dirty
    }

    /// Restore a saved line back into the cart.
    ///
    /// If the cart regained a line with the same id in the meantime the
    /// quantities merge. Restoring an absent id is a no-op.
    pub fn restore_from_saved(&mut self, id: &LineId) -> Vec<LineId> {
        let Some(pos) = self.saved_for_later.iter().position(|s| s.id == *id) else {
            return Vec::new();
        };
        let saved = self.saved_for_later.remove(pos);
        let qty = saved.quantity;
        self.add_item(saved, qty)
    }

    // =========================================================================
    // Reconciliation Support
    // =========================================================================

    /// Replace the cart contents with a reconciled collection.
    ///
    /// Defensive against whatever the merge or a persisted snapshot
    /// produced: duplicate ids collapse onto the first occurrence,
    /// zero-quantity lines are dropped, and selections pointing at lines
    /// that no longer exist are pruned.
    pub fn replace_items(&mut self, items: Vec<CartItem>) {
        let mut seen: HashSet<LineId> = HashSet::with_capacity(items.len());
        let mut accepted = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                continue;
            }
            if seen.insert(item.id.clone()) {
                accepted.push(item);
            } else {
                debug!(id = %item.id, "Dropping duplicate line during replace");
            }
        }
        self.items = accepted;
        self.selected.retain(|id| seen.contains(id));
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The cart lines, in order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// A snapshot of the cart lines for transmission or persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CartItem> {
        self.items.clone()
    }

    /// The saved-for-later lines, in order.
    #[must_use]
    pub fn saved_items(&self) -> &[CartItem] {
        &self.saved_for_later
    }

    /// The currently selected line ids.
    #[must_use]
    pub const fn selected_ids(&self) -> &HashSet<LineId> {
        &self.selected
    }

    /// Whether the cart holds no lines. Saved-for-later does not count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cart subtotal: sum of line totals. Saved-for-later is excluded.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |acc, i| acc.saturating_add(i.quantity))
    }
}

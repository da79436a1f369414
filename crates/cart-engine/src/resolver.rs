//! Two-way conflict resolution between divergent cart replicas.
//!
//! [`merge`] is a pure function: the server items provide the baseline
//! existence set, and the client items overlay it. For a line present on
//! both sides the client's quantity wins - the client reflects the most
//! recent user intent in this session - while presentation fields missing
//! on the client are backfilled from the server copy. Lines present on only
//! one side pass through unchanged.
//!
//! The merge is deliberately non-additive: `merge(a, a) == a`, and merging
//! a replica against an already-merged result never duplicates quantities.
//! Naive additive merges double-count when client and server already agree;
//! that is the defect class this design guards against.
//!
//! The client-quantity-wins rule has no server-timestamp comparison, so an
//! edit made from another device between syncs can be overwritten by this
//! session's value. That trade-off favors the session the user is actively
//! typing in.

use std::collections::{HashMap, HashSet};

use meridian_core::{CartItem, LineId};

/// Merge two candidate item collections into one canonical collection.
///
/// Output ordering is server items first (in server order), then
/// client-only items (in client order). No output line has quantity 0 and
/// no two output lines share an id.
#[must_use]
pub fn merge(client: &[CartItem], server: &[CartItem]) -> Vec<CartItem> {
    let client_by_id: HashMap<&LineId, &CartItem> =
        client.iter().map(|item| (&item.id, item)).collect();

    let mut merged: Vec<CartItem> = Vec::with_capacity(server.len() + client.len());

    // Server baseline, overlaid with client intent where both sides have
    // the line.
    for server_item in server {
        match client_by_id.get(&server_item.id) {
            Some(client_item) => {
                // Client copy carries the winning quantity; only fill the
                // gaps it has no data for.
                let mut resolved = (*client_item).clone();
                if resolved.image_ref.is_none() {
                    resolved.image_ref = server_item.image_ref.clone();
                }
                if resolved.slug_ref.is_none() {
                    resolved.slug_ref = server_item.slug_ref.clone();
                }
                merged.push(resolved);
            }
            None => merged.push(server_item.clone()),
        }
    }

    // Client-only lines.
    let mut seen: HashSet<&LineId> = server.iter().map(|item| &item.id).collect();
    for client_item in client {
        if seen.insert(&client_item.id) {
            merged.push(client_item.clone());
        }
    }

    merged.retain(|item| item.quantity > 0);
    merged
}

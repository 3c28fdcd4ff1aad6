//! Building and applying gossip rounds.

use meshhub_core::{Address, Gossip};

use crate::hub::HubContext;
use crate::selector::StateSelector;

/// Gossip carrying every description touched after `since`.
pub fn build(ctx: &HubContext, since: u64) -> Gossip {
    let mut selector = StateSelector::new(since);
    ctx.hub_list.select(&mut selector);
    Gossip {
        sender: ctx.local_address.clone(),
        state: ctx.counter.get(),
        hubs: selector.summaries,
    }
}

/// Merge gossip received on the connection to `sender`.
///
/// The sender is authoritative about itself. Everything it relays is
/// discovery: new addresses are queued for checking, content is taken only
/// when its home state is newer than ours, and the sender is offered as a
/// route one hop further than it is.
pub fn apply(ctx: &HubContext, sender: &Address, gossip: Gossip) {
    if gossip.sender != *sender {
        tracing::debug!(
            peer = %sender,
            claimed = %gossip.sender,
            "gossip sender differs from connection peer"
        );
    }

    let from = ctx.hub_list.add(sender);
    from.mark_contact();

    let mut discovered = 0usize;
    let mut refreshed = 0usize;
    for entry in gossip.hubs {
        if entry.address == ctx.local_address {
            continue;
        }
        if entry.address == *sender {
            from.update(&entry.name, entry.home_state, entry.clients, entry.connected_to);
            refreshed += 1;
            continue;
        }

        let known = ctx.hub_list.contains(&entry.address);
        let d = ctx.hub_list.add(&entry.address);
        if !known {
            discovered += 1;
        }
        if entry.home_state > d.home_state() {
            d.update(&entry.name, entry.home_state, entry.clients, entry.connected_to);
            refreshed += 1;
        }
        d.add_indirection(sender, entry.hops.saturating_add(1));
    }

    tracing::trace!(peer = %sender, discovered, refreshed, "gossip applied");
}

use std::sync::Arc;

use crate::actor::ActorCore;
use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::{PendingOp, Reservation};
use crate::kernel::slice::Slice;
use crate::loader::parser::parse_json_str;
use crate::rpc::manager::RpcBinding;
use crate::rpc::message::RequestType;
use crate::store::{MiscRecord, SUPERBLOCK, Store};

/// True when a previous boot left persisted state behind.
pub fn superblock_present(store: Arc<dyn Store>) -> Result<bool> {
    Ok(store.get_misc(SUPERBLOCK)?.is_some())
}

/// Marks the store as carrying live state. Written after a successful boot;
/// a fatal error before this point leaves the marker absent so the next
/// start attempts a clean boot again.
pub fn write_superblock(store: Arc<dyn Store>) -> Result<()> {
    store.set_misc(MiscRecord { name: SUPERBLOCK.to_string(), blob: chrono::Utc::now().to_rfc3339() })
}

pub fn clear_superblock(store: Arc<dyn Store>) -> Result<()> {
    store.remove_misc(SUPERBLOCK)
}

/// Replays the persisted store into the actor's kernel: slices first
/// (inventory before client), then each slice's reservations and
/// delegations, all through the `re_register_*` path so nothing is written
/// back. The policy gets a `revisit` per entity; reservations caught with a
/// pending operation are put back on the RPC watch list so a response that
/// never comes turns into a failure.
pub fn recover(core: &mut ActorCore) -> Result<()> {
    let store = core.kernel.store();
    if !superblock_present(Arc::clone(&store))? {
        log::info!("No superblock; starting clean.");
        return Ok(());
    }

    log::info!("Superblock present; recovering actor '{}'.", core.name);

    let mut slices: Vec<Slice> = Vec::new();
    for record in store.get_slices()? {
        slices.push(parse_json_str(&record.blob)?);
    }
    // Inventory slices carry the delegations client slices draw from, so
    // they come back first.
    slices.sort_by_key(|slice| if slice.is_inventory() { 0 } else { 1 });

    for slice in slices {
        let slice_id = slice.slice_id.clone();
        core.kernel.re_register_slice(slice)?;

        for record in store.get_reservations_by_slice(&slice_id)? {
            let reservation: Reservation = parse_json_str(&record.blob)?;
            recover_reservation(core, reservation)?;
        }

        for record in store.get_delegations_by_slice(&slice_id)? {
            let delegation: Delegation = parse_json_str(&record.blob)?;
            core.kernel.re_register_delegation(delegation.clone())?;
            core.policy.revisit_delegation(&delegation);
        }
    }

    core.policy.recovery_ended();
    core.recovered = true;
    log::info!("Recovery of actor '{}' complete.", core.name);
    Ok(())
}

fn recover_reservation(core: &mut ActorCore, reservation: Reservation) -> Result<()> {
    let rid = reservation.rid.clone();
    let pending = reservation.pending;

    core.kernel.re_register_reservation(reservation)?;

    if let Some(substrate) = core.substrate.as_mut() {
        substrate.revisit(&rid)?;
    }
    if let Some(snapshot) = core.kernel.get_reservation(&rid) {
        core.policy.revisit_reservation(snapshot);
    }

    // A reservation caught mid-operation resumes it: the request may or may
    // not have left the building before the crash, and if no response ever
    // arrives the watch timer fails the reservation.
    let resumed = match pending {
        PendingOp::None | PendingOp::Priming => None,
        PendingOp::Ticketing => Some(RequestType::Ticket),
        PendingOp::ExtendingTicket => Some(RequestType::ExtendTicket),
        PendingOp::Redeeming => Some(RequestType::Redeem),
        PendingOp::ExtendingLease => Some(RequestType::ExtendLease),
        PendingOp::Closing => Some(RequestType::Close),
    };
    if let Some(request_type) = resumed {
        log::info!("Reservation {} resumes pending {} after restart.", rid, pending);
        core.rpc.watch_recovered(request_type, RpcBinding::Reservation(rid));
    }
    Ok(())
}

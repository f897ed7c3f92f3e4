//! Admission controller ("cashier"): strict VIP priority at the gate and
//! the lifetime entrant cap.
//!
//! Only this thread admits, so the lifetime counter is plain loop state.
//! Exit reports are drained opportunistically after each entrant and once
//! more at shutdown, when every visitor thread has already reported.

use std::sync::Arc;

use crate::log::Tag;
use crate::park::{CashierWork, Park};

/// Ticket price: free for under-7s and VIP passes.
pub(crate) fn ticket_price(age: u32, vip: bool) -> u32 {
    if age < 7 || vip {
        0
    } else {
        1
    }
}

pub(crate) fn run(park: Arc<Park>) {
    park.log.emit(Tag::Cashier, "START");
    let mut admitted = 0u32;

    loop {
        match park.next_entrant() {
            CashierWork::Entrant(t) => {
                if !park.is_open() {
                    park.log.emit(
                        Tag::Cashier,
                        format_args!("REJECT id={} reason=CLOSED", t.id),
                    );
                    t.on_rejected();
                } else if admitted >= park.cfg.entry_limit {
                    park.log.emit(
                        Tag::Cashier,
                        format_args!("REJECT id={} reason=LIMIT_N", t.id),
                    );
                    t.on_rejected();
                } else {
                    admitted += 1;
                    park.log.emit(
                        Tag::Cashier,
                        format_args!(
                            "ENTER id={} age={} vip={} count={}/{} pay={}",
                            t.id,
                            t.age,
                            t.vip as u8,
                            admitted,
                            park.cfg.entry_limit,
                            ticket_price(t.age, t.vip)
                        ),
                    );
                    t.on_admitted();
                }
                drain_exits(&park);
            }
            CashierWork::Shutdown => break,
        }
    }

    drain_exits(&park);
    park.log.emit(Tag::Cashier, "STOP");
}

fn drain_exits(park: &Park) {
    while let Some(id) = park.try_pop_exit() {
        park.log.emit(Tag::Cashier, format_args!("EXIT id={id}"));
    }
}

//! Bridge monitor: one direction at a time, bounded occupancy.
//!
//! No priority classes here; admission is strictly directional. The
//! direction latches on the first entrant and resets to none exactly when
//! the last occupant leaves.

use std::sync::{Arc, Condvar, Mutex};

use crate::log::{EventLog, Tag};
use crate::park::Direction;

pub struct Bridge {
    cap: u32,
    log: Arc<EventLog>,
    state: Mutex<State>,
    cv: Condvar,
}

#[derive(Default)]
struct State {
    dir: Option<Direction>,
    on_bridge: u32,
}

impl Bridge {
    pub fn new(cap: u32, log: Arc<EventLog>) -> Self {
        Self {
            cap,
            log,
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
        }
    }

    /// Cross onto the bridge in direction `d`; blocks until the bridge is
    /// free in that direction and below capacity.
    pub fn enter(&self, id: u32, d: Direction) {
        let guard = self.state.lock().expect("bridge lock poisoned");
        let mut st = self
            .cv
            .wait_while(guard, |st| {
                st.on_bridge >= self.cap || st.dir.is_some_and(|cur| cur != d)
            })
            .expect("bridge lock poisoned");

        if st.dir.is_none() {
            st.dir = Some(d);
            self.log
                .emit(Tag::Bridge, format_args!("BRIDGE_DIR_SET dir={d}"));
        }
        st.on_bridge += 1;
        self.log.emit(
            Tag::Bridge,
            format_args!("ENTER id={id} dir={d} occ={}/{}", st.on_bridge, self.cap),
        );
        drop(st);
        self.cv.notify_all();
    }

    /// Step off the bridge. Leaving an empty bridge is a clamped no-op.
    pub fn leave(&self, id: u32) {
        let mut st = self.state.lock().expect("bridge lock poisoned");
        st.on_bridge = st.on_bridge.saturating_sub(1);
        self.log.emit(
            Tag::Bridge,
            format_args!("LEAVE id={id} occ={}/{}", st.on_bridge, self.cap),
        );
        if st.on_bridge == 0 && st.dir.take().is_some() {
            self.log.emit(Tag::Bridge, "BRIDGE_DIR_SET dir=NONE");
        }
        drop(st);
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Option<Direction>, u32) {
        let st = self.state.lock().expect("bridge lock poisoned");
        (st.dir, st.on_bridge)
    }
}

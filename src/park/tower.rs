//! Tower monitor: counting admission with VIP bypass bounded by burst
//! fairness, plus group-atomic reservation for guided groups.

use std::sync::{Arc, Condvar, Mutex};

use crate::log::{EventLog, Tag};
use crate::park::fairness::AdmissionState;

pub struct Tower {
    cap: u32,
    log: Arc<EventLog>,
    state: Mutex<AdmissionState>,
    cv: Condvar,
}

impl Tower {
    pub fn new(cap: u32, log: Arc<EventLog>) -> Self {
        Self {
            cap,
            log,
            state: Mutex::new(AdmissionState::default()),
            cv: Condvar::new(),
        }
    }

    /// Single-visitor admission; blocks on capacity and the fairness rule.
    pub fn enter(&self, id: u32, vip: bool) {
        let mut st = self.state.lock().expect("tower lock poisoned");
        st.join(1, vip);
        self.log.emit(
            Tag::Tower,
            format_args!(
                "QUEUE_JOIN id={id} vip={} wait_vip={} wait_norm={}",
                vip as u8, st.waiting_vip, st.waiting_normal
            ),
        );
        let mut st = self
            .cv
            .wait_while(st, |st| !st.may_admit(1, vip, self.cap))
            .expect("tower lock poisoned");
        st.admit(1, vip);
        self.log.emit(
            Tag::Tower,
            format_args!(
                "ENTER id={id} vip={} occ={}/{} wait_vip={} wait_norm={} vip_streak={}",
                vip as u8, st.occupancy, self.cap, st.waiting_vip, st.waiting_normal, st.vip_streak
            ),
        );
        drop(st);
        self.cv.notify_all();
    }

    pub fn leave(&self, id: u32) {
        let mut st = self.state.lock().expect("tower lock poisoned");
        st.release(1);
        self.log.emit(
            Tag::Tower,
            format_args!("LEAVE id={id} occ={}/{}", st.occupancy, self.cap),
        );
        drop(st);
        self.cv.notify_all();
    }

    /// Group-atomic admission: the whole party of `k` is admitted in one
    /// indivisible step, so other admissions cannot interleave between
    /// reserving and occupying the slots.
    pub fn enter_group(&self, gid: u32, k: u32, vip_like: bool) {
        if k == 0 {
            return;
        }
        let mut st = self.state.lock().expect("tower lock poisoned");
        st.join(k, vip_like);
        self.log.emit(
            Tag::Tower,
            format_args!(
                "GROUP_QUEUE_JOIN gid={gid} k={k} vip_like={} wait_vip={} wait_norm={}",
                vip_like as u8, st.waiting_vip, st.waiting_normal
            ),
        );
        let mut st = self
            .cv
            .wait_while(st, |st| !st.may_admit(k, vip_like, self.cap))
            .expect("tower lock poisoned");
        st.admit(k, vip_like);
        self.log.emit(
            Tag::Tower,
            format_args!(
                "GROUP_ENTER gid={gid} k={k} vip_like={} occ={}/{} wait_vip={} wait_norm={} vip_streak={}",
                vip_like as u8, st.occupancy, self.cap, st.waiting_vip, st.waiting_normal, st.vip_streak
            ),
        );
        drop(st);
        self.cv.notify_all();
    }

    pub fn leave_group(&self, gid: u32, k: u32) {
        if k == 0 {
            return;
        }
        let mut st = self.state.lock().expect("tower lock poisoned");
        st.release(k);
        self.log.emit(
            Tag::Tower,
            format_args!("GROUP_LEAVE gid={gid} k={k} occ={}/{}", st.occupancy, self.cap),
        );
        drop(st);
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn occupancy(&self) -> u32 {
        self.state.lock().expect("tower lock poisoned").occupancy
    }
}

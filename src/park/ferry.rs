//! Ferry monitor: same admission discipline as the tower, with a direction
//! tag carried on every boarding.

use std::sync::{Arc, Condvar, Mutex};

use crate::log::{EventLog, Tag};
use crate::park::fairness::AdmissionState;
use crate::park::Direction;

pub struct Ferry {
    cap: u32,
    log: Arc<EventLog>,
    state: Mutex<AdmissionState>,
    cv: Condvar,
}

impl Ferry {
    pub fn new(cap: u32, log: Arc<EventLog>) -> Self {
        Self {
            cap,
            log,
            state: Mutex::new(AdmissionState::default()),
            cv: Condvar::new(),
        }
    }

    /// Single-visitor boarding; blocks on capacity and the fairness rule.
    pub fn board(&self, id: u32, vip: bool, dir: Direction) {
        let mut st = self.state.lock().expect("ferry lock poisoned");
        st.join(1, vip);
        self.log.emit(
            Tag::Ferry,
            format_args!(
                "QUEUE_JOIN id={id} vip={} dir={dir} wait_vip={} wait_norm={}",
                vip as u8, st.waiting_vip, st.waiting_normal
            ),
        );
        let mut st = self
            .cv
            .wait_while(st, |st| !st.may_admit(1, vip, self.cap))
            .expect("ferry lock poisoned");
        st.admit(1, vip);
        self.log.emit(
            Tag::Ferry,
            format_args!(
                "BOARD id={id} vip={} dir={dir} occ={}/{} wait_vip={} wait_norm={} vip_streak={}",
                vip as u8, st.occupancy, self.cap, st.waiting_vip, st.waiting_normal, st.vip_streak
            ),
        );
        drop(st);
        self.cv.notify_all();
    }

    pub fn unboard(&self, id: u32) {
        let mut st = self.state.lock().expect("ferry lock poisoned");
        st.release(1);
        self.log.emit(
            Tag::Ferry,
            format_args!("UNBOARD id={id} occ={}/{}", st.occupancy, self.cap),
        );
        drop(st);
        self.cv.notify_all();
    }

    /// Group-atomic boarding of `k` members in one indivisible step.
    pub fn board_group(&self, gid: u32, k: u32, vip_like: bool, dir: Direction) {
        if k == 0 {
            return;
        }
        let mut st = self.state.lock().expect("ferry lock poisoned");
        st.join(k, vip_like);
        self.log.emit(
            Tag::Ferry,
            format_args!(
                "GROUP_QUEUE_JOIN gid={gid} k={k} vip_like={} dir={dir} wait_vip={} wait_norm={}",
                vip_like as u8, st.waiting_vip, st.waiting_normal
            ),
        );
        let mut st = self
            .cv
            .wait_while(st, |st| !st.may_admit(k, vip_like, self.cap))
            .expect("ferry lock poisoned");
        st.admit(k, vip_like);
        self.log.emit(
            Tag::Ferry,
            format_args!(
                "GROUP_BOARD gid={gid} k={k} vip_like={} dir={dir} occ={}/{} wait_vip={} wait_norm={} vip_streak={}",
                vip_like as u8, st.occupancy, self.cap, st.waiting_vip, st.waiting_normal, st.vip_streak
            ),
        );
        drop(st);
        self.cv.notify_all();
    }

    pub fn unboard_group(&self, gid: u32, k: u32) {
        if k == 0 {
            return;
        }
        let mut st = self.state.lock().expect("ferry lock poisoned");
        st.release(k);
        self.log.emit(
            Tag::Ferry,
            format_args!("GROUP_UNBOARD gid={gid} k={k} occ={}/{}", st.occupancy, self.cap),
        );
        drop(st);
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn boardings_carry_the_direction_tag() {
        let (log, buf) = EventLog::capture();
        let ferry = Ferry::new(4, Arc::new(log));
        ferry.board(5, true, Direction::Backward);
        ferry.board_group(200, 2, false, Direction::Forward);
        ferry.unboard(5);
        ferry.unboard_group(200, 2);

        let lines = buf.lines();
        assert!(lines[1].contains("FERRY BOARD id=5 vip=1 dir=BWD occ=1/4"));
        assert!(lines[3].contains("FERRY GROUP_BOARD gid=200 k=2 vip_like=0 dir=FWD occ=3/4"));
        assert!(lines[4].contains("FERRY UNBOARD id=5 occ=2/4"));
        assert!(lines[5].contains("FERRY GROUP_UNBOARD gid=200 k=2 occ=0/4"));
    }

    #[test]
    fn group_blocks_until_enough_slots_free_up() {
        let (log, _) = EventLog::capture();
        let ferry = Arc::new(Ferry::new(2, Arc::new(log)));
        ferry.board(1, false, Direction::Forward);

        let f2 = Arc::clone(&ferry);
        let group = thread::spawn(move || f2.board_group(300, 2, false, Direction::Forward));

        thread::sleep(Duration::from_millis(100));
        ferry.unboard(1);
        group.join().expect("join group");
        ferry.unboard_group(300, 2);
    }

    #[test]
    fn empty_party_is_a_noop() {
        let (log, buf) = EventLog::capture();
        let ferry = Ferry::new(2, Arc::new(log));
        ferry.board_group(1, 0, false, Direction::Forward);
        ferry.unboard_group(1, 0);
        assert!(buf.lines().is_empty());
    }
}

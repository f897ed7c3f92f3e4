//! Park coordination core: shared domain types, the admission/grouping/exit
//! stages, service-thread lifecycle, and the group-aware step executor.
//!
//! Locking is strictly one-at-a-time: no thread ever holds two monitor
//! locks, the guide only takes the group lock to broadcast, and the cashier
//! holds the entry lock only to dequeue. The log and RNG mutexes are
//! leaves.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::config::Config;
use crate::log::{EventLog, Tag};
use crate::rng::SharedRng;

pub mod bridge;
pub(crate) mod cashier;
pub(crate) mod fairness;
pub mod ferry;
pub mod group;
pub(crate) mod guide;
pub mod tourist;
pub mod tower;

pub use bridge::Bridge;
pub use ferry::Ferry;
pub use group::{GroupControl, Resource};
pub use tourist::Tourist;
pub use tower::Tower;

/// Fixed walk back to the entrance on a RETURN_K step.
const RETURN_WALK_MS: u64 = 200;
/// Fixed descent when a tower stay is evacuated.
const EVACUATION_DESCENT_MS: u64 = 100;

/// Travel direction over the bridge and ferry crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "FWD",
            Direction::Backward => "BWD",
        }
    }

    /// Both crossings run forward on route 1 and backward on route 2.
    pub fn for_route(route: Route) -> Self {
        match route {
            Route::One => Direction::Forward,
            Route::Two => Direction::Backward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward or reverse traversal of the fixed K-A-B-C-K itinerary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    One,
    Two,
}

impl Route {
    pub fn pick(rng: &SharedRng) -> Self {
        if rng.int_in(1, 2) == 1 {
            Route::One
        } else {
            Route::Two
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Route::One => "1",
            Route::Two => "2",
        })
    }
}

/// One group step as broadcast by the guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    GoA,
    GoB,
    GoC,
    ReturnK,
    Exit,
}

pub(crate) fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

/// Sleep in slices of at most 50 ms, re-checking `flag` between slices.
/// Returns false when the flag cut the sleep short.
pub(crate) fn sleep_interruptible(total_ms: u64, flag: &AtomicBool) -> bool {
    const SLICE_MS: u64 = 50;
    let mut slept = 0;
    while slept < total_ms {
        if flag.load(Ordering::SeqCst) {
            return false;
        }
        let d = SLICE_MS.min(total_ms - slept);
        thread::sleep(Duration::from_millis(d));
        slept += d;
    }
    true
}

#[derive(Default)]
struct EntryStage {
    vip: VecDeque<Arc<Tourist>>,
    normal: VecDeque<Arc<Tourist>>,
    closed: bool,
    shutdown: bool,
}

#[derive(Default)]
struct GroupingStage {
    waiting: VecDeque<Arc<Tourist>>,
    closed: bool,
}

pub(crate) enum CashierWork {
    Entrant(Arc<Tourist>),
    Shutdown,
}

/// Join handles for the cashier and guide threads.
pub struct ServiceHandles {
    cashier: JoinHandle<()>,
    guides: Vec<JoinHandle<()>>,
}

pub struct Park {
    pub cfg: Config,
    pub log: Arc<EventLog>,
    pub rng: SharedRng,

    pub bridge: Bridge,
    pub tower: Tower,
    pub ferry: Ferry,

    open: AtomicBool,
    entry: Mutex<EntryStage>,
    entry_cv: Condvar,
    grouping: Mutex<GroupingStage>,
    grouping_cv: Condvar,
    exit_tx: Sender<u32>,
    exit_rx: Receiver<u32>,
}

impl Park {
    pub fn new(cfg: Config, log: Arc<EventLog>) -> Self {
        let (exit_tx, exit_rx) = channel::unbounded();
        Self {
            rng: SharedRng::from_seed(cfg.seed),
            bridge: Bridge::new(cfg.bridge_cap, Arc::clone(&log)),
            tower: Tower::new(cfg.tower_cap, Arc::clone(&log)),
            ferry: Ferry::new(cfg.ferry_cap, Arc::clone(&log)),
            open: AtomicBool::new(true),
            entry: Mutex::new(EntryStage::default()),
            entry_cv: Condvar::new(),
            grouping: Mutex::new(GroupingStage::default()),
            grouping_cv: Condvar::new(),
            exit_tx,
            exit_rx,
            cfg,
            log,
        }
    }

    /// Spawn the cashier and the P guide threads.
    pub fn start(self: Arc<Self>) -> ServiceHandles {
        let cashier = {
            let park = Arc::clone(&self);
            thread::spawn(move || cashier::run(park))
        };
        let guides = (0..self.cfg.guides)
            .map(|guide_id| {
                let park = Arc::clone(&self);
                thread::spawn(move || guide::run(park, guide_id))
            })
            .collect();
        ServiceHandles { cashier, guides }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the park: no new entrants or group joins are accepted, every
    /// stage waiter is woken. Guides pick up the remaining group waiters as
    /// final partial groups before exiting.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        {
            let mut st = self.entry.lock().expect("entry lock poisoned");
            st.closed = true;
        }
        self.entry_cv.notify_all();
        {
            let mut st = self.grouping.lock().expect("grouping lock poisoned");
            st.closed = true;
        }
        self.grouping_cv.notify_all();
    }

    /// Join service threads. Call after every visitor thread has been
    /// joined so the cashier's final exit drain sees all reports.
    pub fn stop(&self, services: ServiceHandles) {
        // Stragglers the guides never picked up (none in a normal run).
        let leftover: Vec<_> = {
            let mut st = self.grouping.lock().expect("grouping lock poisoned");
            st.waiting.drain(..).collect()
        };
        for t in leftover {
            t.on_rejected();
        }

        {
            let mut st = self.entry.lock().expect("entry lock poisoned");
            st.shutdown = true;
        }
        self.entry_cv.notify_all();

        if services.cashier.join().is_err() {
            tracing::error!("cashier thread panicked");
        }
        for handle in services.guides {
            if handle.join().is_err() {
                tracing::error!("guide thread panicked");
            }
        }
    }

    // ---- admission stage ----

    /// Queue a visitor for the cashier; false when the park already closed.
    pub fn enqueue_entry(&self, t: Arc<Tourist>) -> bool {
        {
            let mut st = self.entry.lock().expect("entry lock poisoned");
            if st.closed {
                return false;
            }
            if t.vip {
                st.vip.push_back(t);
            } else {
                st.normal.push_back(t);
            }
        }
        self.entry_cv.notify_all();
        true
    }

    /// Next unit of cashier work: an entrant (VIP queue first) or the
    /// shutdown notice once both queues are drained.
    pub(crate) fn next_entrant(&self) -> CashierWork {
        let guard = self.entry.lock().expect("entry lock poisoned");
        let mut st = self
            .entry_cv
            .wait_while(guard, |st| {
                st.vip.is_empty() && st.normal.is_empty() && !st.shutdown
            })
            .expect("entry lock poisoned");
        if let Some(t) = st.vip.pop_front().or_else(|| st.normal.pop_front()) {
            CashierWork::Entrant(t)
        } else {
            CashierWork::Shutdown
        }
    }

    // ---- grouping stage ----

    /// Queue an admitted visitor for group formation; false once closed.
    pub fn enqueue_grouping(&self, t: Arc<Tourist>) -> bool {
        {
            let mut st = self.grouping.lock().expect("grouping lock poisoned");
            if st.closed {
                return false;
            }
            st.waiting.push_back(t);
        }
        self.grouping_cv.notify_all();
        true
    }

    /// Block until `m` visitors wait, then take exactly `m`. After closing
    /// time the remainder (possibly empty) is handed out as-is, so the last
    /// groups may be partial.
    pub fn dequeue_group(&self, m: usize) -> Vec<Arc<Tourist>> {
        let guard = self.grouping.lock().expect("grouping lock poisoned");
        let mut st = self
            .grouping_cv
            .wait_while(guard, |st| !st.closed && st.waiting.len() < m)
            .expect("grouping lock poisoned");
        let take = st.waiting.len().min(m);
        st.waiting.drain(..take).collect()
    }

    // ---- exit stage ----

    pub fn report_exit(&self, tourist_id: u32) {
        let _ = self.exit_tx.send(tourist_id);
    }

    pub(crate) fn try_pop_exit(&self) -> Option<u32> {
        self.exit_rx.try_recv().ok()
    }

    // ---- guided step execution ----

    /// Execute one broadcast step for a guided visitor. Resource steps are
    /// performed once per group and epoch by the elected coordinator;
    /// everyone else waits on the matching gate.
    pub(crate) fn do_step(&self, t: &Arc<Tourist>, step: Step, epoch: u64) {
        let Some(group) = t.group() else {
            return;
        };
        match step {
            Step::GoA => self.step_bridge(t, &group, epoch),
            Step::GoB => self.step_tower(t, &group, epoch),
            Step::GoC => self.step_ferry(t, &group, epoch),
            Step::ReturnK => {
                self.log.emit(
                    Tag::Tourist,
                    format_args!("RETURN_K id={} gid={}", t.id, group.group_id),
                );
                sleep_ms(RETURN_WALK_MS);
            }
            Step::Exit => {}
        }
    }

    fn step_bridge(&self, t: &Arc<Tourist>, group: &Arc<GroupControl>, epoch: u64) {
        if group.try_become_coordinator(Resource::Bridge, epoch, t.id) {
            self.deny_unguarded(group, "A");
            let dir = Direction::for_route(group.route());
            self.bridge.enter(t.id, dir);
            sleep_ms(self.rng.int_in(self.cfg.bridge_min_ms, self.cfg.bridge_max_ms));
            self.bridge.leave(t.id);
            group.finish(Resource::Bridge, epoch);
        } else {
            group.wait_done(Resource::Bridge, epoch);
        }
        self.escort_checkpoint(t, epoch, "A");
    }

    fn step_tower(&self, t: &Arc<Tourist>, group: &Arc<GroupControl>, epoch: u64) {
        let gid = group.group_id;
        if group.try_become_coordinator(Resource::Tower, epoch, t.id) {
            self.deny_unguarded(group, "B");
            // The party can never exceed the car capacity, or the atomic
            // reservation could not be satisfied at all.
            let k = (group
                .members()
                .iter()
                .filter(|m| tower_eligible(m))
                .count() as u32)
                .min(self.cfg.tower_cap);
            if k == 0 {
                self.log
                    .emit(Tag::Tower, format_args!("GROUP_SKIP gid={gid} reason=NO_ELIGIBLE"));
            } else {
                self.tower.enter_group(gid, k, false);
                if t.tower_evacuate.load(Ordering::SeqCst) {
                    self.log
                        .emit(Tag::Tower, format_args!("EVACUATE_GROUP gid={gid}"));
                    sleep_ms(EVACUATION_DESCENT_MS);
                } else {
                    let stay = self.rng.int_in(self.cfg.tower_min_ms, self.cfg.tower_max_ms);
                    if !sleep_interruptible(stay, &t.tower_evacuate) {
                        self.log.emit(Tag::Tower, format_args!("EVACUATE gid={gid}"));
                    }
                }
                self.tower.leave_group(gid, k);
            }
            group.finish(Resource::Tower, epoch);
        } else {
            group.wait_done(Resource::Tower, epoch);
        }
        self.escort_checkpoint(t, epoch, "B");
    }

    fn step_ferry(&self, t: &Arc<Tourist>, group: &Arc<GroupControl>, epoch: u64) {
        let gid = group.group_id;
        if group.try_become_coordinator(Resource::Ferry, epoch, t.id) {
            self.deny_unguarded(group, "C");
            let k = (group
                .members()
                .iter()
                .filter(|m| ferry_eligible(m))
                .count() as u32)
                .min(self.cfg.ferry_cap);
            if k == 0 {
                self.log
                    .emit(Tag::Ferry, format_args!("GROUP_SKIP gid={gid} reason=NO_ELIGIBLE"));
            } else {
                let dir = Direction::for_route(group.route());
                self.ferry.board_group(gid, k, false, dir);
                sleep_ms(self.cfg.ferry_t_ms);
                self.ferry.unboard_group(gid, k);
            }
            group.finish(Resource::Ferry, epoch);
        } else {
            group.wait_done(Resource::Ferry, epoch);
        }
        self.escort_checkpoint(t, epoch, "C");
    }

    /// Escort coupling: adults publish the epoch for their wards, children
    /// wait for their guardian before passing the barrier.
    fn escort_checkpoint(&self, t: &Arc<Tourist>, epoch: u64, where_tag: &str) {
        if t.age >= 15 {
            t.notify_wards_ready(epoch);
        } else {
            t.wait_for_guardian_ready(epoch, where_tag, &self.log);
        }
    }

    /// Unguarded children are reported by the coordinator at every
    /// resource step.
    fn deny_unguarded(&self, group: &GroupControl, where_tag: &str) {
        for m in group.members() {
            if m.no_guardian.load(Ordering::SeqCst) {
                self.log.emit(
                    Tag::Guard,
                    format_args!(
                        "DENY_NO_GUARD id={} where={where_tag} gid={}",
                        m.id, group.group_id
                    ),
                );
            }
        }
    }
}

/// Tower eligibility: toddlers stay at the base, and so do their escorting
/// guardians, unguarded children, and children whose guardian stays down.
fn tower_eligible(t: &Tourist) -> bool {
    if t.age <= 5 || t.guardian_of_under5.load(Ordering::SeqCst) {
        return false;
    }
    if t.age < 15 {
        if t.no_guardian.load(Ordering::SeqCst) {
            return false;
        }
        match t.guardian() {
            Some(g) => g.age > 5 && !g.guardian_of_under5.load(Ordering::SeqCst),
            None => false,
        }
    } else {
        true
    }
}

/// Ferry eligibility: only children without a guardian are excluded.
fn ferry_eligible(t: &Tourist) -> bool {
    !t.no_guardian.load(Ordering::SeqCst)
}

//! Visitor agent: admission, then a VIP self-guided route or the guided
//! step loop.
//!
//! A tourist's coordination state lives behind its own mutex (admission
//! outcome, group binding, next-step slot); the escort handshake between a
//! guardian and its wards uses a separate mutex so a child waiting for its
//! guardian never contends with step delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::log::{EventLog, Tag};
use crate::park::group::GroupControl;
use crate::park::{sleep_interruptible, sleep_ms, Direction, Park, Route, Step};

pub struct Tourist {
    pub id: u32,
    pub age: u32,
    pub vip: bool,

    state: Mutex<State>,
    cv: Condvar,

    /// Latched when group formation finds no adult to escort this child.
    pub(crate) no_guardian: AtomicBool,
    /// Latched on an adult escorting a ward of age <= 5.
    pub(crate) guardian_of_under5: AtomicBool,
    /// Signal 2: the group is redirected to the entrance.
    pub(crate) abort_to_return: AtomicBool,
    /// Signal 1: the tower stay is cut to a short descent.
    pub(crate) tower_evacuate: AtomicBool,

    escort_epoch: Mutex<u64>,
    escort_cv: Condvar,
}

#[derive(Default)]
struct State {
    admitted: bool,
    rejected: bool,
    group_id: Option<u32>,
    guide_id: Option<u32>,
    group: Option<Arc<GroupControl>>,
    guardian: Option<Weak<Tourist>>,
    next_step: Option<Step>,
    step_ready: bool,
    step_epoch: u64,
}

impl Tourist {
    pub fn new(id: u32, age: u32, vip: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            age,
            vip,
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
            no_guardian: AtomicBool::new(false),
            guardian_of_under5: AtomicBool::new(false),
            abort_to_return: AtomicBool::new(false),
            tower_evacuate: AtomicBool::new(false),
            escort_epoch: Mutex::new(0),
            escort_cv: Condvar::new(),
        })
    }

    pub fn on_admitted(&self) {
        let mut st = self.state.lock().expect("tourist lock poisoned");
        st.admitted = true;
        drop(st);
        self.cv.notify_all();
    }

    pub fn on_rejected(&self) {
        let mut st = self.state.lock().expect("tourist lock poisoned");
        st.rejected = true;
        drop(st);
        self.cv.notify_all();
    }

    /// Bind the shared group handle; set once at formation.
    pub fn set_group(&self, group: Arc<GroupControl>) {
        let mut st = self.state.lock().expect("tourist lock poisoned");
        st.group = Some(group);
        drop(st);
        self.cv.notify_all();
    }

    /// Record group and guide ids; wakes the tourist out of the grouping
    /// wait.
    pub fn assign_to_group(&self, group_id: u32, guide_id: u32) {
        let mut st = self.state.lock().expect("tourist lock poisoned");
        st.group_id = Some(group_id);
        st.guide_id = Some(guide_id);
        drop(st);
        self.cv.notify_all();
    }

    /// Deliver the next step and advance the epoch.
    pub fn set_step(&self, step: Step) {
        let mut st = self.state.lock().expect("tourist lock poisoned");
        st.next_step = Some(step);
        st.step_ready = true;
        st.step_epoch += 1;
        drop(st);
        self.cv.notify_all();
    }

    /// Assign a guardian (or latch `no_guardian`). An under-5 ward marks
    /// the guardian as escorting a toddler.
    pub fn set_guardian(&self, guardian: Option<&Arc<Tourist>>) {
        match guardian {
            Some(g) => {
                if self.age <= 5 {
                    g.guardian_of_under5.store(true, Ordering::SeqCst);
                }
                let mut st = self.state.lock().expect("tourist lock poisoned");
                st.guardian = Some(Arc::downgrade(g));
            }
            None => {
                self.no_guardian.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn guardian(&self) -> Option<Arc<Tourist>> {
        let st = self.state.lock().expect("tourist lock poisoned");
        st.guardian.as_ref().and_then(Weak::upgrade)
    }

    pub fn group(&self) -> Option<Arc<GroupControl>> {
        let st = self.state.lock().expect("tourist lock poisoned");
        st.group.clone()
    }

    fn group_id(&self) -> Option<u32> {
        self.state.lock().expect("tourist lock poisoned").group_id
    }

    /// Guardian side of the escort handshake: wards may proceed for `epoch`.
    pub(crate) fn notify_wards_ready(&self, epoch: u64) {
        let mut done = self.escort_epoch.lock().expect("escort lock poisoned");
        *done = epoch;
        drop(done);
        self.escort_cv.notify_all();
    }

    /// Ward side: wait until the guardian published `epoch`, bailing out on
    /// a group abort.
    pub(crate) fn wait_for_guardian_ready(&self, epoch: u64, where_tag: &str, log: &EventLog) {
        let Some(guardian) = self.guardian() else {
            return;
        };
        let guard = guardian.escort_epoch.lock().expect("escort lock poisoned");
        let _done = guardian
            .escort_cv
            .wait_while(guard, |done| {
                *done < epoch && !self.abort_to_return.load(Ordering::SeqCst)
            })
            .expect("escort lock poisoned");
        if self.abort_to_return.load(Ordering::SeqCst) {
            log.emit(
                Tag::Guard,
                format_args!(
                    "CHILD_ABORT_WAIT id={} where={where_tag} gid={}",
                    self.id,
                    self.group_id().unwrap_or_default()
                ),
            );
        }
    }

    /// Thread body: arrival, admission, then the VIP or guided flow.
    pub fn run(self: Arc<Self>, park: Arc<Park>) {
        park.log.emit(
            Tag::Tourist,
            format_args!("ARRIVE id={} age={} vip={}", self.id, self.age, self.vip as u8),
        );

        if !park.enqueue_entry(Arc::clone(&self)) {
            // Arrived after closing time; never reached the cashier.
            park.log
                .emit(Tag::Tourist, format_args!("LEAVE_NO_ENTRY id={}", self.id));
            return;
        }

        let admitted = {
            let guard = self.state.lock().expect("tourist lock poisoned");
            let st = self
                .cv
                .wait_while(guard, |st| !st.admitted && !st.rejected)
                .expect("tourist lock poisoned");
            st.admitted
        };

        if !admitted {
            park.log
                .emit(Tag::Tourist, format_args!("LEAVE_NO_ENTRY id={}", self.id));
            return;
        }

        if self.vip {
            self.run_vip(&park);
        } else {
            Arc::clone(&self).run_guided(&park);
        }
    }

    /// Unguided visit: personal route over the three attractions.
    fn run_vip(&self, park: &Park) {
        if self.age < 15 {
            park.log.emit(
                Tag::Vip,
                format_args!(
                    "DENY_CHILD id={} age={} reason=NEEDS_GUARDIAN",
                    self.id, self.age
                ),
            );
            park.report_exit(self.id);
            return;
        }

        let route = Route::pick(&park.rng);
        park.log
            .emit(Tag::Vip, format_args!("START id={} route={route}", self.id));
        let dir = Direction::for_route(route);

        let segment = || sleep_ms(park.rng.int_in(park.cfg.segment_min_ms, park.cfg.segment_max_ms));
        let bridge = || {
            park.bridge.enter(self.id, dir);
            sleep_ms(park.rng.int_in(park.cfg.bridge_min_ms, park.cfg.bridge_max_ms));
            park.bridge.leave(self.id);
        };
        let tower = || {
            if self.age <= 5 {
                park.log
                    .emit(Tag::Vip, format_args!("TOWER_SKIP id={} reason=AGE<=5", self.id));
                return;
            }
            park.tower.enter(self.id, true);
            let stay = park.rng.int_in(park.cfg.tower_min_ms, park.cfg.tower_max_ms);
            sleep_interruptible(stay, &self.abort_to_return);
            park.tower.leave(self.id);
        };
        let ferry = || {
            park.ferry.board(self.id, true, dir);
            sleep_ms(park.cfg.ferry_t_ms);
            park.ferry.unboard(self.id);
        };

        match route {
            Route::One => {
                segment();
                bridge();
                segment();
                tower();
                segment();
                ferry();
                segment();
            }
            Route::Two => {
                segment();
                ferry();
                segment();
                tower();
                segment();
                bridge();
                segment();
            }
        }

        park.log.emit(Tag::Vip, format_args!("END id={}", self.id));
        park.report_exit(self.id);
    }

    /// Guided visit: join a group and follow the guide's step broadcasts.
    fn run_guided(self: Arc<Self>, park: &Park) {
        if !park.enqueue_grouping(Arc::clone(&self)) {
            // Park closed before a guide could take this visitor.
            park.report_exit(self.id);
            return;
        }

        let grouped = {
            let guard = self.state.lock().expect("tourist lock poisoned");
            let st = self
                .cv
                .wait_while(guard, |st| st.group_id.is_none() && !st.rejected)
                .expect("tourist lock poisoned");
            st.group_id.is_some()
        };

        if !grouped {
            park.report_exit(self.id);
            return;
        }

        let (gid, guide_id) = {
            let st = self.state.lock().expect("tourist lock poisoned");
            (
                st.group_id.unwrap_or_default(),
                st.guide_id.unwrap_or_default(),
            )
        };
        park.log.emit(
            Tag::Tourist,
            format_args!("GROUP_JOIN id={} gid={gid} guide={guide_id}", self.id),
        );

        loop {
            let (mut step, epoch) = {
                let guard = self.state.lock().expect("tourist lock poisoned");
                let mut st = self
                    .cv
                    .wait_while(guard, |st| !st.step_ready)
                    .expect("tourist lock poisoned");
                st.step_ready = false;
                (st.next_step.unwrap_or(Step::Exit), st.step_epoch)
            };

            if step == Step::Exit {
                park.report_exit(self.id);
                if let Some(group) = self.group() {
                    group.mark_done();
                }
                return;
            }

            if self.abort_to_return.load(Ordering::SeqCst) && step != Step::ReturnK {
                step = Step::ReturnK;
            }

            park.do_step(&self, step, epoch);

            if let Some(group) = self.group() {
                group.mark_done();
            }
        }
    }
}

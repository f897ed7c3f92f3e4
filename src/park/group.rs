//! Group coordination: the per-step barrier and the per-resource
//! "coordinator once per epoch" gates.
//!
//! Each step broadcast elects one member (adult preferred, lowest id) to
//! perform the shared monitor operation for the whole group; everyone else
//! parks on the matching gate. Gates are keyed by epoch so a late duplicate
//! notification from a previous step can never double-invoke the resource.

use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::park::tourist::Tourist;
use crate::park::{Route, Step};

/// Attractions a group coordinates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Bridge,
    Tower,
    Ferry,
}

impl Resource {
    fn index(self) -> usize {
        match self {
            Resource::Bridge => 0,
            Resource::Tower => 1,
            Resource::Ferry => 2,
        }
    }
}

#[derive(Default)]
struct Gate {
    epoch_done: u64,
    in_progress: bool,
    coordinator_id: Option<u32>,
}

struct State {
    route: Route,
    current: Option<Step>,
    step_active: bool,
    completed: usize,
    gates: [Gate; 3],
}

pub struct GroupControl {
    pub group_id: u32,
    pub guide_id: u32,
    /// Non-owning back-references: members own the group handle, never the
    /// other way around. Members outlive every step they take part in
    /// because the guide joins the step barrier before releasing them.
    members: Vec<Weak<Tourist>>,
    state: Mutex<State>,
    step_cv: Condvar,
    gate_cvs: [Condvar; 3],
}

impl GroupControl {
    pub fn new(group_id: u32, guide_id: u32, members: &[Arc<Tourist>]) -> Self {
        Self {
            group_id,
            guide_id,
            members: members.iter().map(Arc::downgrade).collect(),
            state: Mutex::new(State {
                route: Route::One,
                current: None,
                step_active: false,
                completed: 0,
                gates: Default::default(),
            }),
            step_cv: Condvar::new(),
            gate_cvs: [Condvar::new(), Condvar::new(), Condvar::new()],
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Live handles to the group's members.
    pub fn members(&self) -> Vec<Arc<Tourist>> {
        self.members.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn set_route(&self, route: Route) {
        self.state.lock().expect("group lock poisoned").route = route;
    }

    pub fn route(&self) -> Route {
        self.state.lock().expect("group lock poisoned").route
    }

    /// Lowest id among adult members; lowest id overall when the group has
    /// no adults.
    fn pick_coordinator(&self) -> Option<u32> {
        let mut best_adult: Option<u32> = None;
        let mut best_any: Option<u32> = None;
        for t in self.members() {
            best_any = Some(best_any.map_or(t.id, |b| b.min(t.id)));
            if t.age >= 15 {
                best_adult = Some(best_adult.map_or(t.id, |b| b.min(t.id)));
            }
        }
        best_adult.or(best_any)
    }

    /// Start a step: reset the barrier and every resource gate, then wake
    /// all waiters.
    pub fn begin_step(&self, step: Step) {
        let coordinator = self.pick_coordinator();
        {
            let mut st = self.state.lock().expect("group lock poisoned");
            st.current = Some(step);
            st.completed = 0;
            st.step_active = true;
            for gate in &mut st.gates {
                gate.in_progress = false;
                gate.coordinator_id = coordinator;
            }
        }
        self.step_cv.notify_all();
        for cv in &self.gate_cvs {
            cv.notify_all();
        }
    }

    /// One member finished the current step.
    pub fn mark_done(&self) {
        let mut st = self.state.lock().expect("group lock poisoned");
        st.completed += 1;
        if st.completed >= self.members.len() {
            st.step_active = false;
            drop(st);
            self.step_cv.notify_all();
        }
    }

    /// Block until every member has marked the current step done.
    pub fn wait_step_done(&self) {
        let guard = self.state.lock().expect("group lock poisoned");
        let _st = self
            .step_cv
            .wait_while(guard, |st| st.step_active)
            .expect("group lock poisoned");
    }

    /// True exactly once per (resource, epoch), and only for the elected
    /// coordinator. Marks the gate in progress as a side effect.
    pub fn try_become_coordinator(&self, res: Resource, epoch: u64, tourist_id: u32) -> bool {
        let mut st = self.state.lock().expect("group lock poisoned");
        let gate = &mut st.gates[res.index()];
        if gate.epoch_done >= epoch || gate.in_progress || gate.coordinator_id != Some(tourist_id) {
            return false;
        }
        gate.in_progress = true;
        true
    }

    /// Coordinator finished the resource operation for this epoch.
    pub fn finish(&self, res: Resource, epoch: u64) {
        {
            let mut st = self.state.lock().expect("group lock poisoned");
            let gate = &mut st.gates[res.index()];
            gate.epoch_done = epoch;
            gate.in_progress = false;
        }
        self.gate_cvs[res.index()].notify_all();
    }

    /// Block until the coordinator has finished this epoch on `res`.
    pub fn wait_done(&self, res: Resource, epoch: u64) {
        let guard = self.state.lock().expect("group lock poisoned");
        let _st = self.gate_cvs[res.index()]
            .wait_while(guard, |st| st.gates[res.index()].epoch_done < epoch)
            .expect("group lock poisoned");
    }

    /// Step currently being executed, if any.
    pub fn current_step(&self) -> Option<Step> {
        self.state.lock().expect("group lock poisoned").current
    }
}

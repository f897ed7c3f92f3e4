//! Group scheduler ("guide"): forms groups of M, assigns guardians, drives
//! the chosen route as synchronized step broadcasts, and injects the two
//! asynchronous signals.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::log::Tag;
use crate::park::group::GroupControl;
use crate::park::tourist::Tourist;
use crate::park::{sleep_ms, Park, Route, Step};

pub(crate) fn run(park: Arc<Park>, guide_id: u32) {
    park.log
        .emit(Tag::Guide, format_args!("START guide={guide_id}"));
    let mut seq = 0u32;

    loop {
        // Blocks until M visitors wait, or hands back the remainder once
        // the park closed. Empty means nothing left to lead.
        let members = park.dequeue_group(park.cfg.group_size as usize);
        if members.is_empty() {
            break;
        }
        let gid = guide_id * 100_000 + seq;
        seq += 1;
        lead_group(&park, gid, guide_id, members);
    }

    park.log
        .emit(Tag::Guide, format_args!("STOP guide={guide_id}"));
}

fn lead_group(park: &Park, gid: u32, guide_id: u32, members: Vec<Arc<Tourist>>) {
    let group = Arc::new(GroupControl::new(gid, guide_id, &members));
    let route = Route::pick(&park.rng);
    group.set_route(route);
    for t in &members {
        t.set_group(Arc::clone(&group));
        t.assign_to_group(gid, guide_id);
    }
    park.log.emit(
        Tag::Guide,
        format_args!("GROUP_START guide={guide_id} gid={gid} route={route}"),
    );

    assign_guardians(park, gid, &members);
    drive_route(park, &group, &members, route);

    broadcast(&group, &members, Step::Exit);
    park.log.emit(
        Tag::Guide,
        format_args!("GROUP_END guide={guide_id} gid={gid}"),
    );
}

/// Every child gets a uniformly random adult guardian; a group without
/// adults latches `no_guardian` on each child instead. Under-5 wards mark
/// their guardian as escorting a toddler.
fn assign_guardians(park: &Park, gid: u32, members: &[Arc<Tourist>]) {
    let adults: Vec<&Arc<Tourist>> = members.iter().filter(|t| t.age >= 15).collect();
    for child in members.iter().filter(|t| t.age < 15) {
        if adults.is_empty() {
            child.set_guardian(None);
            park.log
                .emit(Tag::Guard, format_args!("GUARD_NONE id={} gid={gid}", child.id));
        } else {
            let pick = park.rng.int_in(0, adults.len() as u64 - 1) as usize;
            let guardian = adults[pick];
            child.set_guardian(Some(guardian));
            park.log.emit(
                Tag::Guard,
                format_args!("GUARD_ASSIGN id={} guardian={} gid={gid}", child.id, guardian.id),
            );
        }
    }
}

fn drive_route(park: &Park, group: &Arc<GroupControl>, members: &[Arc<Tourist>], route: Route) {
    let has_young = members.iter().any(|t| t.age < 12);
    let legs: [(&str, &str, Step); 4] = match route {
        Route::One => [
            ("K", "A", Step::GoA),
            ("A", "B", Step::GoB),
            ("B", "C", Step::GoC),
            ("C", "K", Step::ReturnK),
        ],
        Route::Two => [
            ("K", "C", Step::GoC),
            ("C", "B", Step::GoB),
            ("B", "A", Step::GoA),
            ("A", "K", Step::ReturnK),
        ],
    };

    for (from, to, step) in legs {
        if !walk_segment(park, group, members, from, to, has_young) {
            return;
        }
        if step == Step::GoB {
            broadcast_tower_step(park, group, members);
        } else {
            broadcast(group, members, step);
        }
    }
}

/// Draw signal 2, then walk one segment. Returns false when the group has
/// been redirected to the entrance (the RETURN_K broadcast already ran).
fn walk_segment(
    park: &Park,
    group: &Arc<GroupControl>,
    members: &[Arc<Tourist>],
    from: &str,
    to: &str,
    has_young: bool,
) -> bool {
    if park.rng.chance(park.cfg.signal2_prob) {
        park.log.emit(
            Tag::Guide,
            format_args!("SIGNAL2 guide={} gid={}", group.guide_id, group.group_id),
        );
        for t in members {
            t.abort_to_return.store(true, Ordering::SeqCst);
        }
    }
    if members
        .iter()
        .any(|t| t.abort_to_return.load(Ordering::SeqCst))
    {
        broadcast(group, members, Step::ReturnK);
        return false;
    }

    park.log.emit(
        Tag::Guide,
        format_args!("SEGMENT {from}->{to} gid={}", group.group_id),
    );
    let mut walk = park
        .rng
        .int_in(park.cfg.segment_min_ms, park.cfg.segment_max_ms);
    if has_young {
        // Children under 12 slow the whole group down.
        walk = walk * 3 / 2;
    }
    sleep_ms(walk);
    true
}

/// The tower broadcast races the evacuation draw: members start their
/// stay while the guide may still latch `tower_evacuate`, cutting the
/// stay to the short descent.
fn broadcast_tower_step(park: &Park, group: &Arc<GroupControl>, members: &[Arc<Tourist>]) {
    group.begin_step(Step::GoB);
    for t in members {
        t.set_step(Step::GoB);
    }
    if park.rng.chance(park.cfg.signal1_prob) {
        park.log.emit(
            Tag::Guide,
            format_args!("SIGNAL1 guide={} gid={}", group.guide_id, group.group_id),
        );
        for t in members {
            t.tower_evacuate.store(true, Ordering::SeqCst);
        }
    }
    group.wait_step_done();
}

fn broadcast(group: &GroupControl, members: &[Arc<Tourist>], step: Step) {
    group.begin_step(step);
    for t in members {
        t.set_step(step);
    }
    group.wait_step_done();
}

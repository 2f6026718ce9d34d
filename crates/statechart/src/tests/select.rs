use std::sync::{Arc, Mutex};

use crate::context::Shared;
use crate::error::HookError;
use crate::execute::Interpreter;
use crate::graph::StateGraph;
use crate::transition::TransitionSpec;

type G = StateGraph<&'static str>;

/// Drive the interpreter directly, without the consumer thread.
fn boot(g: G) -> Interpreter<&'static str> {
    g.validate().expect("graph should validate");
    let mut it = Interpreter::new(Arc::new(g), Arc::new(Shared::new()));
    it.enter_initial().expect("initial entry");
    it
}

#[derive(Clone, Default)]
struct Probe {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Probe {
    fn mark(&self, what: &'static str) {
        self.log.lock().unwrap().push(what);
    }

    fn take(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

#[test]
fn deepest_enabled_transition_wins() {
    let mut g = G::new();
    let c = g.state("c");
    let inner = g.state_in("inner", c);
    g.set_initial(c, inner);
    let out_shallow = g.state("out_shallow");
    let out_deep = g.state("out_deep");
    g.chain(c).via("a").to(out_shallow);
    g.chain(inner).via("a").to(out_deep);
    g.set_initial(g.root(), c);

    let mut it = boot(g);
    it.step_event(&"a").unwrap();
    assert!(it.run.active.contains(&out_deep));
    assert!(!it.run.active.contains(&out_shallow));
    assert!(!it.run.active.contains(&c));
}

#[test]
fn guard_false_falls_through_declaration_order() {
    let mut g = G::new();
    let s = g.state("s");
    let t1 = g.state("t1");
    let t2 = g.state("t2");
    g.chain(s)
        .via(TransitionSpec::on(|e: &&str| *e == "a").guard(|_, _| false))
        .to(t1);
    g.chain(s).via("a").to(t2);
    g.set_initial(g.root(), s);

    let mut it = boot(g);
    it.step_event(&"a").unwrap();
    assert!(it.run.active.contains(&t2));
    assert!(!it.run.active.contains(&t1));
}

#[test]
fn faulting_guard_counts_as_false() {
    let probe = Probe::default();
    let mut g = G::new();
    let s = g.state("s");
    let t1 = g.state("t1");
    let t2 = g.state("t2");
    let asked = probe.clone();
    g.chain(s)
        .via(TransitionSpec::on(|e: &&str| *e == "a").guard_fallible(move |_, _| {
            asked.mark("guard fault");
            Err(HookError::from("guard blew up"))
        }))
        .to(t1);
    g.chain(s).via("a").to(t2);
    g.set_initial(g.root(), s);

    let mut it = boot(g);
    it.step_event(&"a").unwrap();

    // The fault demotes the first transition to disabled; dispatch moves on.
    assert_eq!(probe.take(), vec!["guard fault"]);
    assert!(it.run.active.contains(&t2));
    assert!(!it.run.active.contains(&t1));
}

#[test]
fn faulting_completion_guard_falls_through() {
    let mut g = G::new();
    let s0 = g.state("s0");
    let s1 = g.state_in("s1", s0);
    let s2 = g.state_in("s2", s0);
    let s3 = g.state_in("s3", s0);
    g.set_initial(s0, s1);
    g.set_initial(g.root(), s0);
    g.chain(s1)
        .via(TransitionSpec::completion()
            .guard_fallible(|_, _| Err(HookError::from("completion guard fault"))))
        .to(s2);
    g.chain(s1).to(s3);

    let it = boot(g);
    assert!(it.run.active.contains(&s3));
    assert!(!it.run.active.contains(&s2));
}

#[test]
fn internal_transition_runs_action_without_exit_or_entry() {
    let probe = Probe::default();
    let mut g = G::new();
    let c = g.state("c");
    let inner = g.state_in("inner", c);
    g.set_initial(c, inner);
    g.set_initial(g.root(), c);
    let enters = probe.clone();
    g.configure(c).on_entry(move |_| enters.mark("c entered"));
    let acted = probe.clone();
    g.internal(
        c,
        TransitionSpec::on(|e: &&str| *e == "tick").run(move |_, _| acted.mark("tick")),
    );

    let mut it = boot(g);
    let before: Vec<_> = it.run.active.iter().copied().collect();
    it.step_event(&"tick").unwrap();
    it.step_event(&"tick").unwrap();
    let after: Vec<_> = it.run.active.iter().copied().collect();

    assert_eq!(probe.take(), vec!["c entered", "tick", "tick"]);
    assert_eq!(
        {
            let mut b = before;
            b.sort();
            b
        },
        {
            let mut a = after;
            a.sort();
            a
        }
    );
}

#[test]
fn junction_branches_are_chosen_statically() {
    let probe = Probe::default();
    let mut g = G::new();
    let s = g.state("s");
    let j = g.junction_in("j", g.root());
    let t1 = g.state("t1");
    let t2 = g.state("t2");
    g.chain(s).via("ev").to(j);
    g.chain(j)
        .via(TransitionSpec::completion().guard(|ctx, _| ctx.lookup::<i32>("k") == Some(1)))
        .to(t1);
    g.chain(j).via(TransitionSpec::completion()).to(t2);
    g.set_initial(g.root(), s);
    let t1_probe = probe.clone();
    g.configure(t1).on_entry(move |_| t1_probe.mark("t1"));
    let t2_probe = probe.clone();
    g.configure(t2).on_entry(move |_| t2_probe.mark("t2"));

    let mut it = boot(g);
    it.shared.assign("k", 2i32);
    it.step_event(&"ev").unwrap();
    assert!(it.run.active.contains(&t2));
    assert_eq!(probe.take(), vec!["t2"]);
}

#[test]
fn junction_with_no_satisfiable_branch_is_a_deadlock() {
    let mut g = G::new();
    let s = g.state("s");
    let j = g.junction_in("j", g.root());
    let t1 = g.state("t1");
    g.chain(s).via("ev").to(j);
    g.chain(j)
        .via(TransitionSpec::completion().guard(|_, _| false))
        .to(t1);
    g.set_initial(g.root(), s);

    let mut it = boot(g);
    assert!(it.step_event(&"ev").is_err());
}

#[test]
fn completion_transitions_respect_guards() {
    let probe = Probe::default();
    let mut g = G::new();
    let s0 = g.state("s0");
    let s1 = g.state_in("s1", s0);
    let s2 = g.state_in("s2", s0);
    let s3 = g.state_in("s3", s0);
    g.set_initial(s0, s1);
    g.set_initial(g.root(), s0);
    let first = probe.clone();
    g.chain(s1)
        .via(TransitionSpec::completion().guard(move |_, _| {
            first.mark("guard one");
            false
        }))
        .to(s2);
    let second = probe.clone();
    g.chain(s1)
        .via(TransitionSpec::completion().guard(move |_, _| {
            second.mark("guard two");
            true
        }))
        .to(s3);

    let it = boot(g);
    assert!(it.run.active.contains(&s3));
    assert!(!it.run.active.contains(&s2));
    assert_eq!(it.run.active.contains(&s1), false);
    assert_eq!(probe.take(), vec!["guard one", "guard two"]);
}

#[test]
fn conflicting_region_exits_keep_the_first_declared() {
    let mut g = G::new();
    let p = g.parallel("p");
    let r1 = g.state_in("r1", p);
    let a1 = g.state_in("a1", r1);
    g.set_initial(r1, a1);
    let r2 = g.state_in("r2", p);
    let a2 = g.state_in("a2", r2);
    g.set_initial(r2, a2);
    let out1 = g.state("out1");
    let out2 = g.state("out2");
    g.chain(a1).via("x").to(out1);
    g.chain(a2).via("x").to(out2);
    g.set_initial(g.root(), p);

    let mut it = boot(g);
    it.step_event(&"x").unwrap();
    assert!(it.run.active.contains(&out1));
    assert!(!it.run.active.contains(&out2));
    assert!(!it.run.active.contains(&p));
}

#[test]
fn independent_region_selections_both_fire() {
    let mut g = G::new();
    let p = g.parallel("p");
    let r1 = g.state_in("r1", p);
    let a1 = g.state_in("a1", r1);
    let b1 = g.state_in("b1", r1);
    g.set_initial(r1, a1);
    let r2 = g.state_in("r2", p);
    let a2 = g.state_in("a2", r2);
    let b2 = g.state_in("b2", r2);
    g.set_initial(r2, a2);
    g.chain(a1).via("x").to(b1);
    g.chain(a2).via("x").to(b2);
    g.set_initial(g.root(), p);

    let mut it = boot(g);
    it.step_event(&"x").unwrap();
    assert!(it.run.active.contains(&b1));
    assert!(it.run.active.contains(&b2));
    assert!(it.run.active.contains(&p));
}

#[test]
fn event_without_enabled_transition_is_discarded() {
    let mut g = G::new();
    let s = g.state("s");
    g.set_initial(g.root(), s);
    let mut it = boot(g);
    let before: Vec<_> = {
        let mut v: Vec<_> = it.run.active.iter().copied().collect();
        v.sort();
        v
    };
    it.step_event(&"nothing matches").unwrap();
    let after: Vec<_> = {
        let mut v: Vec<_> = it.run.active.iter().copied().collect();
        v.sort();
        v
    };
    assert_eq!(before, after);
}

#[test]
fn region_finals_bubble_completion_to_the_parallel_state() {
    let mut g = G::new();
    let p = g.parallel("p");
    let r1 = g.state_in("r1", p);
    let a1 = g.state_in("a1", r1);
    g.set_initial(r1, a1);
    let f1 = g.final_in(r1);
    g.chain(a1).to(f1);
    let r2 = g.state_in("r2", p);
    let a2 = g.state_in("a2", r2);
    g.set_initial(r2, a2);
    let f2 = g.final_in(r2);
    g.chain(a2).to(f2);
    let end = g.state("end");
    g.chain(p).to(end);
    g.set_initial(g.root(), p);

    let it = boot(g);
    assert!(it.run.active.contains(&end));
    assert!(!it.run.active.contains(&p));
}

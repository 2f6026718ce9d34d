use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use statechart::{DoToken, HookError, StateGraph, StateMachine, TransitionSpec};

type G = StateGraph<&'static str>;

#[derive(Clone, Default)]
struct Probe {
    log: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    fn mark(&self, what: impl Into<String>) {
        self.log.lock().unwrap().push(what.into());
    }

    fn count(&self, what: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|e| *e == what).count()
    }
}

fn active_set(machine: &StateMachine<&'static str>) -> HashSet<String> {
    machine.active_states().into_iter().collect()
}

#[test]
fn linear_sequence_reaches_the_final_state_and_terminates() {
    let probe = Probe::default();
    let mut g = G::new();
    let s1 = g.state("S1");
    let s2 = g.state("S2");
    let f = g.final_in(g.root());
    g.chain(s1).via("a").to(s2).via("b").to(s1);
    let done = probe.clone();
    g.chain(s2)
        .via(TransitionSpec::on(|e: &&str| *e == "c").run(move |_, _| done.mark("done")))
        .to(f);
    g.set_initial(g.root(), s1);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    machine.post_all(["a", "a", "b", "a", "c"]).unwrap();

    assert!(machine.join(Duration::from_secs(2)));
    assert_eq!(probe.count("done"), 1);
    // After shutdown nothing stays active.
    assert!(machine.active_states().is_empty());
    assert!(machine.last_error().is_none());
}

#[test]
fn inner_final_completes_the_composite() {
    let mut g = G::new();
    let c = g.state("C");
    let i = g.initial_in(c);
    let x = g.state_in("X", c);
    let y = g.state_in("Y", c);
    let f_inner = g.final_in(c);
    g.chain(i).to(x).via("p").to(y).to(f_inner);
    let done = g.state("Done");
    g.chain(c).to(done);
    g.set_initial(g.root(), c);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    assert!(active_set(&machine).contains("X"));

    machine.post("p").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    let active = active_set(&machine);
    assert!(active.contains("Done"));
    assert!(!active.contains("C"));

    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

fn parallel_machine() -> StateMachine<&'static str> {
    let mut g = G::new();
    let p = g.parallel("P");
    let r1 = g.state_in("R1", p);
    let i1 = g.initial_in(r1);
    let a = g.state_in("A", r1);
    let f1 = g.final_in(r1);
    g.chain(i1).to(a).via("x").to(f1);
    let r2 = g.state_in("R2", p);
    let i2 = g.initial_in(r2);
    let b = g.state_in("B", r2);
    let f2 = g.final_in(r2);
    g.chain(i2).to(b).via("y").to(f2);
    let end = g.state("End");
    g.chain(p).to(end);
    g.set_initial(g.root(), p);
    StateMachine::new(g)
}

#[test]
fn parallel_regions_complete_in_either_order() {
    for sequence in [vec!["x", "y"], vec!["y", "x"]] {
        let machine = parallel_machine();
        machine.start().unwrap();
        machine.post_all(sequence.clone()).unwrap();
        assert!(machine.settle(Duration::from_secs(1)));
        let active = active_set(&machine);
        assert!(active.contains("End"), "sequence {sequence:?} should end in End");
        assert!(!active.contains("P"));
        machine.stop();
        assert!(machine.join(Duration::from_secs(2)));
    }
}

#[test]
fn one_completed_region_waits_for_the_other() {
    let machine = parallel_machine();
    machine.start().unwrap();
    machine.post("x").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    let active = active_set(&machine);
    for state in ["P", "R1", "R2", "B"] {
        assert!(active.contains(state), "{state} should stay active");
    }
    assert!(!active.contains("A"));
    assert!(!active.contains("End"));
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn deep_history_restores_the_leaf_configuration() {
    let mut g = G::new();
    let c = g.state("C");
    let d = g.state_in("D", c);
    let d1 = g.state_in("D1", d);
    let d2 = g.state_in("D2", d);
    g.set_initial(d, d1);
    g.state_in("E", c);
    g.set_initial(c, d);
    let h = g.deep_history_in(c);
    let s2 = g.state("S2");
    g.chain(d1).via("d").to(d2);
    g.chain(c).via("out").to(s2);
    g.chain(s2).via("back").to(h);
    g.set_initial(g.root(), c);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    machine.post("d").unwrap();
    machine.post("out").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    assert!(active_set(&machine).contains("S2"));

    machine.post("back").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    let active = active_set(&machine);
    for state in ["C", "D", "D2"] {
        assert!(active.contains(state), "{state} should be restored");
    }
    assert!(!active.contains("D1"));
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn junction_picks_the_else_branch_when_no_guard_holds() {
    let probe = Probe::default();
    let mut g = G::new();
    let s1 = g.state("S1");
    let j = g.junction_in("J", g.root());
    let t1 = g.state("T1");
    let t2 = g.state("T2");
    g.chain(s1).via("ev").to(j);
    g.chain(j)
        .via(TransitionSpec::completion().guard(|ctx, _| ctx.lookup::<i32>("k") == Some(1)))
        .to(t1);
    g.chain(j).via(TransitionSpec::completion()).to(t2);
    g.set_initial(g.root(), s1);
    let p1 = probe.clone();
    g.configure(t1).on_entry(move |_| p1.mark("T1 entered"));
    let p2 = probe.clone();
    g.configure(t2).on_entry(move |_| p2.mark("T2 entered"));

    let machine = StateMachine::new(g);
    machine.assign("k", 2i32);
    machine.start().unwrap();
    machine.post("ev").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));

    assert!(active_set(&machine).contains("T2"));
    assert_eq!(probe.count("T2 entered"), 1);
    assert_eq!(probe.count("T1 entered"), 0);
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn do_activity_is_cancelled_when_its_state_exits() {
    let probe = Probe::default();
    let token_slot: Arc<Mutex<Option<DoToken>>> = Arc::new(Mutex::new(None));
    let mut g = G::new();
    let busy = g.state("Busy");
    let idle = g.state("Idle");
    g.chain(busy).via("done").to(idle);
    g.set_initial(g.root(), busy);
    let started = probe.clone();
    let slot = Arc::clone(&token_slot);
    g.configure(busy).do_activity(move |_, token| {
        started.mark("do started");
        *slot.lock().unwrap() = Some(token);
    });

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    assert_eq!(probe.count("do started"), 1);
    let token = token_slot.lock().unwrap().clone().expect("activity started");
    assert!(!token.is_cancelled());

    machine.post("done").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    assert!(token.is_cancelled());
    assert!(active_set(&machine).contains("Idle"));
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn faulting_behaviors_leave_the_machine_running() {
    let probe = Probe::default();
    let mut g = G::new();
    let s1 = g.state("S1");
    let s2 = g.state("S2");
    let entered = probe.clone();
    g.configure(s2).on_entry_fallible(move |_| {
        entered.mark("S2 entered");
        Err(HookError::from("entry fault"))
    });
    let acted = probe.clone();
    g.chain(s1)
        .via(TransitionSpec::on(|e: &&str| *e == "go").run_fallible(move |_, _| {
            acted.mark("action");
            Err(HookError::from("action fault"))
        }))
        .to(s2);
    g.chain(s2).via("back").to(s1);
    g.set_initial(g.root(), s1);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    machine.post_all(["go", "back", "go"]).unwrap();
    assert!(machine.settle(Duration::from_secs(1)));

    // Both faulting hooks ran twice and the machine kept dispatching.
    assert_eq!(probe.count("action"), 2);
    assert_eq!(probe.count("S2 entered"), 2);
    assert!(active_set(&machine).contains("S2"));
    assert!(machine.last_error().is_none());
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn state_timeout_fires_once_and_only_while_active() {
    let probe = Probe::default();
    let mut g = G::new();
    let w = g.state("W");
    let exit = g.state("Exit");
    g.chain(w)
        .via(TransitionSpec::after(Duration::from_millis(80)))
        .to(exit);
    g.set_initial(g.root(), w);
    let pw = probe.clone();
    g.configure(w).on_entry(move |_| pw.mark("W entered"));
    let pe = probe.clone();
    g.configure(exit).on_entry(move |_| pe.mark("Exit entered"));

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    thread::sleep(Duration::from_millis(20));
    // Unrelated event well inside the delay: no transition.
    machine.post("other").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    assert!(active_set(&machine).contains("W"));

    thread::sleep(Duration::from_millis(150));
    assert!(active_set(&machine).contains("Exit"));
    assert_eq!(probe.count("Exit entered"), 1);

    // The timer died with W's exit.
    machine.post("other").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    thread::sleep(Duration::from_millis(120));
    assert_eq!(probe.count("W entered"), 1);
    assert_eq!(probe.count("Exit entered"), 1);
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

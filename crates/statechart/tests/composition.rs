use std::collections::HashSet;
use std::time::Duration;

use statechart::{StateGraph, StateMachine, StructuralError, TriggerDescription, VertexKind};

type G = StateGraph<&'static str>;

/// Reusable fragment: Session { Login -ok-> Active -bye-> done }, with a
/// shortcut Login -skip-> Active.
fn session_template() -> G {
    let mut g = G::new();
    let login = g.state("Login");
    let active = g.state("Active");
    let done = g.final_in(g.root());
    g.chain(login).via("ok").to(active).via("bye").to(done);
    g.chain(login).via("skip").to(active);
    g.set_initial(g.root(), login);
    g
}

#[test]
fn an_attached_template_runs_under_its_new_parent() {
    let template = session_template();
    let mut g = G::new();
    let boot = g.state("Boot");
    let session = g.attach_as(g.root(), "Session", &template);
    let shutdown = g.state("Shutdown");
    g.chain(boot).via("up").to(session);
    g.chain(session).to(shutdown);
    g.set_initial(g.root(), boot);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    machine.post_all(["up", "ok", "bye"]).unwrap();
    assert!(machine.settle(Duration::from_secs(1)));

    let active: HashSet<String> = machine.active_states().into_iter().collect();
    assert!(active.contains("Shutdown"));
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn masking_removes_a_template_feature() {
    let template = session_template();
    let mut g = G::new();
    let session = g.attach_as(g.root(), "Session", &template);
    g.set_initial(g.root(), session);
    // This variant of the machine does not allow skipping the login.
    g.mask_transition(session, "\"skip\"").unwrap();

    let end = g.state("End");
    g.chain(session).to(end);

    let machine = StateMachine::new(g);
    machine.start().unwrap();
    machine.post("skip").unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    let active: HashSet<String> = machine.active_states().into_iter().collect();
    assert!(active.contains("Login"), "skip must be inert in this variant");

    machine.post_all(["ok", "bye"]).unwrap();
    assert!(machine.settle(Duration::from_secs(1)));
    let active: HashSet<String> = machine.active_states().into_iter().collect();
    assert!(active.contains("End"));
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn graph_edits_fail_once_the_machine_started() {
    let mut g = G::new();
    let only = g.state("Only");
    g.set_initial(g.root(), only);
    let machine = StateMachine::new(g);

    machine.with_graph(|g| g.state("BeforeStart")).unwrap();
    machine.start().unwrap();
    let err = machine.with_graph(|g| g.state("AfterStart")).unwrap_err();
    assert_eq!(err, StructuralError::Frozen);
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn starting_twice_is_rejected() {
    let mut g = G::new();
    let only = g.state("Only");
    g.set_initial(g.root(), only);
    let machine = StateMachine::new(g);
    machine.start().unwrap();
    assert_eq!(machine.start().unwrap_err(), StructuralError::AlreadyStarted);
    machine.stop();
    assert!(machine.join(Duration::from_secs(2)));
}

#[test]
fn validation_failures_keep_the_machine_unstarted() {
    let mut g = G::new();
    let c = g.state("C");
    // A child without any initial designation.
    g.state_in("inner", c);
    g.set_initial(g.root(), c);
    let machine = StateMachine::new(g);
    let err = machine.start().unwrap_err();
    assert!(matches!(err, StructuralError::MissingInitial(_)));
    // The graph stays editable after the failed start.
    machine.with_graph(|_| ()).unwrap();
}

#[test]
fn the_description_reflects_the_graph() {
    let template = session_template();
    let description = template.describe();
    let login = description
        .vertices
        .iter()
        .find(|v| v.name.as_deref() == Some("Login"))
        .expect("Login is described");
    assert_eq!(login.kind, VertexKind::Simple);
    assert!(!login.has_entry);

    let ok_edge = description
        .transitions
        .iter()
        .find(|t| t.label.as_deref() == Some("\"ok\""))
        .expect("labeled edge is described");
    assert_eq!(ok_edge.trigger, TriggerDescription::Event);
    assert!(!ok_edge.has_guard);
    assert!(description
        .vertices
        .iter()
        .any(|v| v.kind == VertexKind::Final));
}

//! Media player with pause/resume, a pause timeout and power toggling that
//! resumes where playback left off.
//!
//! Run with `RUST_LOG=statechart=debug` to watch the engine dispatch.

use std::thread;
use std::time::Duration;

use statechart::{StateGraph, StateMachine, TransitionSpec};
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut g: StateGraph<&'static str> = StateGraph::new();

    let off = g.state("Off");
    let on = g.state("On");
    let stopped = g.state_in("Stopped", on);
    let playing = g.state_in("Playing", on);
    let paused = g.state_in("Paused", on);
    g.set_initial(on, stopped);
    let resume = g.deep_history_in(on);

    g.chain(stopped).via("play").to(playing);
    g.chain(playing).via("stop").to(stopped);
    g.chain(playing).via("pause").to(paused);
    g.chain(paused).via("play").to(playing);
    // A pause left alone for two seconds falls back to Stopped.
    g.chain(paused)
        .via(TransitionSpec::after(Duration::from_secs(2)))
        .to(stopped);
    g.chain(on).via("power").to(off);
    g.chain(off).via("power").to(resume);
    g.set_initial(g.root(), off);

    for (id, name) in [
        (off, "Off"),
        (stopped, "Stopped"),
        (playing, "Playing"),
        (paused, "Paused"),
    ] {
        g.configure(id).on_entry(move |_| info!("{name}"));
    }

    let machine = StateMachine::new(g);
    machine.start().expect("the player graph is well-formed");

    info!("power on, start playback, pause");
    machine
        .post_all(["power", "play", "pause"])
        .expect("machine accepts events");
    machine.settle(Duration::from_secs(1));

    info!("power off while paused, then back on: playback resumes paused");
    machine.post_all(["power", "power"]).expect("machine accepts events");
    machine.settle(Duration::from_secs(1));
    info!("active: {:?}", machine.active_states());

    info!("waiting for the pause timeout");
    thread::sleep(Duration::from_millis(2300));
    info!("active: {:?}", machine.active_states());

    machine.stop();
    machine.join(Duration::from_secs(1));
}

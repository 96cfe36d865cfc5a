//! Async driver for the behaviour machine.
//!
//! The machine lives on one tokio task. Commands arrive over an mpsc
//! channel, a heartbeat interval synthesises `tick` events, and the loop
//! sleeps until the next timer deadline so timers fire on time without a
//! task per timer.

use std::time::Duration;

use anyhow::Context;
use kizuna_core::{Clock, Event, SystemClock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::machine::{BehaviorMachine, Snapshot};

/// Longest single sleep towards a timer deadline.
const MAX_TIMER_SLEEP_SECS: f64 = 3600.0;

/// How often the runtime ticks the affect dynamics.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl HeartbeatConfig {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(ms.max(1)),
        }
    }
}

/// Clock that follows tokio's timer, anchored at the wall clock when created.
/// Under a paused test runtime it advances with `tokio::time::advance`.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    origin: Instant,
    base: f64,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            base: SystemClock.now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> f64 {
        self.base + self.origin.elapsed().as_secs_f64()
    }

    fn local_hour(&self) -> u32 {
        SystemClock.local_hour()
    }
}

enum Command {
    Submit(Event),
    SubmitNamed { name: String, payload: Value },
    UtteranceBoundary,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Cheap, cloneable handle to a running machine.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    pub async fn submit(&self, event: Event) -> anyhow::Result<()> {
        self.send(Command::Submit(event)).await
    }

    pub async fn submit_named(&self, name: impl Into<String>, payload: Value) -> anyhow::Result<()> {
        self.send(Command::SubmitNamed {
            name: name.into(),
            payload,
        })
        .await
    }

    pub async fn utterance_boundary(&self) -> anyhow::Result<()> {
        self.send(Command::UtteranceBoundary).await
    }

    pub async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.context("Behaviour runtime dropped the snapshot request")
    }

    /// Ask the loop to stop after the commands already queued.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reach behaviour runtime: {}", e))
    }
}

pub struct BehaviorRuntime;

impl BehaviorRuntime {
    /// Move `machine` onto its own task. The join handle yields the machine
    /// back after shutdown.
    pub fn spawn(machine: BehaviorMachine, heartbeat: HeartbeatConfig) -> (RuntimeHandle, JoinHandle<BehaviorMachine>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run(machine, heartbeat, rx));
        (RuntimeHandle { tx }, task)
    }
}

async fn run(mut machine: BehaviorMachine, heartbeat: HeartbeatConfig, mut rx: mpsc::Receiver<Command>) -> BehaviorMachine {
    let mut interval = tokio::time::interval(heartbeat.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;
    let mut last_tick = Instant::now();
    tracing::debug!(interval_ms = heartbeat.interval.as_millis() as u64, "Behaviour runtime started");

    loop {
        let deadline = machine.next_deadline().map(|due| {
            let wait = (due - machine.now()).max(0.0).min(MAX_TIMER_SLEEP_SECS);
            Instant::now() + Duration::from_secs_f64(wait)
        });

        // Overdue timers fire before whatever woke the loop, so an event
        // never sees a mode its deadline should already have ended.
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => {}
            command = rx.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => {
                    machine.poll_timers();
                    handle_command(&mut machine, command);
                }
            },
            _ = interval.tick() => {
                machine.poll_timers();
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;
                machine.submit(Event::Tick { dt });
            }
        }

        machine.poll_timers();
    }

    tracing::debug!("Behaviour runtime stopped");
    machine
}

fn handle_command(machine: &mut BehaviorMachine, command: Command) {
    match command {
        Command::Submit(event) => machine.submit(event),
        Command::SubmitNamed { name, payload } => machine.submit_named(&name, payload),
        Command::UtteranceBoundary => {
            machine.notify_utterance_boundary();
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(machine.snapshot());
        }
        Command::Shutdown => {}
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

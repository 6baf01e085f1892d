//! Behavioural state machines
//!
//! NPC behaviour is data, not code: a [`StateMachine`] maps each named
//! state to the messages it answers and the actions each message fires.
//! Machines are authored as RON or TOML and shared between every entity
//! running the same role.
//!
//! Each entity with a brain carries an [`AiState`]: the active machine, a
//! bounded stack of suspended machines for nested behaviours, and a FIFO
//! queue of pending messages. Messages are never processed on arrival —
//! they wait for the next think pulse, which fires on its own cadence
//! (`think_interval`, default 0.125 s) independent of the physics tick.
//! That bounds AI reaction latency by the interval in exchange for doing
//! a fraction of the AI work per tick.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// State every machine starts in
pub const GLOBAL_STATE: &str = "GLOBAL";

/// Synthetic message delivered on every think pulse after queued messages
pub const UPDATE_MESSAGE: &str = "UPDATE";

/// Maximum depth of the suspended-machine stack
pub const MAX_STACK_DEPTH: usize = 32;

/// A behaviour state machine: state name → message → actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine {
    /// Machine name, used for diagnostics and machine switching
    pub name: String,
    /// Handler table
    pub states: HashMap<String, HashMap<String, Vec<String>>>,
}

impl StateMachine {
    /// Create an empty machine
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
        }
    }

    /// Register the actions fired when `message` arrives in `state`
    pub fn add_handler(
        &mut self,
        state: impl Into<String>,
        message: impl Into<String>,
        actions: Vec<String>,
    ) {
        self.states
            .entry(state.into())
            .or_default()
            .insert(message.into(), actions);
    }

    /// Actions for a message in a state, if any are defined
    pub fn actions_for(&self, state: &str, message: &str) -> Option<&[String]> {
        self.states
            .get(state)
            .and_then(|handlers| handlers.get(message))
            .map(Vec::as_slice)
    }

    /// Whether the machine defines a state
    pub fn has_state(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }
}

/// Side effects of a think pulse the AI core cannot resolve itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiDirective {
    /// Fire-and-forget sound cue
    PlaySound(String),
    /// An action for the scripting layer to interpret
    External(String),
}

/// Per-entity behavioural state
#[derive(Debug, Clone)]
pub struct AiState {
    machine: Arc<StateMachine>,
    current_state: String,
    stack: Vec<(Arc<StateMachine>, String)>,
    pending_messages: VecDeque<String>,
    next_think_time: f64,
    think_interval: f64,
}

impl AiState {
    /// Give an entity a brain running `machine`, thinking for the first
    /// time as soon as universal time reaches `now`
    pub fn new(machine: Arc<StateMachine>, now: f64, think_interval: f64) -> Self {
        Self {
            machine,
            current_state: GLOBAL_STATE.to_string(),
            stack: Vec::new(),
            pending_messages: VecDeque::new(),
            next_think_time: now,
            think_interval,
        }
    }

    /// Name of the active machine
    pub fn machine_name(&self) -> &str {
        &self.machine.name
    }

    /// Name of the current state
    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Depth of the suspended-machine stack
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// When this brain will next think
    pub fn next_think_time(&self) -> f64 {
        self.next_think_time
    }

    /// Reschedule the next think pulse
    pub fn set_next_think_time(&mut self, time: f64) {
        self.next_think_time = time;
    }

    /// Seconds between think pulses
    pub fn think_interval(&self) -> f64 {
        self.think_interval
    }

    /// Change the think cadence
    pub fn set_think_interval(&mut self, interval: f64) {
        self.think_interval = interval;
    }

    /// Whether a think pulse is due at `universal_time`
    pub fn is_due(&self, universal_time: f64) -> bool {
        universal_time >= self.next_think_time
    }

    /// Queue a message. Processing happens at the next think pulse, in
    /// FIFO order — never immediately.
    pub fn react_to_message(&mut self, message: impl Into<String>) {
        self.pending_messages.push_back(message.into());
    }

    /// Enter a state directly
    pub fn set_state(&mut self, state: impl Into<String>) {
        let state = state.into();
        if !self.machine.has_state(&state) {
            debug!(
                "machine '{}' has no state '{state}', entering anyway",
                self.machine.name
            );
        }
        self.current_state = state;
    }

    /// Switch to a different machine, restarting in the global state.
    /// The previous machine is forgotten; use
    /// [`preserve_current_machine`](Self::preserve_current_machine) first
    /// for a nested behaviour.
    pub fn set_state_machine(&mut self, machine: Arc<StateMachine>) {
        debug!(
            "switching machine '{}' -> '{}'",
            self.machine.name, machine.name
        );
        self.machine = machine;
        self.current_state = GLOBAL_STATE.to_string();
    }

    /// Push the active machine and state onto the suspension stack
    pub fn preserve_current_machine(&mut self) {
        if self.stack.len() >= MAX_STACK_DEPTH {
            warn!(
                "machine stack for '{}' at depth limit, dropping oldest",
                self.machine.name
            );
            self.stack.remove(0);
        }
        self.stack
            .push((Arc::clone(&self.machine), self.current_state.clone()));
    }

    /// Pop and resume the most recently suspended machine. Returns
    /// `false` when the stack is empty.
    pub fn restore_previous_machine(&mut self) -> bool {
        match self.stack.pop() {
            Some((machine, state)) => {
                self.machine = machine;
                self.current_state = state;
                true
            }
            None => false,
        }
    }

    /// Drop all queued messages
    pub fn drop_messages(&mut self) {
        self.pending_messages.clear();
    }

    /// Run one think pulse at `universal_time`.
    ///
    /// Queued messages are processed in FIFO order, then the periodic
    /// UPDATE message, and the next pulse is scheduled one interval out.
    /// Directives the core cannot resolve are returned for the caller to
    /// dispatch.
    pub fn think(&mut self, universal_time: f64) -> Vec<AiDirective> {
        let mut directives = Vec::new();

        // Schedule before dispatching so pause actions extend the new
        // deadline rather than being overwritten by it
        self.next_think_time = universal_time + self.think_interval;

        // Actions may queue further messages; those wait for the next
        // pulse, so drain only what was pending when the pulse began.
        let pending: Vec<String> = self.pending_messages.drain(..).collect();
        for message in pending {
            self.dispatch_message(&message, &mut directives);
        }
        self.dispatch_message(UPDATE_MESSAGE, &mut directives);

        directives
    }

    fn dispatch_message(&mut self, message: &str, directives: &mut Vec<AiDirective>) {
        let Some(actions) = self
            .machine
            .actions_for(&self.current_state, message)
            .map(<[String]>::to_vec)
        else {
            return;
        };
        for action in &actions {
            self.take_action(action, directives);
        }
    }

    /// Execute one action string.
    ///
    /// Built-in verbs use a `verb: argument` form; anything unrecognized
    /// becomes an [`AiDirective::External`] for the scripting layer.
    pub fn take_action(&mut self, action: &str, directives: &mut Vec<AiDirective>) {
        let (verb, argument) = match action.split_once(':') {
            Some((verb, argument)) => (verb.trim(), argument.trim()),
            None => (action.trim(), ""),
        };

        match verb {
            "set-state" => self.set_state(argument),
            "pause" => match argument.parse::<f64>() {
                Ok(seconds) => self.next_think_time += seconds,
                Err(_) => warn!("pause action with bad duration '{argument}'"),
            },
            "pause-random" => match argument.parse::<f64>() {
                Ok(limit) => {
                    self.next_think_time += rand::thread_rng().gen_range(0.0..limit.max(f64::MIN_POSITIVE));
                }
                Err(_) => warn!("pause-random action with bad duration '{argument}'"),
            },
            "drop-messages" => self.drop_messages(),
            "send" => self.react_to_message(argument),
            "exit-machine" => {
                if !self.restore_previous_machine() {
                    debug!("exit-machine with empty stack in '{}'", self.machine.name);
                }
            }
            "sound" => directives.push(AiDirective::PlaySound(argument.to_string())),
            _ => directives.push(AiDirective::External(action.trim().to_string())),
        }
    }
}

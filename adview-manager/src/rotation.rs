//! Rotation of the eligible ads of a display slot.
//!
//! A slot with less than 2 eligible ads is [`Phase::Idle`] and runs no timers.
//! With 2 or more ads it's [`Phase::Cycling`]:
//!
//! - every `interval / 100` the progress increments by 1 (modulo 100)
//! - every `interval` a transition starts: `transitioning` is set,
//!   half-way through the transition the next ad is shown and the progress is reset,
//!   at the end of it `transitioning` is cleared.
//!
//! Every change of the eligible list resets the rotation to the first ad.
use std::{sync::Arc, time::Duration};

use adview_primitives::{Advertisement, PlacementKey};
use slog::{debug, o, Logger};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};

/// Half of the transition window: the ad is swapped after it
/// and the transition ends after it elapses once more.
pub const TRANSITION_HALF: Duration = Duration::from_millis(350);

/// Progress steps per rotation interval
const PROGRESS_STEPS: u32 = 100;

/// Whether the slot is rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 0 or 1 eligible ads
    Idle,
    /// 2 or more eligible ads
    Cycling,
}

/// What a display slot renders.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationState {
    pub placement_key: PlacementKey,
    pub eligible: Arc<Vec<Advertisement>>,
    pub current_index: usize,
    pub transitioning: bool,
    /// 0 to 99
    pub progress_percent: u8,
    pub interval: Duration,
}

impl RotationState {
    pub fn new(placement_key: PlacementKey, interval: Duration) -> Self {
        Self {
            placement_key,
            eligible: Arc::default(),
            current_index: 0,
            transitioning: false,
            progress_percent: 0,
            interval,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.eligible.len() >= 2 {
            Phase::Cycling
        } else {
            Phase::Idle
        }
    }

    /// The ad to render, `None` when there is nothing eligible.
    pub fn current(&self) -> Option<&Advertisement> {
        self.eligible.get(self.current_index)
    }

    /// Replaces the eligible list and resets the rotation, if the list differs.
    ///
    /// Returns whether the state was reset.
    pub fn reseed(&mut self, eligible: Vec<Advertisement>) -> bool {
        if *self.eligible == eligible {
            return false;
        }

        self.eligible = Arc::new(eligible);
        self.current_index = 0;
        self.progress_percent = 0;
        self.transitioning = false;

        true
    }

    pub fn tick_progress(&mut self) {
        self.progress_percent = (self.progress_percent + 1) % PROGRESS_STEPS as u8;
    }

    pub fn begin_transition(&mut self) {
        self.transitioning = true;
    }

    /// Shows the next ad, wrapping around at the end of the list.
    pub fn advance(&mut self) {
        if !self.eligible.is_empty() {
            self.current_index = (self.current_index + 1) % self.eligible.len();
        }
        self.progress_percent = 0;
    }

    pub fn end_transition(&mut self) {
        self.transitioning = false;
    }

    /// Jumps to `index`, leaving the transition flag as it is.
    ///
    /// Returns `false` and changes nothing if the index is out of range.
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.eligible.len() {
            return false;
        }

        self.current_index = index;
        self.progress_percent = 0;

        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotationOptions {
    pub interval: Duration,
    /// See [`Config::pause_on_manual_select`](adview_primitives::Config::pause_on_manual_select)
    pub pause_on_manual_select: bool,
}

impl RotationOptions {
    fn progress_period(&self) -> Duration {
        self.interval / PROGRESS_STEPS
    }

    /// [`TRANSITION_HALF`], shortened for intervals below 1 second
    /// so the transition always ends before the next rotation.
    fn transition_half(&self) -> Duration {
        TRANSITION_HALF.min(self.interval.mul_f64(0.35))
    }
}

#[derive(Debug)]
enum Command {
    SetEligible(Vec<Advertisement>),
    Select(usize),
    Resume,
}

/// Sends commands to a running [`RotationController`].
#[derive(Debug, Clone)]
pub struct RotationHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RotationHandle {
    /// Feeds a new eligible list, the rotation restarts if it differs from the current one.
    pub fn set_eligible(&self, eligible: Vec<Advertisement>) {
        // the controller is gone only when the slot was unmounted
        let _ = self.commands.send(Command::SetEligible(eligible));
    }

    /// Shows the ad at `index` immediately.
    ///
    /// Unless the slot pauses on manual selection, the next scheduled rotation still happens
    /// and moves on from the selected ad.
    pub fn select_index(&self, index: usize) {
        let _ = self.commands.send(Command::Select(index));
    }

    /// Resumes the rotation paused by a manual selection.
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }
}

/// Drives the [`RotationState`] of one display slot on its own task.
///
/// The task stops when the controller is dropped.
#[derive(Debug)]
pub struct RotationController {
    handle: RotationHandle,
    state: watch::Receiver<RotationState>,
    task: JoinHandle<()>,
}

impl RotationController {
    pub fn spawn(placement_key: PlacementKey, options: RotationOptions, logger: &Logger) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(RotationState::new(placement_key.clone(), options.interval));

        let logger = logger.new(o!("module" => "rotation", "placement" => placement_key.to_string()));
        let task = tokio::spawn(Driver::new(options, state_tx, logger).run(receiver));

        Self {
            handle: RotationHandle { commands },
            state,
            task,
        }
    }

    pub fn handle(&self) -> RotationHandle {
        self.handle.clone()
    }

    /// The latest published state
    pub fn state(&self) -> RotationState {
        self.state.borrow().clone()
    }

    /// Notified on every change of the index, the transition flag or the progress.
    pub fn subscribe(&self) -> watch::Receiver<RotationState> {
        self.state.clone()
    }

    pub fn set_eligible(&self, eligible: Vec<Advertisement>) {
        self.handle.set_eligible(eligible)
    }

    pub fn select_index(&self, index: usize) {
        self.handle.select_index(index)
    }

    pub fn resume(&self) {
        self.handle.resume()
    }
}

impl Drop for RotationController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Where the slot is within a transition.
#[derive(Debug, Clone, Copy)]
enum Transition {
    None,
    /// Waiting to show the next ad
    Swapping { at: Instant },
    /// Next ad is shown, waiting to clear the flag
    Settling { at: Instant },
}

struct Driver {
    options: RotationOptions,
    state: watch::Sender<RotationState>,
    paused: bool,
    transition: Transition,
    next_progress: Instant,
    next_rotation: Instant,
    logger: Logger,
}

impl Driver {
    fn new(options: RotationOptions, state: watch::Sender<RotationState>, logger: Logger) -> Self {
        let now = Instant::now();

        Self {
            options,
            state,
            paused: false,
            transition: Transition::None,
            next_progress: now + options.progress_period(),
            next_rotation: now + options.interval,
            logger,
        }
    }

    fn is_cycling(&self) -> bool {
        !self.paused && self.state.borrow().phase() == Phase::Cycling
    }

    fn restart_timers(&mut self) {
        let now = Instant::now();
        self.transition = Transition::None;
        self.next_progress = now + self.options.progress_period();
        self.next_rotation = now + self.options.interval;
    }

    fn update(&self, change: impl FnOnce(&mut RotationState)) {
        self.state.send_modify(change);
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let cycling = self.is_cycling();
            let transition = self.transition;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = sleep_until(self.next_progress), if cycling => {
                    self.next_progress += self.options.progress_period();
                    self.update(RotationState::tick_progress);
                }
                _ = sleep_until(self.next_rotation), if cycling && matches!(transition, Transition::None) => {
                    self.next_rotation += self.options.interval;
                    self.transition = Transition::Swapping {
                        at: Instant::now() + self.options.transition_half(),
                    };
                    self.update(RotationState::begin_transition);
                }
                _ = sleep_until(transition_deadline(transition)), if cycling && !matches!(transition, Transition::None) => {
                    self.on_transition_step(transition);
                }
            }
        }

        debug!(&self.logger, "Rotation stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SetEligible(eligible) => {
                let reseeded = self.state.send_if_modified(|state| state.reseed(eligible));

                if reseeded {
                    self.paused = false;
                    self.restart_timers();
                    debug!(&self.logger, "Eligible ads changed"; "eligible" => self.state.borrow().eligible.len());
                }
            }
            Command::Select(index) => {
                let selected = self.state.send_if_modified(|state| state.select(index));

                if !selected {
                    debug!(&self.logger, "Ignoring out of range selection"; "index" => index);
                    return;
                }

                self.next_progress = Instant::now() + self.options.progress_period();

                if self.options.pause_on_manual_select {
                    self.paused = true;
                    self.transition = Transition::None;
                    self.update(RotationState::end_transition);
                }
            }
            Command::Resume => {
                if self.paused {
                    self.paused = false;
                    self.restart_timers();
                }
            }
        }
    }

    fn on_transition_step(&mut self, transition: Transition) {
        match transition {
            Transition::Swapping { at } => {
                self.transition = Transition::Settling {
                    at: at + self.options.transition_half(),
                };
                // progress counts from the newly shown ad
                self.next_progress = Instant::now() + self.options.progress_period();
                self.update(RotationState::advance);
            }
            Transition::Settling { .. } => {
                self.transition = Transition::None;
                self.update(RotationState::end_transition);
            }
            Transition::None => {}
        }
    }
}

fn transition_deadline(transition: Transition) -> Instant {
    match transition {
        Transition::Swapping { at } | Transition::Settling { at } => at,
        // never polled, the branch is disabled without a transition
        Transition::None => Instant::now(),
    }
}

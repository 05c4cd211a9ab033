//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Two-phase commands.
//!
//! A [`Command`] pairs a dispatch action, run exactly once, with a
//! completion condition the engine polls once per cycle. Status changes are
//! published on a watch channel so any number of [`CommandHandle`]s can
//! observe them from outside the cycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

/// Observable state of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Idle,
    Dispatched,
    Done,
    Failed(String),
}

impl CommandStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, CommandStatus::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CommandStatus::Failed(_))
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Idle => f.write_str("idle"),
            CommandStatus::Dispatched => f.write_str("dispatched"),
            CommandStatus::Done => f.write_str("done"),
            CommandStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of one evaluation of a completion condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Not yet; poll again next cycle.
    Pending,
    Done,
    Failed(String),
}

impl From<bool> for Completion {
    fn from(done: bool) -> Self {
        if done {
            Completion::Done
        } else {
            Completion::Pending
        }
    }
}

type DispatchFn<C> = Box<dyn FnOnce(&mut C) -> bool + Send>;
type CompletionFn<C> = Box<dyn FnMut(&C) -> Completion + Send>;

/// A dispatched-once, polled-until-finished operation on a context `C`.
pub struct Command<C> {
    name: Arc<str>,
    dispatch: Option<DispatchFn<C>>,
    completion: CompletionFn<C>,
    timeout: Option<u64>,
    polls: u64,
    status: watch::Sender<CommandStatus>,
    abandoned: Arc<AtomicBool>,
}

impl<C> Command<C> {
    /// `dispatch` returning `false` means the command was rejected and
    /// finishes as failed without being polled.
    pub fn new<D, P>(name: impl Into<Arc<str>>, dispatch: D, completion: P) -> Self
    where
        D: FnOnce(&mut C) -> bool + Send + 'static,
        P: FnMut(&C) -> Completion + Send + 'static,
    {
        let (status, _) = watch::channel(CommandStatus::Idle);
        Self {
            name: name.into(),
            dispatch: Some(Box::new(dispatch)),
            completion: Box::new(completion),
            timeout: None,
            polls: 0,
            status,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail the command if it is still pending after `cycles` polls.
    pub fn with_timeout(mut self, cycles: u64) -> Self {
        self.timeout = Some(cycles);
        self
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of completion evaluations so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn handle(&self) -> CommandHandle {
        CommandHandle {
            name: self.name.clone(),
            status: self.status.subscribe(),
            abandoned: self.abandoned.clone(),
        }
    }

    pub fn status(&self) -> CommandStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_finished()
    }

    /// Run the dispatch action. Only the first call has an effect.
    pub fn dispatch(&mut self, ctx: &mut C) -> bool {
        let Some(action) = self.dispatch.take() else {
            return false;
        };
        if self.abandoned.load(Ordering::Acquire) {
            self.publish(CommandStatus::Failed("abandoned".into()));
            return false;
        }
        if action(ctx) {
            debug!(command = %self.name, "command dispatched");
            self.publish(CommandStatus::Dispatched);
            true
        } else {
            debug!(command = %self.name, "command rejected");
            self.publish(CommandStatus::Failed("rejected".into()));
            false
        }
    }

    /// Evaluate the completion condition once and return the new status.
    ///
    /// Finished and never-dispatched commands are not evaluated.
    pub fn poll(&mut self, ctx: &C) -> CommandStatus {
        let current = self.status();
        if current != CommandStatus::Dispatched {
            return current;
        }
        if self.abandoned.load(Ordering::Acquire) {
            let status = CommandStatus::Failed("abandoned".into());
            self.publish(status.clone());
            return status;
        }
        self.polls += 1;
        let status = match (self.completion)(ctx) {
            Completion::Done => CommandStatus::Done,
            Completion::Failed(reason) => CommandStatus::Failed(reason),
            Completion::Pending => match self.timeout {
                Some(limit) if self.polls >= limit => {
                    CommandStatus::Failed(format!("timed out after {limit} cycles"))
                }
                _ => return CommandStatus::Dispatched,
            },
        };
        trace!(command = %self.name, polls = self.polls, %status, "command finished");
        self.publish(status.clone());
        status
    }

    /// Fail a command that will never be dispatched.
    pub(crate) fn reject(&mut self, reason: impl Into<String>) {
        self.dispatch = None;
        if !self.is_finished() {
            self.publish(CommandStatus::Failed(reason.into()));
        }
    }

    fn publish(&self, status: CommandStatus) {
        self.status.send_replace(status);
    }
}

impl<C> Drop for Command<C> {
    fn drop(&mut self) {
        if !self.status.borrow().is_finished() {
            self.status
                .send_replace(CommandStatus::Failed("dropped before completion".into()));
        }
    }
}

impl<C> fmt::Debug for Command<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .field("polls", &self.polls)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Caller-side view of a command.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    name: Arc<str>,
    status: watch::Receiver<CommandStatus>,
    abandoned: Arc<AtomicBool>,
}

impl CommandHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status; no side effects.
    pub fn status(&self) -> CommandStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_finished()
    }

    /// Stop polling the command. Its dispatch side effect is not undone; the
    /// command reports `Failed` once the engine drops it.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Wait until the command is done or failed.
    pub async fn finished(&self) -> CommandStatus {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if current.is_finished() {
                return current;
            }
            if status.changed().await.is_err() {
                // Sender gone; the drop hook published the final status.
                return status.borrow().clone();
            }
        }
    }
}

/// Dispatched commands awaiting completion, polled in dispatch order.
pub struct PendingCommands<C> {
    commands: Vec<Command<C>>,
    capacity: usize,
}

/// Outcome counts of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
}

impl<C> PendingCommands<C> {
    /// Storage for `capacity` commands is reserved up front so the cycle
    /// never reallocates.
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Track a dispatched command. Returns it back when the list is full.
    pub fn push(&mut self, command: Command<C>) -> Result<(), Command<C>> {
        if self.commands.len() >= self.capacity {
            return Err(command);
        }
        self.commands.push(command);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_room(&self) -> bool {
        self.commands.len() < self.capacity
    }

    /// Poll every command once and drop the finished ones.
    pub fn poll_all(&mut self, ctx: &C) -> PollSummary {
        let mut summary = PollSummary::default();
        self.commands.retain_mut(|command| match command.poll(ctx) {
            CommandStatus::Done => {
                summary.done += 1;
                false
            }
            CommandStatus::Failed(_) => {
                summary.failed += 1;
                false
            }
            CommandStatus::Idle | CommandStatus::Dispatched => {
                summary.pending += 1;
                true
            }
        });
        summary
    }
}

impl<C> fmt::Debug for PendingCommands<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommands")
            .field("len", &self.commands.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Axis {
        moves: u32,
        position: u32,
    }

    fn move_command(target: u32) -> Command<Axis> {
        Command::new(
            "move",
            |axis: &mut Axis| {
                axis.moves += 1;
                true
            },
            move |axis: &Axis| Completion::from(axis.position >= target),
        )
    }

    #[test]
    fn status_turns_done_on_the_cycle_completion_holds() {
        let mut axis = Axis::default();
        let mut pending = PendingCommands::new(4);
        let command = move_command(3);
        let handle = command.handle();
        assert_eq!(handle.status(), CommandStatus::Idle);

        let mut command = command;
        assert!(command.dispatch(&mut axis));
        pending.push(command).unwrap();

        for cycle in 1..=3u32 {
            axis.position = cycle;
            pending.poll_all(&axis);
            if cycle < 3 {
                assert_eq!(handle.status(), CommandStatus::Dispatched);
            }
        }
        assert_eq!(handle.status(), CommandStatus::Done);
        assert!(pending.is_empty());
        assert_eq!(axis.moves, 1);
    }

    #[test]
    fn dispatch_runs_only_once() {
        let mut axis = Axis::default();
        let mut command = move_command(1);
        assert!(command.dispatch(&mut axis));
        assert!(!command.dispatch(&mut axis));
        assert_eq!(axis.moves, 1);
    }

    #[test]
    fn rejected_dispatch_fails_without_polling() {
        let mut axis = Axis::default();
        let mut command: Command<Axis> = Command::new(
            "never",
            |_: &mut Axis| false,
            |_: &Axis| panic!("must not be polled"),
        );
        assert!(!command.dispatch(&mut axis));
        assert_eq!(command.poll(&axis), CommandStatus::Failed("rejected".into()));
    }

    #[test]
    fn timeout_fails_a_stuck_command() {
        let mut axis = Axis::default();
        let mut command = move_command(100).with_timeout(2);
        command.dispatch(&mut axis);
        assert_eq!(command.poll(&axis), CommandStatus::Dispatched);
        assert_eq!(
            command.poll(&axis),
            CommandStatus::Failed("timed out after 2 cycles".into())
        );
    }

    #[test]
    fn abandoned_command_is_dropped_as_failed() {
        let mut axis = Axis::default();
        let mut pending = PendingCommands::new(1);
        let mut command = move_command(5);
        let handle = command.handle();
        command.dispatch(&mut axis);
        pending.push(command).unwrap();

        handle.abandon();
        let summary = pending.poll_all(&axis);
        assert_eq!(summary.failed, 1);
        assert_eq!(handle.status(), CommandStatus::Failed("abandoned".into()));
    }

    #[test]
    fn full_list_hands_the_command_back() {
        let mut pending = PendingCommands::new(1);
        pending.push(move_command(1)).unwrap();
        assert!(pending.push(move_command(2)).is_err());
    }

    #[test]
    fn dropping_an_unfinished_command_fails_its_handles() {
        let handle = move_command(1).handle();
        assert_eq!(
            handle.status(),
            CommandStatus::Failed("dropped before completion".into())
        );
    }

    #[tokio::test]
    async fn finished_resolves_after_completion() {
        let mut axis = Axis::default();
        let mut command = move_command(1);
        let handle = command.handle();
        command.dispatch(&mut axis);
        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.finished().await }
        });
        axis.position = 1;
        command.poll(&axis);
        assert_eq!(waiter.await.unwrap(), CommandStatus::Done);
    }
}

//! Single-threaded agent runtime
//!
//! Every registered agent gets an unbounded mailbox drained by its own
//! `spawn_local` task. A request carries a oneshot reply channel, so the
//! sender suspends until the receiver's handler has finished. Handlers run
//! one message at a time; background loops are separate tasks so that a
//! controller can answer requests while its own loop is waiting on someone
//! else.
//!
//! All tasks live on the current thread's `LocalSet`; callers must be
//! running inside one.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::MessagingError;
use super::message::{Command, Message, Reply};
use super::types::AgentId;

/// Simulated seconds a request may stay unanswered before it fails
pub const REQUEST_TIMEOUT_SECONDS: f64 = 5.0;

/// Maps simulated seconds to wall-clock durations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    /// Wall time of one simulated second
    pub tick: Duration,
}

impl SimClock {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn seconds(&self, seconds: f64) -> Duration {
        self.tick.mul_f64(seconds.max(0.0))
    }

    pub async fn sleep(&self, seconds: f64) {
        tokio::time::sleep(self.seconds(seconds)).await;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(100)
    }
}

/// Message handler implemented by every agent kind
#[allow(async_fn_in_trait)]
pub trait Agent: 'static {
    async fn handle(&mut self, command: Command, message: &Message, runtime: &AgentRuntime)
        -> Reply;
}

struct Envelope {
    message: Message,
    reply: oneshot::Sender<Reply>,
}

struct RuntimeInner {
    mailboxes: RefCell<HashMap<AgentId, mpsc::UnboundedSender<Envelope>>>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
    stopped: Cell<bool>,
}

/// Cheaply clonable handle to the agent registry
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Rc<RuntimeInner>,
}

impl AgentRuntime {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                mailboxes: RefCell::new(HashMap::new()),
                tasks: RefCell::new(Vec::new()),
                request_timeout,
                stopped: Cell::new(false),
            }),
        }
    }

    /// Runtime whose request timeout is expressed in simulated seconds
    pub fn with_clock(clock: &SimClock) -> Self {
        Self::new(clock.seconds(REQUEST_TIMEOUT_SECONDS))
    }

    /// Registers `agent` under `id` and starts draining its mailbox
    pub fn register<A: Agent>(&self, id: AgentId, mut agent: A) -> Result<(), MessagingError> {
        if self.inner.stopped.get() {
            return Err(MessagingError::MailboxClosed(id));
        }
        if self.inner.mailboxes.borrow().contains_key(&id) {
            return Err(MessagingError::AlreadyRegistered(id));
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();
        let runtime = self.clone();
        let name = id.clone();

        let handle = tokio::task::spawn_local(async move {
            while let Some(envelope) = receiver.recv().await {
                let reply = match Command::decode(&envelope.message.content) {
                    Ok(command) => agent.handle(command, &envelope.message, &runtime).await,
                    Err(err) => {
                        debug!("{}: {} (from {})", name, err, envelope.message.source);
                        Reply::invalid_command()
                    }
                };
                // The requester may have timed out and gone away
                let _ = envelope.reply.send(reply);
            }
            debug!("{}: mailbox closed", name);
        });

        self.inner.mailboxes.borrow_mut().insert(id, sender);
        self.inner.tasks.borrow_mut().push(handle);
        Ok(())
    }

    /// Delivers `message` to `target` and waits for its reply
    pub async fn send_message(
        &self,
        message: Message,
        target: &AgentId,
    ) -> Result<Reply, MessagingError> {
        let sender = self
            .inner
            .mailboxes
            .borrow()
            .get(target)
            .cloned()
            .ok_or_else(|| MessagingError::UnknownAgent(target.clone()))?;

        let (reply_sender, reply_receiver) = oneshot::channel();
        sender
            .send(Envelope {
                message,
                reply: reply_sender,
            })
            .map_err(|_| MessagingError::MailboxClosed(target.clone()))?;

        match tokio::time::timeout(self.inner.request_timeout, reply_receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MessagingError::MailboxClosed(target.clone())),
            Err(_) => Err(MessagingError::Timeout {
                target: target.clone(),
                after: self.inner.request_timeout,
            }),
        }
    }

    /// Sends a typed command on behalf of `source`
    pub async fn request(
        &self,
        source: &AgentId,
        command: Command,
        target: &AgentId,
    ) -> Result<Reply, MessagingError> {
        self.send_message(Message::command(&command, source.clone()), target)
            .await
    }

    /// Starts a periodic loop owned by the runtime; it is cancelled by [`stop`](Self::stop)
    pub fn spawn_background<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if self.inner.stopped.get() {
            warn!("Background task spawned after runtime stop; ignoring");
            return;
        }
        let handle = tokio::task::spawn_local(future);
        self.inner.tasks.borrow_mut().push(handle);
    }

    pub fn is_registered(&self, id: &AgentId) -> bool {
        self.inner.mailboxes.borrow().contains_key(id)
    }

    pub fn agent_count(&self) -> usize {
        self.inner.mailboxes.borrow().len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Cancels every mailbox and background task. Pending requests fail
    /// with [`MessagingError::MailboxClosed`].
    pub fn stop(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.borrow_mut().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.inner.mailboxes.borrow_mut().clear();
        debug!("Runtime stopped, {} tasks cancelled", tasks.len());
    }
}

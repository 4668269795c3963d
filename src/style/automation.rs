//! The trigger queue around the reconciler.
//!
//! Host callbacks (editor changed, theme changed, configuration changed)
//! only enqueue a tagged trigger and return; one consumer task owns the
//! reconciler and runs passes strictly one at a time, in order. Triggers
//! that arrive while a pass is queued are coalesced into a single pass with
//! all applicable reason flags set. The queue never drops enqueued work and
//! a failed pass never stalls it.
//!
//! Re-entrancy: every write the reconciler makes fires the host's own
//! configuration-change event synchronously. [`StyleAutomation::notify_config_change`]
//! consults the shared switching flag (raised by
//! [`SwitchGuard`](super::SwitchGuard) around each write) and drops events
//! that are only echoes of our own writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::host::Workbench;
use crate::settings::SettingsAccessor;
use crate::state::StateStore;
use crate::style::keys;
use crate::style::reconciler::{PassOutcome, ReasonSet, Reconciler};
use crate::theme::ThemeAssets;

/// A tagged trigger event from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Extension activation.
    Init,
    /// Active or visible editors changed.
    Editor,
    /// Active color theme changed.
    Theme,
    /// A relevant configuration key changed.
    Config,
}

enum Message {
    Trigger(Trigger),
    /// Barrier: acknowledged once every message queued before it has been
    /// reconciled. Carries no reason of its own.
    Flush(oneshot::Sender<()>),
    /// Restore everything and stop the consumer task.
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the style-automation consumer task.
///
/// Cheap to clone; all clones feed the same serialized queue. Must be
/// created inside a tokio runtime.
#[derive(Clone)]
pub struct StyleAutomation {
    tx: mpsc::UnboundedSender<Message>,
    switching: Arc<AtomicBool>,
}

impl StyleAutomation {
    /// Spawn the consumer task over the injected host surfaces.
    pub fn spawn(
        accessor: SettingsAccessor,
        state: Arc<dyn StateStore>,
        workbench: Arc<dyn Workbench>,
        assets: ThemeAssets,
    ) -> Self {
        let switching = Arc::new(AtomicBool::new(false));
        let reconciler = Reconciler::new(accessor, state, workbench, assets, switching.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(reconciler, rx));
        Self { tx, switching }
    }

    /// True while the reconciler is inside one of its own writes.
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    /// Queue a pass for extension activation.
    pub fn notify_init(&self) {
        self.send(Message::Trigger(Trigger::Init));
    }

    /// Queue a pass for an editor change.
    pub fn notify_editor_change(&self) {
        self.send(Message::Trigger(Trigger::Editor));
    }

    /// Queue a pass for a host theme change.
    pub fn notify_theme_change(&self) {
        self.send(Message::Trigger(Trigger::Theme));
    }

    /// Queue a pass for a configuration change, unless the change is an echo
    /// of the reconciler's own write or concerns a key we do not watch.
    pub fn notify_config_change(&self, key: &str) {
        if self.is_switching() {
            debug!(key, "ignoring configuration event from our own write");
            return;
        }
        if !keys::is_extension_key(key) {
            return;
        }
        self.send(Message::Trigger(Trigger::Config));
    }

    /// Wait until everything queued so far has been reconciled.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.send(Message::Flush(ack));
        let _ = done.await;
    }

    /// Restore the user's settings and stop the consumer task. The
    /// deactivation path: pending triggers are still reconciled first.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        self.send(Message::Shutdown(ack));
        let _ = done.await;
    }

    fn send(&self, message: Message) {
        // The consumer only goes away after a shutdown; late notifications
        // are intentionally dropped then.
        let _ = self.tx.send(message);
    }
}

async fn run_loop(mut reconciler: Reconciler, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut pending_leave: Option<Instant> = None;

    loop {
        // Wait for the next message, or for a pending leave to time out.
        let first = if let Some(deadline) = pending_leave {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(message)) => Some(message),
                Ok(None) => break,
                Err(_) => {
                    pending_leave = None;
                    None
                }
            }
        } else {
            match rx.recv().await {
                Some(message) => Some(message),
                None => break,
            }
        };

        let mut reasons = ReasonSet {
            leave_timer: first.is_none(),
            ..Default::default()
        };
        let mut acks = Vec::new();
        let mut shutdown_acks = Vec::new();

        if let Some(message) = first {
            collect(message, &mut reasons, &mut acks, &mut shutdown_acks);
        }
        // Coalesce everything already queued into this one pass.
        while let Ok(message) = rx.try_recv() {
            collect(message, &mut reasons, &mut acks, &mut shutdown_acks);
        }

        if reasons.any() {
            match reconciler.run_pass(reasons) {
                PassOutcome::Settled => pending_leave = None,
                PassOutcome::DebounceLeave(delay) => {
                    // Keep the earliest deadline if one is already pending.
                    if pending_leave.is_none() {
                        pending_leave = Some(Instant::now() + delay);
                    }
                }
            }
        }

        for ack in acks {
            let _ = ack.send(());
        }
        if !shutdown_acks.is_empty() {
            reconciler.leave();
            for ack in shutdown_acks {
                let _ = ack.send(());
            }
            break;
        }
    }
}

fn collect(
    message: Message,
    reasons: &mut ReasonSet,
    acks: &mut Vec<oneshot::Sender<()>>,
    shutdown_acks: &mut Vec<oneshot::Sender<()>>,
) {
    match message {
        Message::Trigger(Trigger::Init) => reasons.init = true,
        Message::Trigger(Trigger::Editor) => reasons.editor = true,
        Message::Trigger(Trigger::Theme) => reasons.theme = true,
        Message::Trigger(Trigger::Config) => reasons.config = true,
        Message::Flush(ack) => acks.push(ack),
        Message::Shutdown(ack) => shutdown_acks.push(ack),
    }
}

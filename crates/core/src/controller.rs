mod builder;
mod state;

use std::sync::Arc;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

pub use builder::ControllerBuilder;
use state::{ControllerMessage, ControllerState};

/// Handle to a conversation controller.
///
/// The controller exclusively owns the transcript and drives at most one
/// outbound request at any time; submitting while a request is in flight
/// is ignored, mirroring a UI debounce. All state lives on a dedicated
/// task, so transcript mutations are serialized and fragments are folded
/// strictly in arrival order. Handles are cheap to clone and only post
/// messages to that task.
pub struct Controller {
    shared: Arc<Shared>,
}

struct Shared {
    msg_tx: mpsc::UnboundedSender<ControllerMessage>,
    kill_tx: watch::Sender<bool>,
}

impl Controller {
    /// Submits a user input.
    ///
    /// The input is trimmed first; submitting a blank input, or any input
    /// while a request is already in flight, is a no-op.
    pub fn submit<S: Into<String>>(&self, input: S) {
        let msg = ControllerMessage::Submit(input.into());
        if self.shared.msg_tx.send(msg).is_err() {
            trace!("controller task has terminated, ignoring submit");
        }
    }

    /// Shuts the controller down.
    ///
    /// An in-flight request is aborted promptly, and its turn is sealed
    /// with whatever content had accumulated before the abort. Dropping
    /// the last handle has the same effect.
    pub fn shutdown(&self) {
        self.shared.kill_tx.send(true).ok();
    }

    fn spawn_from_builder(builder: ControllerBuilder) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);

        let state = ControllerState::from_builder(builder, msg_tx.downgrade());
        tokio::spawn(
            run_controller(state, msg_rx, kill_rx)
                .instrument(trace_span!("controller")),
        );

        Self {
            shared: Arc::new(Shared { msg_tx, kill_tx }),
        }
    }
}

impl Clone for Controller {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

async fn run_controller(
    mut state: ControllerState,
    mut msg_rx: mpsc::UnboundedReceiver<ControllerMessage>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let msg = select! {
            biased;

            _ = kill_rx.changed() => {
                break;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                msg
            }
        };
        trace!("received message: {msg:?}");
        state.handle(msg);
    }
    state.teardown();
    debug!("will terminate");
}

use std::fmt::{self, Debug};

use banter_model::{ChatMessage, ChatRequest, ProviderError, Role};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::builder::ControllerBuilder;
use crate::client::ChatClient;
use crate::transcript::{Transcript, TurnHandle};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Sending,
    Streaming,
}

/// The request context of one outbound call.
///
/// The id is the identity late fragments are checked against, so events
/// of a superseded request can never corrupt a later turn.
struct InFlight {
    id: u64,
    turn: TurnHandle,
    task: JoinHandle<()>,
}

pub(super) struct ControllerState {
    client: ChatClient,
    msg_tx: mpsc::WeakUnboundedSender<ControllerMessage>,
    transcript: Transcript,
    phase: Phase,
    in_flight: Option<InFlight>,
    next_request_id: u64,

    on_busy: Option<Box<dyn Fn(bool) + Send + Sync>>,
    on_error: Option<Box<dyn Fn(Box<dyn ProviderError>) + Send + Sync>>,
    on_idle: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ControllerState {
    pub(super) fn from_builder(
        builder: ControllerBuilder,
        msg_tx: mpsc::WeakUnboundedSender<ControllerMessage>,
    ) -> Self {
        let ControllerBuilder {
            client,
            transcript,
            on_busy,
            on_error,
            on_idle,
        } = builder;

        Self {
            client,
            msg_tx,
            transcript,
            phase: Default::default(),
            in_flight: None,
            next_request_id: 1,
            on_busy,
            on_error,
            on_idle,
        }
    }

    pub(super) fn handle(&mut self, msg: ControllerMessage) {
        match msg {
            ControllerMessage::Submit(input) => self.submit(input),
            ControllerMessage::Update { request_id, text } => {
                self.update(request_id, text);
            }
            ControllerMessage::Finished { request_id, result } => {
                self.finished(request_id, result);
            }
        }
    }

    fn submit(&mut self, input: String) {
        let input = input.trim();
        if input.is_empty() {
            trace!("ignoring blank input");
            return;
        }
        if self.phase != Phase::Idle {
            trace!("a request is already in flight, ignoring input");
            return;
        }
        let Some(msg_tx) = self.msg_tx.upgrade() else {
            return;
        };

        self.transcript.append(Role::User, input);
        let turn = self
            .transcript
            .open_assistant_turn()
            .expect("an assistant turn is already open in idle phase");
        // The payload is a snapshot of the sealed messages taken now, not
        // a live view; later transcript changes don't leak into it.
        let request = self.build_request();

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.phase = Phase::Sending;
        self.set_busy(true);

        debug!(request_id, "issuing request");
        let client = self.client.clone();
        let update_tx = msg_tx.clone();
        let task = tokio::spawn(async move {
            let result = client
                .send_request(request, move |text| {
                    update_tx
                        .send(ControllerMessage::Update { request_id, text })
                        .ok();
                })
                .await;
            msg_tx
                .send(ControllerMessage::Finished { request_id, result })
                .ok();
        });
        self.in_flight = Some(InFlight {
            id: request_id,
            turn,
            task,
        });
    }

    fn update(&mut self, request_id: u64, text: String) {
        let Some(in_flight) = &self.in_flight else {
            trace!(request_id, "no request in flight, dropping fragment");
            return;
        };
        if in_flight.id != request_id {
            trace!(request_id, "fragment from a superseded request, dropping");
            return;
        }

        if self.phase == Phase::Sending {
            self.phase = Phase::Streaming;
        }
        if self
            .transcript
            .update_open_turn(&in_flight.turn, text)
            .is_err()
        {
            trace!(request_id, "the turn has been superseded, dropping");
        }
    }

    fn finished(
        &mut self,
        request_id: u64,
        result: Result<String, Box<dyn ProviderError>>,
    ) {
        let Some(in_flight) = self
            .in_flight
            .take_if(|in_flight| in_flight.id == request_id)
        else {
            trace!(request_id, "completion from a superseded request");
            return;
        };

        // Whatever the outcome, the turn is sealed with the fragments
        // that made it into the transcript, never discarded.
        self.transcript.seal_open_turn(&in_flight.turn);
        self.phase = Phase::Idle;

        // A failure must be reported before the busy flag clears, so a
        // consumer that re-prompts on not-busy already has the error.
        match result {
            Ok(_) => debug!(request_id, "request completed"),
            Err(err) => {
                error!(request_id, "request failed: {err}");
                if let Some(on_error) = &self.on_error {
                    on_error(err);
                }
            }
        }
        self.set_busy(false);

        if let Some(on_idle) = &self.on_idle {
            on_idle();
        }
    }

    pub(super) fn teardown(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        debug!(request_id = in_flight.id, "aborting in-flight request");
        in_flight.task.abort();
        self.transcript.seal_open_turn(&in_flight.turn);
        self.phase = Phase::Idle;
        self.set_busy(false);
    }

    fn build_request(&self) -> ChatRequest {
        ChatRequest {
            messages: self
                .transcript
                .sealed_snapshot()
                .into_iter()
                .map(|msg| ChatMessage {
                    role: msg.role,
                    content: msg.text,
                })
                .collect(),
        }
    }

    fn set_busy(&self, busy: bool) {
        if let Some(on_busy) = &self.on_busy {
            on_busy(busy);
        }
    }
}

pub(super) enum ControllerMessage {
    Submit(String),
    Update {
        request_id: u64,
        text: String,
    },
    Finished {
        request_id: u64,
        result: Result<String, Box<dyn ProviderError>>,
    },
}

impl Debug for ControllerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerMessage::Submit(_) => {
                f.debug_struct("Submit").finish_non_exhaustive()
            }
            ControllerMessage::Update { request_id, text } => f
                .debug_struct("Update")
                .field("request_id", request_id)
                .field("text_len", &text.len())
                .finish(),
            ControllerMessage::Finished { request_id, result } => f
                .debug_struct("Finished")
                .field("request_id", request_id)
                .field("is_ok", &result.is_ok())
                .finish(),
        }
    }
}

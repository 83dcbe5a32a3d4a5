//! The ordered conversation history and the open-turn discipline
//! governing it.

use std::error::Error;
use std::fmt;

use banter_model::Role;

/// A single transcript entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    /// Sequence position within the transcript.
    pub id: usize,
    /// Who produced this message.
    pub role: Role,
    /// The full accumulated text. For an open assistant turn this only
    /// ever grows.
    pub text: String,
}

/// A type of error which is returned when an assistant turn is opened
/// while another one is still open.
pub struct ConflictError;

impl fmt::Debug for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictError").finish()
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "an assistant turn is already open".fmt(f)
    }
}

impl Error for ConflictError {}

/// A type of error which is returned when a write targets a turn that
/// has been sealed or superseded.
pub struct StaleHandleError;

impl fmt::Debug for StaleHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaleHandleError").finish()
    }
}

impl fmt::Display for StaleHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "the turn handle no longer refers to the open turn".fmt(f)
    }
}

impl Error for StaleHandleError {}

/// Handle to an open assistant turn.
///
/// The handle identifies one specific turn, not "whatever turn happens
/// to be open": writes through a handle whose turn has been sealed or
/// superseded are rejected with [`StaleHandleError`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TurnHandle {
    token: u64,
}

struct OpenTurn {
    index: usize,
    token: u64,
}

type Observer = Box<dyn Fn(&[Message]) + Send + Sync>;

/// The ordered conversation history.
///
/// The transcript is exclusively owned by the controller; everyone else
/// only ever sees cloned snapshots. At most one assistant turn can be
/// open for incremental updates at a time.
#[derive(Default)]
pub struct Transcript {
    messages: Vec<Message>,
    open_turn: Option<OpenTurn>,
    next_token: u64,
    observer: Option<Observer>,
}

impl Transcript {
    /// Registers the observer that is invoked with the current messages
    /// after every mutation.
    pub fn set_observer(
        &mut self,
        observer: impl Fn(&[Message]) + Send + Sync + 'static,
    ) {
        self.observer = Some(Box::new(observer));
    }

    /// Appends a sealed message and returns its position.
    pub fn append<S: Into<String>>(&mut self, role: Role, text: S) -> usize {
        let id = self.messages.len();
        self.messages.push(Message {
            id,
            role,
            text: text.into(),
        });
        self.notify();
        id
    }

    /// Opens a new, empty assistant turn.
    pub fn open_assistant_turn(&mut self) -> Result<TurnHandle, ConflictError> {
        if self.open_turn.is_some() {
            return Err(ConflictError);
        }

        let index = self.messages.len();
        let token = self.next_token;
        self.next_token += 1;

        self.messages.push(Message {
            id: index,
            role: Role::Assistant,
            text: String::new(),
        });
        self.open_turn = Some(OpenTurn { index, token });
        self.notify();

        Ok(TurnHandle { token })
    }

    /// Replaces the open turn's text with the full accumulated text.
    ///
    /// Callers always supply the cumulative text rather than the latest
    /// fragment, so an observer can only ever see the message grow.
    pub fn update_open_turn(
        &mut self,
        handle: &TurnHandle,
        full_text: String,
    ) -> Result<(), StaleHandleError> {
        let Some(open_turn) = &self.open_turn else {
            return Err(StaleHandleError);
        };
        if open_turn.token != handle.token {
            return Err(StaleHandleError);
        }

        let msg = &mut self.messages[open_turn.index];
        debug_assert!(
            full_text.starts_with(&msg.text),
            "open turn text must grow monotonically"
        );
        msg.text = full_text;
        self.notify();
        Ok(())
    }

    /// Seals the open turn, making it immutable.
    ///
    /// This is a no-op if the turn has already been sealed or superseded.
    pub fn seal_open_turn(&mut self, handle: &TurnHandle) {
        let Some(open_turn) = &self.open_turn else {
            return;
        };
        if open_turn.token != handle.token {
            return;
        }
        self.open_turn = None;
        self.notify();
    }

    /// Returns a read-only copy of all messages, in conversation order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Returns a copy of the sealed messages only, in conversation order.
    ///
    /// An open (unsealed) assistant placeholder is never part of an
    /// outbound payload, so this is what a request is built from.
    pub fn sealed_snapshot(&self) -> Vec<Message> {
        let open_index = self.open_turn.as_ref().map(|turn| turn.index);
        self.messages
            .iter()
            .filter(|msg| Some(msg.id) != open_index)
            .cloned()
            .collect()
    }

    fn notify(&self) {
        if let Some(observer) = &self.observer {
            observer(&self.messages);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_append_assigns_positions() {
        let mut transcript = Transcript::default();
        assert_eq!(transcript.append(Role::User, "Hello"), 0);
        assert_eq!(transcript.append(Role::Assistant, "Hi"), 1);

        let snapshot = transcript.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].text, "Hello");
        assert_eq!(snapshot[1].id, 1);
    }

    #[test]
    fn test_single_open_turn() {
        let mut transcript = Transcript::default();
        transcript.append(Role::User, "Hello");

        let handle = transcript.open_assistant_turn().unwrap();
        assert!(transcript.open_assistant_turn().is_err());

        transcript.seal_open_turn(&handle);
        // Sealing twice is fine.
        transcript.seal_open_turn(&handle);
        assert!(transcript.open_assistant_turn().is_ok());
    }

    #[test]
    fn test_update_open_turn() {
        let mut transcript = Transcript::default();
        transcript.append(Role::User, "Hello");

        let handle = transcript.open_assistant_turn().unwrap();
        transcript
            .update_open_turn(&handle, "Hi".to_owned())
            .unwrap();
        transcript
            .update_open_turn(&handle, "Hi there".to_owned())
            .unwrap();
        assert_eq!(transcript.snapshot()[1].text, "Hi there");

        transcript.seal_open_turn(&handle);
        assert!(
            transcript
                .update_open_turn(&handle, "Hi there!".to_owned())
                .is_err()
        );
        assert_eq!(transcript.snapshot()[1].text, "Hi there");
    }

    #[test]
    fn test_superseded_handle_is_stale() {
        let mut transcript = Transcript::default();
        transcript.append(Role::User, "Hello");
        let old_handle = transcript.open_assistant_turn().unwrap();
        transcript.seal_open_turn(&old_handle);

        transcript.append(Role::User, "Again");
        let new_handle = transcript.open_assistant_turn().unwrap();

        // A write through the old handle must not touch the new turn.
        assert!(
            transcript
                .update_open_turn(&old_handle, "stale".to_owned())
                .is_err()
        );
        transcript
            .update_open_turn(&new_handle, "fresh".to_owned())
            .unwrap();
        assert_eq!(transcript.snapshot()[3].text, "fresh");

        // Sealing through the old handle is a no-op, not a seal of the
        // new turn.
        transcript.seal_open_turn(&old_handle);
        transcript
            .update_open_turn(&new_handle, "fresh!".to_owned())
            .unwrap();
    }

    #[test]
    fn test_sealed_snapshot_excludes_open_turn() {
        let mut transcript = Transcript::default();
        transcript.append(Role::User, "Hello");
        let handle = transcript.open_assistant_turn().unwrap();
        transcript
            .update_open_turn(&handle, "partial".to_owned())
            .unwrap();

        let sealed = transcript.sealed_snapshot();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].text, "Hello");

        transcript.seal_open_turn(&handle);
        assert_eq!(transcript.sealed_snapshot().len(), 2);
    }

    #[test]
    fn test_observer_sees_every_mutation() {
        let seen = Arc::new(Mutex::new(Vec::<Vec<Message>>::new()));

        let mut transcript = Transcript::default();
        transcript.set_observer({
            let seen = Arc::clone(&seen);
            move |messages| {
                seen.lock().unwrap().push(messages.to_vec());
            }
        });

        transcript.append(Role::User, "Hello");
        let handle = transcript.open_assistant_turn().unwrap();
        transcript
            .update_open_turn(&handle, "Hi".to_owned())
            .unwrap();
        transcript.seal_open_turn(&handle);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2][1].text, "Hi");
        // Snapshots don't alias the store's internal state.
        assert_eq!(seen[1][1].text, "");
    }
}

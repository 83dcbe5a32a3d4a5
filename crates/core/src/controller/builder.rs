use banter_model::{ChatProvider, ProviderError};

use super::Controller;
use crate::client::ChatClient;
use crate::transcript::{Message, Transcript};

/// [`Controller`] builder.
pub struct ControllerBuilder {
    pub(super) client: ChatClient,
    pub(super) transcript: Transcript,
    pub(super) on_busy: Option<Box<dyn Fn(bool) + Send + Sync>>,
    pub(super) on_error:
        Option<Box<dyn Fn(Box<dyn ProviderError>) + Send + Sync>>,
    pub(super) on_idle: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ControllerBuilder {
    /// Creates a new builder with the specified chat provider.
    #[inline]
    pub fn with_provider<P: ChatProvider + 'static>(provider: P) -> Self {
        Self {
            client: ChatClient::new(provider),
            transcript: Transcript::default(),
            on_busy: None,
            on_error: None,
            on_idle: None,
        }
    }

    /// Attaches a callback to be invoked with a fresh transcript snapshot
    /// after every transcript mutation.
    #[inline]
    pub fn on_snapshot(
        mut self,
        on_snapshot: impl Fn(Vec<Message>) + Send + Sync + 'static,
    ) -> Self {
        self.transcript
            .set_observer(move |messages| on_snapshot(messages.to_vec()));
        self
    }

    /// Attaches a callback to be invoked when a request starts or stops
    /// being in flight.
    #[inline]
    pub fn on_busy(
        mut self,
        on_busy: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_busy = Some(Box::new(on_busy));
        self
    }

    /// Attaches a callback to be invoked when a request fails.
    ///
    /// Errors are surfaced here, out of band; they are never injected
    /// into the transcript as fabricated messages.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(Box<dyn ProviderError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Attaches a callback to be invoked when the controller returns to
    /// the idle, submittable state.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Builds the controller.
    #[inline]
    pub fn build(self) -> Controller {
        Controller::spawn_from_builder(self)
    }
}

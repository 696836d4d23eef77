//! Routing platform events to the managers.
//!
//! The dispatch table maps every [`EventKind`] to one handler. A handler
//! applies its state transition synchronously and may return a future with
//! the remaining platform calls; the dispatcher spawns that future and logs
//! its failure, so the next event is never held up behind a remote call.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use hearth_sdk::event::{Event, EventKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::ChannelLifecycle;
use crate::commands::Commands;
use crate::streamers::StreamerRotation;

/// Remaining work of a handled event.
pub type Effect = BoxFuture<'static, anyhow::Result<()>>;

/// Applies an event's state transition, returning any remaining effects.
pub type Handler = Box<dyn Fn(&Event) -> Option<Effect> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for {0:?}")]
    MissingHandlers(Vec<EventKind>),
}

/// Explicit event-kind to handler table.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(&Event) -> Option<Effect> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Kinds without a handler, in [`EventKind::ALL`] order.
    pub fn missing_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    /// Fail unless every event kind has a handler.
    pub fn ensure_complete(&self) -> Result<(), DispatchError> {
        let missing = self.missing_kinds();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::MissingHandlers(missing))
        }
    }

    /// The bot's routing table.
    pub fn standard(
        channels: Arc<ChannelLifecycle>,
        streamers: Arc<StreamerRotation>,
        commands: Commands,
    ) -> Result<Self, DispatchError> {
        let mut dispatcher = Self::new();

        dispatcher.on(EventKind::Connected, |_| {
            tracing::info!("Connected to platform bridge");
            None
        });

        dispatcher.on(EventKind::Disconnected, |event| {
            if let Event::Disconnected { reason } = event {
                tracing::warn!(reason = %reason, "Disconnected from platform bridge");
            }
            None
        });

        {
            let channels = Arc::clone(&channels);
            let streamers = Arc::clone(&streamers);
            dispatcher.on(EventKind::Ready, move |event| {
                let Event::Ready { presences, voice_channels } = event else {
                    return None;
                };
                channels.restore(voice_channels);
                let effects = streamers.restore(presences);
                if effects.is_empty() {
                    return None;
                }
                Some(
                    async move {
                        for result in futures::future::join_all(effects).await {
                            result?;
                        }
                        Ok::<_, anyhow::Error>(())
                    }
                    .boxed(),
                )
            });
        }

        {
            let streamers = Arc::clone(&streamers);
            dispatcher.on(EventKind::PresenceChanged, move |event| {
                let Event::PresenceChanged { member, new, .. } = event else {
                    return None;
                };
                let effects = streamers.handle_presence(member, new)?;
                Some(
                    async move {
                        effects.await?;
                        Ok::<_, anyhow::Error>(())
                    }
                    .boxed(),
                )
            });
        }

        dispatcher.on(EventKind::VoiceStateChanged, move |event| {
            if let Event::VoiceStateChanged {
                old_channel,
                new_channel,
                ..
            } = event
            {
                channels.handle_voice_state(old_channel.as_ref(), new_channel.as_ref());
            }
            None
        });

        dispatcher.on(EventKind::Message, move |event| {
            let Event::Message { from, channel, text } = event else {
                return None;
            };
            let command = commands.parse(text)?;
            let commands = commands.clone();
            let from = from.clone();
            let channel = channel.clone();
            Some(async move { commands.execute(&from, &channel, command).await }.boxed())
        });

        dispatcher.ensure_complete()?;
        Ok(dispatcher)
    }

    /// Handle one event. Returns the task running its effects, if any.
    pub fn dispatch(&self, event: &Event) -> Option<JoinHandle<()>> {
        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            tracing::warn!(%kind, "No handler for event");
            return None;
        };
        let effect = handler(event)?;
        Some(tokio::spawn(async move {
            if let Err(e) = effect.await {
                tracing::error!(%kind, error = %e, "Event handler error");
            }
        }))
    }

    /// Drain `events` in order until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        tracing::warn!("Event channel closed, exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn missing_kinds_are_reported() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.on(EventKind::Connected, |_| None);
        dispatcher.on(EventKind::Message, |_| None);

        let missing = dispatcher.missing_kinds();
        assert_eq!(
            missing,
            vec![
                EventKind::Ready,
                EventKind::PresenceChanged,
                EventKind::VoiceStateChanged,
                EventKind::Disconnected,
            ]
        );
        assert!(dispatcher.ensure_complete().is_err());
    }

    #[tokio::test]
    async fn effects_run_and_failures_do_not_stop_dispatch() {
        let mut dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        dispatcher.on(EventKind::Disconnected, move |_| {
            let r = Arc::clone(&r);
            Some(
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("boom"))
                }
                .boxed(),
            )
        });

        let event = Event::Disconnected { reason: "bye".into() };
        dispatcher.dispatch(&event).unwrap().await.unwrap();
        dispatcher.dispatch(&event).unwrap().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 2);

        // Unregistered kinds are logged and skipped.
        assert!(dispatcher.dispatch(&Event::Connected).is_none());
    }
}

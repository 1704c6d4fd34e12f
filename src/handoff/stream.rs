//! `Stream` adapter over the subscriber protocol.
//!
//! Demand follows polling: one connection is requested when the stream is
//! polled with nothing outstanding, so an idle consumer never pulls
//! connections out of the kernel queue.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Subscriber, Subscription};
use crate::connection::IncomingConnection;
use crate::error::BridgeError;

enum StreamEvent<Io> {
    Subscribed(Subscription<Io>),
    Next(IncomingConnection<Io>),
    Error(BridgeError),
    Complete,
}

/// Subscriber half: forwards protocol callbacks to the stream.
pub(crate) struct ChannelSubscriber<Io> {
    events: mpsc::UnboundedSender<StreamEvent<Io>>,
}

impl<Io: Send + 'static> Subscriber<Io> for ChannelSubscriber<Io> {
    fn on_subscribe(&mut self, subscription: Subscription<Io>) {
        // The stream was dropped before the bridge attached it.
        if let Err(mpsc::error::SendError(StreamEvent::Subscribed(subscription))) =
            self.events.send(StreamEvent::Subscribed(subscription))
        {
            subscription.cancel();
        }
    }

    fn on_next(&mut self, connection: IncomingConnection<Io>) {
        let _ = self.events.send(StreamEvent::Next(connection));
    }

    fn on_error(&mut self, error: BridgeError) {
        let _ = self.events.send(StreamEvent::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.events.send(StreamEvent::Complete);
    }
}

/// Connections released by a bridge, one per poll.
///
/// Yields `Err` once if the bridge fails, then ends. Dropping the stream
/// before it ends cancels the subscription, which unbinds the listener.
pub struct IncomingStream<Io> {
    events: UnboundedReceiverStream<StreamEvent<Io>>,
    subscription: Option<Subscription<Io>>,
    requested: bool,
    done: bool,
}

pub(crate) fn channel<Io>() -> (ChannelSubscriber<Io>, IncomingStream<Io>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSubscriber { events: tx },
        IncomingStream {
            events: UnboundedReceiverStream::new(rx),
            subscription: None,
            requested: false,
            done: false,
        },
    )
}

impl<Io> IncomingStream<Io> {
    /// Stop the stream and cancel the subscription.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if self.subscription.is_none() {
            while let Ok(event) = self.events.as_mut().try_recv() {
                if let StreamEvent::Subscribed(subscription) = event {
                    self.subscription = Some(subscription);
                    break;
                }
            }
        }
        if let Some(subscription) = self.subscription.as_ref() {
            subscription.cancel();
        }
    }
}

impl<Io> Stream for IncomingStream<Io> {
    type Item = Result<IncomingConnection<Io>, BridgeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            if let Some(subscription) = this.subscription.as_ref() {
                if !this.requested {
                    subscription.request(1);
                    this.requested = true;
                }
            }

            match Pin::new(&mut this.events).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(StreamEvent::Subscribed(subscription))) => {
                    this.subscription = Some(subscription);
                }
                Poll::Ready(Some(StreamEvent::Next(connection))) => {
                    this.requested = false;
                    return Poll::Ready(Some(Ok(connection)));
                }
                Poll::Ready(Some(StreamEvent::Error(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(StreamEvent::Complete)) | Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl<Io> Drop for IncomingStream<Io> {
    fn drop(&mut self) {
        self.cancel();
    }
}

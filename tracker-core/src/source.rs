use crate::{CommentEvent, CoreError};
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// An open subscription. `None` means the provider closed the connection.
pub type EventStream = BoxStream<'static, Result<CommentEvent, CoreError>>;

/// Something that can open a comment subscription.
///
/// `connect` is called once at startup and again after every backoff, so
/// implementations must be able to hand out a fresh stream each time.
pub trait EventSource: Send {
    fn connect(&mut self) -> BoxFuture<'_, Result<EventStream, CoreError>>;

    /// Human readable name of what is being listened to.
    fn describe(&self) -> String;
}

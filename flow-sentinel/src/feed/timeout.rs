//! Read-idle timeout for trade streams.
//!
//! An exchange socket can die silently, leaving the read half pending forever. Each read is
//! bounded by `read_timeout`; an expired read yields [`FeedError::ReadTimeout`], which the
//! supervisor treats as a disconnect.

use crate::error::FeedError;
use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use std::time::Duration;
use tracing::warn;

/// Wrap `inner` so that every `next()` waits at most `read_timeout`.
///
/// The clock restarts on each read, so a live stream never times out. The wrapped stream ends
/// when `inner` ends.
pub fn with_read_timeout<S, T>(inner: S, read_timeout: Duration) -> BoxStream<'static, Result<T, FeedError>>
where
    S: Stream<Item = Result<T, FeedError>> + Unpin + Send + 'static,
    T: Send + 'static,
{
    stream::unfold(inner, move |mut inner| async move {
        match tokio::time::timeout(read_timeout, inner.next()).await {
            Ok(Some(item)) => Some((item, inner)),
            Ok(None) => None,
            Err(_elapsed) => {
                warn!(
                    timeout_secs = read_timeout.as_secs(),
                    "trade stream read timeout, no data received"
                );
                Some((Err(FeedError::ReadTimeout(read_timeout)), inner))
            }
        }
    })
    .boxed()
}

//! Live signals and switch-to-latest composition.
//!
//! DESIGN
//! ======
//! A live signal is a `BoxStream` that yields an initial value followed by
//! updates until it is dropped. [`switch_latest`] maps every value of an
//! upstream signal to a fresh inner signal and forwards only the newest
//! inner one. The previous inner stream is dropped before the next is
//! built, so two inner subscriptions never overlap.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};

/// Forward items from the inner stream built for the latest upstream value.
///
/// Ends once the upstream has ended and the last inner stream is exhausted.
pub fn switch_latest<U, T, F>(upstream: BoxStream<'static, U>, project: F) -> SwitchLatest<U, T, F>
where
    F: FnMut(U) -> BoxStream<'static, T> + Unpin,
{
    SwitchLatest { upstream: Some(upstream), inner: None, project }
}

pub struct SwitchLatest<U, T, F> {
    upstream: Option<BoxStream<'static, U>>,
    inner: Option<BoxStream<'static, T>>,
    project: F,
}

impl<U, T, F> Stream for SwitchLatest<U, T, F>
where
    F: FnMut(U) -> BoxStream<'static, T> + Unpin,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();

        // Drain every ready upstream value; only the last one gets an inner stream.
        while let Some(upstream) = this.upstream.as_mut() {
            match upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(value)) => {
                    this.inner = None;
                    this.inner = Some((this.project)(value));
                }
                Poll::Ready(None) => this.upstream = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.upstream.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
#[path = "signal_test.rs"]
mod tests;

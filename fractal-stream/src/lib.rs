//! Cold, cancellable stream runtime.
//!
//! Streams are plain `futures::Stream` values and combinators (`concat`,
//! `merge`, `map`, `observe_on`) are free functions/methods rather than a
//! bespoke reactive framework. Cancellation rides on
//! `tokio_util::sync::CancellationToken` instead of a hand-rolled
//! disposable trait: a token's children are cancelled transitively, which
//! is exactly the propagation rule `concat`/`merge` need for disposing
//! whichever child stream is currently active.

use std::pin::Pin;

use futures::stream::{select_all, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub mod scheduler;
pub use scheduler::ComputePool;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A live, cancellable attachment to a stream's producer side.
///
/// `dispose()` is idempotent and propagates to every upstream source that
/// was derived from the same subscription, including child subscriptions
/// created by `concat`/`merge`.
#[derive(Clone, Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A cold, lazy producer of `T`. No work starts until [`subscribe`] is
/// called; each call to `subscribe` yields an independent execution bound
/// to its own cancellation token.
///
/// [`subscribe`]: ColdStream::subscribe
pub struct ColdStream<T> {
    factory: Box<dyn FnOnce(CancellationToken) -> BoxStream<T> + Send>,
}

impl<T: Send + 'static> ColdStream<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce(CancellationToken) -> BoxStream<T> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }

    /// Wrap an already-constructed stream. It is still stopped at the
    /// subscription boundary: once the returned `ColdStream` is subscribed
    /// and later disposed, no further items are polled from `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::new(move |token| {
            stream
                .take_until(async move { token.cancelled().await })
                .boxed()
        })
    }

    /// A stream that emits a single value and completes.
    pub fn once(value: T) -> Self {
        Self::from_stream(futures::stream::once(async move { value }))
    }

    /// A stream that emits nothing and completes immediately.
    pub fn empty() -> Self {
        Self::from_stream(futures::stream::empty())
    }

    /// Start production. Returns a disposal handle and the live stream.
    pub fn subscribe(self) -> (Subscription, BoxStream<T>) {
        let token = CancellationToken::new();
        let stream = (self.factory)(token.clone());
        (Subscription::new(token), stream)
    }

    /// Start production under a caller-supplied token instead of minting a
    /// fresh one. Lets a combinator splice this stream into a larger
    /// cancellation hierarchy it doesn't own the root of.
    pub fn with_cancellation(self, token: CancellationToken) -> BoxStream<T> {
        (self.factory)(token)
    }

    /// Synchronous, order-preserving transform.
    pub fn map<U, F>(self, mut f: F) -> ColdStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let factory = self.factory;
        ColdStream::new(move |token| factory(token).map(move |item| f(item)).boxed())
    }

    /// Subscribe to `self`; once it completes, subscribe to `other` using a
    /// child of the same cancellation token. Disposing the outer
    /// subscription cancels whichever of the two is currently active.
    pub fn concat(self, other: ColdStream<T>) -> ColdStream<T> {
        let first_factory = self.factory;
        let second_factory = other.factory;
        ColdStream::new(move |token| {
            async_stream::stream! {
                let mut first = first_factory(token.child_token());
                while let Some(item) = first.next().await {
                    yield item;
                }
                if !token.is_cancelled() {
                    let mut second = second_factory(token.child_token());
                    while let Some(item) = second.next().await {
                        yield item;
                    }
                }
            }
            .boxed()
        })
    }

    /// Re-dispatch item delivery onto `pool`. Preserves per-subscription
    /// order: a bounded channel of size 1 guarantees the forwarding task
    /// cannot race ahead of the consumer.
    pub fn observe_on(self, pool: ComputePool) -> ColdStream<T> {
        let factory = self.factory;
        ColdStream::new(move |token| {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let child = token.child_token();
            pool.spawn(async move {
                let mut stream = factory(child);
                while let Some(item) = stream.next().await {
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
            tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
        })
    }
}

/// Interleave items from N streams of `Result<T, E>` in arrival order.
/// Completes once every child has completed. The first `Err` cancels every
/// sibling (via a shared child token) and is the last item the merged
/// stream yields.
pub fn merge<T, E>(streams: Vec<ColdStream<Result<T, E>>>) -> ColdStream<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    ColdStream::new(move |token| {
        let group_token = token.child_token();
        let children: Vec<_> = streams
            .into_iter()
            .map(|s| {
                let child_token = group_token.child_token();
                (s.factory)(child_token)
            })
            .collect();

        let group_token_for_errors = group_token.clone();
        select_all(children)
            .map(move |item| {
                if item.is_err() {
                    group_token_for_errors.cancel();
                }
                item
            })
            .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn cold_stream_does_no_work_before_subscribe() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let cold = ColdStream::new(move |_token| {
            flag.store(true, Ordering::SeqCst);
            futures::stream::once(async { 1 }).boxed()
        });
        assert!(!started.load(Ordering::SeqCst));
        let (_sub, mut stream) = cold.subscribe();
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(stream.next().await, Some(1));
    }

    #[tokio::test]
    async fn map_preserves_order() {
        let cold = ColdStream::from_stream(futures::stream::iter(vec![1, 2, 3]));
        let mapped = cold.map(|x| x * 10);
        let (_sub, stream) = mapped.subscribe();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn concat_runs_second_only_after_first_completes() {
        let a = ColdStream::from_stream(futures::stream::iter(vec![1, 2]));
        let b = ColdStream::from_stream(futures::stream::iter(vec![3, 4]));
        let (_sub, stream) = a.concat(b).subscribe();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dispose_stops_delivery() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<i32>();
        let cold = ColdStream::from_stream(tokio_stream::wrappers::UnboundedReceiverStream::new(rx));
        let (sub, mut stream) = cold.subscribe();

        tx.send(1).unwrap();
        assert_eq!(stream.next().await, Some(1));

        sub.dispose();
        assert!(sub.is_disposed());
        // Sender is still open but the subscription is cancelled: no further
        // items are observable even though more could be sent.
        let _ = tx.send(2);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn merge_interleaves_and_completes_once_all_children_do() {
        let a = ColdStream::<Result<i32, String>>::from_stream(futures::stream::iter(vec![
            Ok(1),
            Ok(2),
        ]));
        let b = ColdStream::<Result<i32, String>>::from_stream(futures::stream::iter(vec![Ok(
            3,
        )]));
        let (_sub, stream) = merge(vec![a, b]).subscribe();
        let mut items: Vec<_> = stream.map(|r| r.unwrap()).collect().await;
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn merge_first_error_is_terminal() {
        let a = ColdStream::<Result<i32, &'static str>>::from_stream(futures::stream::iter(
            vec![Err("boom")],
        ));
        let b = ColdStream::<Result<i32, &'static str>>::new(|token| {
            async_stream::stream! {
                token.cancelled().await;
                if false {
                    yield Ok(0);
                }
            }
            .boxed()
        });
        let (_sub, stream) = merge(vec![a, b]).subscribe();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Err("boom")]);
    }
}

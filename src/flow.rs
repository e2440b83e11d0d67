//! Stream vocabulary shared by every pipeline stage.
//!
//! # Model
//!
//! A pipeline is a chain of *stages*, each a function from one stream to
//! another:
//!
//! ```text
//! FlowStream<Context> ──► Middleware ──► FlowStream<Context> ──► RequestHandler ──► FlowStream<Response>
//! ```
//!
//! Items are [`Flow<T>`] = `Result<T, HandlingError>`. A fault raised by one
//! context is just an `Err` item travelling next to the `Ok` items of other
//! contexts, so it never terminates a shared stream. Stages that do not care
//! about faults pass them along untouched.
//!
//! Nothing runs until a stream is driven. [`Subscribe::subscribe`] spawns the
//! task that does so.

use std::future::Future;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::context::Context;
use crate::handling::HandlingError;
use crate::response::Response;

/// One item of a pipeline: a value or the fault raised while producing it.
pub type Flow<T> = Result<T, HandlingError>;

/// A boxed stream of [`Flow`] items.
pub type FlowStream<T> = BoxStream<'static, Flow<T>>;

/// A pipeline stage.
pub type Stage<A, B> = Box<dyn FnOnce(FlowStream<A>) -> FlowStream<B> + Send>;

/// Context to context: may attach state, read the body, or fault.
pub type Middleware = Stage<Context, Context>;

/// Context to response: the terminal step of a route branch.
pub type RequestHandler = Stage<Context, Response>;

/// Response to response: post-processing such as cookie serialisation.
pub type ResponseHandler = Stage<Response, Response>;

/// Error channel to response: renders faults diverted by `send()`.
pub type ErrorHandlerStage = Box<dyn FnOnce(BoxStream<'static, HandlingError>) -> FlowStream<Response> + Send>;

// ── Extension trait ───────────────────────────────────────────────────────────

/// Piping and driving for streams.
pub trait FlowExt: Sized {
    /// Applies `stage` to this stream.
    fn pipe<O>(self, stage: impl FnOnce(Self) -> O) -> O {
        stage(self)
    }
}

impl<S: futures::Stream + Sized> FlowExt for S {}

/// Driving a [`FlowStream`] to completion.
pub trait Subscribe {
    /// Spawns a task that polls the stream until it ends.
    ///
    /// Faults that reach this point without being recovered or diverted to
    /// the error channel have been observed by nobody; they are logged at
    /// `error` level and their connection falls back to a `500`.
    fn subscribe(self) -> JoinHandle<()>;
}

impl<T: Send + 'static> Subscribe for FlowStream<T> {
    fn subscribe(self) -> JoinHandle<()> {
        tokio::spawn(self.for_each(|item| {
            if let Err(err) = item {
                report_unobserved(&err);
            }
            future::ready(())
        }))
    }
}

pub(crate) fn report_unobserved(err: &HandlingError) {
    if err.is_diverted() || err.is_recovered() {
        debug!(request = %err.context().id(), status = err.status().as_u16(), "fault settled: {err}");
    } else {
        error!(
            request = %err.context().id(),
            status = err.status().as_u16(),
            "fault reached the end of a pipeline with no error handler attached: {err}"
        );
    }
}

// ── Synchronous helpers ───────────────────────────────────────────────────────

/// Maps every `Ok` value; faults pass through.
pub fn map<A, B, F>(mut f: F) -> Stage<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> B + Send + 'static,
{
    Box::new(move |source| source.map(move |item| item.map(&mut f)).boxed())
}

/// Runs `f` on every `Ok` value for its side effect; items pass unchanged.
pub fn tap<T, F>(mut f: F) -> Stage<T, T>
where
    T: Send + 'static,
    F: FnMut(&T) + Send + 'static,
{
    Box::new(move |source| {
        source
            .inspect(move |item| {
                if let Ok(value) = item {
                    f(value);
                }
            })
            .boxed()
    })
}

/// Keeps the `Ok` values matching `pred`; faults always pass.
pub fn filter<T, F>(mut pred: F) -> Stage<T, T>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    Box::new(move |source| {
        source
            .filter(move |item| future::ready(item.as_ref().map_or(true, &mut pred)))
            .boxed()
    })
}

/// Chains two stages into one.
pub fn compose<A, B, C>(first: Stage<A, B>, second: Stage<B, C>) -> Stage<A, C>
where
    A: 'static,
    B: 'static,
    C: 'static,
{
    Box::new(move |source| second(first(source)))
}

// ── Concurrency ───────────────────────────────────────────────────────────────

/// Runs `f` on every `Ok` value concurrently, emitting results as they
/// complete. No ordering between contexts, no limit on how many are in
/// flight: one slow context never holds up the others.
pub(crate) fn merge_map<A, B, F, Fut>(source: FlowStream<A>, mut f: F) -> FlowStream<B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> Fut + Send + 'static,
    Fut: Future<Output = Flow<B>> + Send + 'static,
{
    source
        .flat_map_unordered(None::<usize>, move |item| match item {
            Ok(value) => stream::once(f(value)).boxed(),
            Err(err) => stream::once(future::ready(Err(err))).boxed(),
        })
        .boxed()
}

/// Like [`merge_map`] but each value may expand into several items.
pub(crate) fn merge_expand<A, B, F, Fut>(source: FlowStream<A>, mut f: F) -> FlowStream<B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(Flow<A>) -> Fut + Send + 'static,
    Fut: Future<Output = Vec<Flow<B>>> + Send + 'static,
{
    source
        .flat_map_unordered(None::<usize>, move |item| {
            stream::once(f(item)).flat_map(stream::iter).boxed()
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn numbers(items: Vec<Flow<u32>>) -> FlowStream<u32> {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn map_and_filter_only_touch_ok_values() {
        let out: Vec<u32> = numbers(vec![Ok(1), Ok(2), Ok(3)])
            .pipe(map(|n: u32| n * 10))
            .pipe(filter(|n: &u32| *n > 10))
            .filter_map(|i| future::ready(i.ok()))
            .collect()
            .await;
        assert_eq!(out, vec![20, 30]);
    }

    #[tokio::test]
    async fn merge_map_runs_everything() {
        let out = merge_map(numbers(vec![Ok(1), Ok(2), Ok(3)]), |n| async move { Ok(n + 1) });
        let mut values: Vec<u32> = out.filter_map(|i| future::ready(i.ok())).collect().await;
        values.sort();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn compose_chains_in_order() {
        let both = compose(map(|n: u32| n + 1), map(|n: u32| n * 2));
        let out: Vec<u32> = numbers(vec![Ok(1)]).pipe(both).filter_map(|i| future::ready(i.ok())).collect().await;
        assert_eq!(out, vec![4]);
    }
}

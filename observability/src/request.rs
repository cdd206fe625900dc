use std::{
    future::Future,
    pin::Pin,
    task::{self, Poll},
    time::Instant,
};

use futures::TryFuture;
use pin_project::{pin_project, pinned_drop};

use crate::{Counter, Histogram, KeyValue};

/// Outcome attribute of a finished request.
const OUTCOME: &str = "outcome";

/// Duration and outcome instruments of one kind of outgoing request.
///
/// Each finished request adds one to `<name>.requests` and one duration to
/// `<name>.duration`, both tagged with `outcome=ok|error|dropped`.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub duration: Histogram<f64>,
    pub requests: Counter<u64>,
}

impl RequestMetrics {
    pub fn new(meter_name: &'static str, metric_name: &'static str) -> Self {
        let meter = crate::meter(meter_name);

        Self {
            duration: meter
                .f64_histogram(format!("{metric_name}.duration"))
                .with_description(format!("{metric_name} duration, retries included"))
                .with_unit("s")
                .with_boundaries(vec![
                    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ])
                .build(),
            requests: meter
                .u64_counter(format!("{metric_name}.requests"))
                .with_description(format!("{metric_name} count by outcome"))
                .build(),
        }
    }

    fn record(&self, elapsed: f64, attributes: &mut Vec<KeyValue>, outcome: &'static str) {
        attributes.push(KeyValue::new(OUTCOME, outcome));
        self.duration.record(elapsed, attributes);
        self.requests.add(1, attributes);
    }
}

/// A request future that records its metrics when it resolves.
///
/// A request dropped before resolving, for example by a timeout, is recorded as `dropped`.
#[pin_project(PinnedDrop)]
pub struct RecordedRequest<T> {
    #[pin]
    inner: T,
    start: Instant,
    metrics: RequestMetrics,
    attributes: Vec<KeyValue>,
    finished: bool,
}

pub trait RecordRequest: Sized {
    fn record_request(
        self,
        metrics: RequestMetrics,
        attributes: impl IntoIterator<Item = KeyValue>,
    ) -> RecordedRequest<Self> {
        RecordedRequest {
            inner: self,
            start: Instant::now(),
            metrics,
            attributes: attributes.into_iter().collect(),
            finished: false,
        }
    }
}

impl<T: TryFuture> RecordRequest for T {}

impl<T: TryFuture> Future for RecordedRequest<T> {
    type Output = Result<T::Ok, T::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let output = match this.inner.try_poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(output) => output,
        };

        let outcome = if output.is_ok() { "ok" } else { "error" };
        *this.finished = true;
        this.metrics.record(
            this.start.elapsed().as_secs_f64(),
            this.attributes,
            outcome,
        );

        Poll::Ready(output)
    }
}

#[pinned_drop]
impl<T> PinnedDrop for RecordedRequest<T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.finished {
            this.metrics.record(
                this.start.elapsed().as_secs_f64(),
                this.attributes,
                "dropped",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RecordRequest, RequestMetrics};
    use crate::KeyValue;

    #[tokio::test]
    async fn test_recorded_request_passes_output_through() {
        let metrics = RequestMetrics::new("test", "test.request");

        let ok = async { Ok::<u64, String>(42) }
            .record_request(metrics.clone(), [KeyValue::new("method", "eth_call")])
            .await;
        assert_eq!(ok, Ok(42));

        let err = async { Err::<u64, String>("boom".to_string()) }
            .record_request(metrics, [])
            .await;
        assert_eq!(err, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_timed_out_request_is_dropped() {
        let metrics = RequestMetrics::new("test", "test.request");

        let pending = std::future::pending::<Result<u64, String>>().record_request(metrics, []);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
    }
}

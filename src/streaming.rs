// Stream scheduler: paces, loops and shuffles server-stream items

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Emission plan for one server-streaming call, derived from the matched
/// response option.
#[derive(Debug, Clone)]
pub struct StreamPlan {
    pub items: Vec<Value>,
    /// Pause between items; never applied before the first item.
    pub delay: Duration,
    pub loop_stream: bool,
    pub random_order: bool,
}

impl StreamPlan {
    pub fn from_rule(response: &crate::rules::ResponseRule) -> Self {
        Self {
            items: response.stream_items.clone(),
            delay: Duration::from_millis(response.stream_delay_ms),
            loop_stream: response.stream_loop,
            random_order: response.stream_random_order,
        }
    }
}

/// Emit items one by one until exhaustion, cancellation or a closed
/// receiver. Each pass over the items uses a fresh permutation when
/// `random_order` is set; `loop_stream` restarts the iteration instead of
/// ending the stream.
pub async fn run(plan: StreamPlan, cancel: CancellationToken, tx: mpsc::Sender<Value>) {
    if plan.items.is_empty() {
        return;
    }

    let mut first = true;
    loop {
        for index in emit_order(plan.items.len(), plan.random_order) {
            if !first {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(plan.delay) => {}
                }
            }
            first = false;

            if cancel.is_cancelled() {
                return;
            }
            // Backpressure suspends here; a dropped receiver is the
            // transport telling us to stop
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(plan.items[index].clone()) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        if !plan.loop_stream {
            return;
        }
    }
}

fn emit_order(len: usize, random: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if random {
        use rand::seq::SliceRandom;
        let mut rng = rand::rng();
        order.shuffle(&mut rng);
    }
    order
}

/// Defer a unary reply. Returns false when the call was cancelled while
/// sleeping.
pub async fn unary_delay(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

//! The server shell: ingress, worker pool, and the per-request dispatch
//! pipeline.
//!
//! One ingress task owns the subscription and feeds a bounded in-process
//! queue; `workers` worker tasks drain it. Each worker owns its own
//! publisher connection to the switch; publisher handles are never shared,
//! so there is no hot lock on the reply path. Responses across distinct
//! requests may be reordered; callers correlate by `request_id`.
//!
//! Request lifecycle inside a worker: decode, classify the intent, resolve a
//! skill (explicit name or matcher), complete the skill's lazy detail load,
//! execute, respond on `reply_to`. Malformed envelopes are logged and
//! dropped, since there is nowhere to send an error for them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use skillscale_bus::{Envelope, Publisher, Subscriber, WireMessage};
use skillscale_protocol::{Intent, SkillRequest, SkillResponse};

use crate::catalogue::Catalogue;
use crate::config::{MatcherKind, ServerConfig};
use crate::error::Result;
use crate::executor::SkillExecutor;
use crate::matcher::{KeywordMatcher, LlmMatcher, Matcher};

/// How long a full ingress queue waits before retrying the push.
const QUEUE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Delay between reconnection attempts after a transport fault.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Ingress queue
// ---------------------------------------------------------------------------

/// Bounded single-producer / multi-consumer queue from ingress to workers.
struct IngressQueue {
    queue: ArrayQueue<WireMessage>,
    notify: Notify,
}

impl IngressQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
        }
    }

    /// Push an envelope, waiting while the queue is at capacity.
    async fn push_wait(&self, msg: WireMessage, cancel: &CancellationToken) {
        let mut msg = msg;
        let mut reported = false;
        loop {
            match self.queue.push(msg) {
                Ok(()) => {
                    self.notify.notify_one();
                    return;
                }
                Err(back) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if !reported {
                        tracing::warn!("ingress queue at capacity, applying backpressure");
                        reported = true;
                    }
                    msg = back;
                    tokio::time::sleep(QUEUE_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Pop the next envelope, parking until one arrives.
    async fn pop_wait(&self) -> WireMessage {
        loop {
            if let Some(msg) = self.queue.pop() {
                return msg;
            }
            // Register before re-checking so a push between the check and
            // the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(msg) = self.queue.pop() {
                return msg;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Entry point for running a skill server.
pub struct SkillServer;

/// Shared context handed to every worker.
struct WorkerContext {
    config: ServerConfig,
    catalogue: Arc<Catalogue>,
    matcher: Arc<dyn Matcher>,
    executor: Arc<SkillExecutor>,
}

impl SkillServer {
    /// Load the catalogue, subscribe, and start dispatching.
    ///
    /// Returns once the server is live: the catalogue is loaded, the
    /// subscription has had its settle interval to propagate, and the
    /// workers are running.
    pub async fn start(config: ServerConfig) -> Result<ServerHandle> {
        let catalogue = Arc::new(Catalogue::load(&config.skills_dir)?);
        log_catalogue(&config, &catalogue);

        let matcher: Arc<dyn Matcher> = match config.matcher {
            MatcherKind::Keyword => Arc::new(KeywordMatcher),
            MatcherKind::Llm => Arc::new(LlmMatcher::new(
                config.python.clone(),
                config.llm_helper_path(),
                config.prompt_file.clone(),
            )),
        };
        let executor = Arc::new(SkillExecutor::new(
            config.timeout,
            config.python.clone(),
            config.dispatcher.clone(),
        ));

        let mut subscriber = Subscriber::connect(&config.proxy_xpub).await?;
        subscriber
            .subscribe(Bytes::from(config.topic.clone().into_bytes()))
            .await?;
        tracing::info!(topic = %config.topic, "subscribed, waiting for propagation");
        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;

        let queue = Arc::new(IngressQueue::new(config.hwm));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let context = Arc::new(WorkerContext {
            config: config.clone(),
            catalogue,
            matcher,
            executor,
        });
        for worker_id in 0..config.workers.max(1) {
            tracker.spawn(worker_loop(
                worker_id,
                Arc::clone(&context),
                Arc::clone(&queue),
                cancel.clone(),
            ));
        }
        tracker.spawn(ingress_loop(
            subscriber,
            config.clone(),
            Arc::clone(&queue),
            cancel.clone(),
        ));

        tracing::info!(
            topic = %config.topic,
            workers = config.workers.max(1),
            "skill server ready"
        );
        Ok(ServerHandle { cancel, tracker })
    }
}

/// Startup metadata summary, the server's advertisement of what it serves.
fn log_catalogue(config: &ServerConfig, catalogue: &Catalogue) {
    tracing::info!(
        topic = %config.topic,
        description = %config.description,
        skills_dir = %config.skills_dir.display(),
        matcher = ?config.matcher,
        skills = catalogue.len(),
        "catalogue loaded"
    );
    if catalogue.is_empty() {
        tracing::warn!(dir = %config.skills_dir.display(), "no skills loaded");
    }
    for skill in catalogue.iter() {
        tracing::info!(
            skill = %skill.name,
            description = %skill.description,
            details_loaded = skill.details_loaded(),
            "skill available"
        );
    }
}

/// A running skill server.
pub struct ServerHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    /// Signal the ingress and worker tasks to stop.
    pub fn shutdown(&self) {
        tracing::info!("skill server shutdown requested");
        self.cancel.cancel();
    }

    /// Wait until every task has stopped.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("skill server stopped");
    }
}

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

async fn ingress_loop(
    mut subscriber: Subscriber,
    config: ServerConfig,
    queue: Arc<IngressQueue>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = subscriber.recv() => match msg {
                Ok(msg) => queue.push_wait(msg, &cancel).await,
                Err(e) => {
                    tracing::warn!(error = %e, "subscription lost, reconnecting");
                    match resubscribe(&config, &cancel).await {
                        Some(s) => subscriber = s,
                        None => break,
                    }
                }
            }
        }
    }
    tracing::debug!("ingress stopped");
}

/// Re-establish the subscription after a transport fault. Returns `None`
/// when shutdown was requested while retrying.
async fn resubscribe(config: &ServerConfig, cancel: &CancellationToken) -> Option<Subscriber> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(RECONNECT_INTERVAL) => {}
        }
        match Subscriber::connect(&config.proxy_xpub).await {
            Ok(mut subscriber) => {
                match subscriber
                    .subscribe(Bytes::from(config.topic.clone().into_bytes()))
                    .await
                {
                    Ok(()) => {
                        tracing::info!(topic = %config.topic, "resubscribed");
                        return Some(subscriber);
                    }
                    Err(e) => tracing::warn!(error = %e, "resubscribe failed"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "reconnect failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

async fn worker_loop(
    worker_id: usize,
    context: Arc<WorkerContext>,
    queue: Arc<IngressQueue>,
    cancel: CancellationToken,
) {
    // Connected lazily and re-established after faults.
    let mut publisher: Option<Publisher> = None;

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = queue.pop_wait() => msg,
        };
        dispatch(worker_id, &context, &mut publisher, msg).await;
    }
    tracing::debug!(worker = worker_id, "worker stopped");
}

/// Run one envelope through the dispatch pipeline.
async fn dispatch(
    worker_id: usize,
    context: &WorkerContext,
    publisher: &mut Option<Publisher>,
    msg: WireMessage,
) {
    let Some(envelope) = Envelope::from_message(msg) else {
        tracing::warn!(worker = worker_id, "discarding envelope with unexpected frame count");
        return;
    };

    let request = match SkillRequest::from_payload(&envelope.payload) {
        Ok(request) => request,
        Err(e) => {
            // No reply_to to answer; log and drop.
            tracing::warn!(worker = worker_id, error = %e, "discarding malformed envelope");
            return;
        }
    };
    tracing::info!(
        worker = worker_id,
        request_id = %request.request_id,
        "processing request"
    );

    let intent = Intent::parse(&request.intent);
    let skill = match &intent {
        Intent::Explicit { skill: name, .. } => match context.catalogue.get(name) {
            Some(skill) => skill,
            None => {
                // The caller was specific; no task-based fallback.
                let response = SkillResponse::error(
                    &request.request_id,
                    format!("Unknown skill `{name}`"),
                );
                respond(publisher, context, &request.reply_to, response).await;
                return;
            }
        },
        Intent::Task(task) => {
            let selected = context.matcher.select(task, &context.catalogue).await;
            match selected.or_else(|| context.catalogue.sole_skill()) {
                Some(skill) => skill,
                None => {
                    let response = SkillResponse::error(
                        &request.request_id,
                        format!("No matching skill for task: {}", truncate(task, 120)),
                    );
                    respond(publisher, context, &request.reply_to, response).await;
                    return;
                }
            }
        }
    };
    tracing::info!(
        worker = worker_id,
        request_id = %request.request_id,
        skill = %skill.name,
        "dispatching to skill"
    );

    // Complete the lazy detail load before execution.
    if let Err(e) = skill.instructions().await {
        let response = SkillResponse::error(
            &request.request_id,
            format!("Failed to load skill `{}`: {e}", skill.name),
        );
        respond(publisher, context, &request.reply_to, response).await;
        return;
    }

    let response = match context.executor.execute(&skill, intent.input()).await {
        Ok(result) if result.timed_out => SkillResponse::timeout(&request.request_id, result.stderr),
        Ok(result) if result.success => SkillResponse::success(&request.request_id, result.stdout),
        Ok(result) => SkillResponse::error(
            &request.request_id,
            format!(
                "Skill execution failed (exit={}): {}",
                result.exit_code, result.stderr
            ),
        ),
        Err(e) => SkillResponse::error(
            &request.request_id,
            format!("Skill execution failed: {e}"),
        ),
    };
    respond(publisher, context, &request.reply_to, response).await;
}

/// Publish a response on its reply topic, re-establishing the worker's
/// publisher connection once if the first attempt fails.
async fn respond(
    publisher: &mut Option<Publisher>,
    context: &WorkerContext,
    reply_to: &str,
    response: SkillResponse,
) {
    let topic = Bytes::from(reply_to.to_owned().into_bytes());
    let payload = Bytes::from(response.to_payload());

    for attempt in 0..2 {
        if publisher.is_none() {
            match Publisher::connect(&context.config.proxy_xsub).await {
                Ok(p) => *publisher = Some(p),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "cannot reach switch upstream");
                    continue;
                }
            }
        }
        if let Some(p) = publisher.as_mut() {
            match p.publish(topic.clone(), payload.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %response.request_id,
                        status = ?response.status,
                        reply_to,
                        "response published"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "publish failed, reconnecting");
                    *publisher = None;
                }
            }
        }
    }
    tracing::error!(
        request_id = %response.request_id,
        reply_to,
        "dropping response after repeated publish failures"
    );
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

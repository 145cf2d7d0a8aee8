//! Chain executor
//!
//! Every step gets one call to its runner and two tasks: one pumps the
//! upstream channel into the call, the other pumps the call's output into the
//! next channel. Channels are bounded, so a slow step applies backpressure to
//! the steps before it while downstream steps already consume.
//!
//! All tasks share one cancellation token. The first failing task cancels it
//! and its error is what the chain reports; tasks that observe the
//! cancellation end quietly, dropping their connections so the runners see
//! the session go away.

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::descriptor::ChainDescriptor;
use super::endpoint::EndpointResolver;
use crate::config::{
    ClientConfig, DEFAULT_CHAIN_TIMEOUT_MS, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_STAGE_BUFFER,
};
use crate::error::{BtrfaasError, Result};
use crate::metrics;
use crate::protocol::{CallReceiver, CallSender, RunnerClient};
use crate::security::{ClientSecurity, SecretSource};

/// Tuning for chain execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Size of the chunks a buffered payload is split into
    pub chunk_size: usize,
    /// Capacity of the channel between two steps
    pub stage_buffer: usize,
    /// Longest wait for the next output chunk of any step
    pub idle_timeout: Duration,
    /// Deadline for the whole chain, `None` for no deadline
    pub chain_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stage_buffer: DEFAULT_STAGE_BUFFER,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            chain_timeout: Some(Duration::from_millis(DEFAULT_CHAIN_TIMEOUT_MS)),
        }
    }
}

/// Runs chains against function runners
#[derive(Debug, Clone)]
pub struct ChainExecutor {
    client: RunnerClient,
    resolver: EndpointResolver,
    config: ExecutorConfig,
}

/// A chain in flight
pub struct ChainRun {
    /// Output of the last step, closed when the chain ends either way
    pub output: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    completion: JoinHandle<Result<()>>,
}

impl ChainRun {
    /// Abort every step of the chain
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the chain to finish and report how it ended
    pub async fn wait(self) -> Result<()> {
        self.completion
            .await
            .map_err(|e| BtrfaasError::Server(format!("chain supervisor failed: {}", e)))?
    }

    /// Drain the output and return it only if the whole chain succeeded
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.output.recv().await {
            buffer.extend_from_slice(&chunk);
        }
        self.wait().await?;
        Ok(buffer.freeze())
    }
}

impl ChainExecutor {
    pub fn new(client: RunnerClient, resolver: EndpointResolver, config: ExecutorConfig) -> Self {
        Self {
            client,
            resolver,
            config,
        }
    }

    /// Build an executor from caller configuration, loading client TLS material
    pub fn from_config(config: &ClientConfig, secrets: &dyn SecretSource) -> Result<Self> {
        let mut security = ClientSecurity::build(&config.security, secrets)?;
        if let Some(ref name) = config.tls_server_name {
            security = security.with_server_name(name.clone());
        }
        let client = RunnerClient::new(security)
            .with_connect_timeout(config.connect_timeout)
            .with_max_frame_bytes(config.max_frame_bytes);
        let resolver = EndpointResolver::from_entries(config.default_port, &config.functions)?;
        Ok(Self::new(client, resolver, config.executor.clone()))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Run `descriptor` over a whole payload
    pub async fn execute(&self, descriptor: &ChainDescriptor, payload: Bytes) -> Result<Bytes> {
        self.execute_with_timeout(descriptor, payload, self.config.chain_timeout)
            .await
    }

    /// Run `descriptor` over a whole payload with an explicit deadline
    pub async fn execute_with_timeout(
        &self,
        descriptor: &ChainDescriptor,
        payload: Bytes,
        chain_timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let (input_tx, input_rx) = mpsc::channel(self.config.stage_buffer.max(1));
        let run = self.start(descriptor, input_rx, chain_timeout).await?;
        let _cancel_on_drop = run.cancel_token().drop_guard();

        let chunk_size = self.config.chunk_size.max(1);
        let feeder = tokio::spawn(async move {
            let mut offset = 0;
            while offset < payload.len() {
                let end = (offset + chunk_size).min(payload.len());
                if input_tx.send(payload.slice(offset..end)).await.is_err() {
                    break;
                }
                offset = end;
            }
        });

        let result = run.collect().await;
        feeder.abort();
        result
    }

    /// Start `descriptor` over a stream of input chunks
    ///
    /// The chain ends its input when `input` is closed. Dropping the returned
    /// run's `output` cancels the chain.
    pub async fn execute_stream(
        &self,
        descriptor: &ChainDescriptor,
        input: mpsc::Receiver<Bytes>,
    ) -> Result<ChainRun> {
        self.start(descriptor, input, self.config.chain_timeout).await
    }

    #[instrument(skip_all, fields(steps = descriptor.len()))]
    async fn start(
        &self,
        descriptor: &ChainDescriptor,
        input: mpsc::Receiver<Bytes>,
        chain_timeout: Option<Duration>,
    ) -> Result<ChainRun> {
        let started = Instant::now();
        let steps = descriptor.steps();

        // Nothing connects until every step has an address
        let endpoints = steps
            .iter()
            .map(|step| self.resolver.resolve(&step.name))
            .collect::<Result<Vec<_>>>()?;

        let opened = join_all(
            steps
                .iter()
                .zip(&endpoints)
                .map(|(step, endpoint)| self.client.open(&endpoint.host, endpoint.port, &step.options)),
        )
        .await;

        let mut calls = Vec::with_capacity(steps.len());
        for (index, result) in opened.into_iter().enumerate() {
            match result {
                Ok(call) => calls.push(call),
                Err(e) => {
                    warn!(step = index, function = %steps[index].name, endpoint = %endpoints[index], error = %e, "Failed to open chain step");
                    metrics::record_chain(steps.len(), started.elapsed(), false);
                    return Err(BtrfaasError::step_failed(index, steps[index].name.clone(), e));
                }
            }
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let last = steps.len() - 1;
        let buffer = self.config.stage_buffer.max(1);

        let mut upstream = input;
        for (index, ((sender, receiver), step)) in calls.into_iter().zip(steps).enumerate() {
            let (downstream_tx, downstream_rx) = mpsc::channel(buffer);
            let stage = Stage {
                index,
                function: step.name.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(stage.clone().pump_input(upstream, sender));
            tasks.spawn(stage.pump_output(
                receiver,
                downstream_tx,
                self.config.idle_timeout,
                index == last,
            ));
            upstream = downstream_rx;
        }

        debug!(functions = ?descriptor.names().collect::<Vec<_>>(), "Chain started");

        let completion = tokio::spawn(supervise(
            tasks,
            cancel.clone(),
            chain_timeout,
            steps.len(),
            started,
        ));

        Ok(ChainRun {
            output: upstream,
            cancel,
            completion,
        })
    }
}

#[derive(Clone)]
struct Stage {
    index: usize,
    function: String,
    cancel: CancellationToken,
}

impl Stage {
    async fn pump_input(self, mut upstream: mpsc::Receiver<Bytes>, mut call: CallSender) -> Result<()> {
        let work = async {
            while let Some(chunk) = upstream.recv().await {
                // A runner that stops reading has failed or finished early;
                // its receiving side reports the reason
                if let Err(e) = call.send(chunk).await {
                    debug!(step = self.index, error = %e, "Runner stopped accepting input");
                    return Ok(());
                }
            }
            if let Err(e) = call.finish().await {
                debug!(step = self.index, error = %e, "Failed to end runner input");
            }
            Ok(())
        };
        self.guarded(work).await
    }

    async fn pump_output(
        self,
        mut call: CallReceiver,
        downstream: mpsc::Sender<Bytes>,
        idle_timeout: Duration,
        is_last: bool,
    ) -> Result<()> {
        let work = async {
            loop {
                let next = tokio::select! {
                    next = tokio::time::timeout(idle_timeout, call.next()) => match next {
                        Ok(next) => next,
                        Err(_) => Err(BtrfaasError::Timeout(format!(
                            "no output within {:?}",
                            idle_timeout
                        ))),
                    },
                    _ = downstream.closed() => return downstream_gone(is_last),
                }
                .map_err(|e| BtrfaasError::step_failed(self.index, self.function.clone(), e))?;

                let Some(chunk) = next else {
                    debug!(step = self.index, function = %self.function, "Step completed");
                    return Ok(());
                };
                if downstream.send(chunk).await.is_err() {
                    return downstream_gone(is_last);
                }
            }
        };
        self.guarded(work).await
    }

    async fn guarded<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(()),
            result = work => {
                if result.is_err() {
                    self.cancel.cancel();
                }
                result
            }
        }
    }
}

/// The consumer of a stage's output went away
///
/// Past the last stage that is the caller dropping the output, which cancels
/// the chain. Between stages it means the next stage already stopped.
fn downstream_gone(is_last: bool) -> Result<()> {
    if is_last {
        return Err(BtrfaasError::Cancelled(
            "chain output was dropped".to_string(),
        ));
    }
    Ok(())
}

async fn supervise(
    mut tasks: JoinSet<Result<()>>,
    cancel: CancellationToken,
    chain_timeout: Option<Duration>,
    steps: usize,
    started: Instant,
) -> Result<()> {
    let deadline = tokio::time::sleep(chain_timeout.unwrap_or_default());
    tokio::pin!(deadline);
    let mut first_error: Option<BtrfaasError> = None;

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let result = match joined {
                    None => break,
                    Some(Ok(result)) => result,
                    Some(Err(e)) => Err(BtrfaasError::Server(format!("chain stage failed: {}", e))),
                };
                if let Err(e) = result {
                    cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
            _ = &mut deadline, if chain_timeout.is_some() && first_error.is_none() => {
                cancel.cancel();
                first_error = Some(BtrfaasError::Timeout(format!(
                    "chain did not finish within {:?}",
                    chain_timeout.unwrap_or_default()
                )));
            }
        }
    }

    if first_error.is_none() && cancel.is_cancelled() {
        first_error = Some(BtrfaasError::Cancelled("chain was cancelled".to_string()));
    }

    let elapsed = started.elapsed();
    metrics::record_chain(steps, elapsed, first_error.is_none());

    match first_error {
        None => {
            debug!(steps, duration_ms = elapsed.as_millis() as u64, "Chain completed");
            Ok(())
        }
        Some(e) => {
            warn!(steps, step = ?e.step_index(), error = %e, "Chain failed");
            Err(e)
        }
    }
}

//! Provider process management (spawn, handshake, request/response, lifecycle).

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse,
    ListPromptsResult, ListResourcesResult, ListToolsResult, Prompt, RequestId, Resource, Tool,
};

/// Default bound on a single request/response round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of one response line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// How to launch a provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    /// Merged on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Session tuning shared by every exchange with a provider.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on each round trip; `None` waits forever.
    pub timeout: Option<Duration>,
    pub client_info: ClientInfo,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            client_info: ClientInfo::default(),
        }
    }
}

/// Everything a provider advertised during the handshake.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Byte streams to a provider, plus the child process that owns them.
pub(crate) struct Transport {
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
}

impl Transport {
    fn spawn(config: &ProviderConfig) -> Result<Self> {
        let (program, args) = config.command.split_first().ok_or_else(|| {
            Error::Launch(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty launch command",
            ))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::Launch)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch(io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch(io::Error::other("failed to capture stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Launch(io::Error::other("failed to capture stderr")))?;

        let stderr_task = tokio::spawn(drain_stderr(config.name.clone(), stderr));

        Ok(Self {
            writer: Box::new(stdin),
            reader: BufReader::new(Box::new(stdout)),
            child: Some(child),
            stderr_task: Some(stderr_task),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_io(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader)),
            child: None,
            stderr_task: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let mut limited = (&mut self.reader).take(MAX_LINE_SIZE as u64 + 1);

        let bytes_read = match limited.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(Error::Decode(format!("response is not UTF-8: {e}")));
            }
            Err(e) => return Err(Error::Transport(e)),
        };

        if line.len() > MAX_LINE_SIZE {
            return Err(Error::OutputTooLarge {
                size: line.len(),
                max: MAX_LINE_SIZE,
            });
        }

        if bytes_read == 0 || !line.ends_with('\n') {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "provider closed its output stream",
            )));
        }

        Ok(line)
    }

    async fn close(mut self) {
        // Closing stdin first lets well-behaved providers exit on their own.
        let _ = self.writer.shutdown().await;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "provider already exited");
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Forward the child's stderr to the log until it closes.
///
/// Bytes that are not UTF-8 are logged lossily and do not end the drain.
async fn drain_stderr(provider: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(provider = %provider, "stderr: {}", line.trim_end());
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "stopped reading provider stderr");
                break;
            }
        }
    }
}

/// A live connection and its request counter.
struct Connection {
    transport: Transport,
    next_id: u64,
}

impl Connection {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            next_id: 0,
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::from(self.next_id)
    }
}

/// Handle to one external tool provider.
///
/// Exchanges are strictly half-duplex: the connection lock is held from the
/// moment a request is written until its response line has been read, so
/// concurrent callers queue behind each other.
pub struct Provider {
    config: ProviderConfig,
    options: SessionOptions,
    connection: Mutex<Option<Connection>>,
    capabilities: RwLock<Capabilities>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Provider {
    /// Create a provider handle. Nothing is spawned until [`Provider::start`].
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_options(config, SessionOptions::default())
    }

    pub fn with_options(config: ProviderConfig, options: SessionOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            options,
            connection: Mutex::new(None),
            capabilities: RwLock::new(Capabilities::default()),
            running: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Get the provider name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Spawn the provider process and run the handshake.
    ///
    /// Does nothing if the provider is already running.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            tracing::debug!(provider = %self.name(), "provider already running");
            return Ok(());
        }

        let transport = Transport::spawn(&self.config)?;
        tracing::info!(
            provider = %self.name(),
            command = ?self.config.command,
            "provider process started"
        );

        self.open(&mut slot, transport).await
    }

    #[cfg(test)]
    pub(crate) async fn start_with(&self, transport: Transport) -> Result<()> {
        let mut slot = self.connection.lock().await;
        self.open(&mut slot, transport).await
    }

    async fn open(&self, slot: &mut Option<Connection>, transport: Transport) -> Result<()> {
        let mut connection = Connection::new(transport);
        match self.handshake(&mut connection).await {
            Ok(capabilities) => {
                *self.capabilities.write().await = capabilities;
                *slot = Some(connection);
                self.running.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(provider = %self.name(), error = %e, "handshake failed");
                connection.transport.close().await;
                Err(e)
            }
        }
    }

    /// Check if the provider has completed its handshake and is usable.
    ///
    /// Does not wait for an exchange in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.capabilities.read().await.clone()
    }

    /// Get the tools advertised during the handshake.
    pub async fn tools(&self) -> Vec<Tool> {
        self.capabilities.read().await.tools.clone()
    }

    pub async fn resources(&self) -> Vec<Resource> {
        self.capabilities.read().await.resources.clone()
    }

    pub async fn prompts(&self) -> Vec<Prompt> {
        self.capabilities.read().await.prompts.clone()
    }

    /// Call a tool by name.
    ///
    /// The response envelope is returned as-is: a provider-reported error is
    /// a successful exchange and comes back in `JsonRpcResponse::error`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<JsonRpcResponse> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.as_mut() else {
            return Err(Error::NotRunning);
        };

        let result = self.exchange(connection, "tools/call", params).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(provider = %self.name(), error = %e, "provider unusable, tearing down");
                self.teardown(&mut slot).await;
            }
        }
        result
    }

    /// Terminate the provider process.
    ///
    /// An exchange in flight fails with a transport error. Calling this on a
    /// provider that is not running is a no-op.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            self.teardown(&mut slot).await;
            tracing::info!(provider = %self.name(), "provider stopped");
        }

        self.shutdown.send_replace(false);
    }

    async fn teardown(&self, slot: &mut Option<Connection>) {
        self.running.store(false, Ordering::Release);
        if let Some(connection) = slot.take() {
            connection.transport.close().await;
        }
        *self.capabilities.write().await = Capabilities::default();
    }

    // --- Internal methods ---

    async fn handshake(&self, connection: &mut Connection) -> Result<Capabilities> {
        let params = InitializeParams::new(self.options.client_info.clone());
        let ack = self.exchange(connection, "initialize", params).await?;
        match ack.into_result() {
            Ok(result) => tracing::debug!(provider = %self.name(), %result, "initialized"),
            Err(e) => tracing::warn!(provider = %self.name(), error = %e, "initialize rejected"),
        }

        let tools = self
            .exchange(connection, "tools/list", Map::new())
            .await
            .and_then(list_payload::<ListToolsResult>)
            .map_err(|e| Error::Handshake(Box::new(e)))?
            .tools;

        let resources = self
            .optional_list::<ListResourcesResult>(connection, "resources/list")
            .await?
            .resources;
        let prompts = self
            .optional_list::<ListPromptsResult>(connection, "prompts/list")
            .await?
            .prompts;

        tracing::info!(
            provider = %self.name(),
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            resources = resources.len(),
            prompts = prompts.len(),
            "handshake complete"
        );

        Ok(Capabilities {
            tools,
            resources,
            prompts,
        })
    }

    /// Run a listing step that providers may not support.
    ///
    /// Provider-reported errors and unexpected payloads yield an empty list;
    /// a broken connection still fails the handshake.
    async fn optional_list<R>(&self, connection: &mut Connection, method: &str) -> Result<R>
    where
        R: DeserializeOwned + Default,
    {
        let response = self.exchange(connection, method, Map::new()).await?;
        match list_payload(response) {
            Ok(list) => Ok(list),
            Err(e) => {
                tracing::debug!(provider = %self.name(), %method, error = %e, "not supported");
                Ok(R::default())
            }
        }
    }

    async fn exchange<P>(
        &self,
        connection: &mut Connection,
        method: &str,
        params: P,
    ) -> Result<JsonRpcResponse>
    where
        P: Serialize,
    {
        let id = connection.next_request_id();
        let request = JsonRpcRequest::new(id.clone(), method).with_params(params)?;
        let line = request.to_line()?;

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(stopped());
        }

        tracing::debug!(provider = %self.name(), %method, %id, "sending request");

        let transport = &mut connection.transport;
        let round_trip = async {
            transport.write_line(&line).await.map_err(Error::Transport)?;
            transport.read_line().await
        };

        let reply = tokio::select! {
            reply = bounded(self.options.timeout, round_trip) => reply?,
            _ = stop_requested(&mut shutdown) => return Err(stopped()),
        };

        let response: JsonRpcResponse = serde_json::from_str(reply.trim_end())
            .map_err(|e| Error::Decode(format!("malformed response line: {e}")))?;

        if !id.matches(&response.id) {
            return Err(Error::Decode(format!(
                "response id mismatch: expected {id}, got {}",
                response.id
            )));
        }

        Ok(response)
    }
}

fn list_payload<R>(response: JsonRpcResponse) -> Result<R>
where
    R: DeserializeOwned + Default,
{
    let value = response.into_result()?;
    if value.is_null() {
        return Ok(R::default());
    }
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("unexpected result: {e}")))
}

async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            return;
        }
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}

fn stopped() -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "provider was stopped",
    ))
}

//! Thread manager: lazy one-time initialization plus named conversation threads.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use proto::{DiscoveryError, Error, LlmError, ThreadId};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tools::ToolProvider;
use tracing::{info, warn};

use crate::catalogue::{Catalogue, DiscoveryOptions};
use crate::llm::LlmProvider;
use crate::runtime::{Agent, AgentSettings};
use crate::thread::Thread;

/// Produces the external collaborators the manager initializes from
#[async_trait]
pub trait Backend: Send + Sync {
    /// Connects to the tool server, handshake included.
    async fn connect_tools(&self) -> Result<Arc<dyn ToolProvider>, Error>;

    /// Builds the chat client.
    async fn chat_client(&self) -> Result<Arc<dyn LlmProvider>, Error>;
}

/// Settings applied at initialization and on every refresh
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub agent: AgentSettings,
    pub discovery: DiscoveryOptions,
}

struct Connection {
    provider: Arc<dyn ToolProvider>,
    llm: Arc<dyn LlmProvider>,
    agent: RwLock<Arc<Agent>>,
    released: AtomicBool,
}

/// Owns the tool connection, the current agent and all conversation threads
///
/// Nothing is connected until the first operation that needs an agent. That
/// first initialization runs exactly once, even when several callers arrive
/// together; a cancelled attempt leaves the manager uninitialized so the
/// next caller starts over.
pub struct ThreadManager {
    backend: Arc<dyn Backend>,
    options: SessionOptions,
    connection: OnceCell<Connection>,
    threads: DashMap<ThreadId, Arc<Thread>>,
    current: Mutex<Option<Arc<Thread>>>,
    disposed: AtomicBool,
}

impl ThreadManager {
    pub fn new(backend: Arc<dyn Backend>, options: SessionOptions) -> Self {
        Self {
            backend,
            options,
            connection: OnceCell::new(),
            threads: DashMap::new(),
            current: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.initialized()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Connects, discovers tools, and builds the agent if not done yet.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<(), Error> {
        cancellable(cancel, self.connection()).await.map(|_| ())
    }

    /// Creates a thread on the current catalogue snapshot and makes it current.
    ///
    /// With an id the thread is registered (replacing any thread of that id);
    /// without one it is anonymous and reachable only as the current thread.
    pub async fn new_thread(
        &self,
        id: Option<ThreadId>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Thread>, Error> {
        let connection = cancellable(cancel, self.connection()).await?;
        let thread = Arc::new(Thread::new(id.clone(), connection.current_agent()));
        if let Some(id) = id {
            if self.threads.insert(id.clone(), Arc::clone(&thread)).is_some() {
                info!(thread = %id, "Replaced existing thread");
            } else {
                info!(thread = %id, "Thread created");
            }
        }
        *self.current.lock() = Some(Arc::clone(&thread));
        Ok(thread)
    }

    /// Makes a registered thread current. Unknown ids change nothing.
    pub fn switch_to(&self, id: &ThreadId) -> bool {
        let Some(thread) = self.threads.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        *self.current.lock() = Some(thread);
        true
    }

    /// Replaces the current thread with a fresh anonymous one.
    ///
    /// A registered thread that was current stays registered.
    pub async fn reset_current(&self, cancel: &CancellationToken) -> Result<Arc<Thread>, Error> {
        self.new_thread(None, cancel).await
    }

    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.lock().clone()
    }

    pub fn current_thread_id(&self) -> Option<ThreadId> {
        self.current.lock().as_ref().and_then(|t| t.id().cloned())
    }

    /// Registered thread ids in sorted order.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.threads.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn thread(&self, id: &ThreadId) -> Option<Arc<Thread>> {
        self.threads.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Sends a message on the current thread, creating one if needed.
    ///
    /// Concurrent first sends share the one thread created for them.
    pub async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<String, Error> {
        let thread = match self.current_thread() {
            Some(thread) => thread,
            None => {
                let connection = cancellable(cancel, self.connection()).await?;
                let mut current = self.current.lock();
                let thread = current
                    .get_or_insert_with(|| Arc::new(Thread::new(None, connection.current_agent())));
                Arc::clone(thread)
            }
        };
        cancellable(cancel, thread.send(message)).await
    }

    /// Re-discovers tools and swaps in a new agent for threads created later.
    ///
    /// Existing threads, the current one included, keep their snapshot until
    /// replaced with [`reset_current`](Self::reset_current) or
    /// [`new_thread`](Self::new_thread).
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<Arc<Catalogue>, Error> {
        let connection = cancellable(cancel, self.connection()).await?;
        let catalogue = cancellable(cancel, async {
            Catalogue::discover(&connection.provider, self.options.discovery)
                .await
                .map_err(Error::from)
        })
        .await?;

        let catalogue = Arc::new(catalogue);
        let agent = Arc::new(Agent::new(
            Arc::clone(&connection.llm),
            Arc::clone(&catalogue),
            self.options.agent.clone(),
        ));
        *connection.agent.write() = agent;
        info!(version = catalogue.version(), tools = catalogue.len(), "Catalogue refreshed");
        Ok(catalogue)
    }

    /// Catalogue used for threads created from now on.
    pub async fn catalogue(&self, cancel: &CancellationToken) -> Result<Arc<Catalogue>, Error> {
        let connection = cancellable(cancel, self.connection()).await?;
        Ok(Arc::clone(connection.current_agent().catalogue()))
    }

    /// Runs one tool directly through its adapter, bypassing the model.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let catalogue = self.catalogue(cancel).await?;
        cancellable(cancel, async { Ok(catalogue.invoke(name, arguments).await) }).await
    }

    /// Releases the tool connection and forgets all threads.
    ///
    /// Safe to call more than once; later calls do nothing. Shutdown failures
    /// are logged, not returned.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.threads.clear();
        self.current.lock().take();

        if let Some(connection) = self.connection.get() {
            connection.release().await;
        }
        info!("Thread manager disposed");
    }

    async fn connection(&self) -> Result<&Connection, Error> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let connection = self.connection.get_or_try_init(|| self.connect()).await?;
        // dispose() may have run while this initialization was in flight and
        // found nothing to shut down.
        if self.is_disposed() {
            connection.release().await;
            return Err(Error::Disposed);
        }
        Ok(connection)
    }

    async fn connect(&self) -> Result<Connection, Error> {
        info!("Initializing tool bridge");
        let provider = self.backend.connect_tools().await.map_err(|e| match e {
            Error::Tool(e) => Error::Discovery(DiscoveryError::Connect(e)),
            other => other,
        })?;

        let catalogue = match Catalogue::discover(&provider, self.options.discovery).await {
            Ok(catalogue) => Arc::new(catalogue),
            Err(e) => {
                if let Err(shutdown) = provider.shutdown().await {
                    warn!("Tool server shutdown after failed discovery: {shutdown}");
                }
                return Err(e.into());
            }
        };

        let llm = self.backend.chat_client().await?;
        let agent = Arc::new(Agent::new(
            Arc::clone(&llm),
            catalogue,
            self.options.agent.clone(),
        ));
        info!(
            agent = %agent.name(),
            model = %agent.model(),
            tools = agent.catalogue().len(),
            "Tool bridge ready"
        );

        Ok(Connection {
            provider,
            llm,
            agent: RwLock::new(agent),
            released: AtomicBool::new(false),
        })
    }
}

impl Connection {
    fn current_agent(&self) -> Arc<Agent> {
        Arc::clone(&self.agent.read())
    }

    /// Shuts the tool server down once, however many callers get here.
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.provider.shutdown().await {
            warn!("Tool server shutdown failed: {e}");
        }
    }
}

/// Races `fut` against the cancellation signal.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Renders a failed operation the way a chat user should see it.
///
/// Upstream API failures keep their status and body; everything else is
/// reported as an internal error.
pub fn describe_failure(err: &Error) -> String {
    match err {
        Error::Llm(upstream @ LlmError::Upstream { .. }) => upstream.to_string(),
        Error::Cancelled => err.to_string(),
        other => format!("Internal Error: {other}"),
    }
}

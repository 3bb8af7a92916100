//! Bounded async connection pool.
//!
//! Capacity is enforced by a semaphore whose waiters wake in FIFO order;
//! a cancelled acquire drops its place in the queue without leaking a
//! permit or a connection. Unusable connections are discarded on release
//! and the pool shrinks accordingly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use super::connection::Connection;
use super::{ConnectOptions, PoolStatus};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Connections pre-created at startup.
    pub minsize: usize,
    /// Hard upper bound on live connections.
    pub maxsize: usize,
    /// How long an acquire may wait; `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Ping a pooled connection before handing it out.
    pub test_on_acquire: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            minsize: 1,
            maxsize: 10,
            acquire_timeout: None,
            test_on_acquire: false,
        }
    }
}

impl PoolOptions {
    pub fn minsize(mut self, minsize: usize) -> Self {
        self.minsize = minsize;
        self
    }

    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.maxsize = maxsize;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn test_on_acquire(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }
}

struct PoolState {
    free: VecDeque<Connection>,
    in_use: usize,
    total: usize,
    status: PoolStatus,
}

struct PoolInner {
    connect_opts: ConnectOptions,
    opts: PoolOptions,
    semaphore: Semaphore,
    state: Mutex<PoolState>,
}

impl PoolInner {
    async fn create_connection(&self) -> Result<Connection> {
        let mut conn = Connection::new(self.connect_opts.clone());
        conn.open().await?;
        Ok(conn)
    }

    async fn return_connection(&self, mut conn: Connection) {
        let mut state = self.state.lock().await;
        state.in_use = state.in_use.saturating_sub(1);

        let closing = matches!(state.status, PoolStatus::Closing | PoolStatus::Closed);
        if closing || conn.closed() || conn.busy() || !conn.opened() {
            state.total = state.total.saturating_sub(1);
            drop(state);
            if !closing {
                warn!("discarding unusable connection on release");
            }
            let _ = conn.close().await;
        } else {
            conn.reset_state();
            state.free.push_back(conn);
            drop(state);
        }
        self.semaphore.add_permits(1);
    }
}

/// A bounded pool of connections with async acquire/release.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(connect_opts: ConnectOptions, opts: PoolOptions) -> Result<Self> {
        if opts.maxsize < 1 {
            return Err(Error::Pool("maxsize must be at least 1".into()));
        }
        if opts.minsize > opts.maxsize {
            return Err(Error::Pool("minsize is greater than maxsize".into()));
        }
        let semaphore = Semaphore::new(opts.maxsize);
        Ok(Self {
            inner: Arc::new(PoolInner {
                connect_opts,
                opts,
                semaphore,
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    in_use: 0,
                    total: 0,
                    status: PoolStatus::Created,
                }),
            }),
        })
    }

    /// Pre-create `minsize` connections. Idempotent while opened.
    pub async fn startup(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            match state.status {
                PoolStatus::Opened => return Ok(()),
                PoolStatus::Closing | PoolStatus::Closed => return Err(Error::PoolClosed),
                PoolStatus::Created | PoolStatus::Opening => {}
            }
            state.status = PoolStatus::Opening;
        }

        let mut created = Vec::with_capacity(self.inner.opts.minsize);
        for _ in 0..self.inner.opts.minsize {
            match self.inner.create_connection().await {
                Ok(conn) => created.push(conn),
                Err(e) => {
                    for mut conn in created {
                        let _ = conn.close().await;
                    }
                    let mut state = self.inner.state.lock().await;
                    state.status = PoolStatus::Created;
                    return Err(e);
                }
            }
        }

        let mut state = self.inner.state.lock().await;
        state.total += created.len();
        state.free.extend(created);
        state.status = PoolStatus::Opened;
        debug!(minsize = self.inner.opts.minsize, "pool started");
        Ok(())
    }

    /// Close every pooled connection and refuse further acquires.
    /// Connections still checked out are closed when returned.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let free: Vec<Connection> = {
            let mut state = self.inner.state.lock().await;
            if state.status == PoolStatus::Closed {
                return;
            }
            state.status = PoolStatus::Closing;
            let drained: Vec<Connection> = state.free.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        for mut conn in free {
            let _ = conn.close().await;
        }
        let mut state = self.inner.state.lock().await;
        state.status = PoolStatus::Closed;
        debug!("pool shut down");
    }

    /// Acquire a connection, waiting FIFO behind other acquirers when the
    /// pool is at capacity.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.ensure_started().await?;

        let permit = match self.inner.opts.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.semaphore.acquire())
                .await
                .map_err(|_| Error::Timeout("waiting for a pooled connection".into()))?,
            None => self.inner.semaphore.acquire().await,
        }
        .map_err(|_| Error::PoolClosed)?;
        // The guard gives its slot back through return_connection.
        permit.forget();

        match self.checkout().await {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                pool: Arc::clone(&self.inner),
            }),
            Err(e) => {
                self.inner.semaphore.add_permits(1);
                Err(e)
            }
        }
    }

    /// Acquire/release scope; alias of [`Pool::acquire`], the release
    /// happening when the guard drops.
    pub async fn connection(&self) -> Result<PooledConnection> {
        self.acquire().await
    }

    async fn ensure_started(&self) -> Result<()> {
        let status = self.inner.state.lock().await.status;
        match status {
            PoolStatus::Opened => Ok(()),
            PoolStatus::Created | PoolStatus::Opening => self.startup().await,
            PoolStatus::Closing | PoolStatus::Closed => Err(Error::PoolClosed),
        }
    }

    /// Holding a permit: pop a verified-open free connection, or grow the
    /// pool when below maxsize.
    async fn checkout(&self) -> Result<Connection> {
        loop {
            let candidate = {
                let mut state = self.inner.state.lock().await;
                if matches!(state.status, PoolStatus::Closing | PoolStatus::Closed) {
                    return Err(Error::PoolClosed);
                }
                match state.free.pop_front() {
                    Some(conn) => {
                        state.in_use += 1;
                        Some(conn)
                    }
                    None => {
                        if state.total < self.inner.opts.maxsize {
                            state.total += 1;
                            state.in_use += 1;
                            None
                        } else {
                            // Every connection is momentarily in flight
                            // between states; retry.
                            drop(state);
                            tokio::task::yield_now().await;
                            continue;
                        }
                    }
                }
            };

            match candidate {
                Some(mut conn) => {
                    let healthy = conn.opened()
                        && !conn.closed()
                        && !conn.busy()
                        && (!self.inner.opts.test_on_acquire || conn.ping().await);
                    if healthy {
                        return Ok(conn);
                    }
                    warn!("discarding dead pooled connection");
                    let _ = conn.close().await;
                    let mut state = self.inner.state.lock().await;
                    state.in_use = state.in_use.saturating_sub(1);
                    state.total = state.total.saturating_sub(1);
                }
                None => match self.inner.create_connection().await {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        let mut state = self.inner.state.lock().await;
                        state.in_use = state.in_use.saturating_sub(1);
                        state.total = state.total.saturating_sub(1);
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Live connections, free plus in use.
    pub async fn size(&self) -> usize {
        self.inner.state.lock().await.total
    }

    /// Connections sitting idle in the pool.
    pub async fn freesize(&self) -> usize {
        self.inner.state.lock().await.free.len()
    }

    pub async fn status(&self) -> PoolStatus {
        self.inner.state.lock().await.status
    }

    pub fn minsize(&self) -> usize {
        self.inner.opts.minsize
    }

    pub fn maxsize(&self) -> usize {
        self.inner.opts.maxsize
    }
}

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Explicitly return the connection instead of relying on drop.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn).await;
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection should always be present")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection should always be present")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.return_connection(conn).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_options_builder() {
        let opts = PoolOptions::default()
            .minsize(2)
            .maxsize(8)
            .acquire_timeout(Duration::from_secs(3))
            .test_on_acquire(true);
        assert_eq!(opts.minsize, 2);
        assert_eq!(opts.maxsize, 8);
        assert_eq!(opts.acquire_timeout, Some(Duration::from_secs(3)));
        assert!(opts.test_on_acquire);
    }

    #[test]
    fn rejects_bad_sizes() {
        let connect = ConnectOptions::default();
        assert!(Pool::new(connect.clone(), PoolOptions::default().maxsize(0)).is_err());
        assert!(Pool::new(connect, PoolOptions::default().minsize(5).maxsize(2)).is_err());
    }
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::store::RemoteError;

/// Fixed set of sessions, each lent to one caller at a time. A caller
/// waiting for a session is never handed one that another caller holds.
pub(crate) struct SessionPool<T> {
    idle: Arc<Mutex<Vec<T>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// A session taken out of the pool. It goes back only through
/// [`Checkout::release`]; dropping it discards the session.
pub(crate) struct Checkout<T> {
    session: T,
    idle: Arc<Mutex<Vec<T>>>,
    permit: OwnedSemaphorePermit,
}

impl<T> Checkout<T> {
    pub(crate) fn session(&mut self) -> &mut T {
        &mut self.session
    }

    pub(crate) fn release(self) {
        let Checkout {
            session,
            idle,
            permit,
        } = self;
        lock(&idle).push(session);
        drop(permit);
    }
}

impl<T: Send + 'static> SessionPool<T> {
    pub(crate) fn new(sessions: Vec<T>) -> Self {
        let size = sessions.len();
        Self {
            idle: Arc::new(Mutex::new(sessions)),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits until a session is idle and takes it.
    pub(crate) async fn checkout(&self) -> Result<Checkout<T>, RemoteError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RemoteError::Closed)?;
        let session = lock(&self.idle)
            .pop()
            .ok_or_else(|| RemoteError::Connection("no usable session left in pool".into()))?;
        Ok(Checkout {
            session,
            idle: Arc::clone(&self.idle),
            permit,
        })
    }

    /// Runs `op` on the blocking pool with a session of its own. `budget`
    /// starts once the session is held; waiting for one is not counted.
    pub(crate) async fn run<R, F>(
        &self,
        budget: Duration,
        what: String,
        op: F,
    ) -> Result<R, RemoteError>
    where
        F: FnOnce(&mut T) -> Result<R, RemoteError> + Send + 'static,
        R: Send + 'static,
    {
        let mut checkout = self.checkout().await?;
        let task = tokio::task::spawn_blocking(move || {
            let result = op(checkout.session());
            checkout.release();
            result
        });
        match tokio::time::timeout(budget, task).await {
            Ok(joined) => joined.map_err(|err| RemoteError::Task(err.to_string()))?,
            Err(_) => Err(RemoteError::Connection(format!(
                "{what} timed out after {budget:?}"
            ))),
        }
    }

    /// Waits for every lent session to come back, then closes the pool and
    /// hands the sessions over. `None` when the pool was already drained.
    pub(crate) async fn drain(&self) -> Option<Vec<T>> {
        let wanted = u32::try_from(self.size).unwrap_or(u32::MAX);
        let all = self.permits.acquire_many(wanted).await.ok()?;
        self.permits.close();
        drop(all);
        Some(std::mem::take(&mut *lock(&self.idle)))
    }
}

fn lock<T>(idle: &Mutex<Vec<T>>) -> MutexGuard<'_, Vec<T>> {
    idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn busy_session_is_not_handed_out() {
        let pool = SessionPool::new(vec![0u32, 1]);
        let held = pool.checkout().await.unwrap();
        let held_id = held.session;

        let other = pool
            .run(Duration::from_millis(100), "listing /a".into(), |id| Ok(*id))
            .await
            .unwrap();

        assert_ne!(other, held_id);
        held.release();
    }

    #[tokio::test]
    async fn waiting_for_a_session_does_not_consume_the_budget() {
        let pool = SessionPool::new(vec![7u32]);
        let held = pool.checkout().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            held.release();
        });

        let started = Instant::now();
        let id = pool
            .run(Duration::from_millis(50), "listing /c".into(), |id| Ok(*id))
            .await
            .unwrap();

        assert_eq!(id, 7);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn slow_operation_exceeds_budget() {
        let pool = SessionPool::new(vec![0u32]);
        let err = pool
            .run(Duration::from_millis(50), "listing /slow".into(), |_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_connection_loss());
        assert!(err.to_string().contains("listing /slow timed out"));
    }

    #[tokio::test]
    async fn drain_waits_for_lent_sessions_then_closes() {
        let pool = SessionPool::new(vec![1u32, 2]);
        let held = pool.checkout().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            held.release();
        });

        let mut drained = pool.drain().await.unwrap();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(matches!(pool.checkout().await, Err(RemoteError::Closed)));
        assert!(pool.drain().await.is_none());
    }
}

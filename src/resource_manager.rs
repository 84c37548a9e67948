//! Resource management

use crate::error::FluxError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Largest number of bytes a single request may hold, since semaphore permits are acquired as a
/// `u32` count.
pub const MAX_MEMORY_REQUEST: usize = u32::MAX as usize;

/// [crate::resource_manager::ResourceManager] bounds the memory and CPU used by concurrent
/// aggregations. Resource management is performed using a Tokio Semaphore for each type of
/// resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for memory (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for tasks.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(memory_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Acquire memory resource.
    ///
    /// A request for more than the whole pool can never be satisfied and fails immediately with
    /// [FluxError::TooLarge]. A single request is also bounded by [MAX_MEMORY_REQUEST], however
    /// large the pool.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, FluxError> {
        if let Some(total_memory) = self.total_memory {
            let largest = total_memory.min(MAX_MEMORY_REQUEST);
            if bytes > largest {
                return Err(FluxError::TooLarge {
                    requested: bytes,
                    total: largest,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, FluxError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, FluxError> {
    if let Some(sem) = sem {
        sem.acquire_many(n.try_into()?)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::TryAcquireError;

    #[tokio::test]
    async fn no_resource_management() {
        let rm = ResourceManager::new(None, None);
        assert!(rm.memory.is_none());
        assert!(rm.tasks.is_none());
        let _m = rm.memory(1 << 40).await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_m.is_none());
        assert!(_t.is_none());
    }

    #[tokio::test]
    async fn full_resource_management() {
        let rm = ResourceManager::new(Some(1), Some(1));
        assert!(rm.memory.is_some());
        assert!(rm.tasks.is_some());
        let _m = rm.memory(1).await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_m.is_some());
        assert!(_t.is_some());
        // Check that there are no more resources (without blocking).
        assert_eq!(
            rm.memory.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        assert_eq!(
            rm.tasks.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
    }

    #[tokio::test]
    async fn memory_permits_released_on_drop() {
        let rm = ResourceManager::new(Some(100), None);
        {
            let _m = rm.memory(100).await.unwrap();
        }
        let _m = rm.memory(60).await.unwrap();
        let _n = rm.memory(40).await.unwrap();
    }

    #[cfg(target_pointer_width = "64")]
    #[tokio::test]
    async fn memory_request_capped_below_large_pool() {
        let rm = ResourceManager::new(Some(8 << 30), None);
        let _m = rm.memory(3 << 30).await.unwrap();
        let error = rm.memory(5 << 30).await.unwrap_err();
        assert!(
            matches!(
                error,
                FluxError::TooLarge {
                    requested,
                    total: MAX_MEMORY_REQUEST,
                } if requested == 5 << 30
            ),
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn memory_too_large() {
        let rm = ResourceManager::new(Some(100), None);
        let error = rm.memory(101).await.unwrap_err();
        assert!(matches!(
            error,
            FluxError::TooLarge {
                requested: 101,
                total: 100
            }
        ));
    }
}

//! TCP port allocation.
//!
//! Ephemeral ports come out of a generator task that cycles the range
//! forever; the commit into the in-use set is serialised by a mutex.

use std::collections::HashSet;

use burrow_common::{BurrowError, BurrowResult};
use tokio::sync::mpsc;

/// First allocatable port (inclusive).
const PORT_RANGE_START: u16 = 49153;
/// End of the allocatable range (exclusive).
const PORT_RANGE_END: u16 = 65535;

/// Allocator of host TCP ports.
///
/// `acquire(0)` hands out an unused port from `[49153, 65535)`; a non-zero
/// argument reserves exactly that port. Released ports are re-offered the
/// next time the generator cycles past them.
pub struct PortAllocator {
    in_use: parking_lot::Mutex<HashSet<u16>>,
    fountain: tokio::sync::Mutex<mpsc::Receiver<u16>>,
}

impl PortAllocator {
    /// Create the allocator and spawn its generator task on the current
    /// Tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_fountain(tx));
        Self {
            in_use: parking_lot::Mutex::new(HashSet::new()),
            fountain: tokio::sync::Mutex::new(rx),
        }
    }

    /// Reserve a port.
    ///
    /// `port == 0` asks for any unused ephemeral port. An explicit port
    /// fails with [`BurrowError::PortInUse`] when already held.
    pub async fn acquire(&self, port: u16) -> BurrowResult<u16> {
        tracing::debug!(port, "acquiring port");
        if port != 0 {
            self.reserve(port)?;
            return Ok(port);
        }

        // The in-use lock is only ever taken inside reserve(), never while
        // waiting on the generator.
        let mut fountain = self.fountain.lock().await;
        while let Some(candidate) = fountain.recv().await {
            if self.reserve(candidate).is_ok() {
                return Ok(candidate);
            }
        }
        Err(BurrowError::Internal {
            message: "port generator ended unexpectedly".to_string(),
        })
    }

    /// Return a port to the pool. Releasing an unheld port is a no-op.
    pub fn release(&self, port: u16) {
        tracing::debug!(port, "releasing port");
        self.in_use.lock().remove(&port);
    }

    fn reserve(&self, port: u16) -> BurrowResult<()> {
        let mut in_use = self.in_use.lock();
        if !in_use.insert(port) {
            return Err(BurrowError::PortInUse { port });
        }
        Ok(())
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_fountain(tx: mpsc::Sender<u16>) {
    loop {
        for port in PORT_RANGE_START..PORT_RANGE_END {
            if tx.send(port).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn ephemeral_ports_stay_in_range() {
        let alloc = PortAllocator::new();
        for _ in 0..32 {
            let port = alloc.acquire(0).await.unwrap();
            assert!((PORT_RANGE_START..PORT_RANGE_END).contains(&port));
        }
    }

    #[tokio::test]
    async fn explicit_port_conflicts() {
        let alloc = PortAllocator::new();
        assert_eq!(alloc.acquire(8080).await.unwrap(), 8080);
        let err = alloc.acquire(8080).await.unwrap_err();
        assert!(matches!(err, BurrowError::PortInUse { port: 8080 }));

        alloc.release(8080);
        assert_eq!(alloc.acquire(8080).await.unwrap(), 8080);
    }

    #[tokio::test]
    async fn released_ephemeral_port_is_reoffered() {
        let alloc = PortAllocator::new();
        let first = alloc.acquire(0).await.unwrap();
        alloc.release(first);
        // The generator walks the whole range before coming back around.
        let mut seen = false;
        for _ in 0..u32::from(PORT_RANGE_END - PORT_RANGE_START) + 1 {
            let port = alloc.acquire(0).await.unwrap();
            if port == first {
                seen = true;
                break;
            }
        }
        assert!(seen, "released port was never re-offered");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_acquires_are_distinct() {
        let alloc = Arc::new(PortAllocator::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                tokio::spawn(async move { alloc.acquire(0).await.unwrap() })
            })
            .collect();

        let mut ports = HashSet::new();
        for handle in handles {
            assert!(ports.insert(handle.await.unwrap()), "duplicate port");
        }
    }
}

//! Low-stock alert dispatch.
//!
//! The monitor hands alerts to a bounded queue and returns immediately;
//! a background worker drains the queue and forwards to a [`Notifier`].
//! The queue being full or the worker being gone only ever costs the
//! alert, never the mutation that produced it.

use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use stockflow_ledger::{AlertSendError, AlertSink, LowStockAlert};

use crate::worker::WorkerHandle;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier failed: {0}")]
    Failed(String),
}

/// Delivers low-stock alerts to the outside world (mail, chat, pager...).
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError>;
}

/// Notifier that only logs, mirroring a deployment with the notification
/// transport disabled.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        info!(
            sku = %alert.sku,
            product = %alert.product_name,
            warehouse_id = %alert.warehouse_id,
            quantity = alert.current_quantity,
            reorder_level = alert.reorder_level,
            "low stock alert (notification transport disabled)"
        );
        Ok(())
    }
}

/// Alert queue sizing.
#[derive(Debug, Clone, Copy)]
pub struct AlertQueueConfig {
    /// Maximum number of queued alerts before new ones are dropped.
    pub capacity: usize,
}

impl Default for AlertQueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Build the bounded queue: the sink goes to the monitor, the receiver to
/// [`AlertWorker::spawn`].
pub fn alert_queue(config: AlertQueueConfig) -> (QueuedAlertSink, Receiver<LowStockAlert>) {
    let (tx, rx) = sync_channel(config.capacity);
    (QueuedAlertSink { tx }, rx)
}

/// Non-blocking sink over the bounded queue.
#[derive(Debug, Clone)]
pub struct QueuedAlertSink {
    tx: SyncSender<LowStockAlert>,
}

impl AlertSink for QueuedAlertSink {
    fn send(&self, alert: LowStockAlert) -> Result<(), AlertSendError> {
        self.tx.try_send(alert).map_err(|err| match err {
            TrySendError::Full(_) => AlertSendError("alert queue full".to_string()),
            TrySendError::Disconnected(_) => AlertSendError("alert worker stopped".to_string()),
        })
    }
}

/// Background worker draining the alert queue into a notifier.
#[derive(Debug)]
pub struct AlertWorker;

impl AlertWorker {
    pub fn spawn<N>(name: &'static str, receiver: Receiver<LowStockAlert>, notifier: N) -> WorkerHandle
    where
        N: Notifier + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || alert_loop(name, receiver, shutdown_rx, notifier))
            .expect("failed to spawn alert worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn alert_loop<N>(
    name: &'static str,
    receiver: Receiver<LowStockAlert>,
    shutdown_rx: mpsc::Receiver<()>,
    notifier: N,
) where
    N: Notifier,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match receiver.recv_timeout(tick) {
            Ok(alert) => {
                if let Err(err) = notifier.notify(&alert) {
                    warn!(worker = name, sku = %alert.sku, error = %err, "alert notification failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use stockflow_core::{ProductId, WarehouseId};

    fn alert(quantity: i64) -> LowStockAlert {
        LowStockAlert {
            product_id: ProductId::new(),
            sku: "SKU-1".to_string(),
            product_name: "Widget".to_string(),
            warehouse_id: WarehouseId::new(),
            current_quantity: quantity,
            reorder_level: 10,
        }
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (sink, _rx) = alert_queue(AlertQueueConfig { capacity: 1 });

        assert!(sink.send(alert(1)).is_ok());
        let err = sink.send(alert(2)).unwrap_err();
        assert!(err.0.contains("full"));
    }

    #[test]
    fn sink_fails_fast_when_the_worker_is_gone() {
        let (sink, rx) = alert_queue(AlertQueueConfig::default());
        drop(rx);

        let err = sink.send(alert(1)).unwrap_err();
        assert!(err.0.contains("stopped"));
    }

    #[test]
    fn worker_forwards_alerts_to_the_notifier() {
        #[derive(Debug, Default)]
        struct Recording {
            seen: Arc<Mutex<Vec<i64>>>,
        }

        impl Notifier for Recording {
            fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
                self.seen.lock().unwrap().push(alert.current_quantity);
                Ok(())
            }
        }

        let (sink, rx) = alert_queue(AlertQueueConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = Recording { seen: seen.clone() };
        let handle = AlertWorker::spawn("alerts-test", rx, notifier);

        sink.send(alert(3)).unwrap();
        sink.send(alert(7)).unwrap();

        // The worker drains asynchronously; poll briefly.
        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![3, 7]);
    }
}

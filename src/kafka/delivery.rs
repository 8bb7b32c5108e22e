use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Outcome of one asynchronous send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered { partition: i32, offset: i64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub timestamp_ms: i64,
    pub status: DeliveryStatus,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered { .. })
    }
}

pub type DeliverySender = mpsc::UnboundedSender<DeliveryReport>;

/// Receiving side of the delivery report channel.
///
/// Reports are dropped silently once this is dropped; delivery itself is not
/// affected.
pub struct DeliveryReports {
    rx: mpsc::UnboundedReceiver<DeliveryReport>,
}

impl DeliveryReports {
    pub async fn recv(&mut self) -> Option<DeliveryReport> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeliveryReport> {
        self.rx.try_recv().ok()
    }

    /// Drains every report currently queued without waiting.
    pub fn drain(&mut self) -> Vec<DeliveryReport> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<DeliveryReport> {
        UnboundedReceiverStream::new(self.rx)
    }
}

pub fn channel() -> (DeliverySender, DeliveryReports) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, DeliveryReports { rx })
}

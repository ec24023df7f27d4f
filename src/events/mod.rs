use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::notifications::{placement_email, status_email, Mailer};

/// Events emitted by the order engine. Dispatch is decoupled from the
/// request path: handlers commit first, then push an event, and the worker
/// does any email I/O. A full or closed channel never fails an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: i64,
        order_number: String,
        email: Option<String>,
        total: i64,
        confirmation_link: String,
    },
    OrderStatusChanged {
        order_id: i64,
        order_number: String,
        email: Option<String>,
        old_status: String,
        new_status: String,
    },
    CouponRedeemed {
        coupon_id: i64,
        code: String,
        order_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Long-running worker draining the event channel and dispatching customer
/// email. Each send runs on its own task so one slow gateway call cannot
/// back up the queue.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>, mailer: Arc<dyn Mailer>) {
    info!("event processor started");

    while let Some(event) = receiver.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                order_number,
                email,
                total,
                confirmation_link,
            } => {
                info!(order_id, %order_number, total, "order placed");
                let Some(to) = email else {
                    continue;
                };
                let mailer = mailer.clone();
                tokio::spawn(async move {
                    let message = placement_email(&to, &order_number, &confirmation_link);
                    if let Err(e) = mailer.send(message).await {
                        warn!(%order_number, error = %e, "placement email failed");
                    }
                });
            }
            Event::OrderStatusChanged {
                order_id,
                order_number,
                email,
                old_status,
                new_status,
            } => {
                info!(order_id, %order_number, %old_status, %new_status, "order status changed");
                let Some(to) = email else {
                    continue;
                };
                let mailer = mailer.clone();
                tokio::spawn(async move {
                    let message = status_email(&to, &order_number, &new_status);
                    if let Err(e) = mailer.send(message).await {
                        warn!(%order_number, error = %e, "status email failed");
                    }
                });
            }
            Event::CouponRedeemed {
                coupon_id,
                code,
                order_id,
            } => {
                info!(coupon_id, %code, order_id, "coupon redeemed");
            }
        }
    }

    info!("event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{MailerError, OutboundEmail};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    #[tokio::test]
    async fn placed_event_without_email_is_skipped() {
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let worker = tokio::spawn(process_events(rx, mailer.clone()));

        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderPlaced {
                order_id: 1,
                order_number: "ORDER-000001".into(),
                email: None,
                total: 2600,
                confirmation_link: "http://x".into(),
            })
            .await
            .unwrap();

        drop(sender);
        worker.await.unwrap();
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_change_sends_email() {
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        let worker = tokio::spawn(process_events(rx, mailer.clone()));

        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderStatusChanged {
                order_id: 1,
                order_number: "ORDER-000001".into(),
                email: Some("a@b.test".into()),
                old_status: "VERIFIED".into(),
                new_status: "PROCESSING".into(),
            })
            .await
            .unwrap();

        drop(sender);
        worker.await.unwrap();
        // The dispatch task was spawned by the worker; yield until it lands.
        for _ in 0..50 {
            if !mailer.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("PROCESSING"));
    }
}

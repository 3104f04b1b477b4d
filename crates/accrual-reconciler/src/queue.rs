//! 订单队列
//!
//! 有界的多生产者通道，只流转订单号。生产者是订单接入层、未完成订单扫描
//! 以及限流后的重新入队；唯一的消费方是 worker 池。
//!
//! 队列写满时 `enqueue` 等待，以此限制内存占用和对积分系统的扇出。
//! `close` 之后不再接受新订单，worker 排空已缓冲的订单后退出。

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::models::OrderId;

struct Inner {
    sender: mpsc::Sender<OrderId>,
    /// 所有 worker 共享一个接收端，同一时刻只有一个 worker 在等待
    receiver: Mutex<mpsc::Receiver<OrderId>>,
    closed: watch::Sender<bool>,
}

/// 订单队列
///
/// clone 只复制句柄，所有副本共享同一个底层通道。
#[derive(Clone)]
pub struct OrderQueue {
    inner: Arc<Inner>,
}

impl OrderQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: Mutex::new(receiver),
                closed,
            }),
        }
    }

    /// 订单入队，队列满时等待空位
    ///
    /// 队列关闭后返回 `QueueClosed`，包括在等待空位期间被关闭的情况。
    pub async fn enqueue(&self, order_id: OrderId) -> Result<(), ReconcileError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ReconcileError::QueueClosed);
        }

        tokio::select! {
            sent = self.inner.sender.send(order_id) => {
                sent.map_err(|_| ReconcileError::QueueClosed)
            }
            _ = closed.wait_for(|closed| *closed) => Err(ReconcileError::QueueClosed),
        }
    }

    /// 非阻塞入队，队列满时返回 `QueueFull`
    pub fn try_enqueue(&self, order_id: OrderId) -> Result<(), ReconcileError> {
        if self.is_closed() {
            return Err(ReconcileError::QueueClosed);
        }
        self.inner.sender.try_send(order_id).map_err(|err| match err {
            mpsc::error::TrySendError::Full(order_id) => ReconcileError::QueueFull {
                order_id: order_id.to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => ReconcileError::QueueClosed,
        })
    }

    /// 取出下一个订单
    ///
    /// 队列为空且未关闭时一直等待；关闭后先返回缓冲区内剩余的订单，
    /// 排空后返回 `None`。
    pub async fn dequeue(&self) -> Option<OrderId> {
        let mut receiver = self.inner.receiver.lock().await;
        let mut closed = self.inner.closed.subscribe();

        loop {
            if *closed.borrow_and_update() {
                // 关闭接收端后 recv 只返回已缓冲的订单
                receiver.close();
                return receiver.recv().await;
            }

            tokio::select! {
                order_id = receiver.recv() => return order_id,
                _ = closed.changed() => {}
            }
        }
    }

    /// 非阻塞地取出一个已缓冲的订单，主要用于检查队列内容
    pub fn try_dequeue(&self) -> Option<OrderId> {
        let mut receiver = self.inner.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    /// 关闭队列，可重复调用
    pub fn close(&self) {
        let was_closed = self.inner.closed.send_replace(true);
        if !was_closed {
            info!(buffered = self.len(), "订单队列已关闭，等待 worker 排空");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// 当前缓冲的订单数
    pub fn len(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 提供给订单接入层的只写句柄
    pub fn submitter(&self) -> OrderSubmitter {
        OrderSubmitter {
            queue: self.clone(),
        }
    }
}

/// 订单接入层使用的入队句柄
///
/// 只暴露入队能力，队列容量、背压策略与关闭都留在管道内部。
#[derive(Clone)]
pub struct OrderSubmitter {
    queue: OrderQueue,
}

impl OrderSubmitter {
    /// 提交订单等待异步对账，队列满时等待
    pub async fn enqueue(&self, order_id: impl Into<OrderId>) -> Result<(), ReconcileError> {
        let order_id = order_id.into();
        debug!(order_id = %order_id, "订单提交对账");
        self.queue.enqueue(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let queue = OrderQueue::new(4);
        queue.enqueue("1".into()).await.unwrap();
        queue.enqueue("2".into()).await.unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue().await, Some(OrderId::new("1")));
        assert_eq!(queue.dequeue().await, Some(OrderId::new("2")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_buffered_items() {
        let queue = OrderQueue::new(4);
        queue.enqueue("55".into()).await.unwrap();
        queue.enqueue("77".into()).await.unwrap();
        queue.close();

        assert_eq!(queue.dequeue().await, Some(OrderId::new("55")));
        assert_eq!(queue.dequeue().await, Some(OrderId::new("77")));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let queue = OrderQueue::new(4);
        queue.close();
        assert!(matches!(
            queue.enqueue("1".into()).await,
            Err(ReconcileError::QueueClosed)
        ));
        assert!(matches!(
            queue.try_enqueue("1".into()),
            Err(ReconcileError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_dequeue_pending_until_item_arrives() {
        let queue = OrderQueue::new(2);
        let mut dequeue = tokio_test::task::spawn(queue.dequeue());
        tokio_test::assert_pending!(dequeue.poll());

        queue.try_enqueue("1230".into()).unwrap();
        assert!(dequeue.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(dequeue.poll()),
            Some(OrderId::new("1230"))
        );
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumer() {
        let queue = OrderQueue::new(4);
        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("关闭后空闲的消费者应退出")
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_capacity() {
        let queue = OrderQueue::new(1);
        queue.enqueue("1".into()).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue("2".into()).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "队列已满时生产者应等待");

        assert_eq!(queue.dequeue().await, Some(OrderId::new("1")));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.dequeue().await, Some(OrderId::new("2")));
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let queue = OrderQueue::new(1);
        queue.enqueue("1".into()).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue("2".into()).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = producer.await.unwrap();
        assert!(matches!(result, Err(ReconcileError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_full() {
        let queue = OrderQueue::new(1);
        queue.try_enqueue("1".into()).unwrap();
        let err = queue.try_enqueue("2".into()).unwrap_err();
        assert!(matches!(err, ReconcileError::QueueFull { order_id } if order_id == "2"));
    }

    #[tokio::test]
    async fn test_submitter_feeds_queue() {
        let queue = OrderQueue::new(2);
        let submitter = queue.submitter();
        submitter.enqueue("1230").await.unwrap();
        assert_eq!(queue.try_dequeue(), Some(OrderId::new("1230")));
        assert_eq!(queue.try_dequeue(), None);
    }
}

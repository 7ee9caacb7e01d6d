//! 订单 saga 端到端流程测试
//!
//! 下单 -> ORDER_CREATED -> （模拟归一化）-> ORDER_UPDATED -> 写回，
//! 全程使用内存仓储和记录型发布者，不依赖外部服务。

use std::sync::Arc;

use orders_service::models::{NewOrder, OrderItem};
use orders_service::placement::OrderPlacement;
use orders_service::saga::{ApplyOutcome, OrderUpdateApplier};
use orders_service::test_utils::InMemoryOrderRepository;
use rust_decimal_macros::dec;
use saga_shared::events::{OrderEvent, OrderStatus, OrderUpdatedEvent};
use saga_shared::kafka::{MessageDisposition, topics};
use saga_shared::test_utils::{RecordingPublisher, event_message};
use uuid::Uuid;

struct Harness {
    repo: Arc<InMemoryOrderRepository>,
    publisher: Arc<RecordingPublisher>,
    placement: OrderPlacement,
    applier: OrderUpdateApplier,
}

impl Harness {
    fn new() -> Self {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let placement = OrderPlacement::new(
            repo.clone(),
            publisher.clone(),
            dec!(5.00),
            topics::ORDER_CREATED,
        );
        let applier = OrderUpdateApplier::new(repo.clone());
        Self {
            repo,
            publisher,
            placement,
            applier,
        }
    }

    async fn place_reference_order(&self) -> Uuid {
        let order = self
            .placement
            .place(NewOrder {
                user_id: Uuid::new_v4(),
                items: vec![OrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: dec!(19.99),
                }],
            })
            .await
            .unwrap();
        order.id
    }
}

/// 以 91.3456 的汇率归一化后的更新事件
fn normalized(order_id: Uuid) -> OrderEvent {
    OrderUpdatedEvent {
        order_id,
        delivery_price: dec!(456.73),
        cart_price: dec!(1826.00),
        total_price: dec!(2282.73),
        status: OrderStatus::Updated,
    }
    .into()
}

#[tokio::test]
async fn test_order_round_trip_through_saga() {
    let h = Harness::new();
    let order_id = h.place_reference_order().await;

    let stored = h.repo.snapshot(order_id).unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
    assert_eq!(stored.total_price, dec!(24.99));

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, order_id.to_string());

    let msg = event_message(topics::ORDER_UPDATED, 0, &normalized(order_id));
    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Processed);

    let stored = h.repo.snapshot(order_id).unwrap();
    assert_eq!(stored.status, OrderStatus::Updated);
    assert_eq!(stored.cart_price, dec!(1826.00));
    assert_eq!(stored.delivery_price, dec!(456.73));
    assert_eq!(stored.total_price, dec!(2282.73));
    assert_eq!(stored.total_price, stored.cart_price + stored.delivery_price);
}

#[tokio::test]
async fn test_duplicate_update_is_idempotent() {
    let h = Harness::new();
    let order_id = h.place_reference_order().await;

    let msg = event_message(topics::ORDER_UPDATED, 3, &normalized(order_id));
    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Processed);
    let first = h.repo.snapshot(order_id).unwrap();

    let OrderEvent::OrderUpdated(event) = normalized(order_id) else {
        unreachable!();
    };
    assert_eq!(
        h.applier.apply(&event).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Processed);

    assert_eq!(h.repo.update_count(), 1);
    assert_eq!(h.repo.snapshot(order_id).unwrap(), first);
}

#[tokio::test]
async fn test_update_for_unknown_order_is_committed() {
    let h = Harness::new();

    let msg = event_message(topics::ORDER_UPDATED, 9, &normalized(Uuid::new_v4()));

    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Processed);
    assert_eq!(h.repo.update_count(), 0);
}

#[tokio::test]
async fn test_database_outage_redelivers_until_recovered() {
    let h = Harness::new();
    let order_id = h.place_reference_order().await;
    let msg = event_message(topics::ORDER_UPDATED, 1, &normalized(order_id));

    h.repo.set_unavailable(true);
    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Redeliver);

    h.repo.set_unavailable(false);
    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Processed);
    assert_eq!(
        h.repo.snapshot(order_id).unwrap().status,
        OrderStatus::Updated
    );
}

#[tokio::test]
async fn test_created_event_on_updated_topic_is_discarded() {
    let h = Harness::new();
    let order_id = h.place_reference_order().await;
    let (_, _, created) = h.publisher.published().remove(0);

    let msg = event_message(topics::ORDER_UPDATED, 2, &created);

    assert_eq!(h.applier.handle(&msg).await, MessageDisposition::Discarded);
    assert_eq!(
        h.repo.snapshot(order_id).unwrap().status,
        OrderStatus::Processing
    );
}

//! Order repository for database operations.
//!
//! Reads run inside a `REPEATABLE READ` read-only transaction so the header
//! join and the item query see the same snapshot. Writes replace the whole
//! aggregate in one transaction: the old header is deleted (children cascade)
//! and header, delivery, payment, and items are inserted fresh.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_broker_core::{Delivery, Item, Order, OrderUid, Payment};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, instrument};

use super::{OrderStore, RepositoryError};

const SELECT_ORDER: &str = r"
    SELECT o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
           o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created,
           o.oof_shard,
           d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
           p.transaction, p.request_id, p.currency, p.provider, p.amount,
           p.payment_dt, p.bank, p.delivery_cost, p.goods_total, p.custom_fee
    FROM orders o
    JOIN delivery d ON d.order_uid = o.order_uid
    JOIN payment p ON p.order_uid = o.order_uid
    WHERE o.order_uid = $1
";

const SELECT_ALL_ORDERS: &str = r"
    SELECT o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
           o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created,
           o.oof_shard,
           d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
           p.transaction, p.request_id, p.currency, p.provider, p.amount,
           p.payment_dt, p.bank, p.delivery_cost, p.goods_total, p.custom_fee
    FROM orders o
    JOIN delivery d ON d.order_uid = o.order_uid
    JOIN payment p ON p.order_uid = o.order_uid
    ORDER BY o.order_uid
";

const SELECT_ITEMS: &str = r"
    SELECT chrt_id, track_number, price, rid, name, sale, size, total_price,
           nm_id, brand, status
    FROM items
    WHERE order_uid = $1
    ORDER BY id
";

const SELECT_ALL_ITEMS: &str = r"
    SELECT order_uid, chrt_id, track_number, price, rid, name, sale, size,
           total_price, nm_id, brand, status
    FROM items
    ORDER BY order_uid, id
";

/// Header columns joined with delivery and payment.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,
    #[sqlx(flatten)]
    delivery: Delivery,
    #[sqlx(flatten)]
    payment: Payment,
}

impl OrderRow {
    fn into_order(self, items: Vec<Item>) -> Order {
        Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery: self.delivery,
            payment: self.payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    order_uid: String,
    #[sqlx(flatten)]
    item: Item,
}

/// `PostgreSQL`-backed [`OrderStore`].
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Begin a read-only transaction with a stable snapshot.
    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_uid = %uid))]
    async fn get_full_order(&self, uid: &OrderUid) -> Result<Order, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let row = sqlx::query_as::<_, OrderRow>(SELECT_ORDER)
            .bind(uid.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(RepositoryError::NotFound);
        };

        let items = sqlx::query_as::<_, Item>(SELECT_ITEMS)
            .bind(uid.as_str())
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    #[instrument(skip(self, order), fields(order_uid = %order.order_uid, items = order.items.len()))]
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let uid = order.uid()?;
        let mut tx = self.pool.begin().await?;

        // Re-ingestion replaces the aggregate; delivery, payment and items cascade.
        let replaced = sqlx::query("DELETE FROM orders WHERE order_uid = $1")
            .bind(uid.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r"
            INSERT INTO orders (
                order_uid, track_number, entry, locale, internal_signature, customer_id,
                delivery_service, shardkey, sm_id, date_created, oof_shard
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(uid.as_str())
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&mut *tx)
        .await?;

        let delivery = &order.delivery;
        sqlx::query(
            r"
            INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(uid.as_str())
        .bind(&delivery.name)
        .bind(&delivery.phone)
        .bind(&delivery.zip)
        .bind(&delivery.city)
        .bind(&delivery.address)
        .bind(&delivery.region)
        .bind(&delivery.email)
        .execute(&mut *tx)
        .await?;

        let payment = &order.payment;
        sqlx::query(
            r"
            INSERT INTO payment (
                order_uid, transaction, request_id, currency, provider, amount,
                payment_dt, bank, delivery_cost, goods_total, custom_fee
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(uid.as_str())
        .bind(&payment.transaction)
        .bind(&payment.request_id)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(&payment.bank)
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .execute(&mut *tx)
        .await?;

        if !order.items.is_empty() {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name, \
                 sale, size, total_price, nm_id, brand, status) ",
            );
            builder.push_values(&order.items, |mut row, item| {
                row.push_bind(uid.as_str())
                    .push_bind(item.chrt_id)
                    .push_bind(&item.track_number)
                    .push_bind(item.price)
                    .push_bind(&item.rid)
                    .push_bind(&item.name)
                    .push_bind(item.sale)
                    .push_bind(&item.size)
                    .push_bind(item.total_price)
                    .push_bind(item.nm_id)
                    .push_bind(&item.brand)
                    .push_bind(item.status);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(replaced = replaced > 0, "Order persisted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_all_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let rows = sqlx::query_as::<_, OrderRow>(SELECT_ALL_ORDERS)
            .fetch_all(&mut *tx)
            .await?;
        let item_rows = sqlx::query_as::<_, ItemRow>(SELECT_ALL_ITEMS)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(assemble(rows, item_rows))
    }
}

/// Attach each order's items, preserving item order within an order.
fn assemble(rows: Vec<OrderRow>, item_rows: Vec<ItemRow>) -> Vec<Order> {
    let mut items_by_order: HashMap<String, Vec<Item>> = HashMap::new();
    for r in item_rows {
        items_by_order.entry(r.order_uid).or_default().push(r.item);
    }

    rows.into_iter()
        .map(|row| {
            let items = items_by_order.remove(&row.order_uid).unwrap_or_default();
            row.into_order(items)
        })
        .collect()
}

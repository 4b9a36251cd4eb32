//! Order service client.
//!
//! Every call races a hard 10 s deadline and retries twice with exponential
//! backoff before surfacing the failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Order statuses that may still accept a payment.
pub const PAYABLE_STATUSES: &[&str] = &["created", "processing", "pending", "pending_payment"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAmount {
    /// Minor units.
    pub total: i64,
    pub currency: String,
    pub sales_tax: Option<i64>,
    pub discount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub course_id: Uuid,
    /// Minor units, in the order's currency.
    pub price: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub amount: OrderAmount,
    pub status: String,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn is_payable(&self) -> bool {
        PAYABLE_STATUSES.contains(&self.status.as_str())
    }
}

#[async_trait]
pub trait OrderClient: Send + Sync {
    async fn get_order_by_id(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order>;
}

pub struct HttpOrderClient {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
    max_retries: u32,
}

impl HttpOrderClient {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("order client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            deadline: Duration::from_secs(10),
            max_retries: 2,
        })
    }

    async fn fetch(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let url = format!("{}/api/orders/{}", self.base_url, order_id);
        let response = self
            .client
            .get(&url)
            .query(&[("user_id", user_id.to_string())])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("order service request failed: {}", e)))?;

        if response.status().as_u16() == 404 {
            return Err(AppError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "order service returned HTTP {}",
                response.status()
            )));
        }
        response
            .json::<Order>()
            .await
            .map_err(|e| AppError::Internal(format!("invalid order response: {}", e)))
    }
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    async fn get_order_by_id(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let call = self.fetch(order_id, user_id);
            match tokio::time::timeout(self.deadline, call).await {
                Ok(Ok(order)) => return Ok(order),
                Ok(Err(e @ AppError::NotFound { .. })) => return Err(e),
                Ok(Err(e)) => {
                    warn!(order_id = %order_id, attempt, error = %e, "order lookup failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(order_id = %order_id, attempt, "order lookup deadline exceeded");
                    last_error = Some(AppError::Timeout { service: "order" });
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }
        Err(last_error.unwrap_or(AppError::Timeout { service: "order" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payable_statuses_match_contract() {
        for status in ["created", "processing", "pending", "pending_payment"] {
            let order = Order {
                id: Uuid::new_v4(),
                amount: OrderAmount {
                    total: 1000,
                    currency: "USD".to_string(),
                    sales_tax: None,
                    discount: None,
                },
                status: status.to_string(),
                items: Vec::new(),
            };
            assert!(order.is_payable(), "{} should be payable", status);
        }

        let paid = Order {
            id: Uuid::new_v4(),
            amount: OrderAmount {
                total: 1000,
                currency: "USD".to_string(),
                sales_tax: None,
                discount: None,
            },
            status: "completed".to_string(),
            items: Vec::new(),
        };
        assert!(!paid.is_payable());
    }
}

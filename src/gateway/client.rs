use chrono::{Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use crate::gateway::token::{FreshToken, GatewayTokenCache};
use crate::gateway::types::{
    BillingAddress, RegisterIpnRequest, RegisterIpnResponse, SubmitOrderRequest,
    SubmitOrderResponse, TokenRequest, TokenResponse, TransactionStatusResponse,
};
use crate::gateway::{OrderSubmission, PaymentGateway, SubmissionReceipt, TransactionStatus};

const TOKEN_PATH: &str = "/api/Auth/RequestToken";
const REGISTER_IPN_PATH: &str = "/api/URLSetup/RegisterIPN";
const SUBMIT_ORDER_PATH: &str = "/api/Transactions/SubmitOrderRequest";
const TRANSACTION_STATUS_PATH: &str = "/api/Transactions/GetTransactionStatus";

/// Lifetime assumed for tokens whose response omits the expiry timestamp
const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 300;

/// One network attempt, classified.
enum AttemptOutcome {
    /// Got an HTTP response that is not a 5xx; the caller decides what the
    /// status means for its operation.
    Response(reqwest::Response),
    /// Transport failure or 5xx; worth another attempt.
    Retry(String),
}

/// HTTP client for the hosted-checkout payment gateway.
///
/// Every operation runs with a bounded retry budget and a fixed delay between
/// attempts. Transport errors and 5xx responses are retried; definitive 4xx
/// rejections are not. A 401 invalidates the shared token cache and consumes
/// one attempt, so a revoked token cannot cause an unbounded refresh loop.
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
    token_cache: Arc<GatewayTokenCache>,
    ipn_id: OnceCell<String>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, token_cache: Arc<GatewayTokenCache>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("gateway HTTP client construction failed");

        Self {
            http,
            config,
            token_cache,
            ipn_id: OnceCell::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts.max(1)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }

    async fn send_once(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> AttemptOutcome {
        let started = std::time::Instant::now();
        let outcome = match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                AttemptOutcome::Retry(format!("gateway returned {}", response.status()))
            }
            Ok(response) => AttemptOutcome::Response(response),
            Err(e) => AttemptOutcome::Retry(format!("transport error: {}", e)),
        };
        histogram!(
            "gateway_request_duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            "operation" => operation
        );
        outcome
    }

    fn record_outcome(operation: &'static str, outcome: &'static str) {
        counter!(
            "gateway_client_requests_total",
            1,
            "operation" => operation,
            "outcome" => outcome
        );
    }

    /// Best-effort extraction of the gateway's error message from a response body.
    async fn read_error_detail(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| body.get("message").and_then(|m| m.as_str()))
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        }
    }

    /// Fetches a fresh bearer token from the gateway.
    ///
    /// Only invoked under the token cache lock, so concurrent callers never
    /// duplicate the exchange.
    #[instrument(skip(self))]
    async fn fetch_token(&self) -> Result<FreshToken, ServiceError> {
        let url = self.endpoint(TOKEN_PATH);
        let body = TokenRequest {
            consumer_key: &self.config.consumer_key,
            consumer_secret: &self.config.consumer_secret,
        };

        let attempts = self.retry_attempts();
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            match self
                .send_once("token", self.http.post(&url).json(&body))
                .await
            {
                AttemptOutcome::Response(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        // 4xx means the credentials themselves were refused
                        let detail = Self::read_error_detail(response).await;
                        Self::record_outcome("token", "rejected");
                        return Err(ServiceError::AuthError(format!(
                            "gateway refused token request ({}): {}",
                            status, detail
                        )));
                    }

                    let parsed: TokenResponse = response.json().await.map_err(|e| {
                        ServiceError::AuthError(format!("malformed token response: {}", e))
                    })?;

                    if let Some(token) = parsed.token.filter(|t| !t.trim().is_empty()) {
                        let expires_at = parsed.expiry_date.unwrap_or_else(|| {
                            Utc::now() + ChronoDuration::seconds(FALLBACK_TOKEN_LIFETIME_SECS)
                        });
                        Self::record_outcome("token", "ok");
                        return Ok(FreshToken { token, expires_at });
                    }

                    let detail = parsed
                        .error
                        .map(|e| e.message_or_default())
                        .unwrap_or_else(|| "token response carried no token".to_string());
                    Self::record_outcome("token", "rejected");
                    return Err(ServiceError::AuthError(detail));
                }
                AttemptOutcome::Retry(reason) => {
                    last_failure = reason;
                    warn!(
                        attempt,
                        attempts,
                        error = %last_failure,
                        "Gateway token request attempt failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        Self::record_outcome("token", "exhausted");
        Err(ServiceError::AuthError(format!(
            "token request failed after {} attempts: {}",
            attempts, last_failure
        )))
    }

    async fn bearer_token(&self) -> Result<String, ServiceError> {
        self.token_cache
            .get_or_refresh(|| self.fetch_token())
            .await
    }

    /// Registers our callback URL as the gateway's notification target.
    #[instrument(skip(self))]
    async fn register_ipn(&self) -> Result<String, ServiceError> {
        let url = self.endpoint(REGISTER_IPN_PATH);
        let body = RegisterIpnRequest {
            url: &self.config.callback_url,
            ipn_notification_type: "GET",
        };

        let attempts = self.retry_attempts();
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            let token = self.bearer_token().await?;
            match self
                .send_once(
                    "register_ipn",
                    self.http.post(&url).bearer_auth(&token).json(&body),
                )
                .await
            {
                AttemptOutcome::Response(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.token_cache.invalidate().await;
                        last_failure = "gateway rejected bearer token (401)".to_string();
                        warn!(
                            attempt,
                            attempts, "Notification URL registration got 401, token invalidated"
                        );
                    } else if status.is_success() {
                        let parsed: RegisterIpnResponse = response.json().await.map_err(|e| {
                            ServiceError::GatewayUnavailable(format!(
                                "malformed IPN registration response: {}",
                                e
                            ))
                        })?;

                        if let Some(error) = parsed.error {
                            Self::record_outcome("register_ipn", "rejected");
                            return Err(ServiceError::GatewayUnavailable(format!(
                                "IPN registration rejected: {}",
                                error.message_or_default()
                            )));
                        }

                        if let Some(ipn_id) = parsed.ipn_id.filter(|id| !id.trim().is_empty()) {
                            info!(
                                ipn_id = %ipn_id,
                                callback_url = %self.config.callback_url,
                                "Notification URL registered with gateway"
                            );
                            Self::record_outcome("register_ipn", "ok");
                            return Ok(ipn_id);
                        }

                        Self::record_outcome("register_ipn", "rejected");
                        return Err(ServiceError::GatewayUnavailable(
                            "IPN registration response carried no ipn_id".to_string(),
                        ));
                    } else {
                        // Any other 4xx is a configuration problem; retrying
                        // the same registration will not fix it
                        let detail = Self::read_error_detail(response).await;
                        Self::record_outcome("register_ipn", "rejected");
                        return Err(ServiceError::GatewayUnavailable(format!(
                            "IPN registration refused ({}): {}",
                            status, detail
                        )));
                    }
                }
                AttemptOutcome::Retry(reason) => {
                    last_failure = reason;
                    warn!(
                        attempt,
                        attempts,
                        error = %last_failure,
                        "IPN registration attempt failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        Self::record_outcome("register_ipn", "exhausted");
        Err(ServiceError::GatewayUnavailable(format!(
            "IPN registration failed after {} attempts: {}",
            attempts, last_failure
        )))
    }
}

#[async_trait::async_trait]
impl PaymentGateway for GatewayClient {
    /// Idempotent per process: the first call registers, later calls return
    /// the cached registration id.
    async fn register_notification_url(&self) -> Result<String, ServiceError> {
        self.ipn_id
            .get_or_try_init(|| self.register_ipn())
            .await
            .map(|id| id.clone())
    }

    #[instrument(skip(self, order), fields(merchant_reference = %order.merchant_reference))]
    async fn submit_order(
        &self,
        order: &OrderSubmission,
    ) -> Result<SubmissionReceipt, ServiceError> {
        let notification_id = self.register_notification_url().await?;
        let url = self.endpoint(SUBMIT_ORDER_PATH);
        let body = SubmitOrderRequest {
            id: order.merchant_reference.clone(),
            currency: order.currency.clone(),
            amount: order.amount,
            description: order.description.clone(),
            callback_url: self.config.callback_url.clone(),
            notification_id,
            billing_address: BillingAddress {
                email_address: order.customer_email.clone(),
                first_name: order.customer_first_name.clone(),
                last_name: order.customer_last_name.clone(),
                phone_number: order.customer_phone.clone(),
            },
        };

        let attempts = self.retry_attempts();
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            let token = self.bearer_token().await?;
            match self
                .send_once(
                    "submit_order",
                    self.http.post(&url).bearer_auth(&token).json(&body),
                )
                .await
            {
                AttemptOutcome::Response(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.token_cache.invalidate().await;
                        last_failure = "gateway rejected bearer token (401)".to_string();
                        warn!(attempt, attempts, "Order submission got 401, token invalidated");
                    } else if status.is_success() {
                        let parsed: SubmitOrderResponse = response.json().await.map_err(|e| {
                            ServiceError::GatewayUnavailable(format!(
                                "malformed order submission response: {}",
                                e
                            ))
                        })?;

                        // The gateway reports rejection inside a 200 body;
                        // its code and message go to the caller verbatim
                        if let Some(error) = parsed.error {
                            Self::record_outcome("submit_order", "rejected");
                            return Err(ServiceError::GatewayOrder {
                                code: error.code_or_unknown(),
                                message: error.message_or_default(),
                            });
                        }

                        match (
                            parsed.order_tracking_id.filter(|t| !t.trim().is_empty()),
                            parsed.redirect_url.filter(|r| !r.trim().is_empty()),
                        ) {
                            (Some(tracking_id), Some(redirect_url)) => {
                                info!(tracking_id = %tracking_id, "Order accepted by gateway");
                                Self::record_outcome("submit_order", "ok");
                                return Ok(SubmissionReceipt {
                                    tracking_id,
                                    redirect_url,
                                });
                            }
                            _ => {
                                Self::record_outcome("submit_order", "rejected");
                                return Err(ServiceError::InternalError(
                                    "gateway accepted the order but returned no tracking id or redirect URL"
                                        .to_string(),
                                ));
                            }
                        }
                    } else {
                        // Definitive rejection; surface the gateway's own
                        // code and message
                        let parsed = response.json::<SubmitOrderResponse>().await.ok();
                        Self::record_outcome("submit_order", "rejected");
                        return Err(match parsed.and_then(|r| r.error) {
                            Some(error) => ServiceError::GatewayOrder {
                                code: error.code_or_unknown(),
                                message: error.message_or_default(),
                            },
                            None => ServiceError::GatewayOrder {
                                code: status.as_u16().to_string(),
                                message: "The payment gateway rejected the order".to_string(),
                            },
                        });
                    }
                }
                AttemptOutcome::Retry(reason) => {
                    last_failure = reason;
                    warn!(
                        attempt,
                        attempts,
                        error = %last_failure,
                        "Order submission attempt failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        Self::record_outcome("submit_order", "exhausted");
        Err(ServiceError::GatewayUnavailable(format!(
            "order submission failed after {} attempts: {}",
            attempts, last_failure
        )))
    }

    /// Single source of truth for payment state. A response without a status
    /// code is retried like a transport failure; once the budget is spent the
    /// caller gets StatusUnavailable and must leave its records untouched.
    #[instrument(skip(self))]
    async fn transaction_status(
        &self,
        tracking_id: &str,
    ) -> Result<TransactionStatus, ServiceError> {
        let url = self.endpoint(TRANSACTION_STATUS_PATH);

        let attempts = self.retry_attempts();
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            let token = self.bearer_token().await?;
            match self
                .send_once(
                    "transaction_status",
                    self.http
                        .get(&url)
                        .query(&[("orderTrackingId", tracking_id)])
                        .bearer_auth(&token),
                )
                .await
            {
                AttemptOutcome::Response(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.token_cache.invalidate().await;
                        last_failure = "gateway rejected bearer token (401)".to_string();
                        warn!(attempt, attempts, "Status query got 401, token invalidated");
                    } else if status.is_success() {
                        match response.json::<TransactionStatusResponse>().await {
                            Ok(parsed) => match parsed.status_code {
                                Some(code) => {
                                    Self::record_outcome("transaction_status", "ok");
                                    return Ok(TransactionStatus {
                                        status_code: code,
                                        description: parsed
                                            .payment_status_description
                                            .unwrap_or_default(),
                                        confirmation_code: parsed.confirmation_code,
                                        payment_method: parsed.payment_method,
                                    });
                                }
                                None => {
                                    last_failure = parsed
                                        .error
                                        .map(|e| {
                                            format!("gateway error: {}", e.message_or_default())
                                        })
                                        .unwrap_or_else(|| {
                                            "status response carried no status code".to_string()
                                        });
                                    warn!(
                                        attempt,
                                        attempts,
                                        error = %last_failure,
                                        "Status query returned an unusable payload"
                                    );
                                }
                            },
                            Err(e) => {
                                last_failure = format!("malformed status response: {}", e);
                                warn!(
                                    attempt,
                                    attempts,
                                    error = %last_failure,
                                    "Status query returned an unusable payload"
                                );
                            }
                        }
                    } else {
                        // 4xx: the query itself is wrong (bad tracking id);
                        // repeating it changes nothing
                        let detail = Self::read_error_detail(response).await;
                        Self::record_outcome("transaction_status", "rejected");
                        return Err(ServiceError::StatusUnavailable(format!(
                            "status query refused ({}): {}",
                            status, detail
                        )));
                    }
                }
                AttemptOutcome::Retry(reason) => {
                    last_failure = reason;
                    warn!(
                        attempt,
                        attempts,
                        error = %last_failure,
                        "Status query attempt failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        Self::record_outcome("transaction_status", "exhausted");
        Err(ServiceError::StatusUnavailable(format!(
            "status query failed after {} attempts: {}",
            attempts, last_failure
        )))
    }
}

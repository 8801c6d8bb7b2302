//! Coinforge HTTP API
//!
//! Endpoints:
//! - GET  /v1/health - Liveness and version
//! - GET  /v1/pricing - Merchant address, prices and free-tier limits
//! - POST /v1/payments - Confirm and record a payment
//! - GET  /v1/payments - Caller's payment history
//! - GET  /v1/subscription - Caller's entitlement snapshot
//! - POST /v1/account/wallet - Attach a wallet address
//! - GET  /v1/templates - Template ids and aliases
//! - POST /v1/sites/preview - Render without consuming allowance
//! - POST /v1/sites/generate - Paid or gated render
//! - POST /v1/telegram/broadcast - Gated group broadcast
//!
//! Callers authenticate with `Authorization: Bearer <subject>`. Token
//! verification happens at the identity provider; the bearer value is the
//! resolved subject.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Json, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::confirmation::{ConfirmationError, ConfirmationWatcher};
use crate::gate::{Action, Decision, DenyReason, GenerationGate};
use crate::ledger::{
    Account, EntitlementSnapshot, FreeTierLimits, Ledger, LedgerError, PaymentClaim, PaymentReceipt,
    PaymentRecord, Plan, ProductType, Redemption, ValidatedClaim,
};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::telegram::{BroadcastError, BroadcastReport, BroadcastSettings, Broadcaster, GroupSender};
use crate::templates::{RenderError, SiteBundle, TemplateId, TemplateInfo, TemplateRegistry};

/// Header carrying the caller's wallet on first contact
pub const WALLET_HEADER: &str = "x-wallet-address";

/// Shared application state
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub gate: GenerationGate,
    /// Present when payments must be confirmed on-chain before recording
    pub watcher: Option<ConfirmationWatcher>,
    pub templates: TemplateRegistry,
    /// Present when a Telegram bot is configured
    pub broadcaster: Option<Broadcaster>,
    pub rate_limiter: RateLimiter,
    pub pricing: PricingConfig,
    pub merchant_address: Option<String>,
}

impl AppState {
    /// Rate limiting stays off until `with_rate_limit`
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            gate: GenerationGate::new(ledger.clone()),
            ledger,
            watcher: None,
            templates: TemplateRegistry::new(),
            broadcaster: None,
            rate_limiter: RateLimiter::new(RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            }),
            pricing: PricingConfig::default(),
            merchant_address: None,
        }
    }

    pub fn with_watcher(mut self, watcher: ConfirmationWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_broadcaster(mut self, sender: Arc<dyn GroupSender>, settings: BroadcastSettings) -> Self {
        self.broadcaster = Some(Broadcaster::new(self.gate.clone(), sender, settings));
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limiter = RateLimiter::new(config);
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig, merchant_address: Option<String>) -> Self {
        self.pricing = pricing;
        self.merchant_address = merchant_address;
        self
    }
}

/// Create API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health_check))
        .route("/v1/pricing", get(get_pricing))
        .route("/v1/payments", post(record_payment).get(list_payments))
        .route("/v1/subscription", get(get_subscription))
        .route("/v1/account/wallet", post(attach_wallet))
        .route("/v1/templates", get(list_templates))
        .route("/v1/sites/preview", post(preview_site))
        .route("/v1/sites/generate", post(generate_site))
        .route("/v1/telegram/broadcast", post(broadcast))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Short, stable identifier for a credential, safe to log
pub fn fingerprint(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    hex::encode(&digest[..6])
}

// === Caller identity ===

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Caller {
    pub subject: String,
    pub wallet_address: Option<String>,
}

impl Caller {
    fn bearer(parts: &Parts) -> Option<String> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    async fn account(&self, ledger: &Ledger) -> Result<Account, ApiError> {
        Ok(ledger
            .resolve_account(&self.subject, self.wallet_address.as_deref())
            .await?)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = Self::bearer(parts).ok_or(ApiError::Unauthorized)?;
        let wallet_address = parts
            .headers
            .get(WALLET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            subject,
            wallet_address,
        })
    }
}

async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(fingerprint)
        .or_else(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|ip| ip.trim().to_string())
        })
        .unwrap_or_else(|| "anonymous".to_string());

    match state.rate_limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => ApiError::RateLimited { retry_after }.into_response(),
    }
}

// === Errors ===

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Validation(String),
    Denied(DenyReason),
    AccountNotFound(String),
    PaymentNotFound(String),
    WalletTaken(String),
    PaymentAlreadyUsed(String),
    ConfirmationTimeout(String),
    TransactionFailed(String),
    Upstream(String),
    Storage { code: &'static str },
    TelegramUnavailable,
    RateLimited { retry_after: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Denied(DenyReason::AccountNotFound) | Self::AccountNotFound(_) | Self::PaymentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Denied(_) => StatusCode::PAYMENT_REQUIRED,
            Self::WalletTaken(_) | Self::PaymentAlreadyUsed(_) => StatusCode::CONFLICT,
            Self::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::TransactionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TelegramUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn body(&self) -> ErrorResponse {
        let (error, code) = match self {
            Self::Unauthorized => ("Missing bearer credential".to_string(), "unauthorized"),
            Self::Validation(msg) => (msg.clone(), "validation_error"),
            Self::Denied(reason) => (reason.to_string(), reason.code()),
            Self::AccountNotFound(subject) => (format!("Account not found: {}", subject), "account_not_found"),
            Self::PaymentNotFound(sig) => (format!("Payment not found: {}", sig), "payment_not_found"),
            Self::WalletTaken(wallet) => (
                format!("Wallet {} is already attached to another account", wallet),
                "wallet_taken",
            ),
            Self::PaymentAlreadyUsed(sig) => (
                format!("Payment {} was already used", sig),
                "payment_already_used",
            ),
            Self::ConfirmationTimeout(sig) => (
                format!("Payment {} was not confirmed in time; resubmit once it lands", sig),
                "confirmation_timeout",
            ),
            Self::TransactionFailed(msg) => (format!("Transaction failed on-chain: {}", msg), "transaction_failed"),
            Self::Upstream(msg) => (format!("Payment network unavailable: {}", msg), "rpc_unavailable"),
            Self::Storage { code } => ("Ledger temporarily unavailable".to_string(), *code),
            Self::TelegramUnavailable => ("Telegram broadcasting is not configured".to_string(), "telegram_unavailable"),
            Self::RateLimited { .. } => ("Too many requests".to_string(), "rate_limited"),
        };
        ErrorResponse {
            error,
            code: code.to_string(),
            reason: match self {
                Self::Denied(reason) => Some(*reason),
                _ => None,
            },
            retry_after: match self {
                Self::RateLimited { retry_after } => Some(*retry_after),
                _ => None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(e) => Self::Validation(e.to_string()),
            LedgerError::AccountNotFound(subject) => Self::AccountNotFound(subject),
            LedgerError::WalletTaken(wallet) => Self::WalletTaken(wallet),
            LedgerError::PaymentNotFound(sig) => Self::PaymentNotFound(sig),
            LedgerError::PaymentAlreadyUsed(sig) => Self::PaymentAlreadyUsed(sig),
            LedgerError::LedgerWriteFailed(msg) => {
                error!("Ledger write failed: {}", msg);
                Self::Storage {
                    code: "ledger_write_failed",
                }
            }
            LedgerError::LedgerReadFailed(msg) => {
                error!("Ledger read failed: {}", msg);
                Self::Storage {
                    code: "ledger_read_failed",
                }
            }
        }
    }
}

impl From<ConfirmationError> for ApiError {
    fn from(err: ConfirmationError) -> Self {
        match err {
            ConfirmationError::Timeout { signature, .. } => Self::ConfirmationTimeout(signature),
            ConfirmationError::TransactionFailed(msg) => Self::TransactionFailed(msg),
            ConfirmationError::Rpc(msg) => Self::Upstream(msg),
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<BroadcastError> for ApiError {
    fn from(err: BroadcastError) -> Self {
        match err {
            BroadcastError::Ledger(e) => e.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// === Handlers ===

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "Coinforge API".to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn get_pricing(State(state): State<Arc<AppState>>) -> Json<PricingResponse> {
    Json(PricingResponse {
        merchant_address: state.merchant_address.clone(),
        currency: crate::ledger::DEFAULT_CURRENCY.to_string(),
        website_generation: state.pricing.website_generation,
        subscription: SubscriptionPrices {
            monthly: state.pricing.subscription_monthly,
            yearly: state.pricing.subscription_yearly,
        },
        setup_service: state.pricing.setup_service,
        free_tier: state.ledger.limits(),
        confirmation_required: state.watcher.is_some(),
    })
}

/// Confirm a claim on-chain (when enabled) and record it for the caller
async fn confirm_and_record(state: &AppState, caller: &Caller, claim: &PaymentClaim) -> ApiResult<PaymentReceipt> {
    let parsed = ValidatedClaim::parse(claim).map_err(LedgerError::from)?;
    caller.account(&state.ledger).await?;

    if let Some(watcher) = &state.watcher {
        // Already reconciled signatures skip the chain round trip
        if state.ledger.find_payment(&parsed.signature).await?.is_none() {
            watcher.await_confirmation(&parsed.signature).await?;
        }
    }

    Ok(state.ledger.record_payment(&caller.subject, claim).await?)
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(claim): Json<PaymentClaim>,
) -> ApiResult<(StatusCode, Json<PaymentResponse>)> {
    let receipt = confirm_and_record(&state, &caller, &claim).await?;
    let entitlement = state.ledger.get_entitlement(&caller.subject).await?;
    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(PaymentResponse {
            payment: PaymentView::from(&receipt.record),
            duplicate: receipt.duplicate,
            entitlement: EntitlementView::from(entitlement),
        }),
    ))
}

async fn list_payments(State(state): State<Arc<AppState>>, caller: Caller) -> ApiResult<Json<Vec<PaymentView>>> {
    caller.account(&state.ledger).await?;
    let history = state.ledger.payment_history(&caller.subject).await?;
    Ok(Json(history.iter().map(PaymentView::from).collect()))
}

async fn get_subscription(State(state): State<Arc<AppState>>, caller: Caller) -> ApiResult<Json<EntitlementView>> {
    caller.account(&state.ledger).await?;
    let snapshot = state.ledger.get_entitlement(&caller.subject).await?;
    Ok(Json(EntitlementView::from(snapshot)))
}

async fn attach_wallet(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<AttachWalletRequest>,
) -> ApiResult<Json<AccountView>> {
    caller.account(&state.ledger).await?;
    let account = state
        .ledger
        .attach_wallet(&caller.subject, &request.wallet_address)
        .await?;
    Ok(Json(AccountView::from(account)))
}

async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<TemplateInfo>> {
    Json(state.templates.catalog())
}

async fn preview_site(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderRequest>,
) -> ApiResult<Json<SiteResponse>> {
    let template = state.templates.resolve(&request.template)?;
    let bundle = crate::templates::render(template, &request.content)?;
    Ok(Json(SiteResponse::new(template, bundle)))
}

async fn generate_site(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    // Render first so invalid content never costs the caller anything
    let template = state.templates.resolve(&request.render.template)?;
    let bundle = crate::templates::render(template, &request.render.content)?;
    let account = caller.account(&state.ledger).await?;

    let (access, remaining, payment) = match &request.payment {
        Some(claim) => {
            let parsed = ValidatedClaim::parse(claim).map_err(LedgerError::from)?;
            if parsed.product != ProductType::WebsiteGeneration {
                return Err(ApiError::Validation(format!(
                    "Generation payments must use the {} product",
                    ProductType::WebsiteGeneration
                )));
            }
            let receipt = confirm_and_record(&state, &caller, claim).await?;
            // One payment buys one site; only an identical re-render passes
            let redemption = state
                .ledger
                .redeem_generation(&caller.subject, &receipt.record.signature, &bundle.digest())
                .await?;
            if redemption == Redemption::Repeat {
                info!("🔁 Payment {} re-rendered for its payer", receipt.record.signature);
            }
            (Access::Paid, None, Some(PaymentView::from(&receipt.record)))
        }
        None => match state.gate.authorize(&caller.subject, Action::WebsiteGeneration).await? {
            Decision::Allow { remaining: None } => (Access::Subscription, None, None),
            Decision::Allow { remaining } => (Access::Free, remaining, None),
            Decision::Deny { reason } => return Err(ApiError::Denied(reason)),
        },
    };

    info!(
        "🏗️ Site generated: account={} template={} access={:?}",
        account.id, template, access
    );
    Ok(Json(GenerateResponse {
        site: SiteResponse::new(template, bundle),
        access,
        free_generations_remaining: remaining,
        payment,
    }))
}

async fn broadcast(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<BroadcastRequest>,
) -> ApiResult<Json<BroadcastReport>> {
    let broadcaster = state.broadcaster.as_ref().ok_or(ApiError::TelegramUnavailable)?;
    caller.account(&state.ledger).await?;

    let report = broadcaster
        .broadcast(&caller.subject, &request.groups, &request.message)
        .await?;
    match report.denied {
        // Nothing went out at all
        Some(reason) if report.deliveries.is_empty() => Err(ApiError::Denied(reason)),
        _ => Ok(Json(report)),
    }
}

// === Request/Response types ===

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionPrices {
    pub monthly: f64,
    pub yearly: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PricingResponse {
    pub merchant_address: Option<String>,
    pub currency: String,
    pub website_generation: f64,
    pub subscription: SubscriptionPrices,
    pub setup_service: f64,
    pub free_tier: FreeTierLimits,
    pub confirmation_required: bool,
}

/// Payment record as shown to clients, amounts in SOL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: Uuid,
    pub product: ProductType,
    pub plan: Option<Plan>,
    pub amount_sol: f64,
    pub amount_lamports: u64,
    pub currency: String,
    pub signature: String,
    pub observed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&PaymentRecord> for PaymentView {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            id: record.id,
            product: record.product,
            plan: record.plan,
            amount_sol: record.amount.as_sol(),
            amount_lamports: record.amount.0,
            currency: record.currency.clone(),
            signature: record.signature.clone(),
            observed_at: record.observed_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementView {
    #[serde(flatten)]
    pub snapshot: EntitlementSnapshot,
    pub total_spent_sol: f64,
}

impl From<EntitlementSnapshot> for EntitlementView {
    fn from(snapshot: EntitlementSnapshot) -> Self {
        Self {
            total_spent_sol: snapshot.total_spent.as_sol(),
            snapshot,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment: PaymentView,
    pub duplicate: bool,
    pub entitlement: EntitlementView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachWalletRequest {
    pub wallet_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountView {
    pub id: Uuid,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            wallet_address: account.wallet_address,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenderRequest {
    pub template: String,
    pub content: crate::templates::SiteContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(flatten)]
    pub render: RenderRequest,
    #[serde(default)]
    pub payment: Option<PaymentClaim>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SiteResponse {
    pub template: TemplateId,
    pub digest: String,
    #[serde(flatten)]
    pub bundle: SiteBundle,
}

impl SiteResponse {
    fn new(template: TemplateId, bundle: SiteBundle) -> Self {
        Self {
            template,
            digest: bundle.digest(),
            bundle,
        }
    }
}

/// How a generation was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Paid,
    Subscription,
    Free,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub site: SiteResponse,
    pub access: Access,
    pub free_generations_remaining: Option<u32>,
    pub payment: Option<PaymentView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub groups: Vec<String>,
    pub message: String,
}

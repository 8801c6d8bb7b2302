//! # Coinforge CLI
//!
//! Operator and developer tool for the Coinforge API: inspect pricing and
//! entitlements, record payments, and render sites locally without a server.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use coinforge_core::api::{
    EntitlementView, ErrorResponse, HealthResponse, PaymentResponse, PaymentView, PricingResponse,
};
use coinforge_core::ledger::{PaymentClaim, Plan, ProductType};
use coinforge_core::templates::{SiteContent, TemplateInfo, TemplateRegistry};

#[derive(Parser)]
#[command(name = "coinforge-cli")]
#[command(about = "Coinforge API command-line client")]
#[command(version = coinforge_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API endpoint
    #[arg(short, long, default_value = "http://localhost:8080", env = "COINFORGE_ENDPOINT")]
    endpoint: String,

    /// Bearer subject to act as
    #[arg(short, long, env = "COINFORGE_TOKEN")]
    token: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Yaml,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the server is up
    Health,

    /// Show prices and free-tier limits
    Pricing,

    /// Record or list payments
    Payments {
        #[command(subcommand)]
        action: PaymentCommands,
    },

    /// Show the caller's entitlement
    Subscription,

    /// List templates and their aliases
    Templates,

    /// Render a site locally into a directory
    Render {
        /// Template id or alias
        #[arg(short, long, default_value = "classic")]
        template: String,

        /// Site content as a JSON file
        #[arg(short, long)]
        content: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "site")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum PaymentCommands {
    /// Submit a confirmed transaction signature
    Record {
        /// website-generation, subscription or setup-service
        #[arg(short, long)]
        product: ProductType,

        /// Amount in SOL
        #[arg(short, long)]
        amount: f64,

        /// Transaction signature
        #[arg(short, long)]
        signature: String,

        /// Subscription plan (monthly or yearly)
        #[arg(long)]
        plan: Option<Plan>,
    },

    /// Show the caller's payment history
    List,
}

/// HTTP client for the Coinforge API
struct CoinforgeClient {
    endpoint: String,
    token: Option<String>,
    http_client: Client,
}

impl CoinforgeClient {
    fn new(endpoint: String, token: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            http_client: Client::builder()
                // payment recording may wait on chain confirmation
                .timeout(std::time::Duration::from_secs(90))
                .build()
                .context("Failed to create HTTP client")?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path)
    }

    fn authorized(&self, request: RequestBuilder) -> anyhow::Result<RequestBuilder> {
        match &self.token {
            Some(token) => Ok(request.bearer_auth(token)),
            None => bail!("This command needs --token (or COINFORGE_TOKEN)"),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await.context("Request to Coinforge API failed")?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.context("Unexpected response body");
        }
        match response.json::<ErrorResponse>().await {
            Ok(err) => bail!("{} ({}): {}", status, err.code, err.error),
            Err(_) => bail!("Request failed with status {}", status),
        }
    }

    async fn health(&self) -> anyhow::Result<HealthResponse> {
        self.send(self.http_client.get(self.url("health"))).await
    }

    async fn pricing(&self) -> anyhow::Result<PricingResponse> {
        self.send(self.http_client.get(self.url("pricing"))).await
    }

    async fn templates(&self) -> anyhow::Result<Vec<TemplateInfo>> {
        self.send(self.http_client.get(self.url("templates"))).await
    }

    async fn subscription(&self) -> anyhow::Result<EntitlementView> {
        let request = self.authorized(self.http_client.get(self.url("subscription")))?;
        self.send(request).await
    }

    async fn payments(&self) -> anyhow::Result<Vec<PaymentView>> {
        let request = self.authorized(self.http_client.get(self.url("payments")))?;
        self.send(request).await
    }

    async fn record_payment(&self, claim: &PaymentClaim) -> anyhow::Result<PaymentResponse> {
        let request = self.authorized(self.http_client.post(self.url("payments")).json(claim))?;
        self.send(request).await
    }
}

fn print_structured<T: Serialize>(value: &T, format: Format) -> anyhow::Result<()> {
    match format {
        Format::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_entitlement(view: &EntitlementView) {
    let s = &view.snapshot;
    println!("🪪 ENTITLEMENT");
    println!("═══════════════════════════════════════════════");
    println!("Account:              {}", s.account_id);
    match (s.is_subscribed, s.subscription_expires_at) {
        (true, Some(expires)) => println!(
            "Subscription:         ✅ {} until {}",
            s.plan.map(|p| p.to_string()).unwrap_or_default(),
            expires.to_rfc3339()
        ),
        (false, Some(expired)) => println!("Subscription:         ⏰ expired {}", expired.to_rfc3339()),
        _ => println!("Subscription:         none"),
    }
    println!("Free generations:     {}", s.free_generations_remaining);
    println!("Free messages:        {}", s.free_messages_remaining);
    println!("Sites generated:      {}", s.total_generated);
    println!("Total spent:          {} SOL", view.total_spent_sol);
}

fn print_payments(payments: &[PaymentView]) {
    println!("💰 PAYMENTS");
    println!("═══════════════════════════════════════════════════════════════════════════════");
    println!("{:<20} {:<8} {:>12} {:<26} {}", "PRODUCT", "PLAN", "AMOUNT", "OBSERVED", "SIGNATURE");
    for p in payments {
        println!(
            "{:<20} {:<8} {:>12} {:<26} {}",
            p.product.to_string(),
            p.plan.map(|plan| plan.to_string()).unwrap_or_else(|| "-".to_string()),
            format!("{} {}", p.amount_sol, p.currency),
            p.observed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            p.signature
        );
    }
}

/// Render locally and write the bundle files into `out`
fn render_to_dir(template: &str, content_path: &Path, out: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(content_path)
        .with_context(|| format!("Failed to read {}", content_path.display()))?;
    let content: SiteContent = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid site content in {}", content_path.display()))?;

    let bundle = TemplateRegistry::new().render(template, &content)?;
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    for (name, body) in bundle.files() {
        let path = out.join(name);
        std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(bundle.digest())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = CoinforgeClient::new(cli.endpoint.clone(), cli.token.clone())?;

    match cli.command {
        Commands::Health => {
            let health = client.health().await?;
            match cli.format {
                Format::Table => println!("✅ {} v{} is {}", health.service, health.version, health.status),
                format => print_structured(&health, format)?,
            }
        }

        Commands::Pricing => {
            let pricing = client.pricing().await?;
            match cli.format {
                Format::Table => {
                    println!("🏷️ PRICING ({})", pricing.currency);
                    println!("═══════════════════════════════════════════════");
                    println!("Website generation:   {}", pricing.website_generation);
                    println!("Subscription monthly: {}", pricing.subscription.monthly);
                    println!("Subscription yearly:  {}", pricing.subscription.yearly);
                    println!("Setup service:        {}", pricing.setup_service);
                    println!(
                        "Free tier:            {} generations, {} messages",
                        pricing.free_tier.generations, pricing.free_tier.messages
                    );
                    println!(
                        "Pay to:               {}",
                        pricing.merchant_address.as_deref().unwrap_or("(not configured)")
                    );
                }
                format => print_structured(&pricing, format)?,
            }
        }

        Commands::Payments { action } => match action {
            PaymentCommands::Record {
                product,
                amount,
                signature,
                plan,
            } => {
                let mut claim = PaymentClaim::new(product, amount, &signature);
                if let Some(plan) = plan {
                    claim = claim.with_plan(plan);
                }
                let response = client.record_payment(&claim).await?;
                match cli.format {
                    Format::Table => {
                        if response.duplicate {
                            println!("ℹ️ Signature already recorded, nothing changed");
                        } else {
                            println!("✅ Payment recorded");
                        }
                        print_payments(std::slice::from_ref(&response.payment));
                        println!();
                        print_entitlement(&response.entitlement);
                    }
                    format => print_structured(&response, format)?,
                }
            }
            PaymentCommands::List => {
                let payments = client.payments().await?;
                match cli.format {
                    Format::Table => print_payments(&payments),
                    format => print_structured(&payments, format)?,
                }
            }
        },

        Commands::Subscription => {
            let view = client.subscription().await?;
            match cli.format {
                Format::Table => print_entitlement(&view),
                format => print_structured(&view, format)?,
            }
        }

        Commands::Templates => {
            let templates = client.templates().await?;
            match cli.format {
                Format::Table => {
                    println!("🎨 TEMPLATES");
                    for t in &templates {
                        println!("{:<10} aliases: {}", t.id.to_string(), t.aliases.join(", "));
                    }
                }
                format => print_structured(&templates, format)?,
            }
        }

        Commands::Render { template, content, out } => {
            let digest = render_to_dir(&template, &content, &out)?;
            println!("✅ Rendered '{}' into {}", template, out.display());
            println!("   digest: {}", digest);
        }
    }

    Ok(())
}

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use spark_core::credentials::{
    FileCredentialStore, OAuthClient, OAuthConfig, OAuthEndpoints, DEFAULT_RESERVED_SCOPE,
};
use spark_core::http::interceptors::AUTHORIZATION_HEADER;
use spark_core::http::{Method, ProgressEvent, ResponseBody};
use spark_core::upload::{SessionBinding, UploadPhase, UploadRequest};
use spark_core::{
    ClientConfig, CredentialsConfig, CredentialsManager, RequestOptions, SparkClient,
    StaticServiceCatalog, Token,
};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_PROFILE: &str = "default";
const DEFAULT_CLIENT_ID: &str = "spark-cli";
const DEFAULT_SCOPE: &str = "spark:all spark:kms";
const DEFAULT_SERVICES: &str = "hydra=https://webexapis.com/v1";

#[derive(Parser, Debug)]
#[command(author, version, about = "Spark platform CLI")]
struct Cli {
    /// Log requests and token activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a supertoken for a profile
    Login(LoginArgs),
    /// Print a token summary, downscoped when --scope is given
    Token(TokenArgs),
    /// Force a supertoken refresh and persist the result
    Refresh(ProfileArgs),
    /// Send a request through the interceptor pipeline
    Request(RequestArgs),
    /// Upload a file through an initialize/upload/finalize session
    Upload(UploadArgs),
    /// Revoke and forget stored credentials for a profile
    Logout(ProfileArgs),
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Profile name for stored credentials
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// Access token of the supertoken
    #[arg(long = "access-token")]
    access_token: String,
    /// Refresh token, required for refresh and downscoping
    #[arg(long = "refresh-token")]
    refresh_token: Option<String>,
    /// Remaining lifetime of the access token in seconds
    #[arg(long = "expires-in")]
    expires_in: Option<i64>,
    /// Scope the supertoken was granted (defaults to SPARK_SCOPE)
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Args, Debug)]
struct TokenArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// Downscope to this space-separated scope
    #[arg(long)]
    scope: Option<String>,
    /// Print only the access token
    #[arg(long)]
    raw: bool,
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// HTTP method (GET, POST, ...)
    method: String,
    /// Absolute request URI
    #[arg(required_unless_present = "service", conflicts_with = "service")]
    uri: Option<String>,
    /// Catalog service name
    #[arg(long, requires = "resource")]
    service: Option<String>,
    /// Resource path under the service
    #[arg(long, requires = "service")]
    resource: Option<String>,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
    /// Send the request without an authorization header
    #[arg(long = "no-auth")]
    no_auth: bool,
}

#[derive(Args, Debug)]
struct UploadArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// File to upload
    file: PathBuf,
    /// URI that opens the upload session
    #[arg(long = "init")]
    init: String,
    /// Session field holding the upload URL
    #[arg(long = "upload-field", default_value = "uploadUrl")]
    upload_field: String,
    /// Session field holding the finalize URL
    #[arg(long = "finalize-field", default_value = "finishUploadUrl")]
    finalize_field: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Login(args) => login(args).await?,
        Commands::Token(args) => token(args).await?,
        Commands::Refresh(args) => refresh(args).await?,
        Commands::Request(args) => request(args).await?,
        Commands::Upload(args) => upload(args).await?,
        Commands::Logout(args) => logout(args).await?,
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn login(args: LoginArgs) -> Result<()> {
    let manager = credentials_manager(&args.profile.profile)?;
    let scope = args.scope.unwrap_or_else(configured_scope);
    let mut supertoken = Token::new(args.access_token, &scope);
    if let Some(refresh_token) = args.refresh_token {
        supertoken = supertoken.with_refresh_token(refresh_token);
    }
    if let Some(seconds) = args.expires_in {
        supertoken = supertoken.with_expires_in(chrono::Duration::seconds(seconds));
    }
    manager
        .set_supertoken(supertoken)
        .await
        .context("failed to store supertoken")?;
    println!("Supertoken stored for profile '{}'.", args.profile.profile);
    Ok(())
}

async fn token(args: TokenArgs) -> Result<()> {
    let manager = restored_manager(&args.profile.profile).await?;
    let token = manager
        .get_user_token(args.scope.as_deref())
        .await
        .context("failed to obtain token")?;
    if args.raw {
        println!("{}", token.access_token);
    } else {
        print_token(&token);
    }
    Ok(())
}

async fn refresh(args: ProfileArgs) -> Result<()> {
    let manager = restored_manager(&args.profile).await?;
    let token = manager.refresh().await.context("failed to refresh supertoken")?;
    println!("Supertoken refreshed for profile '{}'.", args.profile);
    print_token(&token);
    Ok(())
}

async fn request(args: RequestArgs) -> Result<()> {
    let client = build_client(&args.profile.profile).await?;
    let options = build_request_options(&args)?;
    let response = client
        .request(options)
        .await
        .with_context(|| format!("{} request failed", args.method.to_uppercase()))?;

    eprintln!("{} {}", response.status_code, response.url);
    print_body(&response.body)?;
    Ok(())
}

async fn upload(args: UploadArgs) -> Result<()> {
    let file = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let client = build_client(&args.profile.profile).await?;

    let (progress, mut events) = mpsc::unbounded_channel::<ProgressEvent>();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.total {
                Some(total) => eprint!("\ruploaded {}/{} bytes", event.loaded, total),
                None => eprint!("\ruploaded {} bytes", event.loaded),
            }
        }
        eprintln!();
    });

    let request = UploadRequest::new(file, RequestOptions::post(args.init))
        .with_upload(UploadPhase::default().bind(SessionBinding::uri_from(&args.upload_field)))
        .with_finalize(UploadPhase::default().bind(SessionBinding::uri_from(&args.finalize_field)))
        .with_progress(progress);
    let result = client.upload(request).await;
    // The request owned the only sender; the reporter ends once it drops.
    let _ = reporter.await;

    let body = result.context("upload failed")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn logout(args: ProfileArgs) -> Result<()> {
    let manager = restored_manager(&args.profile).await?;
    manager.logout().await;
    println!("Deleted credentials for profile '{}'.", args.profile);
    Ok(())
}

fn build_request_options(args: &RequestArgs) -> Result<RequestOptions> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("invalid HTTP method '{}'", args.method))?;

    let mut options = match (&args.uri, &args.service, &args.resource) {
        (Some(uri), _, _) => RequestOptions::new(method, uri.as_str()),
        (None, Some(service), Some(resource)) => {
            RequestOptions::service(service.as_str(), resource.as_str()).with_method(method)
        }
        _ => bail!("either a URI or --service with --resource is required"),
    };

    if let Some(body) = &args.body {
        let body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
        options = options.with_json_body(body);
    }
    if args.no_auth {
        options = options.without_header(AUTHORIZATION_HEADER);
    }
    Ok(options)
}

async fn build_client(profile: &str) -> Result<SparkClient> {
    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let catalog = build_catalog()?;
    let credentials = restored_manager(profile).await?;
    SparkClient::builder(credentials, Arc::new(catalog))
        .config(config)
        .build()
        .context("failed to build client")
}

fn build_catalog() -> Result<StaticServiceCatalog> {
    let definitions = non_empty_var("SPARK_SERVICES").unwrap_or_else(|| DEFAULT_SERVICES.to_owned());
    StaticServiceCatalog::parse(&definitions).context("invalid SPARK_SERVICES")
}

async fn restored_manager(profile: &str) -> Result<CredentialsManager> {
    let manager = credentials_manager(profile)?;
    manager
        .initialize(None)
        .await
        .context("failed to load stored credentials")?;
    debug!(profile, authorized = manager.can_authorize().await, "cli: credentials loaded");
    Ok(manager)
}

fn credentials_manager(profile: &str) -> Result<CredentialsManager> {
    let store = FileCredentialStore::with_default_locator()
        .context("unable to initialise credential store")?;
    let oauth = build_oauth_client()?;
    Ok(CredentialsManager::with_store(
        oauth,
        CredentialsConfig::new(configured_scope()),
        Arc::new(store),
        profile,
    ))
}

fn build_oauth_client() -> Result<OAuthClient> {
    let mut config =
        OAuthConfig::new(non_empty_var("SPARK_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_owned()));
    if let Some(secret) = non_empty_var("SPARK_CLIENT_SECRET") {
        config = config.with_secret(secret);
    }

    let mut endpoints = OAuthEndpoints::production().context("invalid default OAuth endpoints")?;
    if let Some(token_url) = non_empty_var("SPARK_TOKEN_URL") {
        endpoints.token_url = Url::parse(&token_url).context("invalid SPARK_TOKEN_URL")?;
    }
    if let Some(revoke_url) = non_empty_var("SPARK_REVOKE_URL") {
        endpoints.revoke_url = Url::parse(&revoke_url).context("invalid SPARK_REVOKE_URL")?;
    }

    OAuthClient::with_endpoints(config, endpoints).context("failed to build OAuth client")
}

/// `SPARK_SCOPE`, always including the reserved scope.
fn configured_scope() -> String {
    let scope = non_empty_var("SPARK_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_owned());
    if scope.split_whitespace().any(|s| s == DEFAULT_RESERVED_SCOPE) {
        scope
    } else {
        format!("{scope} {DEFAULT_RESERVED_SCOPE}")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn print_token(token: &Token) {
    println!("Scope: {}", token.scope);
    println!("Type: {}", token.token_type);
    match token.expires_at {
        Some(expires_at) => println!("Expires: {}", expires_at.to_rfc3339()),
        None => println!("Expires: unknown"),
    }
    println!(
        "Refreshable: {}",
        if token.can_refresh() { "yes" } else { "no" }
    );
}

fn print_body(body: &ResponseBody) -> Result<()> {
    match body {
        ResponseBody::Empty => {}
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        ResponseBody::Text(text) => println!("{text}"),
        ResponseBody::Binary(bytes) => eprintln!("<{} bytes of binary data>", bytes.len()),
        ResponseBody::Failure(message) => eprintln!("network failure: {message}"),
    }
    Ok(())
}

//! Lost-and-found API command line client
//!
//! Issues a single request through the session-aware pipeline and prints the
//! JSON response body. Useful for poking the backend with the same renewal
//! behavior the web client has:
//!
//! ```text
//! lostfound [--config PATH] [--header NAME:VALUE]... METHOD PATH [JSON_BODY]
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use lostfound_client::{ApiClient, ClientConfig, navigation_channel};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command line
#[derive(Debug, PartialEq)]
struct Args {
    config: Option<String>,
    headers: Vec<(String, String)>,
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config = None;
    let mut headers = Vec::new();
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().context("--config requires a path")?;
                config = Some(value.clone());
            }
            "--header" => {
                let value = iter.next().context("--header requires NAME:VALUE")?;
                let (name, value) = value
                    .split_once(':')
                    .with_context(|| format!("invalid header {value:?}, expected NAME:VALUE"))?;
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let method = positional
        .next()
        .context("missing METHOD (GET, POST, PUT, PATCH, DELETE)")?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method {method:?}"))?;
    let path = positional.next().context("missing PATH")?;
    if !path.starts_with('/') {
        bail!("PATH must start with '/', got {path:?}");
    }
    let body = positional
        .next()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(&raw)
                .with_context(|| format!("body is not valid JSON: {raw}"))
        })
        .transpose()?;
    if let Some(extra) = positional.next() {
        bail!("unexpected argument {extra:?}");
    }

    Ok(Args {
        config,
        headers,
        method,
        path,
        body,
    })
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value =
            HeaderValue::from_str(value).with_context(|| format!("invalid header value for {name}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    let config_path = ClientConfig::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.client.base_url,
        renewal_path = %config.client.renewal_path,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let (redirect, mut navigation) = navigation_channel(config.client.login_path.clone());
    let client = ApiClient::from_config(&config, Arc::new(redirect))
        .context("failed to build API client")?;

    let headers = header_map(&args.headers)?;
    let outcome = client
        .send(
            args.method.clone(),
            &args.path,
            args.body.as_ref(),
            (!headers.is_empty()).then_some(headers),
        )
        .await;

    while let Ok(event) = navigation.try_recv() {
        warn!(target_path = %event.target, reason = ?event.reason, "login required");
    }

    match outcome {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) => {
            error!(
                status = ?e.status,
                classification = %e.classification,
                error = %e.message,
                "request failed"
            );
            println!("{}", serde_json::to_string_pretty(&e)?);
            bail!("{} {} failed: {e}", args.method, args.path)
        }
    }
}

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use reelsense_core::auth::{Claims, Session, SubjectId, TokenService};
use reelsense_core::models::Role;
use reelsense_core::{Config, SessionClient};

fn open_client(config: &Config, api_url: Option<&str>) -> Result<(Arc<Session>, SessionClient)> {
    let session = Arc::new(config.open_session()?);
    let client = match api_url {
        Some(url) => SessionClient::new(url, session.clone())?
            .with_retry_policy(config.retry_policy())
            .with_timeout(config.request_timeout()),
        None => SessionClient::from_config(config, session.clone())?,
    };
    Ok((session, client))
}

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim();
    match (email.is_empty(), default) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => bail!("Email required"),
        (false, _) => Ok(email.to_string()),
    }
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        bail!("Password required");
    }
    Ok(password)
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.trim().to_lowercase());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

pub async fn login(config: &mut Config, api_url: Option<&str>, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = prompt_password()?;

    let (_, client) = open_client(config, api_url)?;
    let auth = client.login(&email, &password).await?;
    remember_email(config, &email);

    match auth.user {
        Some(user) => println!("Signed in as {}", user.email),
        None => println!("Signed in"),
    }
    Ok(())
}

pub async fn register(config: &mut Config, api_url: Option<&str>, email: &str, admin: bool) -> Result<()> {
    let password = prompt_password()?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let role = admin.then_some(Role::Admin);
    let (_, client) = open_client(config, api_url)?;
    let auth = client.register(email, &password, role).await?;
    remember_email(config, email);

    if auth.access_token.is_some() {
        println!("Account created, signed in as {}", email.trim());
    } else {
        println!("Account created; run `reelsense login` to sign in");
    }
    Ok(())
}

pub async fn whoami(config: &Config, api_url: Option<&str>) -> Result<()> {
    let (_, client) = open_client(config, api_url)?;
    let user = client.current_user().await?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

pub fn logout(config: &Config, api_url: Option<&str>) -> Result<()> {
    let (_, client) = open_client(config, api_url)?;
    client.logout()?;
    println!("Signed out");
    Ok(())
}

pub fn status(config: &Config) -> Result<()> {
    let session = config.open_session()?;
    if !session.is_authenticated() {
        println!("Not signed in");
        return Ok(());
    }
    match session.claims() {
        Some(claims) => println!("{}", describe(&claims, Utc::now())),
        None => println!("Signed in (opaque token)"),
    }
    Ok(())
}

/// One-line summary of a session's claims.
fn describe(claims: &Claims, now: DateTime<Utc>) -> String {
    let expiry = match claims.expires_at() {
        Some(at) if claims.is_expired_at(now) => format!("expired {}", at.format("%Y-%m-%d %H:%M UTC")),
        Some(at) => {
            let left = at - now;
            format!(
                "expires {} ({}h {}m left)",
                at.format("%Y-%m-%d %H:%M UTC"),
                left.num_hours(),
                left.num_minutes() % 60
            )
        }
        None => "no expiry".to_string(),
    };
    format!("Signed in as {} (user {}), {}", claims.email, claims.user_id, expiry)
}

pub fn token_secret() -> Result<()> {
    println!("{}", TokenService::generate_secret());
    Ok(())
}

pub fn token_issue(config: &Config, user_id: &str, email: &str, ttl_hours: Option<i64>) -> Result<()> {
    let mut service = config.token_service()?;
    if let Some(hours) = ttl_hours {
        service = service
            .with_ttl(ttl_from_hours(hours)?)
            .context("Invalid --ttl-hours")?;
    }
    let token = service
        .issue(parse_subject(user_id), email)
        .context("Failed to issue token")?;
    println!("{}", token);
    Ok(())
}

pub fn token_verify(config: &Config, token: &str) -> Result<()> {
    let service = config.token_service()?;
    let claims = service.verify(token.trim()).context("Token rejected")?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

pub fn token_inspect(token: &str) -> Result<()> {
    let claims = Claims::peek(token.trim()).context("Token payload is not readable")?;
    let now = Utc::now();
    let report = json!({
        "claims": claims,
        "expires_at": claims.expires_at().map(|at| at.to_rfc3339()),
        "expired": claims.is_expired_at(now),
        "signature_checked": false,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn ttl_from_hours(hours: i64) -> Result<Duration> {
    if hours <= 0 {
        bail!("--ttl-hours must be positive");
    }
    Duration::try_hours(hours).with_context(|| format!("--ttl-hours is out of range: {}", hours))
}

/// Numeric ids stay numeric in the payload.
fn parse_subject(raw: &str) -> SubjectId {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map(SubjectId::Number)
        .unwrap_or_else(|_| SubjectId::Text(raw.to_string()))
}

use anyhow::{Context, Result, bail};

/// Which runtime backs editor workspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeProvider {
    /// Legacy in-browser container runtime. Out of scope here; the HTTP
    /// surface rejects runtime endpoints in this mode.
    Webcontainer,
    /// Remote compose deployments brokered through the platform.
    Dokploy,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub environment: String,
    pub sentry_dsn: Option<String>,
    pub provider: RuntimeProvider,
    pub enable_webcontainer_legacy: bool,
    pub dokploy_base_url: Option<String>,
    pub dokploy_api_key: Option<String>,
    pub dokploy_server_id: Option<String>,
    pub dokploy_canary_server_id: Option<String>,
    pub canary_rollout_percent: f64,
    pub session_idle_min: i64,
    pub heartbeat_sec: u64,
    pub token_secret: Option<String>,
    pub cleanup_secret: Option<String>,
}

/// Raw env var values as strings. Tests build this directly so they never
/// mutate process-global environment.
#[derive(Debug, Default)]
pub struct RawRuntimeEnv<'a> {
    pub port: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub enable_webcontainer_legacy: Option<&'a str>,
    pub dokploy_base_url: Option<&'a str>,
    pub dokploy_api_key: Option<&'a str>,
    pub dokploy_server_id: Option<&'a str>,
    pub dokploy_canary_server_id: Option<&'a str>,
    pub canary_rollout_percent: Option<&'a str>,
    pub session_idle_min: Option<&'a str>,
    pub heartbeat_sec: Option<&'a str>,
    pub token_secret: Option<&'a str>,
    pub cleanup_secret: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(String::from)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let vars: Vec<Option<String>> = [
            "PORT",
            "ENVIRONMENT",
            "SENTRY_DSN",
            "RUNTIME_PROVIDER",
            "ENABLE_WEBCONTAINER_LEGACY",
            "DOKPLOY_BASE_URL",
            "DOKPLOY_API_KEY",
            "DOKPLOY_SERVER_ID",
            "DOKPLOY_CANARY_SERVER_ID",
            "DOKPLOY_CANARY_ROLLOUT_PERCENT",
            "RUNTIME_SESSION_IDLE_MIN",
            "RUNTIME_HEARTBEAT_SEC",
            "RUNTIME_TOKEN_SECRET",
            "RUNTIME_CLEANUP_SECRET",
        ]
        .iter()
        .map(|name| std::env::var(name).ok())
        .collect();

        Self::from_raw_values(RawRuntimeEnv {
            port: vars[0].as_deref(),
            environment: vars[1].as_deref(),
            sentry_dsn: vars[2].as_deref(),
            provider: vars[3].as_deref(),
            enable_webcontainer_legacy: vars[4].as_deref(),
            dokploy_base_url: vars[5].as_deref(),
            dokploy_api_key: vars[6].as_deref(),
            dokploy_server_id: vars[7].as_deref(),
            dokploy_canary_server_id: vars[8].as_deref(),
            canary_rollout_percent: vars[9].as_deref(),
            session_idle_min: vars[10].as_deref(),
            heartbeat_sec: vars[11].as_deref(),
            token_secret: vars[12].as_deref(),
            cleanup_secret: vars[13].as_deref(),
        })
    }

    pub fn from_raw_values(raw: RawRuntimeEnv<'_>) -> Self {
        let port = raw.port.and_then(|v| v.parse().ok()).unwrap_or(8081);

        let environment = non_empty(raw.environment).unwrap_or_else(|| "local".to_string());

        let provider = match raw.provider.map(str::to_ascii_lowercase).as_deref() {
            Some("dokploy") => RuntimeProvider::Dokploy,
            _ => RuntimeProvider::Webcontainer,
        };

        // The legacy runtime stays available unless the deployment is fully
        // remote or it is switched off explicitly.
        let enable_webcontainer_legacy = raw
            .enable_webcontainer_legacy
            .and_then(parse_bool)
            .unwrap_or(provider == RuntimeProvider::Webcontainer);

        let canary_rollout_percent = raw
            .canary_rollout_percent
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) })
            .unwrap_or(0.0);

        let session_idle_min = raw
            .session_idle_min
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(15);

        let heartbeat_sec = raw
            .heartbeat_sec
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v >= 5)
            .unwrap_or(30);

        RuntimeConfig {
            port,
            environment,
            sentry_dsn: non_empty(raw.sentry_dsn),
            provider,
            enable_webcontainer_legacy,
            dokploy_base_url: non_empty(raw.dokploy_base_url),
            dokploy_api_key: non_empty(raw.dokploy_api_key),
            dokploy_server_id: non_empty(raw.dokploy_server_id),
            dokploy_canary_server_id: non_empty(raw.dokploy_canary_server_id),
            canary_rollout_percent,
            session_idle_min,
            heartbeat_sec,
            token_secret: non_empty(raw.token_secret),
            cleanup_secret: non_empty(raw.cleanup_secret),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.provider == RuntimeProvider::Dokploy
    }

    /// Fail fast at startup: a remote deployment with missing credentials
    /// or an impossible canary setup must never begin serving.
    pub fn validate(&self) -> Result<()> {
        if !self.is_remote() {
            return Ok(());
        }
        self.dokploy_base_url
            .as_deref()
            .context("RUNTIME_PROVIDER=dokploy requires DOKPLOY_BASE_URL")?;
        self.dokploy_api_key
            .as_deref()
            .context("RUNTIME_PROVIDER=dokploy requires DOKPLOY_API_KEY")?;
        self.token_secret
            .as_deref()
            .context("RUNTIME_PROVIDER=dokploy requires RUNTIME_TOKEN_SECRET")?;
        if self.canary_rollout_percent > 0.0 && self.dokploy_canary_server_id.is_none() {
            bail!(
                "DOKPLOY_CANARY_ROLLOUT_PERCENT={} requires DOKPLOY_CANARY_SERVER_ID",
                self.canary_rollout_percent
            );
        }
        Ok(())
    }
}

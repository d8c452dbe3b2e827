//! Daemon configuration from flags and environment.

use clap::Parser;
use edgecoder_economy::IssuanceParams;
use edgecoder_types::peer::NetworkMode;
use std::path::PathBuf;

/// The EdgeCoder coordinator daemon.
#[derive(Debug, Parser)]
#[command(name = "edgecoderd", version, about)]
pub struct NodeConfig {
    /// Which mesh this coordinator participates in.
    #[arg(long, env = "NETWORK_MODE", default_value = "public_mesh")]
    pub network_mode: String,

    /// Public URL other peers reach this coordinator at.
    #[arg(long, env = "COORDINATOR_URL", default_value = "http://127.0.0.1:8440")]
    pub coordinator_url: String,

    /// Comma-separated seed coordinator URLs.
    #[arg(long, env = "COORDINATOR_BOOTSTRAP_URLS", value_delimiter = ',', num_args = 0..)]
    pub bootstrap_urls: Vec<String>,

    /// PKCS#8 PEM private key; takes precedence over the key file.
    #[arg(long, env = "COORDINATOR_PRIVATE_KEY_PEM", hide_env_values = true)]
    pub private_key_pem: Option<String>,

    /// Key file, generated on first boot when absent.
    #[arg(long, env = "COORDINATOR_KEY_FILE", default_value = "data/coordinator-key.pem")]
    pub key_file: PathBuf,

    /// Stable peer id; generated and derived from the key when absent.
    #[arg(long, env = "COORDINATOR_PEER_ID")]
    pub peer_id: Option<String>,

    /// Shared mesh token; unset leaves the mesh open.
    #[arg(long, env = "MESH_AUTH_TOKEN", hide_env_values = true)]
    pub mesh_auth_token: Option<String>,

    /// Operator token for privileged admin calls.
    #[arg(long, env = "ADMIN_API_TOKEN", hide_env_values = true)]
    pub admin_api_token: Option<String>,

    /// Bind address for the HTTP surface.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8440")]
    pub listen_addr: String,

    // --- Issuance ---
    #[arg(long, env = "ISSUANCE_WINDOW_MS", default_value_t = 3_600_000)]
    pub issuance_window_ms: u64,
    #[arg(long, env = "ISSUANCE_RECALC_MS", default_value_t = 300_000)]
    pub issuance_recalc_ms: u64,
    #[arg(long, env = "ISSUANCE_BASE_DAILY_POOL_TOKENS", default_value_t = 1_000.0)]
    pub issuance_base_daily_pool_tokens: f64,
    #[arg(long, env = "ISSUANCE_MIN_DAILY_POOL_TOKENS", default_value_t = 250.0)]
    pub issuance_min_daily_pool_tokens: f64,
    #[arg(long, env = "ISSUANCE_MAX_DAILY_POOL_TOKENS", default_value_t = 4_000.0)]
    pub issuance_max_daily_pool_tokens: f64,
    #[arg(long, env = "ISSUANCE_LOAD_CURVE_SLOPE", default_value_t = 0.5)]
    pub issuance_load_curve_slope: f64,
    #[arg(long, env = "ISSUANCE_SMOOTHING_ALPHA", default_value_t = 0.3)]
    pub issuance_smoothing_alpha: f64,
    #[arg(long, env = "ISSUANCE_COORDINATOR_SHARE", default_value_t = 0.05)]
    pub issuance_coordinator_share: f64,
    #[arg(long, env = "ISSUANCE_RESERVE_SHARE", default_value_t = 0.10)]
    pub issuance_reserve_share: f64,

    // --- Anchoring ---
    #[arg(long, env = "ANCHOR_INTERVAL_MS", default_value_t = 600_000)]
    pub anchor_interval_ms: u64,
    #[arg(long, env = "ANCHOR_CONFIRMATION_THRESHOLD", default_value_t = 3)]
    pub anchor_confirmation_threshold: u32,

    // --- Release attestation ---
    /// File of concatenated SPKI PEM release-signing keys.
    #[arg(long, env = "RELEASE_KEYS_FILE")]
    pub release_keys_file: Option<PathBuf>,
    /// Release channel URL serving the signed manifest feed.
    #[arg(long, env = "RELEASE_MANIFEST_URL")]
    pub release_manifest_url: Option<String>,
    #[arg(long, env = "RELEASE_MANIFEST_REFRESH_MS", default_value_t = 3_600_000)]
    pub release_manifest_refresh_ms: u64,

    // --- Credit policy ---
    #[arg(long, env = "MIN_CONTRIBUTION_RATIO", default_value_t = 1.0)]
    pub min_contribution_ratio: f64,
    #[arg(long, env = "CONTRIBUTION_BURST_CREDITS", default_value_t = 25.0)]
    pub contribution_burst_credits: f64,
    #[arg(long, env = "COORDINATOR_FEE_BPS", default_value_t = 250)]
    pub coordinator_fee_bps: u32,
}

impl NodeConfig {
    /// Parse `NETWORK_MODE`; anything unrecognized is a fatal config error.
    pub fn parsed_network_mode(&self) -> Result<NetworkMode, anyhow::Error> {
        match self.network_mode.as_str() {
            "public_mesh" => Ok(NetworkMode::PublicMesh),
            "enterprise_overlay" => Ok(NetworkMode::EnterpriseOverlay),
            other => anyhow::bail!("unknown NETWORK_MODE {other:?}"),
        }
    }

    pub fn issuance_params(&self) -> IssuanceParams {
        IssuanceParams {
            window_ms: self.issuance_window_ms,
            base_daily_pool_tokens: self.issuance_base_daily_pool_tokens,
            min_daily_pool_tokens: self.issuance_min_daily_pool_tokens,
            max_daily_pool_tokens: self.issuance_max_daily_pool_tokens,
            load_curve_slope: self.issuance_load_curve_slope,
            smoothing_alpha: self.issuance_smoothing_alpha,
            coordinator_share: self.issuance_coordinator_share,
            reserve_share: self.issuance_reserve_share,
        }
    }

    /// Seeds with empty entries stripped.
    pub fn seeds(&self) -> Vec<String> {
        self.bootstrap_urls
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .collect()
    }
}

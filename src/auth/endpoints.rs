use sha2::{Digest, Sha256};

/// Seconds before token expiry at which a refresh is forced on the request path.
pub const REFRESH_BEFORE_EXPIRY_SECS: i64 = 300;

/// Wider threshold used by background reconciliation sweeps.
pub const NEAR_EXPIRY_SECS: i64 = 600;

/// Kiro IDE version baked into the wire identity. Upstream inspects the
/// user agent, so these values must stay in the exact emitted form.
pub const KIRO_VERSION: &str = "0.2.13";
pub const NODE_VERSION: &str = "20.16.0";
const OS_RELEASE: &str = "6.1.0";

const FALLBACK_MACHINE_SEED: &str = "kiro-relay-default-machine";

/// Returns the Kiro Desktop (social) token refresh URL for the given region.
///
/// Example: `social_refresh_url("us-east-1")` →
/// `"https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"`
pub fn social_refresh_url(region: &str) -> String {
    format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", region)
}

/// Returns the AWS SSO OIDC token URL used by IdC accounts.
pub fn oidc_token_url(region: &str) -> String {
    format!("https://oidc.{}.amazonaws.com/token", region)
}

/// Returns the CodeWhisperer generation host for the given region.
pub fn codewhisperer_host(region: &str) -> String {
    format!("https://codewhisperer.{}.amazonaws.com", region)
}

/// Returns the Q host used for usage-limit queries.
pub fn q_host(region: &str) -> String {
    format!("https://q.{}.amazonaws.com", region)
}

/// Machine identifier: hex SHA-256 of the first non-empty of machine uuid,
/// profile ARN, client id. Falls back to a constant seed so the identity is
/// stable even for credential records that carry none of the three.
pub fn machine_id(uuid: Option<&str>, profile_arn: Option<&str>, client_id: Option<&str>) -> String {
    let seed = [uuid, profile_arn, client_id]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or(FALLBACK_MACHINE_SEED);

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        _ => "linux",
    }
}

/// The full SDK user agent. Bit-exact: Kiro upstream inspects this string.
pub fn user_agent(machine_id: &str) -> String {
    format!(
        "aws-sdk-js/1.0.0 ua/2.1 os/{}#{} lang/js md/nodejs#{} api/codewhispererruntime#1.0.0 m/E KiroIDE-{}-{}",
        os_name(),
        OS_RELEASE,
        NODE_VERSION,
        KIRO_VERSION,
        machine_id
    )
}

/// The shorter `x-amz-user-agent` companion header.
pub fn amz_user_agent(machine_id: &str) -> String {
    format!("aws-sdk-js/1.0.0 KiroIDE-{}-{}", KIRO_VERSION, machine_id)
}

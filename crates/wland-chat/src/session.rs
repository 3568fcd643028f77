use rand::Rng;
use rand::distributions::Alphanumeric;
use wland_core::SessionIdProvider;

const TEMP_PREFIX: &str = "temp_";
const TEMP_SUFFIX_LEN: usize = 9;

/// Fingerprint when available, otherwise `temp_<ms>_<random9>`.
pub fn resolve_session_id(provider: &dyn SessionIdProvider, now_ms: i64) -> String {
    provider
        .fingerprint()
        .map(|fp| fp.trim().to_string())
        .filter(|fp| !fp.is_empty())
        .unwrap_or_else(|| temporary_session_id(now_ms))
}

pub fn temporary_session_id(now_ms: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{TEMP_PREFIX}{now_ms}_{suffix}")
}

pub fn is_temporary(session_id: &str) -> bool {
    session_id.starts_with(TEMP_PREFIX)
}

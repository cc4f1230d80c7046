use serde::Deserialize;
use subtle::ConstantTimeEq;

#[derive(Deserialize)]
struct ConnectFrame {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Verify the initial WebSocket connect frame `{"token"?, "user_id"}`.
///
/// Returns the caller's user id when accepted. A token is checked only
/// when one is configured (loopback mode runs without one); the user id
/// is always required.
pub fn verify_connect(msg: &str, expected: &Option<String>) -> Option<String> {
    let frame: ConnectFrame = serde_json::from_str(msg).ok()?;

    if let Some(expected) = expected {
        let token = frame.token?;
        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            return None;
        }
    }

    frame
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

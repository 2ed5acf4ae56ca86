//! Request admission for HTTP-style callers.
//!
//! Handlers extract the caller's session identifier, check it once, and on
//! rejection answer with status 429 and the JSON body produced here.

use serde::Serialize;

use super::limiter::{LimiterContext, RateLimiter, WindowStatus};
use crate::error::Result;

/// HTTP status for rejected requests.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// JSON body returned with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    /// Seconds until the caller's window reopens
    pub retry_after: u64,
}

/// The decision a handler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed(WindowStatus),
    Rejected {
        status: u16,
        body: RejectionBody,
        window: WindowStatus,
    },
}

impl Admission {
    /// Turn a window status into an admission decision.
    pub fn from_status(window: WindowStatus) -> Self {
        if window.allowed {
            return Admission::Allowed(window);
        }

        let body = RejectionBody {
            error: "rate_limited".to_string(),
            message: format!(
                "Too many requests: limit of {} per window reached, retry in {}s",
                window.limit, window.retry_after_secs
            ),
            retry_after: window.retry_after_secs,
        };

        Admission::Rejected {
            status: TOO_MANY_REQUESTS,
            body,
            window,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }

    pub fn window(&self) -> &WindowStatus {
        match self {
            Admission::Allowed(window) => window,
            Admission::Rejected { window, .. } => window,
        }
    }

    /// Status code a handler should answer with when it proceeds or rejects.
    pub fn http_status(&self) -> u16 {
        match self {
            Admission::Allowed(_) => 200,
            Admission::Rejected { status, .. } => *status,
        }
    }

    /// JSON rendering: the rejection body, or the window status when allowed.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Admission::Allowed(window) => serde_json::json!({
                "allowed": true,
                "window": window,
            }),
            Admission::Rejected { body, window, .. } => serde_json::json!({
                "allowed": false,
                "status": self.http_status(),
                "body": body,
                "window": window,
            }),
        }
    }
}

/// Check a caller once with an explicit limit.
pub async fn admit(ctx: &LimiterContext, session_id: Option<&str>, limit: u64) -> Result<Admission> {
    let limiter = ctx.limiter(session_id, limit)?;
    admit_with(&limiter).await
}

/// Check a caller once through an already-built limiter.
pub async fn admit_with(limiter: &RateLimiter) -> Result<Admission> {
    Ok(Admission::from_status(limiter.check_status().await?))
}

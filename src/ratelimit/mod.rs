//! Rate limiting logic and state management.

mod admission;
mod key;
mod limiter;
mod locks;
mod rules;
mod window;

pub use admission::{admit, admit_with, Admission, RejectionBody, TOO_MANY_REQUESTS};
pub use key::{encode_file_component, LimitKey, GUEST_KEY};
pub use limiter::{LimiterContext, LimiterSettings, RateLimiter, WindowStatus};
pub use locks::{KeyGuard, KeyLocks};
pub use rules::{LimitRule, LimitRules};
pub use window::{RateWindow, Transition, DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS, RECORD_VERSION};

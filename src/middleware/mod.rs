pub mod rate_limiting;

pub use rate_limiting::{
    client_identity, rate_limit_middleware, InMemoryStorage, LimiterMode, RateDecision,
    RateLimitResult, RateLimitRules, RateLimitStorage, RateLimiter, RateRule,
};

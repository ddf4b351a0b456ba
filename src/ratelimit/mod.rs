//! Rate limiting logic and state management.

mod caller;
mod counter;
mod limiter;
mod pattern;
mod permission;
mod resolver;
mod rules;
mod store;

pub use caller::{Caller, CallerKey, CallerScope};
pub use counter::{CounterEntry, Decision};
pub use limiter::{Admission, RateLimiter};
pub use pattern::EndpointPattern;
pub use permission::{Permission, Tier, UnknownPermission};
pub use resolver::{LimitResolver, ResolverBuilder};
pub use rules::{
    DefaultLimits, EndpointRule, LimitConfig, LimitsConfig, RateLimitRule, TimeUnit, MAX_WINDOW,
};
pub use store::{
    CleanupTask, CounterStore, HealthStatus, MemoryStats, DEFAULT_MAX_ENTRIES,
    DEFAULT_STALE_AFTER, ENTRY_OVERHEAD_BYTES, TIMESTAMP_BYTES,
};

pub mod keys;
pub mod rate_limit;
pub mod token_bucket;
pub use keys::{AffinityTag, BucketKeys};
pub use rate_limit::{RateLimiter, TokenGrant};
pub use token_bucket::{BucketParams, BucketState};

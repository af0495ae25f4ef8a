//! Lua bodies evaluated atomically by the store.

/// Delete the lock key only while it still holds the caller's fencing token.
///
/// KEYS[1] = lock key
/// ARGV[1] = fencing token
/// Returns 1 when the key was deleted, 0 otherwise.
pub const UNLOCK: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
end
return 0
"#;

/// Refill a token bucket, then take `requested` tokens if enough are available.
///
/// KEYS[1] = available tokens
/// KEYS[2] = last refill timestamp (unix microseconds)
/// ARGV[1] = now (unix microseconds)
/// ARGV[2] = capacity
/// ARGV[3] = ttl seconds for both keys
/// ARGV[4] = tokens requested
/// ARGV[5] = microseconds needed to generate one token
/// Returns {tokens_remaining, granted} where granted is 1 or 0.
pub const TOKEN_BUCKET: &str = r#"
local tokens_key = KEYS[1]
local updated_key = KEYS[2]
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local ttl = ARGV[3]
local requested = tonumber(ARGV[4])
local interval = tonumber(ARGV[5])

local last = tonumber(redis.call("get", updated_key))
if last == nil then
  last = now
end

local tokens = tonumber(redis.call("get", tokens_key))
if tokens == nil then
  tokens = capacity
end
tokens = math.max(0, math.min(capacity, tokens))

local elapsed = math.max(0, now - last)
local refill = math.min(capacity - tokens, math.floor(elapsed / interval))
tokens = tokens + refill

-- a full bucket banks no credit; otherwise keep the partial token
if tokens >= capacity then
  last = math.max(last, now)
else
  last = last + refill * interval
end

local granted = 0
if tokens >= requested then
  tokens = tokens - requested
  granted = 1
end

redis.call("setex", tokens_key, ttl, string.format("%.0f", tokens))
redis.call("setex", updated_key, ttl, string.format("%.0f", last))

return {tokens, granted}
"#;

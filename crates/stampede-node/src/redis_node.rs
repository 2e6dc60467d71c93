use std::future::Future;
use std::time::Duration;

use log::debug;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::commands::NodeCommands;
use crate::error::NodeError;
use crate::outcome::{
    AcquireOutcome, CompensateOutcome, DecrementOutcome, ExtendOutcome, ReleaseOutcome,
};

// Status codes shared by the counter scripts: first element of the reply.
const CODE_OK: i64 = 0;
const CODE_INSUFFICIENT: i64 = -1;
const CODE_MISSING: i64 = -2;

/// Guarded decrement: check-then-act runs entirely on the server, so no
/// client interleaving can drive the counter below zero.
const GUARDED_DECREMENT: &str = r"
local value = redis.call('GET', KEYS[1])
if not value then
  return {-2, 0}
end
local stock = tonumber(value)
local wanted = tonumber(ARGV[1])
if stock < wanted then
  return {-1, stock}
end
return {0, redis.call('DECRBY', KEYS[1], wanted)}
";

/// Compensating increment. Refuses to resurrect an absent counter: turning a
/// missing key into positive stock would mint units out of thin air.
const COMPENSATE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {-2, 0}
end
return {0, redis.call('INCRBY', KEYS[1], ARGV[1])}
";

/// Compare-and-delete: only the holder whose token is stored may remove the
/// record. A stale caller whose TTL already fired cannot delete a successor.
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Compare-and-refresh: reset the TTL only while the token still matches.
const COMPARE_AND_REFRESH: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// A single Redis-backed coordination node.
///
/// Holds a multiplexed [`ConnectionManager`] that reconnects on failure, and
/// bounds every command with `op_timeout` so a stalled node cannot wedge a
/// quorum round.
pub struct RedisNode {
    addr: String,
    conn: ConnectionManager,
    op_timeout: Duration,
    decrement: Script,
    compensate: Script,
    release: Script,
    extend: Script,
}

impl RedisNode {
    /// Connect to `addr` (`host:port`) and prepare the server-side scripts.
    pub async fn connect(addr: &str, op_timeout: Duration) -> Result<Self, NodeError> {
        let client = redis::Client::open(format!("redis://{addr}")).map_err(|e| {
            NodeError::Unreachable {
                addr: addr.to_string(),
                detail: e.to_string(),
            }
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| classify(addr, e))?;
        debug!("connected to coordination node {addr}");
        Ok(RedisNode {
            addr: addr.to_string(),
            conn,
            op_timeout,
            decrement: Script::new(GUARDED_DECREMENT),
            compensate: Script::new(COMPENSATE),
            release: Script::new(COMPARE_AND_DELETE),
            extend: Script::new(COMPARE_AND_REFRESH),
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, NodeError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(&self.addr, e)),
            Err(_) => Err(NodeError::Timeout {
                addr: self.addr.clone(),
                elapsed_ms: self.op_timeout.as_millis() as u64,
            }),
        }
    }

    fn protocol(&self, detail: String) -> NodeError {
        NodeError::Protocol {
            addr: self.addr.clone(),
            detail,
        }
    }
}

fn classify(addr: &str, e: redis::RedisError) -> NodeError {
    if e.is_timeout() {
        NodeError::Timeout {
            addr: addr.to_string(),
            elapsed_ms: 0,
        }
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        NodeError::Unreachable {
            addr: addr.to_string(),
            detail: e.to_string(),
        }
    } else {
        NodeError::Protocol {
            addr: addr.to_string(),
            detail: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl NodeCommands for RedisNode {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn try_decrement(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<DecrementOutcome, NodeError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.decrement.key(key);
        invocation.arg(quantity);
        let (code, value): (i64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;
        match code {
            CODE_OK => Ok(DecrementOutcome::Applied {
                remaining: value as u64,
            }),
            CODE_INSUFFICIENT => Ok(DecrementOutcome::Insufficient {
                available: value as u64,
            }),
            CODE_MISSING => Ok(DecrementOutcome::Missing),
            other => Err(self.protocol(format!("unexpected decrement code {other}"))),
        }
    }

    async fn compensate(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<CompensateOutcome, NodeError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.compensate.key(key);
        invocation.arg(quantity);
        let (code, value): (i64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;
        match code {
            CODE_OK => Ok(CompensateOutcome::Applied {
                stock: value as u64,
            }),
            CODE_MISSING => Ok(CompensateOutcome::Missing),
            other => Err(self.protocol(format!("unexpected compensate code {other}"))),
        }
    }

    async fn read_stock(&self, key: &str) -> Result<Option<u64>, NodeError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = self
            .bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn seed_stock(&self, key: &str, quantity: u64) -> Result<(), NodeError> {
        let mut conn = self.conn.clone();
        let _: () = self
            .bounded(redis::cmd("SET").arg(key).arg(quantity).query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, NodeError> {
        let mut conn = self.conn.clone();
        // SET NX PX creates the record and its expiry in one server-side step.
        let reply: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(name)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn),
            )
            .await?;
        match reply {
            Some(_) => Ok(AcquireOutcome::Acquired),
            None => Ok(AcquireOutcome::Busy),
        }
    }

    async fn release_lock(
        &self,
        name: &str,
        token: &str,
    ) -> Result<ReleaseOutcome, NodeError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.release.key(name);
        invocation.arg(token);
        let deleted: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        if deleted == 1 {
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::NotHeld)
        }
    }

    async fn extend_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<ExtendOutcome, NodeError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.extend.key(name);
        invocation.arg(token).arg(ttl.as_millis() as u64);
        let refreshed: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        if refreshed == 1 {
            Ok(ExtendOutcome::Extended)
        } else {
            Ok(ExtendOutcome::NotHeld)
        }
    }
}

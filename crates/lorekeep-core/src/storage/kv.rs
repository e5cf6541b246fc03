//! Remote key-value backend speaking the Upstash-style REST protocol.
//!
//! Values are stored as JSON strings: `POST {url}/set/{key}` with the encoded
//! document as body, `GET {url}/get/{key}` returning `{"result": "<json>"}`
//! (or `null`), plus `del` and `exists`.

use super::{Backend, StorageError, validate_key};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct KvReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Bearer-authenticated REST key-value store.
#[derive(Debug, Clone)]
pub struct RemoteKvBackend {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl RemoteKvBackend {
    pub fn new(base_url: String, token: String) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            base_url,
            token,
            agent,
        }
    }

    fn command(&self, verb: &str, key: &str, body: Option<&str>) -> Result<Value, StorageError> {
        validate_key(key)?;
        let url = format!("{}/{verb}/{key}", self.base_url);
        let auth = format!("Bearer {}", self.token);

        let response = match body {
            Some(body) => self
                .agent
                .post(&url)
                .set("Authorization", &auth)
                .send_string(body),
            None => self.agent.get(&url).set("Authorization", &auth).call(),
        }
        .map_err(|err| StorageError::Remote(format!("{verb} {key}: {err}")))?;

        let reply: KvReply = response
            .into_json()
            .map_err(|err| StorageError::Remote(format!("{verb} {key}: bad reply: {err}")))?;
        if let Some(error) = reply.error {
            return Err(StorageError::Remote(format!("{verb} {key}: {error}")));
        }
        Ok(reply.result)
    }
}

/// Decode a `get` result. Strings hold the encoded document; anything else
/// is taken as already-decoded JSON.
fn decode_result(result: Value) -> Result<Option<Value>, StorageError> {
    match result {
        Value::Null => Ok(None),
        Value::String(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        other => Ok(Some(other)),
    }
}

impl Backend for RemoteKvBackend {
    fn name(&self) -> &'static str {
        "remote-kv"
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        decode_result(self.command("get", key, None)?)
    }

    fn write(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let body = serde_json::to_string(value)?;
        self.command("set", key, Some(&body)).map(|_| ())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.command("del", key, None).map(|_| ())
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let result = self.command("exists", key, None)?;
        Ok(result.as_i64().unwrap_or(0) > 0)
    }
}

//! A minimal line-oriented JSON-RPC client over the daemon's Unix socket.
//! One request per connection: connect, send one line, read one line,
//! disconnect. Good enough for a scriptable CLI; `subscribe`'s streaming
//! reply is out of scope here (the daemon's own test suite exercises it).

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Send `method`/`params` to the daemon at `socket_path` and return the
/// `result` field of a successful response, or an error built from the
/// response's `error` field.
pub async fn call(socket_path: &Path, method: &str, params: Option<Value>) -> Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to daemon socket at {}", socket_path.display()))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = serde_json::json!({"method": method, "params": params, "id": 1});
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.context("writing request")?;

    let mut response_line = String::new();
    let bytes_read = reader.read_line(&mut response_line).await.context("reading response")?;
    if bytes_read == 0 {
        bail!("daemon closed the connection before responding");
    }

    let response: Value = serde_json::from_str(response_line.trim_end()).context("parsing response json")?;
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        bail!("daemon returned an error: {error}");
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

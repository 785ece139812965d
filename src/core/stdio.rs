/// STDIO Transport
///
/// Implements MCP over a line-delimited byte stream: one JSON-RPC message per
/// line in, one response per line out. Each line is dispatched on its own task
/// so a slow tool call never blocks reading the next request. Responses can
/// therefore leave out of order; each carries its request id. All logging goes
/// through tracing, never to stdout.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};

use crate::core::protocol::MCPResponse;
use crate::core::server::{MCPServer, ProtocolSession};

/// Shared output stream. The mutex keeps concurrent responses from
/// interleaving their bytes.
type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the MCP server over the process's stdin and stdout.
pub async fn run_server_stdio(server: Arc<MCPServer>) -> std::io::Result<()> {
    tracing::info!("MCP server starting (stdio mode)");
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serves one client over any byte stream until the input reaches EOF.
///
/// In-flight requests are drained before returning.
pub async fn serve<R, W>(server: Arc<MCPServer>, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // stdio serves exactly one client, hence one session
    let session = Arc::new(ProtocolSession::new());

    // 8KB buffers, matching typical pipe capacity
    let mut reader = BufReader::with_capacity(8192, reader);
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::with_capacity(8192, writer)));
    let mut tasks = JoinSet::new();

    // Lines are read as raw bytes: invalid UTF-8 is answered with a parse
    // error by the dispatcher instead of ending the loop.
    let mut buf = Vec::with_capacity(8192);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = buf.trim_ascii().to_vec();
        if line.is_empty() {
            continue;
        }

        let server = Arc::clone(&server);
        let session = Arc::clone(&session);
        let writer = Arc::clone(&writer);
        tasks.spawn(async move {
            if let Some(response) = server.handle_bytes(&session, &line).await {
                if let Err(e) = write_response(&writer, &response).await {
                    tracing::error!(error = %e, "failed to write response");
                }
            }
        });

        // Reap finished tasks so the set does not grow with the session.
        while let Some(result) = tasks.try_join_next() {
            log_task_result(result);
        }
    }

    tracing::info!(
        in_flight = tasks.len(),
        protocol_version = ?session.protocol_version(),
        "input closed, draining in-flight requests"
    );
    while let Some(result) = tasks.join_next().await {
        log_task_result(result);
    }

    Ok(())
}

/// Writes one response as a single line and flushes immediately.
async fn write_response<W>(writer: &SharedWriter<W>, response: &MCPResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');

    let mut writer = writer.lock().await;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "request task failed");
    }
}

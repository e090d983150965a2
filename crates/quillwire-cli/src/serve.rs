//! Line-delimited JSON command interface.
//!
//! Each input line is one `{id, type, payload}` request; each output line is
//! the matching `{id, result}` or `{id, error}`. Requests reach the engine in
//! input order; replies are awaited concurrently and written as they
//! complete, so callers must match responses by `id`, not by order.

use quillwire_worker::{EngineHandle, wire::submit_json};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    task::JoinSet,
};

use crate::error::CliError;

/// Serve requests from `input` until it ends, writing responses to `output`.
///
/// Returns the number of responses written.
pub async fn serve_commands<R, W>(
    handle: &EngineHandle,
    input: R,
    mut output: W,
) -> Result<usize, CliError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut calls = JoinSet::new();
    let mut answered = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {},
                Some(line) => {
                    let submitted = submit_json(handle, &line).await;
                    calls.spawn(submitted.response());
                },
                None => break,
            },
            Some(done) = calls.join_next() => {
                write_line(&mut output, &done?).await?;
                answered += 1;
            },
        }
    }

    while let Some(done) = calls.join_next().await {
        write_line(&mut output, &done?).await?;
        answered += 1;
    }

    output.flush().await?;
    tracing::debug!(answered, "command input closed");
    Ok(answered)
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<(), CliError> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    Ok(())
}

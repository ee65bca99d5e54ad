//! Newline-delimited JSON link sessions.
//!
//! The first line a link sends is its [`Handshake`]; every later line is an
//! [`Envelope`]. End of input is transport loss.

use std::sync::Arc;

use anyhow::Result;
use link_protocol::{Envelope, Handshake};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::broker::Broker;
use crate::client::{ChannelClient, Client, Outbound};
use crate::handshake::{HandshakeResolver, handshake_channel};

/// Serve one link on this process' stdin/stdout.
pub async fn serve_stdio(broker: Arc<Broker>) -> Result<()> {
    serve_link(broker, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve one link over any byte stream until it hangs up.
pub async fn serve_link<R, W>(broker: Arc<Broker>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (resolver, pending) = handshake_channel();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_frames(reader, resolver, frame_tx));

    let handshake = pending.wait().await?;
    let (channel, outbound) = ChannelClient::new(handshake);
    let (stop_tx, stop_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_frames(writer, outbound, stop_rx));

    let client: Arc<dyn Client> = channel;
    if let Err(err) = broker.connect(client.clone()) {
        reader_task.abort();
        let _ = stop_tx.send(());
        let _ = writer_task.await;
        return Err(err.into());
    }

    while let Some(envelope) = frame_rx.recv().await {
        broker.handle_message(&client, envelope);
    }

    broker.disconnect(client.id());
    let _ = stop_tx.send(());
    if let Err(err) = writer_task.await? {
        warn!(client = %client.id(), "writer stopped with error: {err}");
    }
    reader_task.await?;
    Ok(())
}

async fn read_frames<R>(reader: R, resolver: HandshakeResolver, frames: mpsc::UnboundedSender<Envelope>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut resolver = Some(resolver);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("link read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Some(resolver) = resolver.take() {
            let handshake = serde_json::from_str::<Handshake>(&line).map_err(|e| e.to_string());
            if !resolver.resolve(handshake) {
                break;
            }
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                if frames.send(envelope).is_err() {
                    break;
                }
            }
            Err(err) => warn!("skipping malformed frame: {err}"),
        }
    }
    debug!("link input closed");
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut stop: oneshot::Receiver<()>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut seq = 0u64;
    loop {
        tokio::select! {
            biased;
            out = outbound.recv() => match out {
                Some(out) => write_frame(&mut writer, &mut seq, out).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(out) = outbound.try_recv() {
                    write_frame(&mut writer, &mut seq, out).await?;
                }
                break;
            }
        }
    }
    writer.flush().await
}

async fn write_frame<W>(writer: &mut W, seq: &mut u64, out: Outbound) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    *seq += 1;
    let mut envelope = match out {
        Outbound::Requests(requests) => Envelope {
            requests,
            ..Envelope::default()
        },
        Outbound::Responses(responses) => Envelope {
            responses,
            ..Envelope::default()
        },
    };
    envelope.msg = Some(*seq);
    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

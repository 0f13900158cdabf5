//! Framed TCP transport to the middleware.
//!
//! Each datagram travels behind a 16-bit little-endian length prefix. The
//! socket is split and driven by two spawned tasks which only move frames
//! across unbounded channels, so repository state stays on one task.

use crate::datagram::Datagram;
use log::{debug, error, warn};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reads one frame. Returns `None` on a clean close between frames.
///
/// A close anywhere inside a frame, including between the two prefix
/// bytes, is an `UnexpectedEof` error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 2];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let len = u16::from_le_bytes(prefix) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, datagram: &Datagram) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = datagram
        .to_frame()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Spawns task that forwards incoming frames until the peer goes away.
///
/// Dropping the sender on exit is how the owner learns the connection was
/// lost.
pub fn spawn_reader(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        debug!("Frame receiver dropped, stopping reader");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Error reading frame: {}", e);
                    break;
                }
            }
        }
    })
}

/// Spawns task that writes queued datagrams until the queue closes.
pub fn spawn_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Datagram>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(datagram) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &datagram).await {
                error!("Failed to send datagram: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_through_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let mut dg = Datagram::new();
        dg.add_u16(5);
        write_frame(&mut a, &dg).await.unwrap();

        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame, dg.as_bytes());
    }

    #[tokio::test]
    async fn test_clean_close_reads_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_inside_length_prefix_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[10]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[10, 0, 1, 2]).await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}

//! Client-facing socket protocol: `length(3 BE) || utf8(payload)`
//! frames, with batched lines travelling as one `;`-separated CSV row.

use reelgrid_model::lines;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};

pub const LENGTH_BYTES: usize = 3;

/// The literal end-of-file marker on the wire.
pub const EOF_MESSAGE: &str = "EOF";

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    let payload = message.as_bytes();
    if payload.len() >= 1 << (8 * LENGTH_BYTES) {
        return Err(CoreError::Internal(format!(
            "frame of {} bytes too large",
            payload.len()
        )));
    }
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len[1..]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut len_bytes = [0u8; LENGTH_BYTES];
    read_exact_or_disconnect(reader, &mut len_bytes).await?;
    let len = u32::from_be_bytes([0, len_bytes[0], len_bytes[1], len_bytes[2]]) as usize;
    let mut payload = vec![0u8; len];
    read_exact_or_disconnect(reader, &mut payload).await?;
    String::from_utf8(payload)
        .map_err(|e| CoreError::Internal(format!("invalid utf-8 frame: {e}")))
}

async fn read_exact_or_disconnect<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CoreError::Disconnected("peer closed the connection".to_string())
        } else {
            CoreError::Io(e)
        }
    })?;
    Ok(())
}

/// Send a list of lines as one frame.
pub async fn write_lines<W: AsyncWrite + Unpin>(writer: &mut W, fields: &[String]) -> Result<()> {
    let message = lines::join_lines(fields)?;
    write_frame(writer, &message).await
}

/// Receive one frame and split it into lines.
pub async fn read_lines<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
    let message = read_frame(reader).await?;
    Ok(lines::split_lines(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, "hola").await.unwrap();
        write_frame(&mut client, "").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), "hola");
        assert_eq!(read_frame(&mut server).await.unwrap(), "");
    }

    #[tokio::test]
    async fn closed_peer_reads_as_disconnect() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(CoreError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn lines_round_trip_through_frames() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let fields = vec!["1".to_string(), "a,row".to_string(), "EOF".to_string()];
        write_lines(&mut client, &fields).await.unwrap();
        assert_eq!(read_lines(&mut server).await.unwrap(), fields);
    }
}

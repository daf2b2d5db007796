use super::types::{Frame, Request};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed before a request was received")]
    Closed,
}

impl TransportError {
    /// True when the peer sent bytes that are not a request, as opposed to
    /// the connection itself failing.
    pub fn is_malformed_request(&self) -> bool {
        match self {
            Self::Json(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::InvalidData,
            Self::Closed => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Unix socket transport for IPC communication.
pub struct UnixSocketTransport {
    socket_path: String,
}

impl UnixSocketTransport {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Binds to the Unix socket and returns a listener.
    pub async fn bind(&self) -> Result<UnixListener> {
        if Path::new(&self.socket_path).exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)?;
        }

        Ok(listener)
    }

    /// Cleans up the socket file.
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Reads the single request line of a connection.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Request> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(TransportError::Closed);
    }
    let request = serde_json::from_str(&line)?;
    Ok(request)
}

/// Resolves once the peer has closed its side of the connection.
pub async fn wait_for_disconnect<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) {
    let mut sink = String::new();
    loop {
        sink.clear();
        match reader.read_line(&mut sink).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Writes frames to the client, one JSON object per line.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut receiver: mpsc::Receiver<Frame>,
) -> Result<()> {
    while let Some(frame) = receiver.recv().await {
        write_frame(writer, &frame).await?;
    }

    Ok(())
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Minimal client for the socket protocol.
pub struct Client {
    socket_path: String,
}

impl Client {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Sends `request` and calls `on_frame` for every line until the server
    /// closes the connection.
    pub async fn call(&self, request: &Request, mut on_frame: impl FnMut(Frame)) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let line = serde_json::to_string(request)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            on_frame(serde_json::from_str(&line)?);
        }
        // Write half stays open until here; closing it early reads as a disconnect.
        drop(writer);
        Ok(())
    }
}

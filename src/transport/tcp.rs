use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::errors::{FrameError, TransportError};
use crate::pdu::Pdu;

use super::{Transport, TransportReadError};

/// MBAP (Modbus Application Protocol) transport over TCP.
pub struct TcpTransport {
    stream: TcpStream,
    transaction_id: u16,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, timeout: Duration) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            transaction_id: 0,
            timeout,
        })
    }

    /// Reads exactly `buf.len()` bytes, bounded by the configured per-call
    /// deadline, so a client that connects and then sends nothing (or only
    /// a partial header) cannot pin a worker — and its `max_clients`
    /// semaphore permit — open forever.
    async fn read_exact_with_timeout(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        tokio::time::timeout(self.timeout, self.stream.read_exact(buf))
            .await
            .map_err(TransportError::from)??;
        Ok(())
    }
}

impl Transport for TcpTransport {
    async fn read_request(&mut self) -> Result<Pdu, TransportReadError> {
        let mut header = [0u8; 7];
        self.read_exact_with_timeout(&mut header).await?;

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]);
        let unit_id = header[6];

        if protocol_id != 0 {
            return Err(FrameError::InvalidMbapHeader {
                details: format!("protocol id {protocol_id} != 0"),
            }
            .into());
        }
        if !(2..=254).contains(&length) {
            return Err(FrameError::InvalidMbapHeader {
                details: format!("length {length} out of range [2, 254]"),
            }
            .into());
        }

        self.transaction_id = transaction_id;

        let mut rest = vec![0u8; length as usize - 1];
        self.read_exact_with_timeout(&mut rest).await?;

        let function_code = rest[0];
        let payload = rest[1..].to_vec();
        trace!(
            unit_id,
            function_code,
            len = payload.len(),
            "tcp request"
        );
        Ok(Pdu::new(unit_id, function_code, payload))
    }

    async fn write_response(&mut self, response: &Pdu) -> Result<(), TransportError> {
        let length = 2 + response.payload.len() as u16;
        let mut frame = Vec::with_capacity(7 + response.payload.len() + 1);
        frame.extend_from_slice(&self.transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(response.unit_id);
        frame.push(response.function_code);
        frame.extend_from_slice(&response.payload);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream as ClientStream};

    async fn connected_pair() -> (TcpTransport, ClientStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = ClientStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (
            TcpTransport::new(server, Duration::from_secs(5)).unwrap(),
            client,
        )
    }

    #[tokio::test]
    async fn rejects_nonzero_protocol_id() {
        let (mut server, mut client) = connected_pair().await;
        // transaction=1, protocol=1 (invalid), length=6, unit=1, fc=3, addr=0, qty=1
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        client.write_all(&bytes).await.unwrap();
        let result = server.read_request().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn echoes_transaction_id_on_response() {
        let (mut server, mut client) = connected_pair().await;
        let bytes = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        client.write_all(&bytes).await.unwrap();
        let req = server.read_request().await.unwrap();
        assert_eq!(req.unit_id, 1);
        assert_eq!(req.function_code, 0x03);

        let response = Pdu::new(1, 0x03, vec![0x02, 0x00, 0x05]);
        server.write_response(&response).await.unwrap();

        let mut out = [0u8; 11];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out[0..2], &[0x00, 0x2A]);
        assert_eq!(&out[4..6], &[0x00, 0x04]);
    }

    #[tokio::test]
    async fn read_request_times_out_on_silent_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = ClientStream::connect(addr).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let mut server = TcpTransport::new(socket, Duration::from_millis(50)).unwrap();

        // Client never sends a header; read_request must not block forever.
        let result = server.read_request().await;
        assert!(result.is_err());
    }
}

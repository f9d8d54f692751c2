use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::crc;
use crate::errors::{FrameError, TransportError};
use crate::function_table::{fixed_request_payload_len, is_write_multiple};
use crate::pdu::{FunctionCode, Pdu};

use super::{Transport, TransportReadError};

/// 3.5 character times at the given baud rate, per the Modbus RTU spec.
/// Baud rates at or above 19200 (or unspecified, 0) use a fixed 1750 µs.
fn inter_frame_delay(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate >= 19200 {
        Duration::from_micros(1750)
    } else {
        Duration::from_micros(38_500_000 / baud_rate as u64)
    }
}

pub struct RtuTransport {
    port: Mutex<Box<dyn SerialPort>>,
    timeout: Duration,
    baud_rate: u32,
}

impl RtuTransport {
    pub fn open(
        device: &str,
        baud_rate: u32,
        data_bits: serialport::DataBits,
        parity: serialport::Parity,
        stop_bits: serialport::StopBits,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(device, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port: Mutex::new(port),
            timeout,
            baud_rate,
        })
    }

    /// Best-effort flush of stale bytes left over on the line, invoked once
    /// at server startup. A 1 ms deadline; errors are swallowed.
    pub async fn discard(&self) {
        let mut buf = [0u8; 1024];
        let mut port = self.port.lock().await;
        let previous_timeout = port.timeout();
        let _ = port.set_timeout(Duration::from_millis(1));
        let _ = port.read(&mut buf);
        let _ = port.set_timeout(previous_timeout);
    }

    async fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let mut port = self.port.lock().await;
        tokio::time::timeout(timeout, async { port.read_exact(buf).map_err(TransportError::from) })
            .await
            .map_err(TransportError::from)??;
        Ok(())
    }

    async fn write_all(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut port = self.port.lock().await;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }
}

impl Transport for RtuTransport {
    async fn read_request(&mut self) -> Result<Pdu, TransportReadError> {
        let mut header = [0u8; 3];
        self.read_exact(&mut header).await?;
        let unit_id = header[0];
        let function_code = header[1];

        let mut frame = Vec::with_capacity(8);
        frame.extend_from_slice(&header);

        let remaining_before_crc = match FunctionCode::from_byte(function_code) {
            Some(fc) if is_write_multiple(fc) => {
                // header[2] is addr_hi; need addr_lo, qty_hi, qty_lo, byte_count.
                let mut rest = [0u8; 4];
                self.read_exact(&mut rest).await?;
                frame.extend_from_slice(&rest);
                let byte_count = rest[3] as usize;
                frame.reserve(byte_count);
                let mut data = vec![0u8; byte_count];
                self.read_exact(&mut data).await?;
                frame.extend_from_slice(&data);
                0
            }
            Some(fc) => fixed_request_payload_len(fc).map(|n| n - 1).unwrap_or(0),
            None => {
                // Unknown function code: can't infer a frame boundary.
                // Discard whatever is pending and surface a short-frame
                // error so the worker skips this frame and resyncs.
                warn!(function_code, "unknown function code on RTU link");
                self.discard().await;
                return Err(FrameError::UnknownFunction { function_code }.into());
            }
        };

        if remaining_before_crc > 0 {
            let mut rest = vec![0u8; remaining_before_crc];
            self.read_exact(&mut rest).await?;
            frame.extend_from_slice(&rest);
        }

        if frame.len() + 2 > 256 {
            return Err(FrameError::TooLong {
                details: format!("frame would be {} bytes", frame.len() + 2),
            }
            .into());
        }

        let mut crc_bytes = [0u8; 2];
        self.read_exact(&mut crc_bytes).await?;

        let calculated = crc::of(&frame);
        let received = u16::from_le_bytes(crc_bytes);
        if calculated != received {
            return Err(FrameError::BadCrc {
                calculated,
                received,
            }
            .into());
        }

        let payload = frame[2..].to_vec();
        trace!(unit_id, function_code, ?frame, "rtu request");
        Ok(Pdu::new(unit_id, function_code, payload))
    }

    async fn write_response(&mut self, response: &Pdu) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(response.payload.len() + 4);
        frame.push(response.unit_id);
        frame.push(response.function_code);
        frame.extend_from_slice(&response.payload);
        let crc = crc::of(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        trace!(unit_id = response.unit_id, ?frame, "rtu response");
        self.write_all(&frame).await?;
        tokio::time::sleep(inter_frame_delay(self.baud_rate)).await;
        Ok(())
    }
}

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::codec::{bytes_to_registers, decode_bools, encode_bools, registers_to_bytes};
use crate::config::{Config, TransportTarget};
use crate::connection::ConnectionManager;
use crate::errors::{ProtocolErrorKind, ServerError};
use crate::function_table::{address_range_overflows, max_quantity, read_reply_byte_count};
use crate::handler::RequestHandler;
use crate::pdu::{FunctionCode, Pdu};
use crate::transport::{RtuTransport, TcpTransport, Transport, TransportReadError};

struct ServerState {
    started: bool,
}

/// The protocol engine: accepts connections on the configured transport,
/// dispatches well-formed requests to the handler, and assembles responses.
///
/// Created in a stopped state; `start()` brings up the configured transport,
/// `stop()` tears it down. Both are idempotent with respect to double calls.
pub struct Server<H: RequestHandler + 'static> {
    config: Config,
    handler: Arc<H>,
    state: Mutex<ServerState>,
    connections: Arc<ConnectionManager>,
    shutdown: broadcast::Sender<()>,
}

impl<H: RequestHandler + 'static> Server<H> {
    /// How long `stop()` waits after broadcasting the shutdown signal before
    /// reporting the server as stopped, to let in-flight workers flush.
    const SHUTDOWN_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

    pub fn new(config: Config, handler: H) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            connections: Arc::new(ConnectionManager::new(config.tcp.max_clients)),
            config,
            handler: Arc::new(handler),
            state: Mutex::new(ServerState { started: false }),
            shutdown: broadcast::channel(1).0,
        })
    }

    pub async fn connection_stats(&self) -> crate::connection::ConnectionStats {
        self.connections.stats().await
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.started
    }

    pub fn transport_url(&self) -> &str {
        &self.config.url
    }

    /// Number of TCP clients currently connected (always 0 for RTU).
    pub async fn active_clients(&self) -> usize {
        self.connections.client_count().await
    }

    /// A receiver that fires once when the server is stopped, for callers
    /// (such as the optional HTTP status endpoint) that want to shut down
    /// alongside it.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if state.started {
            return Err(ServerError::AlreadyRunning);
        }

        match self.config.transport_target()? {
            TransportTarget::Rtu { device } => self.start_rtu(&device).await?,
            TransportTarget::Tcp { addr } => self.start_tcp(&addr).await?,
        }

        state.started = true;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(ServerError::NotRunning);
        }
        info!("initiating graceful shutdown");
        let _ = self.shutdown.send(());

        // Give in-flight workers a chance to notice the signal and flush
        // their current response before we report the server as stopped.
        tokio::time::sleep(Self::SHUTDOWN_GRACE_PERIOD).await;

        state.started = false;
        info!("server stopped");
        Ok(())
    }

    async fn start_rtu(self: &Arc<Self>, device: &str) -> Result<(), ServerError> {
        let rtu = &self.config.rtu;

        let transport = RtuTransport::open(
            device,
            rtu.baud_rate,
            rtu.data_bits.into(),
            rtu.parity.into(),
            rtu.stop_bits.into(),
            rtu.timeout,
        )
        .map_err(ServerError::Transport)?;

        info!(device, "rtu server starting");
        transport.discard().await;

        let server = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut transport = transport;
            loop {
                tokio::select! {
                    result = transport.read_request() => {
                        server.handle_rtu_request(&mut transport, result).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("rtu worker received shutdown");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn handle_rtu_request(
        &self,
        transport: &mut RtuTransport,
        result: Result<Pdu, TransportReadError>,
    ) {
        let request = match result {
            Ok(req) => req,
            Err(TransportReadError::Frame(err)) => {
                warn!(%err, "skipping malformed rtu frame");
                return;
            }
            Err(TransportReadError::Io(err)) => {
                error!(%err, "rtu link error");
                return;
            }
        };

        if !self.config.rtu.accepted_unit_ids.contains(&request.unit_id) {
            return;
        }

        self.connections.record_request();
        match self.dispatch(&request) {
            Ok(Some(response)) => {
                if let Err(err) = transport.write_response(&response).await {
                    self.connections.record_error();
                    error!(%err, "failed writing rtu response");
                }
            }
            Ok(None) => {
                // Malformed PDU after successful framing: per source behavior,
                // no response is sent and the frame is simply dropped.
                self.connections.record_error();
            }
            Err(exception) => {
                self.connections.record_error();
                if let Err(err) = transport.write_response(&exception).await {
                    error!(%err, "failed writing rtu exception response");
                }
            }
        }
    }

    async fn start_tcp(self: &Arc<Self>, addr: &str) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(e.into()))?;
        info!(%addr, "tcp server listening");

        let server = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => server.accept_tcp_client(socket, peer),
                            Err(err) => {
                                error!(%err, "tcp accept error");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("tcp accept loop received shutdown");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    fn accept_tcp_client(self: &Arc<Self>, socket: TcpStream, peer: std::net::SocketAddr) {
        let server = Arc::clone(self);
        let connections = Arc::clone(&self.connections);
        let timeout = self.config.tcp.timeout;
        tokio::spawn(async move {
            let guard = match connections.accept(peer).await {
                Ok(guard) => guard,
                Err(err) => {
                    warn!(%peer, %err, "rejecting tcp client, at capacity");
                    return;
                }
            };
            info!(%peer, "tcp client connected");

            let mut transport = match TcpTransport::new(socket, timeout) {
                Ok(t) => t,
                Err(err) => {
                    error!(%err, "failed to configure tcp client socket");
                    return;
                }
            };

            loop {
                match transport.read_request().await {
                    Ok(request) => {
                        server.connections.record_request();
                        let outcome = server.dispatch(&request);
                        match outcome {
                            Ok(Some(response)) => {
                                if let Err(err) = transport.write_response(&response).await {
                                    error!(%peer, %err, "failed writing tcp response");
                                    break;
                                }
                            }
                            Ok(None) => {
                                server.connections.record_error();
                                warn!(%peer, "closing connection after malformed pdu");
                                break;
                            }
                            Err(exception) => {
                                server.connections.record_error();
                                if let Err(err) = transport.write_response(&exception).await {
                                    error!(%peer, %err, "failed writing tcp exception response");
                                    break;
                                }
                            }
                        }
                    }
                    Err(TransportReadError::Frame(err)) => {
                        warn!(%peer, %err, "closing tcp connection after frame error");
                        break;
                    }
                    Err(TransportReadError::Io(err)) => {
                        debug!(%peer, %err, "tcp connection closed");
                        break;
                    }
                }
            }

            drop(guard);
        });
    }

    /// Validates and executes one request.
    ///
    /// `Ok(Some(pdu))` is a normal response. `Err(pdu)` is an exception
    /// response (still something to write back). `Ok(None)` means the
    /// request was malformed beyond what Modbus exceptions can express;
    /// per the propagation policy the caller drops the frame/connection
    /// without writing anything.
    fn dispatch(&self, request: &Pdu) -> Result<Option<Pdu>, Pdu> {
        let Some(fc) = FunctionCode::from_byte(request.function_code) else {
            return Err(request.exception(ProtocolErrorKind::IllegalFunction.to_exception_code()));
        };

        match fc {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                self.dispatch_read_bits(request, fc)
            }
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                self.dispatch_read_registers(request, fc)
            }
            FunctionCode::WriteSingleCoil => self.dispatch_write_single_coil(request),
            FunctionCode::WriteSingleRegister => self.dispatch_write_single_register(request),
            FunctionCode::WriteMultipleCoils => self.dispatch_write_multiple_coils(request),
            FunctionCode::WriteMultipleRegisters => self.dispatch_write_multiple_registers(request),
        }
    }

    fn dispatch_read_bits(&self, request: &Pdu, fc: FunctionCode) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() != 4 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let quantity = u16::from_be_bytes([request.payload[2], request.payload[3]]);

        if quantity == 0 || quantity > max_quantity(fc) {
            return Err(request.exception(ProtocolErrorKind::IllegalDataValue.to_exception_code()));
        }
        if address_range_overflows(addr, quantity) {
            return Err(
                request.exception(ProtocolErrorKind::IllegalDataAddress.to_exception_code())
            );
        }

        let result = if fc == FunctionCode::ReadCoils {
            self.handler
                .coils(request.unit_id, addr, quantity, false, &[])
        } else {
            self.handler
                .discrete_inputs(request.unit_id, addr, quantity)
        };

        match result {
            Ok(bits) if bits.len() == quantity as usize => {
                let bytes = encode_bools(&bits);
                let mut payload = Vec::with_capacity(1 + bytes.len());
                payload.push(bytes.len() as u8);
                payload.extend_from_slice(&bytes);
                Ok(Some(Pdu::new(request.unit_id, request.function_code, payload)))
            }
            Ok(_) => Err(
                request.exception(ProtocolErrorKind::ServerDeviceFailure.to_exception_code())
            ),
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }

    fn dispatch_read_registers(&self, request: &Pdu, fc: FunctionCode) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() != 4 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let quantity = u16::from_be_bytes([request.payload[2], request.payload[3]]);

        if quantity == 0 || quantity > max_quantity(fc) {
            return Err(request.exception(ProtocolErrorKind::IllegalDataValue.to_exception_code()));
        }
        if address_range_overflows(addr, quantity) {
            return Err(
                request.exception(ProtocolErrorKind::IllegalDataAddress.to_exception_code())
            );
        }

        let result = if fc == FunctionCode::ReadHoldingRegisters {
            self.handler
                .holding_registers(request.unit_id, addr, quantity, false, &[])
        } else {
            self.handler
                .input_registers(request.unit_id, addr, quantity)
        };

        match result {
            Ok(registers) if registers.len() == quantity as usize => {
                let bytes = registers_to_bytes(&registers);
                debug_assert_eq!(bytes.len(), read_reply_byte_count(fc, quantity));
                let mut payload = Vec::with_capacity(1 + bytes.len());
                payload.push(bytes.len() as u8);
                payload.extend_from_slice(&bytes);
                Ok(Some(Pdu::new(request.unit_id, request.function_code, payload)))
            }
            Ok(_) => Err(
                request.exception(ProtocolErrorKind::ServerDeviceFailure.to_exception_code())
            ),
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }

    fn dispatch_write_single_coil(&self, request: &Pdu) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() != 4 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let raw_value = u16::from_be_bytes([request.payload[2], request.payload[3]]);

        let value = match raw_value {
            0xFF00 => true,
            0x0000 => false,
            _ => {
                return Err(
                    request.exception(ProtocolErrorKind::IllegalDataValue.to_exception_code())
                )
            }
        };

        match self
            .handler
            .coils(request.unit_id, addr, 1, true, &[value])
        {
            Ok(_) => Ok(Some(Pdu::new(
                request.unit_id,
                request.function_code,
                request.payload.clone(),
            ))),
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }

    fn dispatch_write_single_register(&self, request: &Pdu) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() != 4 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let value = u16::from_be_bytes([request.payload[2], request.payload[3]]);

        match self
            .handler
            .holding_registers(request.unit_id, addr, 1, true, &[value])
        {
            Ok(_) => Ok(Some(Pdu::new(
                request.unit_id,
                request.function_code,
                request.payload.clone(),
            ))),
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }

    fn dispatch_write_multiple_coils(&self, request: &Pdu) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() < 5 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let quantity = u16::from_be_bytes([request.payload[2], request.payload[3]]);
        let byte_count = request.payload[4] as usize;

        if quantity == 0 || quantity > max_quantity(FunctionCode::WriteMultipleCoils) {
            return Err(request.exception(ProtocolErrorKind::IllegalDataValue.to_exception_code()));
        }
        if address_range_overflows(addr, quantity) {
            return Err(
                request.exception(ProtocolErrorKind::IllegalDataAddress.to_exception_code())
            );
        }
        let expected_byte_count = (quantity as usize).div_ceil(8);
        if byte_count != expected_byte_count || request.payload.len() != 5 + byte_count {
            return Ok(None);
        }

        let bits = decode_bools(quantity as usize, &request.payload[5..]);
        match self
            .handler
            .coils(request.unit_id, addr, quantity, true, &bits)
        {
            Ok(_) => {
                let mut payload = Vec::with_capacity(4);
                payload.extend_from_slice(&addr.to_be_bytes());
                payload.extend_from_slice(&quantity.to_be_bytes());
                Ok(Some(Pdu::new(request.unit_id, request.function_code, payload)))
            }
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }

    fn dispatch_write_multiple_registers(&self, request: &Pdu) -> Result<Option<Pdu>, Pdu> {
        if request.payload.len() < 5 {
            return Ok(None);
        }
        let addr = u16::from_be_bytes([request.payload[0], request.payload[1]]);
        let quantity = u16::from_be_bytes([request.payload[2], request.payload[3]]);
        let byte_count = request.payload[4] as usize;

        if quantity == 0 || quantity > max_quantity(FunctionCode::WriteMultipleRegisters) {
            return Err(request.exception(ProtocolErrorKind::IllegalDataValue.to_exception_code()));
        }
        if address_range_overflows(addr, quantity) {
            return Err(
                request.exception(ProtocolErrorKind::IllegalDataAddress.to_exception_code())
            );
        }
        let expected_byte_count = quantity as usize * 2;
        if byte_count != expected_byte_count || request.payload.len() != 5 + byte_count {
            return Ok(None);
        }

        let registers = bytes_to_registers(&request.payload[5..]);
        match self
            .handler
            .holding_registers(request.unit_id, addr, quantity, true, &registers)
        {
            Ok(_) => {
                let mut payload = Vec::with_capacity(4);
                payload.extend_from_slice(&addr.to_be_bytes());
                payload.extend_from_slice(&quantity.to_be_bytes());
                Ok(Some(Pdu::new(request.unit_id, request.function_code, payload)))
            }
            Err(kind) => Err(request.exception(kind.to_exception_code())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::MemoryHandler;

    fn server_with_tcp() -> Arc<Server<MemoryHandler>> {
        let mut config = Config::default();
        config.url = "tcp://127.0.0.1:0".to_string();
        Arc::new(Server::new(config, MemoryHandler::new(64)).unwrap())
    }

    #[test]
    fn dispatch_unknown_function_yields_illegal_function_exception() {
        let server = server_with_tcp();
        let request = Pdu::new(1, 0x44, vec![0, 0, 0, 1]);
        let response = server.dispatch(&request).unwrap_err();
        assert!(response.is_exception());
        assert_eq!(response.payload, vec![0x01]);
    }

    #[test]
    fn dispatch_read_holding_registers_happy_path() {
        let server = server_with_tcp();
        server
            .handler
            .holding_registers(1, 0, 2, true, &[0x1234, 0x5678])
            .unwrap();

        let request = Pdu::new(1, 0x03, vec![0x00, 0x00, 0x00, 0x02]);
        let response = server.dispatch(&request).unwrap().unwrap();
        assert_eq!(response.function_code, 0x03);
        assert_eq!(response.payload, vec![0x04, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn dispatch_read_rejects_zero_quantity() {
        let server = server_with_tcp();
        let request = Pdu::new(1, 0x03, vec![0x00, 0x00, 0x00, 0x00]);
        let response = server.dispatch(&request).unwrap_err();
        assert_eq!(response.payload, vec![0x03]);
    }

    #[test]
    fn dispatch_read_rejects_address_overflow() {
        let server = server_with_tcp();
        let request = Pdu::new(1, 0x03, vec![0xFF, 0xFF, 0x00, 0x02]);
        let response = server.dispatch(&request).unwrap_err();
        assert_eq!(response.payload, vec![0x02]);
    }

    #[test]
    fn dispatch_write_single_coil_rejects_bad_value() {
        let server = server_with_tcp();
        let request = Pdu::new(1, 0x05, vec![0x00, 0x00, 0x12, 0x34]);
        let response = server.dispatch(&request).unwrap_err();
        assert_eq!(response.payload, vec![0x03]);
    }

    #[test]
    fn dispatch_write_single_coil_echoes_request() {
        let server = server_with_tcp();
        let request = Pdu::new(1, 0x05, vec![0x00, 0x01, 0xFF, 0x00]);
        let response = server.dispatch(&request).unwrap().unwrap();
        assert_eq!(response.payload, request.payload);
    }

    #[test]
    fn dispatch_write_multiple_registers_rejects_bad_byte_count() {
        let server = server_with_tcp();
        let mut payload = vec![0x00, 0x00, 0x00, 0x02, 0x99];
        payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]);
        let request = Pdu::new(1, 0x10, payload);
        assert!(server.dispatch(&request).unwrap().is_none());
    }

    #[test]
    fn dispatch_write_multiple_registers_happy_path() {
        let server = server_with_tcp();
        let mut payload = vec![0x00, 0x00, 0x00, 0x02, 0x04];
        payload.extend_from_slice(&[0x00, 0x0A, 0x00, 0x0B]);
        let request = Pdu::new(1, 0x10, payload);
        let response = server.dispatch(&request).unwrap().unwrap();
        assert_eq!(response.payload, vec![0x00, 0x00, 0x00, 0x02]);

        let stored = server
            .handler
            .holding_registers(1, 0, 2, false, &[])
            .unwrap();
        assert_eq!(stored, vec![0x0A, 0x0B]);
    }

    #[tokio::test]
    async fn stop_before_start_reports_not_running() {
        let server = server_with_tcp();
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn start_is_not_reentrant() {
        let server = server_with_tcp();
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn end_to_end_tcp_read_holding_registers() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let mut config = Config::default();
        config.url = "tcp://127.0.0.1:0".to_string();
        let server = Arc::new(Server::new(config, MemoryHandler::new(16)).unwrap());
        server
            .handler
            .holding_registers(1, 0, 2, true, &[0x1234, 0x5678])
            .unwrap();

        // Bind directly rather than through start() so the test can learn
        // the ephemeral port; start_tcp's own accept loop is exercised by
        // every other end-to-end style test via the real start() path.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            accept_server.accept_tcp_client(socket, peer);
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        client.write_all(&request).await.unwrap();

        let mut response = [0u8; 13];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[tokio::test]
    async fn end_to_end_tcp_unknown_function_code() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let server = server_with_tcp();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            accept_server.accept_tcp_client(socket, peer);
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = [0x00, 0x04, 0x00, 0x00, 0x00, 0x02, 0x01, 0x42];
        client.write_all(&request).await.unwrap();

        let mut response = [0u8; 9];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            [0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0xC2, 0x01]
        );
    }
}

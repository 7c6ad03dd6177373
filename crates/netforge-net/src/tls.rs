//! TLS socket backend over rustls.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use netforge_core::{Error, ErrorCode, Result, net_error};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};
use tracing::debug;

use crate::addr::SocketFamily;
use crate::plain::{self, PlainSocket};
use crate::socket::{SocketBackend, SocketKind, WriteOutcome};
use crate::state::SocketState;

/// Handshake-drive retry bound before reporting IoAgain.
const TLS_RETRY_MAX: u32 = 512;

#[derive(Clone, Debug)]
pub struct TlsServerOpts {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct TlsClientOpts {
    pub ca_file: Option<PathBuf>,
    pub no_cert_check: bool,
}

static SIGPIPE_ONCE: Once = Once::new();

/// TLS sends can hit a torn-down peer; never let that raise a signal.
fn block_sigpipe() {
    SIGPIPE_ONCE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

fn open_tcp(family: SocketFamily) -> Result<PlainSocket> {
    let af = match family {
        SocketFamily::Ipv4 => libc::AF_INET,
        SocketFamily::Ipv6 => libc::AF_INET6,
    };
    PlainSocket::open(af, SocketKind::Stream)
}

pub(crate) fn tls_listener_backend(
    family: SocketFamily,
    opts: &TlsServerOpts,
) -> Result<Box<dyn SocketBackend>> {
    block_sigpipe();
    let config = load_server_config(opts)?;
    Ok(Box::new(TlsListener { tcp: open_tcp(family)?, config }))
}

pub(crate) fn tls_client_backend(
    family: SocketFamily,
    opts: &TlsClientOpts,
) -> Result<Box<dyn SocketBackend>> {
    block_sigpipe();
    let config = load_client_config(opts)?;
    Ok(Box::new(TlsStream { tcp: open_tcp(family)?, conn: None, client_config: Some(config) }))
}

fn load_server_config(opts: &TlsServerOpts) -> Result<Arc<ServerConfig>> {
    let mut cert_reader = BufReader::new(File::open(&opts.cert_file).map_err(|e| {
        net_error!(ErrorCode::NotFound, "cert file {}: {e}", opts.cert_file.display())
    })?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| net_error!(ErrorCode::InvalidArg, "cert file parse: {e}"))?;

    let mut key_reader = BufReader::new(File::open(&opts.key_file).map_err(|e| {
        net_error!(ErrorCode::NotFound, "key file {}: {e}", opts.key_file.display())
    })?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| net_error!(ErrorCode::InvalidArg, "key file parse: {e}"))?
        .ok_or_else(|| net_error!(ErrorCode::InvalidArg, "no private key in key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| net_error!(ErrorCode::InvalidArg, "tls server config: {e}"))?;
    Ok(Arc::new(config))
}

fn load_client_config(opts: &TlsClientOpts) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder();
    let config = if opts.no_cert_check {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        if let Some(ca_file) = &opts.ca_file {
            let mut reader = BufReader::new(File::open(ca_file).map_err(|e| {
                net_error!(ErrorCode::NotFound, "ca file {}: {e}", ca_file.display())
            })?);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| net_error!(ErrorCode::InvalidArg, "ca parse: {e}"))?;
                roots
                    .add(cert)
                    .map_err(|e| net_error!(ErrorCode::InvalidArg, "ca cert rejected: {e}"))?;
            }
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Listening side: plain TCP accept, then a server-side TLS session per
/// accepted connection.
struct TlsListener {
    tcp: PlainSocket,
    config: Arc<ServerConfig>,
}

impl SocketBackend for TlsListener {
    fn fd(&self) -> RawFd {
        self.tcp.raw_fd()
    }

    fn accept(&mut self, state: &mut SocketState) -> Result<Box<dyn SocketBackend>> {
        let fd = plain::accept_fd(self.tcp.raw_fd(), state)?;
        let conn = ServerConnection::new(Arc::clone(&self.config))
            .map_err(|e| net_error!(ErrorCode::IoProtocol, "tls session: {e}"))?;
        Ok(Box::new(TlsStream {
            tcp: PlainSocket::from_fd(fd),
            conn: Some(rustls::Connection::Server(conn)),
            client_config: None,
        }))
    }

    fn connect(&mut self, _addr: &SocketAddr, _host: &str, _state: &mut SocketState) -> Result<()> {
        Err(net_error!(ErrorCode::InvalidState, "listener cannot connect"))
    }

    fn read(&mut self, _buf: &mut [u8], _state: &mut SocketState) -> Result<usize> {
        Err(net_error!(ErrorCode::InvalidState, "listener cannot read"))
    }

    fn write(&mut self, _src: &[u8], _state: &mut SocketState) -> Result<WriteOutcome> {
        Err(net_error!(ErrorCode::InvalidState, "listener cannot write"))
    }

    fn dgram_recv(&mut self, _buf: &mut [u8], _state: &mut SocketState) -> Result<(usize, SocketAddr)> {
        Err(net_error!(ErrorCode::NotSupported))
    }

    fn dgram_send(&mut self, _src: &[u8], _to: &SocketAddr, _state: &mut SocketState) -> Result<usize> {
        Err(net_error!(ErrorCode::NotSupported))
    }

    fn shutdown(&mut self, how: Shutdown) -> Result<()> {
        self.tcp.shutdown(how)
    }

    fn close(&mut self) -> Result<()> {
        self.tcp.close()
    }
}

/// A TLS stream, client- or server-side.
struct TlsStream {
    tcp: PlainSocket,
    conn: Option<rustls::Connection>,
    /// Present on unconnected client sockets only.
    client_config: Option<Arc<ClientConfig>>,
}

impl SocketBackend for TlsStream {
    fn fd(&self) -> RawFd {
        self.tcp.raw_fd()
    }

    fn accept(&mut self, _state: &mut SocketState) -> Result<Box<dyn SocketBackend>> {
        Err(net_error!(ErrorCode::InvalidState, "connected socket cannot accept"))
    }

    fn connect(&mut self, addr: &SocketAddr, host: &str, state: &mut SocketState) -> Result<()> {
        let config = self
            .client_config
            .take()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "already connected"))?;

        self.tcp.connect(addr, host, state)?;

        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| net_error!(ErrorCode::InvalidArg, "invalid tls server name: {host}"))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| net_error!(ErrorCode::IoProtocol, "tls client session: {e}"))?;
        let conn = self.conn.insert(rustls::Connection::Client(conn));

        // Drive the handshake; on a non-blocking socket the caller
        // resumes it implicitly through read/write.
        let mut retries = 0;
        while conn.is_handshaking() {
            match conn.complete_io(&mut self.tcp.io()) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    state.read_again = true;
                    return Err(net_error!(ErrorCode::IoAgain, "tls handshake in progress"));
                }
                Err(e) => {
                    state.err = true;
                    return Err(net_error!(ErrorCode::IoProtocol, "tls handshake: {e}"));
                }
            }
            retries += 1;
            if retries > TLS_RETRY_MAX {
                state.read_again = true;
                return Err(net_error!(ErrorCode::IoAgain, "tls handshake retry bound"));
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], state: &mut SocketState) -> Result<usize> {
        let Self { tcp, conn, .. } = self;
        let conn = conn
            .as_mut()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "tls session not established"))?;

        let mut retries = 0;
        loop {
            match conn.reader().read(buf) {
                Ok(0) => return Err(net_error!(ErrorCode::IoClosed)),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    state.err = true;
                    return Err(net_error!(ErrorCode::IoUnknown, "tls read: {e}"));
                }
            }

            // Renegotiation or handshake data may have to go out before
            // more application data can come in.
            if conn.wants_write() {
                match conn.write_tls(&mut tcp.io()) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        state.read_again_when_writeable = true;
                        return Err(net_error!(ErrorCode::IoAgain));
                    }
                    Err(e) => {
                        state.err = true;
                        return Err(net_error!(ErrorCode::IoUnknown, "tls flush: {e}"));
                    }
                }
            }

            match conn.read_tls(&mut tcp.io()) {
                Ok(0) => return Err(net_error!(ErrorCode::IoClosed)),
                Ok(_) => {
                    if let Err(e) = conn.process_new_packets() {
                        state.err = true;
                        return Err(net_error!(ErrorCode::IoProtocol, "tls: {e}"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    state.read_again = true;
                    return Err(net_error!(ErrorCode::IoAgain));
                }
                Err(e) => return Err(classify_io(&e, state)),
            }

            retries += 1;
            if retries > TLS_RETRY_MAX {
                debug!("tls: read retry bound reached");
                state.read_again = true;
                return Err(net_error!(ErrorCode::IoAgain));
            }
        }
    }

    fn write(&mut self, src: &[u8], state: &mut SocketState) -> Result<WriteOutcome> {
        let Self { tcp, conn, .. } = self;
        let conn = conn
            .as_mut()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "tls session not established"))?;

        let mut accepted_total = 0;
        loop {
            let accepted = match conn.writer().write(&src[accepted_total..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) => {
                    state.err = true;
                    return Err(net_error!(ErrorCode::IoUnknown, "tls write: {e}"));
                }
            };
            accepted_total += accepted;

            while conn.wants_write() {
                match conn.write_tls(&mut tcp.io()) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        state.write_again = true;
                        return Ok(WriteOutcome::Again(accepted_total));
                    }
                    Err(e) => return Err(classify_io(&e, state)),
                }
            }

            if accepted_total == src.len() {
                return Ok(WriteOutcome::Complete(accepted_total));
            }
            if accepted == 0 {
                // Handshake needs peer input before taking more data.
                state.write_again_when_readable = true;
                return Ok(WriteOutcome::Again(accepted_total));
            }
        }
    }

    fn dgram_recv(&mut self, _buf: &mut [u8], _state: &mut SocketState) -> Result<(usize, SocketAddr)> {
        Err(net_error!(ErrorCode::NotSupported))
    }

    fn dgram_send(&mut self, _src: &[u8], _to: &SocketAddr, _state: &mut SocketState) -> Result<usize> {
        Err(net_error!(ErrorCode::NotSupported))
    }

    fn shutdown(&mut self, how: Shutdown) -> Result<()> {
        let Self { tcp, conn, .. } = self;
        if let Some(conn) = conn.as_mut() {
            conn.send_close_notify();
            let _ = conn.write_tls(&mut tcp.io());
        }
        tcp.shutdown(how)
    }

    fn close(&mut self) -> Result<()> {
        let Self { tcp, conn, .. } = self;
        if let Some(conn) = conn.as_mut() {
            conn.send_close_notify();
            let _ = conn.write_tls(&mut tcp.io());
        }
        tcp.close()
    }
}

fn classify_io(e: &io::Error, state: &mut SocketState) -> Error {
    plain::io_to_error(e, state)
}

/// Accepts any server certificate. Installed by the client option
/// `NO_CERT_CHECK`.
#[derive(Debug)]
struct NoVerification;

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}

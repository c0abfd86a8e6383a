//! TCP transport: the accepting server and the one-shot client sessions.
//!
//! Two session shapes share one codec:
//! - negotiated: `[Filename Frame] Data Frame* End-of-Stream`, server picks the
//!   destination from the filename (`server::serve`, `client::push_file`)
//! - raw: `Data Frame* End-of-Stream`, destination supplied out-of-band
//!   (`client::offer_file`, `client::fetch_file`)

pub mod server {
    use anyhow::{Context, Result};
    use std::future::Future;
    use std::io;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::{JoinError, JoinSet};
    use tracing::{debug, error, info, warn};

    use crate::logger::SessionLogger;
    use crate::protocol::FrameLimits;
    use crate::session::{self, SessionOutcome, SessionReport};

    /// Pause before accepting again once the process is out of descriptors.
    const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

    #[derive(Clone, Debug)]
    pub struct ServerConfig {
        /// Bind address (host:port)
        pub bind: String,
        /// Directory every received file is written into
        pub root: PathBuf,
        pub limits: FrameLimits,
    }

    /// Bind `config.bind` and serve until the listener fails.
    pub async fn serve(config: ServerConfig, logger: Arc<dyn SessionLogger>) -> Result<()> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        info!(
            bind = %config.bind,
            root = %config.root.display(),
            "ferry server listening"
        );
        serve_listener(listener, config.root, config.limits, logger).await
    }

    /// Accept loop on an already bound listener.
    ///
    /// Every connection runs in its own task; session failures are reported
    /// through `logger` and never reach this loop. Accept errors tied to one
    /// connection or to a passing shortage of descriptors are logged and
    /// skipped. Any other accept error ends the loop, but only after every
    /// running session has finished and been reported.
    pub async fn serve_listener(
        listener: TcpListener,
        root: PathBuf,
        limits: FrameLimits,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<()> {
        accept_loop(listener, root, limits, logger).await
    }

    /// Where the accept loop gets its connections from.
    pub(crate) trait Accept {
        fn accept_conn(
            &mut self,
        ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
    }

    impl Accept for TcpListener {
        async fn accept_conn(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
            self.accept().await
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum AcceptError {
        /// Only the connection being accepted is affected.
        Transient,
        /// Descriptor or buffer exhaustion; clears as sessions close.
        Exhausted,
        /// The listener itself is unusable.
        Fatal,
    }

    pub(crate) fn classify_accept_error(e: &io::Error) -> AcceptError {
        match e.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut => return AcceptError::Transient,
            io::ErrorKind::OutOfMemory => return AcceptError::Exhausted,
            _ => {}
        }
        #[cfg(unix)]
        {
            if let Some(code) = e.raw_os_error() {
                if matches!(code, libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) {
                    return AcceptError::Exhausted;
                }
            }
        }
        #[cfg(windows)]
        {
            // WSAEMFILE, WSAENOBUFS
            if matches!(e.raw_os_error(), Some(10024) | Some(10055)) {
                return AcceptError::Exhausted;
            }
        }
        AcceptError::Fatal
    }

    pub(crate) async fn accept_loop<A: Accept + Send>(
        mut acceptor: A,
        root: PathBuf,
        limits: FrameLimits,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<()> {
        let root = Arc::new(root);
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = acceptor.accept_conn() => {
                    let (mut stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => match classify_accept_error(&e) {
                            AcceptError::Transient => {
                                debug!(error = %e, "accept failed, continuing");
                                continue;
                            }
                            AcceptError::Exhausted => {
                                warn!(error = %e, "accept failed, backing off");
                                tokio::time::sleep(ACCEPT_BACKOFF).await;
                                continue;
                            }
                            AcceptError::Fatal => {
                                error!(error = %e, running = sessions.len(), "listener failed, draining sessions");
                                while let Some(joined) = sessions.join_next().await {
                                    reap(joined);
                                }
                                return Err(e).context("accept");
                            }
                        },
                    };
                    let _ = stream.set_nodelay(true);
                    debug!(%peer, "connection accepted");
                    logger.accepted(peer);

                    let root = Arc::clone(&root);
                    let receive = async move {
                        session::receive_session(&mut stream, peer, &root, &limits).await
                    };
                    sessions.spawn(supervise(peer, receive, Arc::clone(&logger)));
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => reap(joined),
            }
        }
    }

    fn reap(joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(error = %e, "session supervisor failed");
        }
    }

    /// Run `session` on its own task and hand the report to `logger`. A
    /// session that panics is still reported, as `Panicked`, under its peer.
    pub(crate) async fn supervise<F>(peer: SocketAddr, session: F, logger: Arc<dyn SessionLogger>)
    where
        F: Future<Output = SessionReport> + Send + 'static,
    {
        let report = match tokio::spawn(session).await {
            Ok(report) => report,
            Err(e) => {
                let message = panic_message(e);
                error!(%peer, error = %message, "session task failed");
                SessionReport {
                    peer,
                    filename: None,
                    outcome: SessionOutcome::Panicked { message },
                }
            }
        };
        logger.finished(report);
    }

    fn panic_message(e: JoinError) -> String {
        match e.try_into_panic() {
            Ok(payload) => {
                if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "panic with non-string payload".to_string()
                }
            }
            Err(e) => e.to_string(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::codec::encode;
        use crate::logger::ChannelLogger;
        use crate::session::SessionState;
        use std::path::Path;
        use tempfile::TempDir;
        use tokio::io::AsyncWriteExt;
        use tokio::sync::mpsc;

        type Conn = io::Result<(TcpStream, SocketAddr)>;

        // Lets a test decide what each accept returns.
        impl Accept for mpsc::Receiver<Conn> {
            async fn accept_conn(&mut self) -> Conn {
                match self.recv().await {
                    Some(conn) => conn,
                    None => std::future::pending().await,
                }
            }
        }

        /// A connected loopback pair: client side, then the accepted side.
        async fn socket_pair() -> (TcpStream, (TcpStream, SocketAddr)) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let client = TcpStream::connect(listener.local_addr().unwrap())
                .await
                .unwrap();
            let accepted = listener.accept().await.unwrap();
            (client, accepted)
        }

        async fn wait_until_exists(path: &Path) {
            for _ in 0..500 {
                if path.exists() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("{} was never created", path.display());
        }

        async fn exploding_session() -> SessionReport {
            panic!("disk on fire")
        }

        #[test]
        fn test_accept_error_classification() {
            let kind = |k| classify_accept_error(&io::Error::new(k, "accept"));
            assert_eq!(kind(io::ErrorKind::ConnectionAborted), AcceptError::Transient);
            assert_eq!(kind(io::ErrorKind::ConnectionReset), AcceptError::Transient);
            assert_eq!(kind(io::ErrorKind::Interrupted), AcceptError::Transient);
            assert_eq!(kind(io::ErrorKind::PermissionDenied), AcceptError::Fatal);
            assert_eq!(kind(io::ErrorKind::InvalidInput), AcceptError::Fatal);

            #[cfg(unix)]
            {
                for code in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS] {
                    assert_eq!(
                        classify_accept_error(&io::Error::from_raw_os_error(code)),
                        AcceptError::Exhausted
                    );
                }
                assert_eq!(
                    classify_accept_error(&io::Error::from_raw_os_error(libc::EBADF)),
                    AcceptError::Fatal
                );
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_transient_accept_errors_keep_serving() {
            let tmp = TempDir::new().unwrap();
            let (logger, mut reports) = ChannelLogger::new();
            let (conns, acceptor) = mpsc::channel::<Conn>(4);
            let server = tokio::spawn(accept_loop(
                acceptor,
                tmp.path().to_path_buf(),
                FrameLimits::default(),
                Arc::new(logger),
            ));

            conns
                .send(Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer gave up")))
                .await
                .unwrap();
            #[cfg(unix)]
            conns
                .send(Err(io::Error::from_raw_os_error(libc::EMFILE)))
                .await
                .unwrap();

            let (mut client, accepted) = socket_pair().await;
            conns.send(Ok(accepted)).await.unwrap();
            client.write_all(&encode(b"after.txt")).await.unwrap();
            client.write_all(&encode(b"still here")).await.unwrap();
            client.write_all(&encode(b"")).await.unwrap();
            client.shutdown().await.unwrap();

            let report = tokio::time::timeout(Duration::from_secs(10), reports.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(report.is_complete(), "{:?}", report);
            assert_eq!(
                std::fs::read(tmp.path().join("after.txt")).unwrap(),
                b"still here"
            );
            assert!(!server.is_finished());
            server.abort();
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_listener_failure_waits_for_running_sessions() {
            let tmp = TempDir::new().unwrap();
            let (logger, mut reports) = ChannelLogger::new();
            let (conns, acceptor) = mpsc::channel::<Conn>(4);
            let server = tokio::spawn(accept_loop(
                acceptor,
                tmp.path().to_path_buf(),
                FrameLimits::default(),
                Arc::new(logger),
            ));

            let (mut client, accepted) = socket_pair().await;
            let peer = accepted.1;
            conns.send(Ok(accepted)).await.unwrap();
            client.write_all(&encode(b"inflight.bin")).await.unwrap();
            client.write_all(&encode(&[3u8; 100])).await.unwrap();
            let partial = tmp.path().join("inflight.bin");
            wait_until_exists(&partial).await;

            conns
                .send(Err(io::Error::new(io::ErrorKind::PermissionDenied, "listener revoked")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(!server.is_finished(), "accept loop returned before its session ended");

            // Peer goes away mid-data: the session must still clean up and report
            drop(client);
            let report = tokio::time::timeout(Duration::from_secs(10), reports.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(report.peer, peer);
            match report.outcome {
                SessionOutcome::Aborted { state, error } => {
                    assert_eq!(state, SessionState::AwaitingData);
                    assert!(error.is_truncation());
                }
                other => panic!("expected aborted session, got {:?}", other),
            }
            assert!(!partial.exists());

            let result = tokio::time::timeout(Duration::from_secs(10), server)
                .await
                .unwrap()
                .unwrap();
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_panicked_session_is_reported_with_peer() {
            let (logger, mut reports) = ChannelLogger::new();
            let peer: SocketAddr = "192.0.2.9:7000".parse().unwrap();
            supervise(peer, exploding_session(), Arc::new(logger)).await;

            let report = reports.recv().await.unwrap();
            assert_eq!(report.peer, peer);
            assert_eq!(report.state(), SessionState::Aborted);
            assert!(report.destination().is_none());
            match report.outcome {
                SessionOutcome::Panicked { message } => assert!(message.contains("disk on fire")),
                other => panic!("expected panicked session, got {:?}", other),
            }
        }
    }
}

pub mod client {
    use std::net::SocketAddr;
    use std::path::Path;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tracing::{debug, info};

    use crate::error::{Result, TransferError};
    use crate::naming;
    use crate::protocol::FrameLimits;
    use crate::receiver;
    use crate::sender;
    use crate::session::discard_partial;

    pub async fn connect(addr: &str) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransferError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Negotiated send: connect, send the source's filename, then its content.
    ///
    /// The source is opened first so a missing file fails before anything
    /// reaches the wire. Any failure aborts the whole session.
    pub async fn push_file(addr: &str, source: &Path) -> Result<u64> {
        let file = sender::open_source(source).await?;
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut stream = connect(addr).await?;
        naming::send_filename(&mut stream, &filename).await?;
        let sent = sender::send_reader(&mut stream, file).await?;
        stream
            .shutdown()
            .await
            .map_err(TransferError::StreamWriteFailed)?;
        info!(addr, file = %filename, bytes = sent, "push complete");
        Ok(sent)
    }

    /// Raw send: bind `bind`, wait for one peer and stream `source` to it
    /// with no filename preamble.
    pub async fn offer_file(bind: &str, source: &Path) -> Result<(SocketAddr, u64)> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| TransferError::Listen {
                addr: bind.to_string(),
                source,
            })?;
        offer_on(listener, source).await
    }

    /// `offer_file` on an already bound listener.
    pub async fn offer_on(listener: TcpListener, source: &Path) -> Result<(SocketAddr, u64)> {
        let file = sender::open_source(source).await?;
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|source| TransferError::Listen {
                addr: listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        debug!(%peer, "raw peer connected");
        let sent = sender::send_reader(&mut stream, file).await?;
        stream
            .shutdown()
            .await
            .map_err(TransferError::StreamWriteFailed)?;
        Ok((peer, sent))
    }

    /// Raw receive: connect to `addr` and write the stream into `destination`.
    /// A partial destination is removed on failure.
    pub async fn fetch_file(addr: &str, destination: &Path, limits: &FrameLimits) -> Result<u64> {
        let mut stream = connect(addr).await?;
        match receiver::receive_file(&mut stream, destination, limits).await {
            Ok(n) => {
                info!(addr, destination = %destination.display(), bytes = n, "fetch complete");
                Ok(n)
            }
            Err(e) => {
                discard_partial(destination, &e).await;
                Err(e)
            }
        }
    }
}

//! Tests for the connection supervisor and command acknowledgement

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rfplayer_core::protocol::{
        CommandDispatcher, ConnectionConfig, ConnectionManager, ConnectionState, Connector,
        InitCommands, Link, ProtocolError,
    };
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{
        AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
        WriteHalf,
    };
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    /// Hands out prepared links in order, then hangs forever
    #[derive(Default)]
    struct ScriptedConnector {
        links: Mutex<VecDeque<Link>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn with_links(links: Vec<Link>) -> Arc<Self> {
            Arc::new(Self {
                links: Mutex::new(links.into()),
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self) -> Result<Link, ProtocolError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.links.lock().unwrap().pop_front();
            match next {
                Some(link) => Ok(link),
                None => std::future::pending().await,
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Write half that counts completed shutdowns
    struct CountingWriter {
        inner: WriteHalf<DuplexStream>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl AsyncWrite for CountingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let result = Pin::new(&mut self.inner).poll_shutdown(cx);
            if result.is_ready() {
                self.shutdowns.fetch_add(1, Ordering::SeqCst);
            }
            result
        }
    }

    type ServerLines = Lines<BufReader<ReadHalf<DuplexStream>>>;

    /// A link for the manager plus the transceiver's side of it
    fn duplex_link() -> (Link, ServerLines, WriteHalf<DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        (
            Link::from_stream(client),
            BufReader::new(server_read).lines(),
            server_write,
        )
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            connection_timeout: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(5),
            init_commands: InitCommands::default(),
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("rfplayer_core=debug")
            .with_test_writer()
            .try_init();
    }

    async fn wait_connected(manager: &ConnectionManager) {
        let mut state = manager.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    async fn read_init(lines: &mut ServerLines) -> Vec<String> {
        let mut received = Vec::new();
        for _ in 0..InitCommands::default().lines().len() {
            received.push(lines.next_line().await.unwrap().unwrap());
        }
        received
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_schedules_one_reconnect() {
        init_tracing();
        let connector = ScriptedConnector::with_links(vec![]);
        let manager = ConnectionManager::new(config(), connector.clone());
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(availability.try_recv().ok(), Some(false));
        assert!(availability.try_recv().is_err());

        // a late signal for the failed attempt must not add a reconnect
        manager.signal_disconnect();
        manager.signal_disconnect();

        sleep(Duration::from_millis(4400)).await;
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(availability.try_recv().is_err());

        manager.shutdown();
        handle.await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_init_batch_then_frames() {
        let (link, mut server_lines, mut server_write) = duplex_link();
        let connector = ScriptedConnector::with_links(vec![link]);
        let manager = ConnectionManager::new(config(), connector);
        let mut availability = manager.subscribe_availability();
        let (frames_tx, mut frames) = mpsc::unbounded_channel();
        let handle = manager.start(frames_tx).unwrap();

        assert_eq!(availability.recv().await.unwrap(), true);
        assert_eq!(read_init(&mut server_lines).await, InitCommands::default().lines());

        server_write
            .write_all(b"ZIA33{\"frame\":{}}\r\nnoise\r\n\r\nZIA--Welcome\n")
            .await
            .unwrap();

        assert_eq!(frames.recv().await.unwrap(), "ZIA33{\"frame\":{}}");
        assert_eq!(frames.recv().await.unwrap(), "ZIA--Welcome");
        assert_eq!(manager.counters().lines_received, 3);
        assert_eq!(manager.counters().lines_sent, 18);

        manager.shutdown();
        handle.await.unwrap();
        assert!(frames.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_refused_until_init_batch_written() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut server_lines = BufReader::new(server_read).lines();
        let connector = ScriptedConnector::with_links(vec![Link::from_stream(client)]);
        let manager = ConnectionManager::new(config(), connector);
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();

        // the batch does not fit the pipe until the transceiver reads
        sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(availability.try_recv().is_err());
        assert!(matches!(
            manager.write_line("ZIA++PING").await,
            Err(ProtocolError::NotConnected)
        ));

        assert_eq!(read_init(&mut server_lines).await, InitCommands::default().lines());
        wait_connected(&manager).await;
        assert_eq!(availability.recv().await.unwrap(), true);

        manager.write_line("ZIA++PING").await.unwrap();
        assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "ZIA++PING");
        assert_eq!(manager.counters().lines_sent, 19);

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_command_acknowledged_by_control_line() {
        let (link, mut server_lines, mut server_write) = duplex_link();
        let manager = ConnectionManager::new(config(), ScriptedConnector::with_links(vec![link]));
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();
        wait_connected(&manager).await;
        read_init(&mut server_lines).await;

        let dispatcher = CommandDispatcher::new(manager.clone());
        let send = tokio::spawn(async move { dispatcher.send_raw_command("ZIA++HELLO").await });

        assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "ZIA++HELLO");
        // radio frames do not acknowledge
        server_write.write_all(b"ZIA33{}\r\n").await.unwrap();
        server_write
            .write_all(b"ZIA--Welcome to Ziblue Dongle RFPLAYER\r\n")
            .await
            .unwrap();

        let ack = send.await.unwrap().unwrap();
        assert_eq!(ack, "ZIA--Welcome to Ziblue Dongle RFPLAYER");

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_ack_timeout() {
        let (link, mut server_lines, _server_write) = duplex_link();
        let manager = ConnectionManager::new(config(), ScriptedConnector::with_links(vec![link]));
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();
        wait_connected(&manager).await;
        read_init(&mut server_lines).await;

        let dispatcher =
            CommandDispatcher::new(manager.clone()).with_ack_timeout(Duration::from_millis(300));
        let result = dispatcher.send_raw_command("ZIA++PING").await;
        assert!(matches!(result, Err(ProtocolError::AckTimeout(300))));
        assert!(manager.is_connected());

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_reconnects_after_interval() {
        init_tracing();
        let (first, mut first_lines, first_write) = duplex_link();
        let (second, mut second_lines, _second_write) = duplex_link();
        let connector = ScriptedConnector::with_links(vec![first, second]);
        let manager = ConnectionManager::new(config(), connector.clone());
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();

        assert_eq!(availability.recv().await.unwrap(), true);
        read_init(&mut first_lines).await;

        drop(first_write);
        drop(first_lines);
        assert_eq!(availability.recv().await.unwrap(), false);
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(connector.attempts(), 1);

        assert_eq!(availability.recv().await.unwrap(), true);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(read_init(&mut second_lines).await.len(), 18);
        assert_eq!(manager.counters().connects, 2);
        assert_eq!(manager.counters().disconnects, 1);

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_disconnect_signals_collapse() {
        let (first, mut first_lines, _first_write) = duplex_link();
        let (second, _second_lines, _second_write) = duplex_link();
        let (third, _third_lines, _third_write) = duplex_link();
        let connector = ScriptedConnector::with_links(vec![first, second, third]);
        let manager = ConnectionManager::new(config(), connector.clone());
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();

        assert_eq!(availability.recv().await.unwrap(), true);
        read_init(&mut first_lines).await;

        manager.signal_disconnect();
        manager.signal_disconnect();
        assert_eq!(availability.recv().await.unwrap(), false);

        sleep(Duration::from_secs(8)).await;
        assert_eq!(availability.recv().await.unwrap(), true);
        assert!(availability.try_recv().is_err());
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.counters().connects, 2);
        assert!(manager.is_connected());

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_and_signal_together_reconnect_once() {
        let (first, mut first_lines, first_write) = duplex_link();
        let (second, _second_lines, _second_write) = duplex_link();
        let (third, _third_lines, _third_write) = duplex_link();
        let connector = ScriptedConnector::with_links(vec![first, second, third]);
        let manager = ConnectionManager::new(config(), connector.clone());
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();

        assert_eq!(availability.recv().await.unwrap(), true);
        read_init(&mut first_lines).await;

        // the reader sees EOF while a writer reports the same link as lost
        drop(first_write);
        drop(first_lines);
        manager.signal_disconnect();
        assert_eq!(availability.recv().await.unwrap(), false);

        sleep(Duration::from_secs(8)).await;
        assert_eq!(availability.recv().await.unwrap(), true);
        assert!(availability.try_recv().is_err());
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.counters().connects, 2);
        assert_eq!(manager.counters().disconnects, 1);
        assert!(manager.is_connected());

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_link_once() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let link = Link::new(
            client_read,
            CountingWriter {
                inner: client_write,
                shutdowns: shutdowns.clone(),
            },
        );
        let (server_read, _server_write) = tokio::io::split(server);
        let mut server_lines = BufReader::new(server_read).lines();

        let manager = ConnectionManager::new(config(), ScriptedConnector::with_links(vec![link]));
        let mut availability = manager.subscribe_availability();
        let (frames, _frames_rx) = mpsc::unbounded_channel();
        let handle = manager.start(frames).unwrap();
        wait_connected(&manager).await;
        read_init(&mut server_lines).await;

        manager.shutdown();
        manager.shutdown();
        handle.await.unwrap();

        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(availability.try_recv().ok(), Some(true));
        assert!(availability.try_recv().is_err());
        assert!(matches!(
            manager.write_line("ZIA++PING").await,
            Err(ProtocolError::Shutdown)
        ));
        // peer sees the link closed
        assert!(server_lines.next_line().await.unwrap().is_none());
    }
}

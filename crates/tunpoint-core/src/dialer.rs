//! Protected dialing and server resolution
//!
//! Every socket the engine opens for itself is handed to the host to be
//! protected before it connects, so the engine's own traffic never loops back
//! into the tunnel it serves. The dialer also resolves the configured server
//! domain once per run and keeps the resolved addresses, rotating through
//! them when a dial to the server fails.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpSocket, UdpSocket};
use tracing::{debug, info, warn};
use tunpoint_engine::{Address, Destination, Network, ProtectedConn, SystemDialer};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::host::HostCallbacks;

/// Retry policy for server resolution
#[derive(Debug, Clone)]
pub struct ResolveSettings {
    /// Lookups attempted before giving up
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// How a resolution attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Addresses are available, or there was nothing to resolve
    Resolved,
    /// Every lookup failed
    Unresolved,
    /// The run was cancelled before resolution finished
    Cancelled,
}

#[derive(Debug)]
struct ResolvedServer {
    domain: String,
    ips: Vec<IpAddr>,
    current: AtomicUsize,
}

#[derive(Debug)]
enum ServerState {
    /// No server domain configured for this run
    Unconfigured,
    Pending { run_id: Uuid },
    Ready { run_id: Uuid, server: Arc<ResolvedServer> },
    Failed { run_id: Uuid },
}

impl ServerState {
    fn run_id(&self) -> Option<Uuid> {
        match self {
            ServerState::Unconfigured => None,
            ServerState::Pending { run_id }
            | ServerState::Ready { run_id, .. }
            | ServerState::Failed { run_id } => Some(*run_id),
        }
    }
}

/// Name lookup behind server resolution and domain dials
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// Operating system resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        Ok(tokio::net::lookup_host((host, port))
            .await?
            .map(|addr| addr.ip())
            .collect())
    }
}

/// [`SystemDialer`] that protects each socket through the host
pub struct ProtectedDialer {
    host: Arc<dyn HostCallbacks>,
    resolver: Arc<dyn Resolver>,
    settings: ResolveSettings,
    server: RwLock<ServerState>,
}

impl ProtectedDialer {
    pub fn new(host: Arc<dyn HostCallbacks>, settings: ResolveSettings) -> Self {
        Self::with_resolver(host, Arc::new(SystemResolver), settings)
    }

    pub fn with_resolver(
        host: Arc<dyn HostCallbacks>,
        resolver: Arc<dyn Resolver>,
        settings: ResolveSettings,
    ) -> Self {
        Self {
            host,
            resolver,
            settings,
            server: RwLock::new(ServerState::Unconfigured),
        }
    }

    /// Resolve the run's server (`host:port` or bare host).
    ///
    /// A missing domain or a literal IP resolves immediately. Lookups are
    /// retried per [`ResolveSettings`] and abandoned as soon as `cancel` fires.
    pub async fn resolve_server(
        &self,
        domain: Option<&str>,
        prefer_ipv6: bool,
        cancel: &CancelSignal,
    ) -> ResolveOutcome {
        let run_id = cancel.run_id();

        let Some(domain) = domain.map(str::trim).filter(|d| !d.is_empty()) else {
            self.set_state(ServerState::Unconfigured);
            debug!("No server domain configured, nothing to resolve");
            return ResolveOutcome::Resolved;
        };

        let (host, port) = split_server(domain);
        info!("Preparing domain: {}", domain);

        if let Ok(ip) = host.parse::<IpAddr>() {
            self.set_state(ServerState::Ready {
                run_id,
                server: Arc::new(ResolvedServer {
                    domain: host.to_ascii_lowercase(),
                    ips: vec![ip],
                    current: AtomicUsize::new(0),
                }),
            });
            return ResolveOutcome::Resolved;
        }

        self.set_state(ServerState::Pending { run_id });

        let mut attempts_left = self.settings.max_retries.max(1);
        loop {
            if cancel.is_fired() {
                info!("Resolution of {} abandoned, run cancelled", domain);
                return ResolveOutcome::Cancelled;
            }

            match self.lookup_ips(host, port, prefer_ipv6).await {
                Ok(ips) => {
                    if cancel.is_fired() {
                        return ResolveOutcome::Cancelled;
                    }
                    info!("Resolved {} -> {:?}", domain, ips);
                    self.replace_if_current(
                        run_id,
                        ServerState::Ready {
                            run_id,
                            server: Arc::new(ResolvedServer {
                                domain: host.to_ascii_lowercase(),
                                ips,
                                current: AtomicUsize::new(0),
                            }),
                        },
                    );
                    return ResolveOutcome::Resolved;
                }
                Err(e) => {
                    attempts_left -= 1;
                    warn!(
                        "Resolving {} failed: {} ({} attempt(s) left)",
                        domain, e, attempts_left
                    );
                    if attempts_left == 0 {
                        self.replace_if_current(run_id, ServerState::Failed { run_id });
                        return ResolveOutcome::Unresolved;
                    }
                }
            }

            tokio::select! {
                _ = cancel.fired() => {
                    info!("Resolution of {} abandoned, run cancelled", domain);
                    return ResolveOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.settings.retry_delay) => {}
            }
        }
    }

    /// Whether the configured server has usable addresses.
    /// Trivially true when no server is configured.
    pub fn is_server_ready(&self) -> bool {
        matches!(
            *self.read_state(),
            ServerState::Unconfigured | ServerState::Ready { .. }
        )
    }

    /// Resolved server addresses, current one first
    pub fn server_addrs(&self) -> Vec<IpAddr> {
        match &*self.read_state() {
            ServerState::Ready { server, .. } => {
                let n = server.ips.len();
                let start = server.current.load(Ordering::Acquire);
                (0..n).map(|i| server.ips[(start + i) % n]).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Forget the current run's server
    pub fn reset(&self) {
        self.set_state(ServerState::Unconfigured);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ServerState> {
        match self.server.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: ServerState) {
        match self.server.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    /// Only the run that issued the resolution may publish its result
    fn replace_if_current(&self, run_id: Uuid, state: ServerState) {
        let mut guard = match self.server.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.run_id() == Some(run_id) {
            *guard = state;
        } else {
            debug!("Dropping resolution result of stale run {}", run_id);
        }
    }

    fn ready_server_for(&self, address: &Address) -> Option<Arc<ResolvedServer>> {
        let domain = address.domain()?;
        match &*self.read_state() {
            ServerState::Ready { server, .. } if server.domain == domain => Some(server.clone()),
            _ => None,
        }
    }

    fn protect(&self, fd: i32) -> io::Result<()> {
        let status = self.host.protect(fd);
        if status != 0 {
            warn!("Host refused to protect socket fd={} (status {})", fd, status);
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("failed to protect socket fd={}", fd),
            ));
        }
        debug!("Protected socket fd={}", fd);
        Ok(())
    }

    async fn connect(&self, network: Network, addr: SocketAddr) -> io::Result<ProtectedConn> {
        match network {
            Network::Tcp => {
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                self.protect(raw_handle(&socket))?;
                let stream = socket.connect(addr).await?;
                Ok(ProtectedConn::Tcp(stream))
            }
            Network::Udp => {
                let bind: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = std::net::UdpSocket::bind(bind)?;
                self.protect(raw_handle(&socket))?;
                socket.connect(addr)?;
                socket.set_nonblocking(true)?;
                Ok(ProtectedConn::Udp(UdpSocket::from_std(socket)?))
            }
        }
    }

    /// Distinct addresses of `host`, preferred family first
    async fn lookup_ips(
        &self,
        host: &str,
        port: Option<u16>,
        prefer_ipv6: bool,
    ) -> io::Result<Vec<IpAddr>> {
        let mut ips = Vec::new();
        for ip in self.resolver.lookup(host, port.unwrap_or(0)).await? {
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
        if ips.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        order_by_family(&mut ips, prefer_ipv6);
        Ok(ips)
    }

    async fn dial_server(
        &self,
        server: &ResolvedServer,
        destination: &Destination,
    ) -> io::Result<ProtectedConn> {
        let n = server.ips.len();
        let start = server.current.load(Ordering::Acquire);
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no server addresses");

        for offset in 0..n {
            let idx = (start + offset) % n;
            let addr = SocketAddr::new(server.ips[idx], destination.port);
            match self.connect(destination.network, addr).await {
                Ok(conn) => {
                    if offset > 0 {
                        server.current.store(idx, Ordering::Release);
                        info!("Switched {} to {}", server.domain, server.ips[idx]);
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    debug!("Dial {} via {} failed: {}", destination, addr, e);
                    last_err = e;
                }
            }
        }

        server.current.store((start + 1) % n.max(1), Ordering::Release);
        Err(last_err)
    }
}

#[async_trait]
impl SystemDialer for ProtectedDialer {
    async fn dial(&self, destination: &Destination) -> io::Result<ProtectedConn> {
        if let Some(server) = self.ready_server_for(&destination.address) {
            return self.dial_server(&server, destination).await;
        }

        let addrs: Vec<SocketAddr> = match destination.socket_addr() {
            Some(addr) => vec![addr],
            None => self
                .resolver
                .lookup(&destination.address.to_string(), destination.port)
                .await?
                .into_iter()
                .map(|ip| SocketAddr::new(ip, destination.port))
                .collect(),
        };

        let mut last_err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", destination),
        );
        for addr in addrs {
            match self.connect(destination.network, addr).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!("Dial {} via {} failed: {}", destination, addr, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Split `host[:port]` into host and optional port
fn split_server(spec: &str) -> (&str, Option<u16>) {
    if spec.parse::<IpAddr>().is_ok() {
        return (spec, None);
    }
    match Destination::split_host_port(spec) {
        Some((host, port)) => (host.trim_start_matches('[').trim_end_matches(']'), Some(port)),
        None => (spec, None),
    }
}


/// Stable sort putting the preferred address family first
fn order_by_family(ips: &mut [IpAddr], prefer_ipv6: bool) {
    ips.sort_by_key(|ip| ip.is_ipv6() != prefer_ipv6);
}

#[cfg(unix)]
fn raw_handle<S: std::os::fd::AsRawFd>(socket: &S) -> i32 {
    socket.as_raw_fd()
}

#[cfg(windows)]
fn raw_handle<S: std::os::windows::io::AsRawSocket>(socket: &S) -> i32 {
    socket.as_raw_socket() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHostCallbacks;
    use tokio::net::TcpListener;

    fn dialer_with(host: MockHostCallbacks, settings: ResolveSettings) -> ProtectedDialer {
        ProtectedDialer::with_resolver(Arc::new(host), Arc::new(MockResolver::new()), settings)
    }

    fn failing_resolver(expected_lookups: usize) -> MockResolver {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .times(expected_lookups)
            .returning(|host, _| {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", host),
                ))
            });
        resolver
    }

    fn fast_settings(max_retries: u32) -> ResolveSettings {
        ResolveSettings {
            max_retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_tcp_dial_protects_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut host = MockHostCallbacks::new();
        host.expect_protect().times(1).returning(|_| 0);
        let dialer = dialer_with(host, ResolveSettings::default());

        let conn = dialer
            .dial(&Destination::tcp(addr.ip(), addr.port()))
            .await
            .unwrap();
        assert!(matches!(conn, ProtectedConn::Tcp(_)));
    }

    #[tokio::test]
    async fn test_dial_fails_when_host_refuses_protection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut host = MockHostCallbacks::new();
        host.expect_protect().times(1).returning(|_| 1);
        let dialer = dialer_with(host, ResolveSettings::default());

        let err = dialer
            .dial(&Destination::tcp(addr.ip(), addr.port()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_udp_dial_is_connected() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut host = MockHostCallbacks::new();
        host.expect_protect().times(1).returning(|_| 0);
        let dialer = dialer_with(host, ResolveSettings::default());

        let socket = dialer
            .dial(&Destination::udp(addr.ip(), addr.port()))
            .await
            .unwrap()
            .into_udp()
            .unwrap();
        socket.send(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_no_domain_is_ready() {
        let dialer = dialer_with(MockHostCallbacks::new(), fast_settings(1));
        let cancel = CancelSignal::new();

        assert_eq!(
            dialer.resolve_server(None, false, &cancel).await,
            ResolveOutcome::Resolved
        );
        assert!(dialer.is_server_ready());
    }

    #[tokio::test]
    async fn test_literal_ip_resolves_immediately() {
        let dialer = dialer_with(MockHostCallbacks::new(), fast_settings(1));
        let cancel = CancelSignal::new();

        let outcome = dialer
            .resolve_server(Some("203.0.113.7:443"), false, &cancel)
            .await;
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert!(dialer.is_server_ready());
        assert_eq!(dialer.server_addrs(), vec!["203.0.113.7".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_unresolvable_domain_gives_up() {
        let dialer = ProtectedDialer::with_resolver(
            Arc::new(MockHostCallbacks::new()),
            Arc::new(failing_resolver(2)),
            fast_settings(2),
        );
        let cancel = CancelSignal::new();

        let outcome = dialer
            .resolve_server(Some("server.invalid:443"), false, &cancel)
            .await;
        assert_eq!(outcome, ResolveOutcome::Unresolved);
        assert!(!dialer.is_server_ready());
    }

    #[tokio::test]
    async fn test_cancel_abandons_resolution() {
        let dialer = ProtectedDialer::with_resolver(
            Arc::new(MockHostCallbacks::new()),
            Arc::new(failing_resolver(0)),
            ResolveSettings {
                max_retries: 5,
                retry_delay: Duration::from_secs(30),
            },
        );
        let cancel = CancelSignal::new();
        cancel.fire();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            dialer.resolve_server(Some("server.invalid:443"), false, &cancel),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ResolveOutcome::Cancelled);
        assert!(!dialer.is_server_ready());
    }

    #[tokio::test]
    async fn test_domain_resolves_through_resolver() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .withf(|host, port| host == "vpn.example.com" && *port == 443)
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    "2001:db8::7".parse().unwrap(),
                    "192.0.2.7".parse().unwrap(),
                    "192.0.2.7".parse().unwrap(),
                ])
            });
        let dialer = ProtectedDialer::with_resolver(
            Arc::new(MockHostCallbacks::new()),
            Arc::new(resolver),
            fast_settings(1),
        );
        let cancel = CancelSignal::new();

        let outcome = dialer
            .resolve_server(Some("vpn.example.com:443"), false, &cancel)
            .await;
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert!(dialer.is_server_ready());
        assert_eq!(
            dialer.server_addrs(),
            vec![
                "192.0.2.7".parse::<IpAddr>().unwrap(),
                "2001:db8::7".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_retried_until_success() {
        let mut resolver = MockResolver::new();
        let mut seq = mockall::Sequence::new();
        resolver
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")));
        resolver
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec!["198.51.100.9".parse().unwrap()]));
        let dialer = ProtectedDialer::with_resolver(
            Arc::new(MockHostCallbacks::new()),
            Arc::new(resolver),
            fast_settings(3),
        );

        let outcome = dialer
            .resolve_server(Some("vpn.example.com"), false, &CancelSignal::new())
            .await;
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert_eq!(
            dialer.server_addrs(),
            vec!["198.51.100.9".parse::<IpAddr>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_stale_run_cannot_publish() {
        let dialer = dialer_with(MockHostCallbacks::new(), fast_settings(1));
        let old = CancelSignal::new();
        let new = CancelSignal::new();

        dialer.set_state(ServerState::Pending { run_id: new.run_id() });
        dialer.replace_if_current(old.run_id(), ServerState::Failed { run_id: old.run_id() });

        assert!(matches!(*dialer.read_state(), ServerState::Pending { .. }));
    }

    #[tokio::test]
    async fn test_server_dial_rotates_past_dead_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut host = MockHostCallbacks::new();
        host.expect_protect().returning(|_| 0);
        let dialer = dialer_with(host, fast_settings(1));

        let run = CancelSignal::new();
        dialer.set_state(ServerState::Ready {
            run_id: run.run_id(),
            server: Arc::new(ResolvedServer {
                domain: "vpn.example.com".to_string(),
                // Nothing listens on the IPv6 loopback for this port
                ips: vec!["::1".parse().unwrap(), "127.0.0.1".parse().unwrap()],
                current: AtomicUsize::new(0),
            }),
        });

        let conn = dialer
            .dial(&Destination::tcp("vpn.example.com", port))
            .await
            .unwrap();
        assert!(matches!(conn, ProtectedConn::Tcp(_)));
        assert_eq!(
            dialer.server_addrs()[0],
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_family_ordering() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();

        let mut ips = vec![v6, v4];
        order_by_family(&mut ips, false);
        assert_eq!(ips, vec![v4, v6]);

        order_by_family(&mut ips, true);
        assert_eq!(ips, vec![v6, v4]);
    }

    #[test]
    fn test_split_server() {
        assert_eq!(split_server("vpn.example.com:443"), ("vpn.example.com", Some(443)));
        assert_eq!(split_server("vpn.example.com"), ("vpn.example.com", None));
        assert_eq!(split_server("[2001:db8::1]:443"), ("2001:db8::1", Some(443)));
        assert_eq!(split_server("2001:db8::1"), ("2001:db8::1", None));
    }
}

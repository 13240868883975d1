//! Server descriptors.

use crate::error::EngineError;
use crate::registry::ProtocolRegistry;
use gameq_net::{Connection, ConnectionConfig};
use gameq_protocol::{Options, Protocol, QueryTarget};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// A server to query, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Protocol identifier, e.g. `csgo`.
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    /// `host:port` or `[v6]:port`, where port is the client (game) port.
    pub host: String,
    /// Result key; defaults to `ip:port`.
    #[serde(default)]
    pub id: Option<String>,
    /// Explicit query port, overriding the protocol's offset.
    #[serde(default)]
    pub query_port: Option<u16>,
    /// Protocol specific options.
    #[serde(default)]
    pub options: Options,
}

impl ServerSpec {
    pub fn new(kind: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            host: host.into(),
            id: None,
            query_port: None,
            options: Options::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query_port(mut self, port: u16) -> Self {
        self.query_port = Some(port);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Parses `KIND@HOST:PORT`.
impl FromStr for ServerSpec {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((kind, host)) if !kind.is_empty() && !host.is_empty() => {
                Ok(ServerSpec::new(kind, host))
            }
            _ => Err(EngineError::InvalidAddress(format!(
                "expected KIND@HOST:PORT, got '{}'",
                s
            ))),
        }
    }
}

/// A resolved server with its protocol instance.
///
/// Built once per batch. Afterwards only the socket stash and the
/// protocol's packets change.
pub struct Server {
    id: String,
    ip: IpAddr,
    port_client: u16,
    port_query: u16,
    protocol: Box<dyn Protocol>,
    options: Options,
    sockets: Vec<Connection>,
}

impl Server {
    pub fn new(spec: ServerSpec, registry: &ProtocolRegistry) -> Result<Self, EngineError> {
        let protocol = registry.create(&spec.kind, &spec.options)?;
        let (ip, port_client) = resolve_host(&spec.host)?;
        let id = spec
            .id
            .unwrap_or_else(|| SocketAddr::new(ip, port_client).to_string());

        let port_query = match spec.query_port {
            Some(port) => port,
            None => protocol
                .query_port(port_client)
                .filter(|port| *port != 0)
                .ok_or_else(|| EngineError::InvalidQueryPort {
                    server_id: id.clone(),
                })?,
        };

        Ok(Self {
            id,
            ip,
            port_client,
            port_query,
            protocol,
            options: spec.options,
            sockets: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port_client(&self) -> u16 {
        self.port_client
    }

    pub fn port_query(&self) -> u16 {
        self.port_query
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn query_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port_query)
    }

    pub fn target(&self) -> QueryTarget {
        QueryTarget {
            ip: self.ip,
            port_client: self.port_client,
            port_query: self.port_query,
        }
    }

    pub fn protocol(&self) -> &dyn Protocol {
        self.protocol.as_ref()
    }

    pub fn protocol_mut(&mut self) -> &mut dyn Protocol {
        self.protocol.as_mut()
    }

    /// A fresh, unopened connection to the query port.
    pub fn connection(&self, connect_timeout: Duration) -> Connection {
        Connection::new(
            ConnectionConfig::new(self.protocol.transport(), self.query_addr())
                .with_connect_timeout(connect_timeout),
        )
    }

    /// Stashes an open connection for a later phase.
    pub fn socket_add(&mut self, connection: Connection) {
        self.sockets.push(connection);
    }

    /// Takes a stashed connection back, if there is one.
    pub fn socket_take(&mut self) -> Option<Connection> {
        self.sockets.pop()
    }

    /// Closes and forgets every stashed connection.
    pub fn socket_cleanse(&mut self) {
        for mut connection in self.sockets.drain(..) {
            connection.close();
        }
    }

    pub fn stashed_sockets(&self) -> usize {
        self.sockets.len()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("port_client", &self.port_client)
            .field("port_query", &self.port_query)
            .field("protocol", &self.protocol.kind())
            .field("sockets", &self.sockets.len())
            .finish()
    }
}

/// Splits `host:port` / `[v6]:port` and resolves the host to an address.
/// Hostnames prefer an IPv4 result.
pub fn resolve_host(host: &str) -> Result<(IpAddr, u16), EngineError> {
    let (name, port) = if let Some(rest) = host.strip_prefix('[') {
        let (name, after) = rest
            .split_once(']')
            .ok_or_else(|| EngineError::InvalidAddress(host.to_string()))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| EngineError::MissingPort(host.to_string()))?;
        (name, port)
    } else {
        let (name, port) = host
            .rsplit_once(':')
            .ok_or_else(|| EngineError::MissingPort(host.to_string()))?;
        if name.contains(':') {
            // Bare IPv6 literal without brackets
            return Err(EngineError::InvalidAddress(host.to_string()));
        }
        (name, port)
    };

    if port.is_empty() {
        return Err(EngineError::MissingPort(host.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| EngineError::InvalidAddress(host.to_string()))?;
    if name.is_empty() {
        return Err(EngineError::InvalidAddress(host.to_string()));
    }

    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok((ip, port));
    }

    let addrs: Vec<SocketAddr> = (name, port)
        .to_socket_addrs()
        .map_err(|e| EngineError::Resolve {
            host: name.to_string(),
            reason: e.to_string(),
        })?
        .collect();
    let addr = addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .ok_or_else(|| EngineError::Resolve {
            host: name.to_string(),
            reason: "no addresses found".to_string(),
        })?;
    tracing::debug!("Resolved {} to {}", name, addr.ip());
    Ok((addr.ip(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gameq_protocol::Transport;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_resolve_literals() {
        assert_eq!(
            resolve_host("10.0.0.5:27015").unwrap(),
            (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 27015)
        );
        assert_eq!(
            resolve_host("[::1]:27960").unwrap(),
            (IpAddr::V6(Ipv6Addr::LOCALHOST), 27960)
        );
        assert_eq!(resolve_host("localhost:1").unwrap().1, 1);
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(resolve_host("10.0.0.5"), Err(EngineError::MissingPort(_))));
        assert!(matches!(resolve_host("10.0.0.5:"), Err(EngineError::MissingPort(_))));
        assert!(matches!(resolve_host("[::1]"), Err(EngineError::MissingPort(_))));
        assert!(matches!(resolve_host("::1:80"), Err(EngineError::InvalidAddress(_))));
        assert!(matches!(resolve_host("1.2.3.4:99999"), Err(EngineError::InvalidAddress(_))));
        assert!(matches!(resolve_host(":80"), Err(EngineError::InvalidAddress(_))));
        assert!(matches!(
            resolve_host("no-such-host.invalid:80"),
            Err(EngineError::Resolve { .. })
        ));
    }

    #[test]
    fn test_server_defaults() {
        let registry = ProtocolRegistry::builtin();
        let server = Server::new(ServerSpec::new("arma3", "192.168.1.2:2302"), &registry).unwrap();

        assert_eq!(server.id(), "192.168.1.2:2302");
        assert_eq!(server.port_client(), 2302);
        assert_eq!(server.port_query(), 2303);
        assert_eq!(server.query_addr(), "192.168.1.2:2303".parse().unwrap());
        assert_eq!(server.protocol().transport(), Transport::Udp);
        assert_eq!(server.target().port_query, 2303);
    }

    #[test]
    fn test_server_overrides() {
        let registry = ProtocolRegistry::builtin();
        let spec = ServerSpec::new("bf2", "10.0.0.1:16567")
            .with_id("my-bf2")
            .with_query_port(29999)
            .with_option("master", true);
        let server = Server::new(spec, &registry).unwrap();

        assert_eq!(server.id(), "my-bf2");
        assert_eq!(server.port_query(), 29999);
        assert_eq!(server.options().get("master"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_options_reach_protocol() {
        let registry = ProtocolRegistry::builtin();
        let spec = ServerSpec::new("gamespy3", "10.0.0.1:29900").with_option("challenge", false);
        let server = Server::new(spec, &registry).unwrap();
        assert!(!server.protocol().has_challenge());
    }

    #[test]
    fn test_query_port_out_of_range() {
        let registry = ProtocolRegistry::builtin();
        let err = Server::new(ServerSpec::new("bf2", "10.0.0.1:60000"), &registry).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQueryPort { .. }));
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = ProtocolRegistry::builtin();
        let err = Server::new(ServerSpec::new("quake9", "10.0.0.1:1"), &registry).unwrap_err();
        assert!(matches!(err, EngineError::UnknownProtocol(kind) if kind == "quake9"));
    }

    #[test]
    fn test_spec_from_str() {
        let spec: ServerSpec = "css@example.com:27015".parse().unwrap();
        assert_eq!(spec.kind, "css");
        assert_eq!(spec.host, "example.com:27015");
        assert!("css".parse::<ServerSpec>().is_err());
        assert!("@1.2.3.4:5".parse::<ServerSpec>().is_err());
    }

    #[test]
    fn test_spec_deserialize() {
        let spec: ServerSpec = serde_json::from_value(serde_json::json!({
            "type": "tf2",
            "host": "1.2.3.4:27015",
            "options": {"query_port": 27016}
        }))
        .unwrap();
        assert_eq!(spec.kind, "tf2");
        assert!(spec.id.is_none());
        assert_eq!(spec.options.len(), 1);
    }

    #[tokio::test]
    async fn test_socket_stash() {
        let registry = ProtocolRegistry::builtin();
        let target = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let host = target.local_addr().unwrap().to_string();
        let mut server = Server::new(ServerSpec::new("gamespy3", host), &registry).unwrap();

        let mut conn = server.connection(Duration::from_secs(1));
        conn.write(b"x").await.unwrap();
        let local = conn.local_addr();
        server.socket_add(conn);
        assert_eq!(server.stashed_sockets(), 1);

        let conn = server.socket_take().unwrap();
        assert_eq!(conn.local_addr(), local);
        assert!(server.socket_take().is_none());

        server.socket_add(conn);
        server.socket_cleanse();
        assert_eq!(server.stashed_sockets(), 0);
    }
}

//! Query engine - challenge round, query round, and decoding for a batch.

use crate::config::Config;
use crate::error::EngineError;
use crate::registry::ProtocolRegistry;
use crate::server::{Server, ServerSpec};
use bytes::{Bytes, BytesMut};
use gameq_net::{Connection, NetError, Poller};
use gameq_protocol::{format_join_link, Buffer, Fields, PacketKind, ResultSet};
use std::collections::HashMap;
use std::path::Path;

/// Separator between responses in a capture file.
pub const CAPTURE_SEPARATOR: &[u8] = b"\n||\n";

/// Chunks received per server, keyed by the server's batch index.
type Responses = HashMap<usize, Vec<Bytes>>;

/// Queries a batch of game servers.
///
/// Servers are added with [`add_server`](Self::add_server) and queried
/// together by [`process`](Self::process), which empties the batch. All
/// sockets of a phase are driven by one [`Poller`] under a shared deadline.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    registry: ProtocolRegistry,
    servers: Vec<Server>,
}

impl Engine {
    /// Creates an engine with the built-in protocols.
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: ProtocolRegistry::builtin(),
            servers: Vec::new(),
        })
    }

    pub fn with_registry(mut self, registry: ProtocolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Resolves and queues a server for the next batch.
    pub fn add_server(&mut self, spec: ServerSpec) -> Result<(), EngineError> {
        let server = Server::new(spec, &self.registry)?;
        self.queue(server);
        Ok(())
    }

    fn queue(&mut self, server: Server) {
        tracing::debug!(
            "Added server {} ({} via {})",
            server.id(),
            server.protocol().kind(),
            server.query_addr()
        );
        self.servers.push(server);
    }

    /// Queues every server or none: on the first failure nothing is added.
    pub fn add_servers(
        &mut self,
        specs: impl IntoIterator<Item = ServerSpec>,
    ) -> Result<(), EngineError> {
        let servers = specs
            .into_iter()
            .map(|spec| Server::new(spec, &self.registry))
            .collect::<Result<Vec<_>, _>>()?;
        for server in servers {
            self.queue(server);
        }
        Ok(())
    }

    /// Queues every server that resolves and returns the failures of the
    /// others, in input order.
    pub fn add_servers_partial(
        &mut self,
        specs: impl IntoIterator<Item = ServerSpec>,
    ) -> Vec<(ServerSpec, EngineError)> {
        let mut failures = Vec::new();
        for spec in specs {
            if let Err(e) = self.add_server(spec.clone()) {
                failures.push((spec, e));
            }
        }
        failures
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn clear_servers(&mut self) {
        self.servers.clear();
    }

    /// Queries every queued server and returns one field map per server id.
    ///
    /// Outside debug mode per-server failures never fail the batch: the
    /// server is reported with `gq_online = false`.
    pub async fn process(&mut self) -> Result<HashMap<String, Fields>, EngineError> {
        let mut servers = std::mem::take(&mut self.servers);
        tracing::info!("Querying {} servers", servers.len());

        let result = self.run(&mut servers).await;
        for server in servers.iter_mut() {
            server.socket_cleanse();
        }

        if let Ok(results) = &result {
            let online = results
                .values()
                .filter(|fields| fields.get("gq_online") == Some(&serde_json::Value::Bool(true)))
                .count();
            tracing::info!("Batch done: {}/{} servers online", online, results.len());
        }
        result
    }

    async fn run(&self, servers: &mut [Server]) -> Result<HashMap<String, Fields>, EngineError> {
        self.do_challenges(servers).await?;
        let responses = self.do_queries(servers).await?;
        self.parse(servers, responses)
    }

    fn poller(&self) -> Poller {
        Poller::new(self.config.query.timeout(), self.config.query.poll_interval())
            .with_max_datagram_size(self.config.query.max_datagram_size)
    }

    /// Sends challenge packets, applies the replies and stashes the sockets
    /// that got one so the query goes out from the same local port.
    async fn do_challenges(&self, servers: &mut [Server]) -> Result<(), EngineError> {
        let mut connections: Vec<(usize, Connection)> = Vec::new();

        for (index, server) in servers.iter().enumerate() {
            if !server.protocol().has_challenge() {
                continue;
            }
            let Some(packet) = server.protocol().packets().get(PacketKind::Challenge) else {
                continue;
            };

            let mut connection = server.connection(self.config.query.timeout());
            match connection.write(&packet.to_bytes()).await {
                Ok(_) => connections.push((index, connection)),
                Err(e) => self.net_failure(server, e)?,
            }
            tokio::time::sleep(self.config.query.write_wait()).await;
        }

        if connections.is_empty() {
            return Ok(());
        }

        tracing::debug!("Waiting for {} challenge responses", connections.len());
        let refs: Vec<(usize, &Connection)> = connections.iter().map(|(i, c)| (*i, c)).collect();
        let mut responses = self.poller().collect(&refs).await;

        for (index, connection) in connections {
            let server = &mut servers[index];
            let Some(chunks) = responses.remove(&index) else {
                tracing::debug!("No challenge response from {}", server.id());
                continue;
            };

            match server.protocol_mut().apply_challenge(Buffer::new(concat(&chunks))) {
                Ok(applied) => {
                    tracing::debug!("Challenge from {} applied: {}", server.id(), applied);
                }
                Err(source) if self.config.debug => {
                    return Err(EngineError::Decode {
                        server_id: server.id().to_string(),
                        source,
                        completed: HashMap::new(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Bad challenge response from {}: {}", server.id(), e);
                }
            }
            server.socket_add(connection);
        }

        Ok(())
    }

    /// Sends every query packet and collects the responses. All query
    /// connections are closed before returning.
    async fn do_queries(&self, servers: &mut [Server]) -> Result<Responses, EngineError> {
        let mut connections: Vec<(usize, Connection)> = Vec::new();

        for (index, server) in servers.iter_mut().enumerate() {
            let target = server.target();
            server.protocol_mut().before_send(&target);

            let mut connection = match server.socket_take() {
                Some(connection) => connection,
                None => server.connection(self.config.query.timeout()),
            };

            let packets: Vec<Bytes> = server
                .protocol()
                .packets()
                .queries()
                .map(|(_, packet)| packet.to_bytes())
                .collect();

            let mut failure = None;
            for packet in packets {
                if let Err(e) = connection.write(&packet).await {
                    failure = Some(e);
                    break;
                }
                tokio::time::sleep(self.config.query.write_wait()).await;
            }

            match failure {
                Some(e) => {
                    connection.close();
                    self.net_failure(server, e)?;
                }
                None => connections.push((index, connection)),
            }
        }

        let refs: Vec<(usize, &Connection)> = connections.iter().map(|(i, c)| (*i, c)).collect();
        let responses = self.poller().collect(&refs).await;

        for (_, connection) in connections.iter_mut() {
            connection.close();
        }
        Ok(responses)
    }

    /// Decodes each server's responses and adds the `gq_*` fields.
    fn parse(
        &self,
        servers: &[Server],
        mut responses: Responses,
    ) -> Result<HashMap<String, Fields>, EngineError> {
        let mut results: HashMap<String, Fields> = HashMap::new();

        for (index, server) in servers.iter().enumerate() {
            let chunks = responses.remove(&index).unwrap_or_default();
            let decoded = if chunks.is_empty() {
                tracing::debug!("No response from {}", server.id());
                None
            } else {
                if let Some(path) = &self.config.capture.packets_file {
                    capture_packets(path, &chunks);
                }
                match server.protocol().process_response(&chunks) {
                    Ok(result) => Some(result),
                    Err(source) if self.config.debug => {
                        return Err(EngineError::Decode {
                            server_id: server.id().to_string(),
                            source,
                            completed: results,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Unable to decode response from {}: {}", server.id(), e);
                        None
                    }
                }
            };

            results.insert(server.id().to_string(), annotate(server, decoded));
        }

        Ok(results)
    }

    fn net_failure(&self, server: &Server, source: NetError) -> Result<(), EngineError> {
        if self.config.debug {
            return Err(EngineError::Net {
                server_id: server.id().to_string(),
                source,
            });
        }
        tracing::warn!(
            "Unable to query {} at {}: {}",
            server.id(),
            server.query_addr(),
            source
        );
        Ok(())
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.freeze()
}

fn annotate(server: &Server, decoded: Option<ResultSet>) -> Fields {
    let online = decoded.as_ref().is_some_and(|result| !result.is_empty());
    let mut result = decoded.unwrap_or_default();
    let protocol = server.protocol();

    result.add("gq_online", online);
    result.add("gq_address", server.ip().to_string());
    result.add("gq_port_client", server.port_client());
    result.add("gq_port_query", server.port_query());
    result.add("gq_protocol", protocol.family());
    result.add("gq_type", protocol.kind());
    result.add("gq_name", protocol.name_long());
    result.add("gq_transport", protocol.transport().to_string());
    result.add(
        "gq_joinlink",
        protocol
            .join_link()
            .map(|template| format_join_link(template, &server.ip(), server.port_client()))
            .unwrap_or_default(),
    );
    result.into_fields()
}

/// Overwrites `path` with the raw responses of one server.
fn capture_packets(path: &Path, chunks: &[Bytes]) {
    let mut content = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            content.extend_from_slice(CAPTURE_SEPARATOR);
        }
        content.extend_from_slice(chunk);
    }
    if let Err(e) = std::fs::write(path, content) {
        tracing::warn!("Failed to write packet capture to {}: {}", path.display(), e);
    }
}

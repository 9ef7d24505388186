//! `tether serve`: echo service driven entirely through the bridge.
//!
//! The multiplexer is bound as a proxy and every socket operation goes through
//! `Bridge::call`, the same path a script takes.

use crate::config::HostConfig;
use anyhow::{anyhow, bail, Context};
use std::sync::Arc;
use tether_posix::{register_posix, EventMgr};
use tether_sdk::{Bridge, DynValue, ObjectCache, ProxyHandle};

/// Options for `tether serve`
pub struct ServeOptions {
    /// Config file
    pub config: Option<std::path::PathBuf>,
    /// Listen host override
    pub host: Option<String>,
    /// Listen port override
    pub port: Option<u16>,
    /// Ready-event capacity override
    pub max_event: Option<usize>,
}

pub fn execute(options: ServeOptions) -> anyhow::Result<()> {
    let mut config = HostConfig::load(options.config.as_deref())?;
    if let Some(host) = options.host {
        config.listen.host = host;
    }
    if let Some(port) = options.port {
        config.listen.port = port;
    }
    if let Some(max_event) = options.max_event {
        config.mux.max_event = max_event;
    }
    config.validate()?;

    let bridge = build_bridge(&config)?;
    let mut mgr = Box::new(EventMgr::with_config(&bridge, config.mux)?);
    let mut server = EchoServer::start(&bridge, &mut mgr, &config.listen.host, config.listen.port)?;

    log::info!(
        "echo service on {}:{} (max_event {})",
        config.listen.host,
        server.port(&mgr)?,
        config.mux.max_event
    );
    loop {
        server.step(1000)?;
    }
}

/// Bridge with `EventMgr` registered up front
pub fn build_bridge(config: &HostConfig) -> anyhow::Result<Arc<Bridge>> {
    let bridge = if config.bridge.shared_cache {
        Bridge::builder()
            .shared_cache(Arc::new(ObjectCache::new()))
            .build()
    } else {
        Bridge::new()
    };
    register_posix(&bridge).context("registering native classes")?;
    Ok(Arc::new(bridge))
}

/// One listening socket plus the connections accepted from it
pub struct EchoServer {
    bridge: Arc<Bridge>,
    proxy: ProxyHandle,
    listen_fd: i64,
}

impl EchoServer {
    /// Bind `mgr` and start listening.
    ///
    /// `mgr` must stay boxed for as long as the server is used.
    pub fn start(bridge: &Arc<Bridge>, mgr: &mut Box<EventMgr>, host: &str, port: u16) -> anyhow::Result<Self> {
        let proxy = match unsafe { mgr.expose()? } {
            DynValue::Object(handle) => handle,
            other => bail!("EventMgr bound as {}", other.type_name()),
        };
        let out = bridge.call(
            &proxy,
            "listen",
            vec![DynValue::str(host), DynValue::Int(port as i64), DynValue::Int(0)],
        )?;
        let listen_fd = first_int(&out)?;
        Ok(Self {
            bridge: Arc::clone(bridge),
            proxy,
            listen_fd,
        })
    }

    /// Port actually bound
    pub fn port(&self, mgr: &EventMgr) -> anyhow::Result<u16> {
        Ok(mgr.local_port(self.listen_fd as i32)?)
    }

    /// Wait once and serve every ready descriptor; returns how many were ready
    pub fn step(&mut self, timeout_ms: i32) -> anyhow::Result<usize> {
        let out = self.call("wait", vec![DynValue::Int(timeout_ms as i64)])?;
        let records = out
            .first()
            .and_then(DynValue::as_array)
            .ok_or_else(|| anyhow!("wait returned no event list"))?
            .to_vec();

        for record in &records {
            let fd = record
                .field("fd")
                .and_then(DynValue::as_int)
                .ok_or_else(|| anyhow!("event record without fd"))?;
            if fd == self.listen_fd {
                self.accept_all()?;
            } else {
                self.echo(fd)?;
            }
        }
        Ok(records.len())
    }

    fn accept_all(&mut self) -> anyhow::Result<()> {
        loop {
            let out = self.call("accept", vec![DynValue::Int(self.listen_fd)])?;
            match out.first().and_then(DynValue::as_int) {
                Some(fd) => log::info!("connection on fd {}", fd),
                None => return Ok(()),
            }
        }
    }

    fn echo(&mut self, fd: i64) -> anyhow::Result<()> {
        let out = self.call("recv", vec![DynValue::Int(fd), DynValue::Int(0)])?;
        let data = match out.first().and_then(DynValue::as_bytes) {
            Some(data) => data.to_vec(),
            None => {
                log::info!("fd {} closed by peer", fd);
                self.call("close", vec![DynValue::Int(fd)])?;
                return Ok(());
            }
        };

        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let out = self.call("send", vec![DynValue::Int(fd), DynValue::Bytes(rest.to_vec())])?;
            let written = first_int(&out)? as usize;
            if written == 0 {
                log::warn!("fd {} would block, dropping {} bytes", fd, rest.len());
                break;
            }
            rest = rest.get(written..).unwrap_or(&[]);
        }
        Ok(())
    }

    fn call(&self, method: &str, args: Vec<DynValue>) -> anyhow::Result<Vec<DynValue>> {
        self.bridge
            .call(&self.proxy, method, args)
            .with_context(|| format!("EventMgr.{}", method))
    }
}

fn first_int(values: &[DynValue]) -> anyhow::Result<i64> {
    values
        .first()
        .and_then(DynValue::as_int)
        .ok_or_else(|| anyhow!("expected an integer result"))
}

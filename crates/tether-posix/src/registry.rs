//! Script-facing surface of `EventMgr`
//!
//! Registers the multiplexer's methods on its class (`_class_meta:EventMgr`)
//! and offers `register_posix` for hosts that register classes at startup.

use crate::event_mgr::{EventMgr, DEFAULT_RECV_SIZE};
use tether_sdk::{
    Bridge, BridgeResult, ByteString, CallFrame, ClassBuilder, DynValue, RegistrationError, ToDynamic,
};

/// Register every class this crate exposes.
pub fn register_posix(bridge: &Bridge) -> BridgeResult<()> {
    bridge.register::<EventMgr>()?;
    Ok(())
}

/// Methods of `EventMgr`, in the order scripts see them.
pub(crate) fn describe_methods(class: &mut ClassBuilder<EventMgr>) -> Result<(), RegistrationError> {
    class
        .method("connect", connect)?
        .method("listen", listen)?
        .frame_method("wait", wait)?
        .method("send", send)?
        .method("accept", accept)?
        .method("recv", recv)?
        .method("close", close)?
        .method("watched", watched)?;
    Ok(())
}

fn connect(mgr: &mut EventMgr, host: String, port: u16) -> BridgeResult<i32> {
    Ok(mgr.connect(&host, port)?)
}

fn listen(mgr: &mut EventMgr, host: String, port: u16, backlog: i32) -> BridgeResult<i32> {
    Ok(mgr.listen(&host, port, backlog)?)
}

/// `wait([timeout_ms])` pushes one array of ready records
fn wait(mgr: &mut EventMgr, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
    let timeout = frame.get::<i32>(1)?;
    let ready = mgr.wait(timeout)?;
    frame.push(ready.to_dynamic());
    Ok(1)
}

fn send(mgr: &mut EventMgr, fd: i32, data: ByteString) -> BridgeResult<usize> {
    Ok(mgr.send(fd, data.as_slice())?)
}

fn accept(mgr: &mut EventMgr, fd: i32) -> BridgeResult<Option<i32>> {
    Ok(mgr.accept(fd)?)
}

/// Payloads come back as raw bytes; no UTF-8 decoding happens here
fn recv(mgr: &mut EventMgr, fd: i32, max: i64) -> BridgeResult<DynValue> {
    let max = if max > 0 { max as usize } else { DEFAULT_RECV_SIZE };
    Ok(match mgr.recv(fd, max)? {
        Some(bytes) => DynValue::Bytes(bytes),
        None => DynValue::Nil,
    })
}

fn close(mgr: &mut EventMgr, fd: i32) -> bool {
    mgr.close(fd)
}

fn watched(mgr: &EventMgr) -> usize {
    mgr.watched()
}

//! Binary codec for the ZooKeeper 3.x framed protocol.
//!
//! Frames are length-prefixed by the transport layer
//! (`LengthDelimitedCodec`); everything here encodes and decodes frame
//! *bodies*. Integers are big-endian, strings are 4-byte-count-prefixed
//! UTF-8, buffers are 4-byte-count-prefixed bytes, and a count of -1
//! denotes an absent value.

use crate::error::{Result, ZkLinkError};
use crate::models::{
    Acl, ConnectionState, Op, Opcode, Permission, Reply, Stat, WatchKind, WatchedEvent,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// xid of a server-pushed watch event.
pub const XID_WATCH_EVENT: i32 = -1;
/// xid of heartbeat requests and acknowledgements.
pub const XID_HEARTBEAT: i32 = -2;
/// xid of auth requests and replies.
pub const XID_AUTH: i32 = -4;

/// Session password length fixed by the handshake layout.
const PASSWD_LEN: usize = 16;

// ── Encoding ────────────────────────────────────────────────────────────────

/// The 44-byte session-establishment request.
///
/// Layout: `proto_version(4)=0 | last_zxid(8)=0 | wanted_timeout(4) |
/// session_id(8)=0 | passwd_len(4)=16 | passwd(16)=0`.
pub fn encode_connect_request(wanted_timeout_ms: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(44);
    buf.put_i32(0);
    buf.put_i64(0);
    buf.put_i32(wanted_timeout_ms as i32);
    buf.put_i64(0);
    buf.put_i32(PASSWD_LEN as i32);
    buf.put_bytes(0, PASSWD_LEN);
    buf.freeze()
}

/// Parse the 36-byte session-establishment reply into
/// `(negotiated_timeout_ms, session_id)`.
///
/// The leading 8 bytes decode as one big-endian integer; the
/// protocol-version word on the wire is zero, so the value is the
/// negotiated timeout.
pub fn decode_connect_reply(frame: &[u8]) -> Result<(u64, i64)> {
    let mut buf = frame;
    let negotiated = get_i64(&mut buf, "negotiated timeout")?;
    let session_id = get_i64(&mut buf, "session id")?;
    if negotiated <= 0 {
        return Err(ZkLinkError::ProtocolError(format!(
            "non-positive negotiated timeout: {}",
            negotiated
        )));
    }
    Ok((negotiated as u64, session_id))
}

/// Encode a logical request under the given xid.
///
/// `watch` selects the watching variant of `Get`/`Ls`/`Ls2` and is
/// ignored for every other opcode.
pub fn encode_request(op: &Op, xid: i32, watch: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_i32(xid);
    buf.put_i32(op.opcode().wire());
    match op {
        Op::Create {
            path,
            data,
            mode,
            acls,
        } => {
            put_string(&mut buf, path);
            put_buffer(&mut buf, data);
            put_acls(&mut buf, acls);
            buf.put_i32(mode.flags());
        },
        Op::Delete { path } => {
            put_string(&mut buf, path);
            buf.put_i32(-1); // any version
        },
        Op::Get { path } | Op::Ls { path } | Op::Ls2 { path } => {
            put_string(&mut buf, path);
            buf.put_u8(watch as u8);
        },
        Op::Set { path, data } => {
            put_string(&mut buf, path);
            put_buffer(&mut buf, data);
            buf.put_i32(-1);
        },
        Op::GetAcl { path } => {
            put_string(&mut buf, path);
        },
        Op::SetAcl { path, acls } => {
            put_string(&mut buf, path);
            put_acls(&mut buf, acls);
            buf.put_i32(-1);
        },
    }
    buf.freeze()
}

/// Encode an auth request (fixed xid -4).
pub fn encode_auth_request(scheme: &str, auth: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    buf.put_i32(XID_AUTH);
    buf.put_i32(Opcode::Auth.wire());
    buf.put_i32(0); // auth type
    put_string(&mut buf, scheme);
    put_buffer(&mut buf, auth);
    buf.freeze()
}

/// The fixed heartbeat frame body: xid -2, opcode 11.
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFE, 0x00, 0x00, 0x00, 0x0B])
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// An inbound frame, classified by its xid.
#[derive(Debug)]
pub enum Frame {
    /// xid -2
    HeartbeatAck,
    /// xid -1
    WatchEvent(WatchedEvent),
    /// xid -4; `code` is the raw reply error code
    AuthReply { code: i32 },
    /// Any other xid: a reply to an outstanding request. `payload` is the
    /// undecoded body after the reply header; decode it with
    /// [`decode_reply`] once the opcode is known.
    Reply {
        xid: i32,
        zxid: i64,
        code: i32,
        payload: Bytes,
    },
}

/// Classify one frame body.
pub fn decode_frame(mut frame: Bytes) -> Result<Frame> {
    let xid = get_i32(&mut frame, "xid")?;
    match xid {
        XID_HEARTBEAT => Ok(Frame::HeartbeatAck),
        XID_WATCH_EVENT => {
            let _zxid = get_i64(&mut frame, "event zxid")?;
            let _err = get_i32(&mut frame, "event error")?;
            let event_type = get_i32(&mut frame, "event type")?;
            let state = get_i32(&mut frame, "event state")?;
            let path = get_string(&mut frame)?;
            Ok(Frame::WatchEvent(WatchedEvent {
                path,
                kind: watch_kind_from_event_type(event_type)?,
                state: ConnectionState::from_wire(state),
            }))
        },
        XID_AUTH => {
            let _zxid = get_i64(&mut frame, "auth zxid")?;
            let code = get_i32(&mut frame, "auth error")?;
            Ok(Frame::AuthReply { code })
        },
        _ => {
            let zxid = get_i64(&mut frame, "zxid")?;
            let code = get_i32(&mut frame, "error code")?;
            Ok(Frame::Reply {
                xid,
                zxid,
                code,
                payload: frame,
            })
        },
    }
}

/// Map a wire event type to the watch kind it fires.
fn watch_kind_from_event_type(event_type: i32) -> Result<WatchKind> {
    match event_type {
        1 => Ok(WatchKind::Exist),
        2 | 3 => Ok(WatchKind::Data),
        4 => Ok(WatchKind::Child),
        other => Err(ZkLinkError::ProtocolError(format!(
            "unknown watch event type: {}",
            other
        ))),
    }
}

/// Decode a successful reply body by the opcode of the request it answers.
pub fn decode_reply(opcode: Opcode, payload: &[u8]) -> Result<Reply> {
    let mut buf = payload;
    match opcode {
        Opcode::Create => Ok(Reply::Created {
            path: get_string(&mut buf)?,
        }),
        Opcode::Delete => Ok(Reply::Deleted),
        Opcode::GetData => {
            let data = get_buffer(&mut buf)?;
            let stat = get_stat(&mut buf)?;
            Ok(Reply::Data { data, stat })
        },
        Opcode::SetData | Opcode::SetAcl => Ok(Reply::Stat(get_stat(&mut buf)?)),
        Opcode::GetAcl => {
            let acls = get_acls(&mut buf)?;
            let stat = get_stat(&mut buf)?;
            Ok(Reply::Acls { acls, stat })
        },
        Opcode::GetChildren => Ok(Reply::Children {
            children: get_string_vec(&mut buf)?,
        }),
        Opcode::GetChildren2 => {
            let children = get_string_vec(&mut buf)?;
            let stat = get_stat(&mut buf)?;
            Ok(Reply::Children2 { children, stat })
        },
        Opcode::Ping | Opcode::Auth => Err(ZkLinkError::ProtocolError(format!(
            "opcode {:?} has no reply body",
            opcode
        ))),
    }
}

// ── Write helpers ───────────────────────────────────────────────────────────

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn put_buffer(buf: &mut BytesMut, data: &[u8]) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

fn put_acls(buf: &mut BytesMut, acls: &[Acl]) {
    buf.put_i32(acls.len() as i32);
    for acl in acls {
        buf.put_i32(acl.perms.bits() as i32);
        put_string(buf, &acl.scheme);
        put_string(buf, &acl.id);
    }
}

// ── Read helpers ────────────────────────────────────────────────────────────

fn need(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ZkLinkError::ProtocolError(format!(
            "truncated frame reading {}",
            what
        )));
    }
    Ok(())
}

fn get_i32(buf: &mut impl Buf, what: &str) -> Result<i32> {
    need(buf, 4, what)?;
    Ok(buf.get_i32())
}

fn get_i64(buf: &mut impl Buf, what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

fn get_buffer(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let len = get_i32(buf, "buffer length")?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    need(buf, len, "buffer body")?;
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

fn get_string(buf: &mut impl Buf) -> Result<String> {
    let raw = get_buffer(buf)?;
    String::from_utf8(raw)
        .map_err(|e| ZkLinkError::ProtocolError(format!("invalid UTF-8 string: {}", e)))
}

fn get_string_vec(buf: &mut impl Buf) -> Result<Vec<String>> {
    let count = get_i32(buf, "string vector count")?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(get_string(buf)?);
    }
    Ok(out)
}

fn get_acls(buf: &mut impl Buf) -> Result<Vec<Acl>> {
    let count = get_i32(buf, "acl vector count")?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let perms = get_i32(buf, "acl perms")?;
        let scheme = get_string(buf)?;
        let id = get_string(buf)?;
        out.push(Acl {
            perms: Permission::from_bits(perms as u32),
            scheme,
            id,
        });
    }
    Ok(out)
}

fn get_stat(buf: &mut impl Buf) -> Result<Stat> {
    Ok(Stat {
        czxid: get_i64(buf, "stat czxid")?,
        mzxid: get_i64(buf, "stat mzxid")?,
        ctime: get_i64(buf, "stat ctime")?,
        mtime: get_i64(buf, "stat mtime")?,
        version: get_i32(buf, "stat version")?,
        cversion: get_i32(buf, "stat cversion")?,
        aversion: get_i32(buf, "stat aversion")?,
        ephemeral_owner: get_i64(buf, "stat ephemeral owner")?,
        data_length: get_i32(buf, "stat data length")?,
        num_children: get_i32(buf, "stat num children")?,
        pzxid: get_i64(buf, "stat pzxid")?,
    })
}

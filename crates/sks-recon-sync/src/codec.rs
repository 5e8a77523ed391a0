//! Binary encoding of reconciliation messages.
//!
//! All integers are big-endian `u32`. Field elements are little-endian,
//! zero-padded to [`SKS_ZP_NBYTES`]. A frame is the body length followed by
//! the body, and a body is the type byte followed by the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sks_recon_core::{p_sks, pad_sks_element, Bitstring, ZSet, Zp, SKS_ZP_NBYTES};

use crate::error::{Result, SyncError};
use crate::messages::limits::MAX_READ_LEN;
use crate::messages::{Config, MsgType, ReconMsg};

const KEY_VERSION: &str = "version";
const KEY_HTTP_PORT: &str = "http port";
const KEY_BIT_QUANTUM: &str = "bitquantum";
const KEY_MBAR: &str = "mbar";
const KEY_FILTERS: &str = "filters";

/// Append a complete frame for `msg` to `dst`.
pub fn encode_frame(msg: &ReconMsg, dst: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::new();
    body.put_u8(msg.msg_type() as u8);
    encode_payload(msg, &mut body)?;
    put_len(dst, body.len())?;
    dst.extend_from_slice(&body);
    Ok(())
}

/// Decode a frame body (type byte and payload, without the length).
pub fn decode_body(mut body: Bytes) -> Result<ReconMsg> {
    need(&body, 1)?;
    let code = body.get_u8();
    let msg_type = MsgType::try_from(code)
        .map_err(|code| SyncError::Codec(format!("unexpected message code: {}", code)))?;

    let msg = match msg_type {
        MsgType::ReconRqstPoly => ReconMsg::ReconRqstPoly {
            prefix: get_bitstring(&mut body)?,
            size: get_len(&mut body)?,
            samples: get_zarray(&mut body)?,
        },
        MsgType::ReconRqstFull => ReconMsg::ReconRqstFull {
            prefix: get_bitstring(&mut body)?,
            elements: get_zset(&mut body)?,
        },
        MsgType::Elements => ReconMsg::Elements(get_zset(&mut body)?),
        MsgType::FullElements => ReconMsg::FullElements(get_zset(&mut body)?),
        MsgType::SyncFail => ReconMsg::SyncFail,
        MsgType::Done => ReconMsg::Done,
        MsgType::Flush => ReconMsg::Flush,
        MsgType::Error => ReconMsg::Error(get_string(&mut body)?),
        MsgType::DbRqst => ReconMsg::DbRqst(get_string(&mut body)?),
        MsgType::DbRepl => ReconMsg::DbRepl(get_string(&mut body)?),
        MsgType::Config => ReconMsg::Config(get_config(&mut body)?),
    };
    Ok(msg)
}

/// Decode one frame from the front of `src`, if it holds a complete one.
///
/// Consumes nothing when the frame is incomplete.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<ReconMsg>> {
    if src.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    check_len(len)?;
    if src.len() < 4 + len {
        return Ok(None);
    }
    src.advance(4);
    decode_body(src.split_to(len).freeze()).map(Some)
}

fn encode_payload(msg: &ReconMsg, dst: &mut BytesMut) -> Result<()> {
    match msg {
        ReconMsg::ReconRqstPoly {
            prefix,
            size,
            samples,
        } => {
            put_bitstring(dst, prefix)?;
            put_len(dst, *size)?;
            put_zarray(dst, samples.iter(), samples.len())?;
        }
        ReconMsg::ReconRqstFull { prefix, elements } => {
            put_bitstring(dst, prefix)?;
            put_zarray(dst, elements.iter(), elements.len())?;
        }
        ReconMsg::Elements(zs) | ReconMsg::FullElements(zs) => {
            put_zarray(dst, zs.iter(), zs.len())?;
        }
        ReconMsg::SyncFail | ReconMsg::Done | ReconMsg::Flush => {}
        ReconMsg::Error(text) | ReconMsg::DbRqst(text) | ReconMsg::DbRepl(text) => {
            put_string(dst, text)?;
        }
        ReconMsg::Config(config) => put_config(dst, config)?,
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

fn check_len(n: usize) -> Result<()> {
    if n > MAX_READ_LEN {
        return Err(SyncError::Codec(format!(
            "read length {} exceeds maximum limit",
            n
        )));
    }
    Ok(())
}

fn need(src: &Bytes, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(SyncError::Codec(format!(
            "truncated message: need {} bytes, have {}",
            n,
            src.remaining()
        )));
    }
    Ok(())
}

fn put_len(dst: &mut BytesMut, n: usize) -> Result<()> {
    let n = u32::try_from(n)
        .map_err(|_| SyncError::Codec(format!("length {} does not fit in u32", n)))?;
    dst.put_u32(n);
    Ok(())
}

fn get_u32(src: &mut Bytes) -> Result<u32> {
    need(src, 4)?;
    Ok(src.get_u32())
}

fn get_len(src: &mut Bytes) -> Result<usize> {
    let n = get_u32(src)? as usize;
    check_len(n)?;
    Ok(n)
}

/// Append a length-prefixed string.
pub fn put_string(dst: &mut BytesMut, text: &str) -> Result<()> {
    put_len(dst, text.len())?;
    dst.extend_from_slice(text.as_bytes());
    Ok(())
}

fn get_string(src: &mut Bytes) -> Result<String> {
    let n = get_len(src)?;
    need(src, n)?;
    let raw = src.split_to(n);
    String::from_utf8(raw.to_vec()).map_err(|e| SyncError::Codec(e.to_string()))
}

fn put_bitstring(dst: &mut BytesMut, bs: &Bitstring) -> Result<()> {
    put_len(dst, bs.bit_len())?;
    put_len(dst, bs.byte_len())?;
    dst.extend_from_slice(bs.as_bytes());
    Ok(())
}

fn get_bitstring(src: &mut Bytes) -> Result<Bitstring> {
    let nbits = get_len(src)?;
    let nbytes = get_len(src)?;
    if nbits == 0 {
        return Ok(Bitstring::new(0));
    }
    need(src, nbytes)?;
    let raw = src.split_to(nbytes);
    Ok(Bitstring::from_bytes(nbits, &raw))
}

fn put_zp(dst: &mut BytesMut, z: &Zp) {
    dst.extend_from_slice(&pad_sks_element(z.to_le_bytes()));
}

fn get_zp(src: &mut Bytes) -> Result<Zp> {
    need(src, SKS_ZP_NBYTES)?;
    let raw = src.split_to(SKS_ZP_NBYTES);
    Ok(Zp::from_le_bytes(&p_sks(), &raw))
}

fn put_zarray<'a>(
    dst: &mut BytesMut,
    zs: impl Iterator<Item = &'a Zp>,
    count: usize,
) -> Result<()> {
    put_len(dst, count)?;
    dst.reserve(count * SKS_ZP_NBYTES);
    for z in zs {
        put_zp(dst, z);
    }
    Ok(())
}

fn get_zarray(src: &mut Bytes) -> Result<Vec<Zp>> {
    let n = get_len(src)?;
    need(src, n * SKS_ZP_NBYTES)?;
    (0..n).map(|_| get_zp(src)).collect()
}

fn get_zset(src: &mut Bytes) -> Result<ZSet> {
    Ok(get_zarray(src)?.into_iter().collect())
}

fn put_int_entry(dst: &mut BytesMut, key: &str, value: u32) -> Result<()> {
    put_string(dst, key)?;
    dst.put_u32(4);
    dst.put_u32(value);
    Ok(())
}

fn put_config(dst: &mut BytesMut, config: &Config) -> Result<()> {
    put_len(dst, 5 + config.custom.len())?;
    put_string(dst, KEY_VERSION)?;
    put_string(dst, &config.version)?;
    put_int_entry(dst, KEY_HTTP_PORT, config.http_port)?;
    put_int_entry(dst, KEY_BIT_QUANTUM, config.bit_quantum)?;
    put_int_entry(dst, KEY_MBAR, config.mbar)?;
    put_string(dst, KEY_FILTERS)?;
    put_string(dst, &config.filters)?;
    for (k, v) in &config.custom {
        put_string(dst, k)?;
        put_string(dst, v)?;
    }
    Ok(())
}

fn get_config(src: &mut Bytes) -> Result<Config> {
    let n = get_len(src)?;
    let mut config = Config::default();
    for _ in 0..n {
        let key = get_string(src)?;
        match key.as_str() {
            KEY_HTTP_PORT | KEY_BIT_QUANTUM | KEY_MBAR => {
                let width = get_len(src)?;
                if width != 4 {
                    return Err(SyncError::Codec(format!(
                        "invalid length={} for integer config value {}",
                        width, key
                    )));
                }
                let value = get_u32(src)?;
                match key.as_str() {
                    KEY_HTTP_PORT => config.http_port = value,
                    KEY_BIT_QUANTUM => config.bit_quantum = value,
                    _ => config.mbar = value,
                }
            }
            KEY_VERSION => config.version = get_string(src)?,
            KEY_FILTERS => config.filters = get_string(src)?,
            _ => {
                let value = get_string(src)?;
                config.custom.insert(key, value);
            }
        }
    }
    Ok(config)
}

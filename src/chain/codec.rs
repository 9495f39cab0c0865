//! Minimal ABI codec for the order-book contract.
//!
//! Every field the contract emits is a static type, so the codec only deals
//! in 32-byte words: event data decoding keyed on precomputed topic hashes,
//! and calldata/result coding for the three read functions.

use crate::domain::{
    Addr, ChainEvent, CloseReason, ExecutedEvent, OpenedEvent, PositionState, RemovedEvent,
    StopsUpdatedEvent,
};

use super::{ChainError, Trade};

// keccak-256 of the event signatures.
pub const OPENED_TOPIC: &str =
    "0x09bef3857082be2205271a27b5b9367cb8790206d6e07224028ca82f44db0932";
pub const EXECUTED_TOPIC: &str =
    "0x60c5760ef5748ad80b24df38d4014fe20fb70638eb9a4f7efbe54ba60bf38925";
pub const STOPS_UPDATED_TOPIC: &str =
    "0xf471c55b51a61c56a8c1709f3f3b74c59bbc382b16a34ef62682076eaf34d542";
pub const REMOVED_TOPIC: &str =
    "0x0ac1bdd1b95b3e8dd89cbfb69fea7ed34d44e0c73209cfa747e8accf63e2bbd3";

// Function selectors.
pub const GET_TRADE_SELECTOR: &str = "0xdc0bb372";
pub const STATE_OF_SELECTOR: &str = "0xf86824fa";
pub const NEXT_ID_SELECTOR: &str = "0x61b8ce8c";

type Word = [u8; 32];

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Split an 0x-prefixed hex blob into 32-byte words.
pub fn decode_words(data: &str) -> Result<Vec<Word>, ChainError> {
    let bytes = hex::decode(strip_0x(data))
        .map_err(|e| ChainError::Decode(format!("invalid hex: {}", e)))?;
    if bytes.len() % 32 != 0 {
        return Err(ChainError::Decode(format!(
            "data length {} is not a multiple of 32",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|c| {
            let mut w = [0u8; 32];
            w.copy_from_slice(c);
            w
        })
        .collect())
}

fn word_at(words: &[Word], idx: usize) -> Result<&Word, ChainError> {
    words
        .get(idx)
        .ok_or_else(|| ChainError::Decode(format!("missing word {}", idx)))
}

fn word_u32(w: &Word) -> Result<u32, ChainError> {
    if w[..28].iter().any(|&b| b != 0) {
        return Err(ChainError::Decode("uint32 out of range".to_string()));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&w[28..]);
    Ok(u32::from_be_bytes(buf))
}

fn word_u16(w: &Word) -> Result<u16, ChainError> {
    if w[..30].iter().any(|&b| b != 0) {
        return Err(ChainError::Decode("uint16 out of range".to_string()));
    }
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&w[30..]);
    Ok(u16::from_be_bytes(buf))
}

fn word_u8(w: &Word) -> Result<u8, ChainError> {
    if w[..31].iter().any(|&b| b != 0) {
        return Err(ChainError::Decode("uint8 out of range".to_string()));
    }
    Ok(w[31])
}

fn word_bool(w: &Word) -> Result<bool, ChainError> {
    match word_u8(w)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ChainError::Decode(format!("bool value {}", other))),
    }
}

fn word_i64(w: &Word) -> Result<i64, ChainError> {
    let sign_ext = if w[24] & 0x80 != 0 { 0xFF } else { 0x00 };
    if w[..24].iter().any(|&b| b != sign_ext) {
        return Err(ChainError::Decode("int64 out of range".to_string()));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Ok(i64::from_be_bytes(buf))
}

fn word_i128(w: &Word) -> Result<i128, ChainError> {
    let sign_ext = if w[16] & 0x80 != 0 { 0xFF } else { 0x00 };
    if w[..16].iter().any(|&b| b != sign_ext) {
        return Err(ChainError::Decode("int value out of i128 range".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..]);
    Ok(i128::from_be_bytes(buf))
}

fn word_addr(w: &Word) -> Result<Addr, ChainError> {
    if w[..12].iter().any(|&b| b != 0) {
        return Err(ChainError::Decode("address word has high bits".to_string()));
    }
    Ok(Addr::new(&format!("0x{}", hex::encode(&w[12..]))))
}

/// Decode a raw log into a typed event.
///
/// Returns `None` for logs whose topic0 is not one of ours; malformed data
/// under a known topic is a decode error.
pub fn decode_log(topics: &[String], data: &str) -> Result<Option<ChainEvent>, ChainError> {
    let topic0 = match topics.first() {
        Some(t) => t.to_ascii_lowercase(),
        None => return Ok(None),
    };

    let event = match topic0.as_str() {
        OPENED_TOPIC => ChainEvent::Opened(decode_opened(&decode_words(data)?)?),
        EXECUTED_TOPIC => ChainEvent::Executed(decode_executed(&decode_words(data)?)?),
        STOPS_UPDATED_TOPIC => {
            ChainEvent::StopsUpdated(decode_stops_updated(&decode_words(data)?)?)
        }
        REMOVED_TOPIC => ChainEvent::Removed(decode_removed(&decode_words(data)?)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_opened(words: &[Word]) -> Result<OpenedEvent, ChainError> {
    let state_raw = word_u8(word_at(words, 1)?)?;
    let initial_state = match state_raw {
        0 => PositionState::Order,
        1 => PositionState::Open,
        other => {
            return Err(ChainError::Decode(format!(
                "Opened with initial state {}",
                other
            )))
        }
    };
    Ok(OpenedEvent {
        id: word_u32(word_at(words, 0)?)?,
        initial_state,
        asset_id: word_u32(word_at(words, 2)?)?,
        long_side: word_bool(word_at(words, 3)?)?,
        lots: word_u16(word_at(words, 4)?)?,
        entry_or_target_x6: word_i64(word_at(words, 5)?)?,
        sl_x6: word_i64(word_at(words, 6)?)?,
        tp_x6: word_i64(word_at(words, 7)?)?,
        liq_x6: word_i64(word_at(words, 8)?)?,
        trader: word_addr(word_at(words, 9)?)?,
        leverage_x: word_u16(word_at(words, 10)?)?,
    })
}

fn decode_executed(words: &[Word]) -> Result<ExecutedEvent, ChainError> {
    Ok(ExecutedEvent {
        id: word_u32(word_at(words, 0)?)?,
        entry_x6: word_i64(word_at(words, 1)?)?,
    })
}

fn decode_stops_updated(words: &[Word]) -> Result<StopsUpdatedEvent, ChainError> {
    Ok(StopsUpdatedEvent {
        id: word_u32(word_at(words, 0)?)?,
        sl_x6: word_i64(word_at(words, 1)?)?,
        tp_x6: word_i64(word_at(words, 2)?)?,
    })
}

fn decode_removed(words: &[Word]) -> Result<RemovedEvent, ChainError> {
    let reason_raw = word_u8(word_at(words, 1)?)?;
    let reason = CloseReason::from_chain(reason_raw)
        .ok_or_else(|| ChainError::Decode(format!("Removed with reason {}", reason_raw)))?;
    let pnl = word_i128(word_at(words, 3)?)?;
    Ok(RemovedEvent {
        id: word_u32(word_at(words, 0)?)?,
        reason,
        exec_x6: word_i64(word_at(words, 2)?)?,
        pnl_usd6: i64::try_from(pnl)
            .map_err(|_| ChainError::Decode(format!("pnl {} exceeds i64", pnl)))?,
    })
}

/// Calldata for a zero-argument call.
pub fn encode_call(selector: &str) -> String {
    selector.to_string()
}

/// Calldata for a single uint32 argument.
pub fn encode_call_u32(selector: &str, arg: u32) -> String {
    format!("{}{:064x}", selector, arg)
}

/// Decode a `getTrade` call result (11 words).
pub fn decode_trade_result(data: &str) -> Result<Trade, ChainError> {
    let words = decode_words(data)?;
    Ok(Trade {
        owner: word_addr(word_at(&words, 0)?)?,
        asset_id: word_u32(word_at(&words, 1)?)?,
        flags: word_u8(word_at(&words, 2)?)?,
        lots: word_u16(word_at(&words, 3)?)?,
        leverage_x: word_u16(word_at(&words, 4)?)?,
        state: word_u8(word_at(&words, 5)?)?,
        entry_x6: word_i64(word_at(&words, 6)?)?,
        target_x6: word_i64(word_at(&words, 7)?)?,
        sl_x6: word_i64(word_at(&words, 8)?)?,
        tp_x6: word_i64(word_at(&words, 9)?)?,
        liq_x6: word_i64(word_at(&words, 10)?)?,
    })
}

/// Decode a single uint8 call result.
pub fn decode_u8_result(data: &str) -> Result<u8, ChainError> {
    let words = decode_words(data)?;
    word_u8(word_at(&words, 0)?)
}

/// Decode a single uint32 call result.
pub fn decode_u32_result(data: &str) -> Result<u32, ChainError> {
    let words = decode_words(data)?;
    word_u32(word_at(&words, 0)?)
}

/// Parse an 0x-prefixed hex quantity (block number, log index).
pub fn parse_hex_u64(s: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(strip_0x(s), 16)
        .map_err(|e| ChainError::Decode(format!("invalid hex quantity {}: {}", s, e)))
}

#[cfg(test)]
pub(crate) mod testenc {
    //! Word encoders used by codec and gateway tests.

    pub fn enc_u(v: u128) -> String {
        format!("{:064x}", v)
    }

    pub fn enc_i(v: i64) -> String {
        // Two's complement over 256 bits.
        if v >= 0 {
            format!("{:064x}", v as u128)
        } else {
            let low = v as u64;
            format!("{}{:016x}", "f".repeat(48), low)
        }
    }

    pub fn enc_addr(hex40: &str) -> String {
        format!("{:0>64}", hex40.trim_start_matches("0x"))
    }

    pub fn data(words: &[String]) -> String {
        format!("0x{}", words.concat())
    }
}

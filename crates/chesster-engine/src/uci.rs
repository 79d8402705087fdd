//! The four UCI line shapes the session depends on.

use crate::error::EngineError;

pub const CMD_UCI: &str = "uci";
pub const CMD_IS_READY: &str = "isready";
pub const CMD_STOP: &str = "stop";
pub const REPLY_UCI_OK: &str = "uciok";
pub const REPLY_READY_OK: &str = "readyok";
pub const BEST_MOVE_PREFIX: &str = "bestmove";

pub fn is_uci_ok(line: &str) -> bool {
    line == REPLY_UCI_OK
}

pub fn is_ready_ok(line: &str) -> bool {
    line == REPLY_READY_OK
}

pub fn is_best_move(line: &str) -> bool {
    line.split_whitespace().next() == Some(BEST_MOVE_PREFIX)
}

pub fn set_option(name: &str, value: &str) -> String {
    format!("setoption name {name} value {value}")
}

/// Builds `position fen ...`, refusing input that would break line framing.
pub fn position_fen(fen: &str) -> Result<String, EngineError> {
    let fen = fen.trim();
    if fen.contains(['\n', '\r']) {
        return Err(EngineError::InvalidPosition {
            reason: "FEN must be a single line".to_string(),
        });
    }
    if fen.split_whitespace().count() < 2 {
        return Err(EngineError::InvalidPosition {
            reason: format!("'{fen}' is not a FEN (expected placement and side to move)"),
        });
    }
    Ok(format!("position fen {fen}"))
}

/// Extracts the move token from a `bestmove <move> [ponder <move>]` line.
pub fn parse_best_move(line: &str) -> Result<String, EngineError> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(BEST_MOVE_PREFIX) {
        return Err(EngineError::Rejected {
            reply: line.to_string(),
        });
    }
    match tokens.next() {
        Some(token) if token != "(none)" && token != "0000" => Ok(token.to_string()),
        _ => Err(EngineError::Rejected {
            reply: line.to_string(),
        }),
    }
}

//! # Error モジュール
//!
//! エンジン全体で使用するエラー型を定義します。
//!
//! - [`CommandError`]: プレイヤーコマンドの拒否理由（状態は一切変更されない）
//! - [`ConfigError`]: ゲーム設定ファイルの読み込み・検証エラー
//! - [`PersistenceError`]: 永続化ストアの読み書きエラー
//! - [`EngineError`]: ティック処理中の内部エラー（ループは継続する）

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// コマンド対象エンティティの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Submarine,
    Torpedo,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Submarine => write!(f, "submarine"),
            EntityKind::Torpedo => write!(f, "torpedo"),
        }
    }
}

/// コマンド拒否エラー
///
/// 拒否されたコマンドはワールドを一切変更しません。
/// 呼び出し側には [`CommandError::reason_code`] で構造化された理由を返します。
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("{kind} {id} belongs to another owner")]
    Forbidden { kind: EntityKind, id: Uuid },

    #[error("too deep to snorkel: depth {depth:.1}m > {limit:.1}m")]
    TooDeepToSnorkel { depth: f64, limit: f64 },

    #[error("emergency blow charge depleted")]
    NoBlowCharge,

    #[error("torpedo {torpedo_id} has lost its wire")]
    WireLost { torpedo_id: Uuid },

    #[error("battery too low for active sonar: {battery:.1} < {minimum:.1}")]
    BatteryTooLow { battery: f64, minimum: f64 },

    #[error("not enough battery for ping: {battery:.1} < cost {cost:.2}")]
    InsufficientBattery { battery: f64, cost: f64 },

    #[error("active sonar recharging ({ready_in_s:.1}s remaining)")]
    PingRecharging { ready_in_s: f64 },

    #[error("invalid tube index {tube} (allowed -{max}..={max})")]
    InvalidTube { tube: i32, max: i32 },
}

impl CommandError {
    /// 拒否理由コード（クライアント向けの安定した識別子）
    pub fn reason_code(&self) -> &'static str {
        match self {
            CommandError::InvalidParameter { .. } => "invalid_parameter",
            CommandError::NotFound { .. } => "not_found",
            CommandError::Forbidden { .. } => "forbidden",
            CommandError::TooDeepToSnorkel { .. } => "too_deep",
            CommandError::NoBlowCharge => "no_charge",
            CommandError::WireLost { .. } => "wire_lost",
            CommandError::BatteryTooLow { .. } => "battery_too_low",
            CommandError::InsufficientBattery { .. } => "insufficient_battery",
            CommandError::PingRecharging { .. } => "ping_recharging",
            CommandError::InvalidTube { .. } => "invalid_tube",
        }
    }

    /// 有限値でないパラメータを拒否するヘルパー
    pub(crate) fn require_finite(field: &'static str, value: f64) -> Result<f64, CommandError> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CommandError::InvalidParameter {
                field,
                reason: format!("must be a finite number, got {}", value),
            })
        }
    }
}

/// 設定読み込みエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("設定ファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML解析エラー {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("設定検証エラー: {0}")]
    Validation(String),
}

/// 永続化ストアのエラー
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence encoding error: {0}")]
    Encoding(#[from] serde_yaml::Error),
}

/// ティック処理中の内部エラー
///
/// スケジューラはこのエラーをログに記録し、次の周期で処理を継続します。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tick cycle panicked: {0}")]
    CyclePanicked(String),
}

//! # subsim
//!
//! リアルタイム多人数潜水艦戦のシミュレーションコアです。
//!
//! - [`simulation`]: ワールドを固定周期で進めるエンジンとティックループ
//! - [`commands`]: 所有者からのコマンド処理
//! - [`fanout`]: 所有者ごとのイベント配信
//! - [`models`]: 潜水艦・魚雷・ソナー・爆発のモデル
//! - [`config`]: YAMLで読み込むゲームルール

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod simulation;
pub mod world;

pub use commands::{ControlInput, DepthOrder, HeadingOrder, LaunchOrder, PingOrder};
pub use config::GameConfig;
pub use error::{CommandError, ConfigError, EngineError};
pub use simulation::{SimulationEngine, TickLoopHandle};

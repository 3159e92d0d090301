// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エンティティの基本インターフェース（trait）定義
pub mod traits;

// 各モデルの実装
pub mod submarine;
pub mod torpedo;
pub mod sonar;
pub mod explosion;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use submarine::{Submarine, SubmarineView};
pub use torpedo::{ControlMode, Seeker, Torpedo, TorpedoEndReason, TorpedoView};
pub use sonar::{EchoReport, PassiveContact, PendingEcho, PingBeam, PingDetection, RangeClass, SeekerReport};
pub use explosion::{DetonationOutcome, ExplosionReport};

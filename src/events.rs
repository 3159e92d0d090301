//! # Events モジュール
//!
//! 購読者へ配信する型付きイベントと、その送出フレーム表現を定義します。
//! ペイロードはすべて宛先所有者に限定された内容です。

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{
    EchoReport, ExplosionReport, OwnerId, PassiveContact, PingDetection, SeekerReport, SubId, Submarine,
    SubmarineView, Torpedo, TorpedoView,
};

/// 所有者スコープの状態（`state` 読み出しと `snapshot` イベント）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerState {
    pub subs: Vec<SubmarineView>,
    pub torpedoes: Vec<TorpedoView>,
    pub time: f64,
}

impl OwnerState {
    pub fn from_records<'a>(
        subs: impl IntoIterator<Item = &'a Submarine>,
        torpedoes: impl IntoIterator<Item = &'a Torpedo>,
        time: f64,
    ) -> Self {
        Self {
            subs: subs.into_iter().map(Submarine::view).collect(),
            torpedoes: torpedoes.into_iter().map(Torpedo::view).collect(),
            time,
        }
    }
}

/// 管理者向けの潜水艦ビュー（所有者付き）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSubmarineView {
    pub owner_id: OwnerId,
    #[serde(flatten)]
    pub sub: SubmarineView,
}

/// 管理者向けの魚雷ビュー（所有者・母艦付き）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminTorpedoView {
    pub owner_id: OwnerId,
    pub parent_sub: SubId,
    #[serde(flatten)]
    pub torpedo: TorpedoView,
}

/// 全所有者の状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminState {
    pub subs: Vec<AdminSubmarineView>,
    pub torpedoes: Vec<AdminTorpedoView>,
    pub time: f64,
}

/// 配信イベント
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Contact(PassiveContact),
    Echo(EchoReport),
    ActivePingDetected(PingDetection),
    Explosion(ExplosionReport),
    Snapshot(OwnerState),
    TorpedoPing(SeekerReport),
    Keepalive { time: f64 },
}

#[derive(Serialize)]
struct KeepalivePayload {
    t: f64,
}

impl GameEvent {
    /// ストリーム上のイベント名
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Contact(_) => "contact",
            GameEvent::Echo(_) => "echo",
            GameEvent::ActivePingDetected(_) => "active_ping_detected",
            GameEvent::Explosion(_) => "explosion",
            GameEvent::Snapshot(_) => "snapshot",
            GameEvent::TorpedoPing(_) => "torpedo_ping",
            GameEvent::Keepalive { .. } => "keepalive",
        }
    }

    /// JSONペイロードへ直列化してフレーム化
    pub fn to_frame(&self) -> Result<OutboundFrame, EngineError> {
        let data = match self {
            GameEvent::Contact(p) => serde_json::to_string(p)?,
            GameEvent::Echo(p) => serde_json::to_string(p)?,
            GameEvent::ActivePingDetected(p) => serde_json::to_string(p)?,
            GameEvent::Explosion(p) => serde_json::to_string(p)?,
            GameEvent::Snapshot(p) => serde_json::to_string(p)?,
            GameEvent::TorpedoPing(p) => serde_json::to_string(p)?,
            GameEvent::Keepalive { time } => serde_json::to_string(&KeepalivePayload { t: *time })?,
        };
        Ok(OutboundFrame {
            event: self.name(),
            data,
        })
    }
}

/// 送出フレーム（イベント名 + JSONデータ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub event: &'static str,
    pub data: String,
}

/// 宛先付きイベント
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedEvent {
    pub owner: OwnerId,
    pub event: GameEvent,
}

impl TargetedEvent {
    pub fn new(owner: OwnerId, event: GameEvent) -> Self {
        Self { owner, event }
    }
}

/// ロック解放後に配信するイベントの集合
#[derive(Debug, Default)]
pub struct PendingBroadcasts {
    pub events: Vec<TargetedEvent>,
}

impl PendingBroadcasts {
    pub fn push(&mut self, owner: OwnerId, event: GameEvent) {
        self.events.push(TargetedEvent::new(owner, event));
    }

    /// (所有者, ペイロード) の列をまとめて追加
    pub fn extend_with<T>(&mut self, items: impl IntoIterator<Item = (OwnerId, T)>, wrap: impl Fn(T) -> GameEvent) {
        self.events
            .extend(items.into_iter().map(|(owner, payload)| TargetedEvent::new(owner, wrap(payload))));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RangeClass;
    use uuid::Uuid;

    #[test]
    fn test_contact_frame_shape() {
        let event = GameEvent::Contact(PassiveContact {
            observer_sub_id: Uuid::nil(),
            bearing: 0.5,
            bearing_relative: -0.25,
            range_class: RangeClass::Medium,
            snr: 7.5,
            time: 12.0,
        });
        let frame = event.to_frame().unwrap();
        assert_eq!(frame.event, "contact");
        let value: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(value["range_class"], "medium");
        assert_eq!(value["snr"], 7.5);
    }

    #[test]
    fn test_keepalive_frame() {
        let frame = GameEvent::Keepalive { time: 3.0 }.to_frame().unwrap();
        assert_eq!(frame.event, "keepalive");
        assert_eq!(frame.data, r#"{"t":3.0}"#);
    }

    #[test]
    fn test_pending_broadcasts_wraps_payloads() {
        let mut pending = PendingBroadcasts::default();
        let reports = vec![(
            4,
            PingDetection {
                observer_sub_id: Uuid::nil(),
                bearing: 1.0,
                snr: 2.0,
                time: 0.0,
            },
        )];
        pending.extend_with(reports, GameEvent::ActivePingDetected);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.events[0].owner, 4);
        assert_eq!(pending.events[0].event.name(), "active_ping_detected");
    }
}

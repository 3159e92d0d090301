//! # Fanout モジュール
//!
//! 所有者ごとの有界送信キューへイベントを配る配信ハブです。
//!
//! - キューは最初の publish または subscribe 時に遅延生成されます
//! - 配信は決してブロックしません。満杯時は [`OverflowPolicy`] に従って破棄します
//! - 購読側は一定時間何も届かなければキープアライブフレームを受け取ります

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::clock::SimClock;
use crate::config::{FanoutConfig, OverflowPolicy};
use crate::error::EngineError;
use crate::events::{GameEvent, OutboundFrame, PendingBroadcasts};
use crate::models::OwnerId;

/// 1件の配信結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// 満杯のため新しいイベントを捨てた
    DroppedNewest,
    /// 満杯のため最古のイベントを捨てて格納した
    DroppedOldest,
}

/// 所有者ごとの送信キュー
///
/// `tokio::sync::mpsc` は送信側から最古の要素を捨てられず、`broadcast` は全受信者で
/// 容量を共有し破棄数も所有者単位で数えられないため、キューは自前で持ちます。
#[derive(Debug)]
struct OwnerChannel {
    queue: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl OwnerChannel {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<OutboundFrame>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, frame: OutboundFrame, capacity: usize, policy: OverflowPolicy) -> PublishOutcome {
        let outcome = {
            let mut queue = self.queue();
            if queue.len() < capacity {
                queue.push_back(frame);
                PublishOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::DropNewest => PublishOutcome::DroppedNewest,
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(frame);
                        PublishOutcome::DroppedOldest
                    }
                }
            }
        };

        if outcome != PublishOutcome::Queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome != PublishOutcome::DroppedNewest {
            self.notify.notify_one();
        }
        outcome
    }

    fn pop(&self) -> Option<OutboundFrame> {
        self.queue().pop_front()
    }
}

/// イベント配信ハブ
pub struct EventHub {
    channels: Mutex<HashMap<OwnerId, Arc<OwnerChannel>>>,
    cfg: FanoutConfig,
    clock: Arc<dyn SimClock>,
}

impl EventHub {
    pub fn new(cfg: FanoutConfig, clock: Arc<dyn SimClock>) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            cfg,
            clock,
        }
    }

    fn channel(&self, owner: OwnerId) -> Arc<OwnerChannel> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(channels.entry(owner).or_insert_with(|| Arc::new(OwnerChannel::new())))
    }

    /// 1件のイベントを所有者のキューへ配信
    pub fn publish(&self, owner: OwnerId, event: &GameEvent) -> Result<PublishOutcome, EngineError> {
        let frame = event.to_frame()?;
        let outcome = self.channel(owner).push(frame, self.cfg.capacity, self.cfg.overflow);
        if outcome != PublishOutcome::Queued {
            debug!(owner, event = event.name(), ?outcome, "FANOUT_DROP: 送信キュー満杯");
        }
        Ok(outcome)
    }

    /// ロック解放後にまとめて配信
    ///
    /// 直列化に失敗したイベントはログに記録して読み飛ばします。
    ///
    /// # 戻り値
    ///
    /// キューに格納されたイベント数
    pub fn publish_all(&self, pending: PendingBroadcasts) -> usize {
        let mut delivered = 0;
        for targeted in pending.events {
            match self.publish(targeted.owner, &targeted.event) {
                Ok(PublishOutcome::DroppedNewest) => {}
                Ok(_) => delivered += 1,
                Err(e) => warn!(owner = targeted.owner, event = targeted.event.name(), error = %e, "イベント配信失敗"),
            }
        }
        delivered
    }

    /// 所有者のストリームを購読
    pub fn subscribe(&self, owner: OwnerId) -> Subscription {
        Subscription {
            owner,
            channel: self.channel(owner),
            keepalive: Duration::from_secs_f64(self.cfg.keepalive_s),
            clock: Arc::clone(&self.clock),
        }
    }

    /// 購読を破棄（キューごと削除）
    pub fn unsubscribe(&self, owner: OwnerId) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&owner);
    }

    /// キューを持つ所有者の一覧（定期スナップショットの対象）
    pub fn owners(&self) -> Vec<OwnerId> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut owners: Vec<OwnerId> = channels.keys().copied().collect();
        owners.sort_unstable();
        owners
    }

    /// 破棄されたイベント数
    pub fn dropped(&self, owner: OwnerId) -> u64 {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&owner)
            .map(|c| c.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// キュー内の未送信イベント数
    pub fn queued(&self, owner: OwnerId) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&owner)
            .map(|c| c.queue().len())
            .unwrap_or(0)
    }
}

/// 1所有者分の購読
pub struct Subscription {
    owner: OwnerId,
    channel: Arc<OwnerChannel>,
    keepalive: Duration,
    clock: Arc<dyn SimClock>,
}

impl Subscription {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// 待たずに次のフレームを取り出す
    pub fn try_next(&self) -> Option<OutboundFrame> {
        self.channel.pop()
    }

    /// 次のフレームを待つ
    ///
    /// キープアライブ時間内に何も届かなければ `keepalive` フレームを返します。
    pub async fn next(&self) -> OutboundFrame {
        loop {
            if let Some(frame) = self.channel.pop() {
                return frame;
            }
            if tokio::time::timeout(self.keepalive, self.channel.notify.notified()).await.is_err() {
                return self.keepalive_frame();
            }
        }
    }

    fn keepalive_frame(&self) -> OutboundFrame {
        GameEvent::Keepalive { time: self.clock.now() }
            .to_frame()
            .unwrap_or_else(|_| OutboundFrame {
                event: "keepalive",
                data: "{}".to_string(),
            })
    }
}

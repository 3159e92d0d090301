//! # Clock モジュール
//!
//! エンジンが参照する時刻源を抽象化します。
//! 本番では [`SystemClock`]（UNIX時刻）、テストでは手動で進める [`ManualClock`] を使用します。
//! 時刻はすべて秒単位の `f64` です。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 時刻源のインターフェース
pub trait SimClock: Send + Sync {
    /// 現在時刻（秒）
    fn now(&self) -> f64;
}

/// 壁時計（UNIXエポックからの秒）
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SimClock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// 手動で進める仮想時計
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    /// 時刻を進める
    pub fn advance(&self, seconds: f64) {
        let _ = self.bits.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
            Some((f64::from_bits(bits) + seconds).to_bits())
        });
    }

    /// 時刻を設定する
    pub fn set(&self, time: f64) {
        self.bits.store(time.to_bits(), Ordering::SeqCst);
    }
}

impl SimClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

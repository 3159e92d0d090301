use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 認証済みプレイヤー（所有者）の識別子
pub type OwnerId = u64;

/// 潜水艦ID
pub type SubId = Uuid;

/// 魚雷ID
pub type TorpedoId = Uuid;

/// 水中の3次元位置を表す構造体
///
/// 深度は海面を0とし、下向きを正とします。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f64,     // m
    pub y: f64,     // m
    pub depth: f64, // m (海面=0、下向き正)
}

impl Position3D {
    pub fn new(x: f64, y: f64, depth: f64) -> Self {
        Self {
            x,
            y,
            depth: depth.max(0.0), // 海面より上には出られない
        }
    }

    /// XY平面での2次元距離を計算
    pub fn distance_xy(&self, other: &Position3D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// 3次元距離を計算（水平距離と深度差の合成）
    pub fn distance_3d(&self, other: &Position3D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.depth - self.depth;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// 自位置から見た相手の真方位（ラジアン、東=0、反時計回り正）
    pub fn bearing_to(&self, other: &Position3D) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// 方位と距離だけ水平移動した位置
    pub fn offset(&self, heading: f64, distance: f64) -> Self {
        Self::new(
            self.x + heading.cos() * distance,
            self.y + heading.sin() * distance,
            self.depth,
        )
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::{PI, TAU};

    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees * PI / 180.0
    }

    /// 角度を(-π, π]の範囲に正規化
    pub fn wrap_angle(angle: f64) -> f64 {
        let wrapped = (angle + PI).rem_euclid(TAU) - PI;
        if wrapped <= -PI { wrapped + TAU } else { wrapped }
    }

    /// 2つの角度の差を計算（from → to の最短回転量、(-π, π]）
    pub fn angle_difference(from: f64, to: f64) -> f64 {
        wrap_angle(to - from)
    }

    /// 現在値を目標値へ最大ステップ幅だけ近づける
    pub fn step_toward(current: f64, target: f64, max_step: f64) -> f64 {
        current + (target - current).clamp(-max_step, max_step)
    }
}

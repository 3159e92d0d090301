//! # World モジュール
//!
//! 潜水艦・魚雷・到達待ち反響を保持する唯一の権威あるワールドストアです。
//! ストア自体はロックを持たず、[`crate::simulation::SimulationEngine`] の排他ロック越しに
//! 操作されます。反復順序を決定的にするため `BTreeMap` で保持します。

use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::WorldConfig;
use crate::error::{CommandError, EntityKind};
use crate::models::{IEntity, OwnerId, PendingEcho, Position3D, SubId, Submarine, Torpedo, TorpedoId};

/// 永続化用のワールドイメージ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldImage {
    pub subs: Vec<Submarine>,
    pub torpedoes: Vec<Torpedo>,
}

/// ティックの計算フェーズに渡すスナップショット
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub subs: Vec<Submarine>,
    pub torpedoes: Vec<Torpedo>,
    /// このティックで到達した反響（ストアからは取り除かれている）
    pub due_echoes: Vec<PendingEcho>,
}

/// ワールドストア
#[derive(Debug)]
pub struct WorldStore {
    subs: BTreeMap<SubId, Submarine>,
    torpedoes: BTreeMap<TorpedoId, Torpedo>,
    pending_echoes: Vec<PendingEcho>,
    rng: StdRng,
}

/// 所有者チェック
fn ensure_owner<T: IEntity>(entity: &T, owner: OwnerId, kind: EntityKind) -> Result<(), CommandError> {
    if entity.is_owned_by(owner) {
        Ok(())
    } else {
        Err(CommandError::Forbidden {
            kind,
            id: entity.get_id(),
        })
    }
}

impl WorldStore {
    /// 空のワールドを作成
    ///
    /// シード未指定時はOSエントロピーで乱数生成器を初期化します。
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            subs: BTreeMap::new(),
            torpedoes: BTreeMap::new(),
            pending_echoes: Vec::new(),
            rng,
        }
    }

    /// 永続化イメージから復元
    pub fn from_image(image: WorldImage, seed: Option<u64>) -> Self {
        let mut world = Self::new(seed);
        for sub in image.subs {
            world.subs.insert(sub.id, sub);
        }
        for torpedo in image.torpedoes {
            world.torpedoes.insert(torpedo.id, torpedo);
        }
        world
    }

    /// 永続化イメージを作成
    pub fn image(&self) -> WorldImage {
        WorldImage {
            subs: self.subs.values().cloned().collect(),
            torpedoes: self.torpedoes.values().cloned().collect(),
        }
    }

    /// 乱数生成器から新しいIDを生成
    pub fn next_id(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.r#gen()).into_uuid()
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    // ---- 潜水艦 ----

    pub fn sub(&self, id: &SubId) -> Option<&Submarine> {
        self.subs.get(id)
    }

    pub fn sub_mut(&mut self, id: &SubId) -> Option<&mut Submarine> {
        self.subs.get_mut(id)
    }

    /// 所有者の潜水艦を取得（存在しなければ not_found、他人のものなら forbidden）
    pub fn owned_sub(&self, owner: OwnerId, id: SubId) -> Result<&Submarine, CommandError> {
        let sub = self.subs.get(&id).ok_or(CommandError::NotFound {
            kind: EntityKind::Submarine,
            id,
        })?;
        ensure_owner(sub, owner, EntityKind::Submarine)?;
        Ok(sub)
    }

    pub fn owned_sub_mut(&mut self, owner: OwnerId, id: SubId) -> Result<&mut Submarine, CommandError> {
        let sub = self.subs.get_mut(&id).ok_or(CommandError::NotFound {
            kind: EntityKind::Submarine,
            id,
        })?;
        ensure_owner(&*sub, owner, EntityKind::Submarine)?;
        Ok(sub)
    }

    pub fn subs(&self) -> impl Iterator<Item = &Submarine> {
        self.subs.values()
    }

    pub fn subs_of(&self, owner: OwnerId) -> impl Iterator<Item = &Submarine> {
        self.subs.values().filter(move |s| s.is_owned_by(owner))
    }

    pub fn insert_sub(&mut self, sub: Submarine) {
        self.subs.insert(sub.id, sub);
    }

    pub fn remove_sub(&mut self, id: &SubId) -> Option<Submarine> {
        self.subs.remove(id)
    }

    // ---- 魚雷 ----

    pub fn torpedo(&self, id: &TorpedoId) -> Option<&Torpedo> {
        self.torpedoes.get(id)
    }

    pub fn torpedo_mut(&mut self, id: &TorpedoId) -> Option<&mut Torpedo> {
        self.torpedoes.get_mut(id)
    }

    /// 所有者の魚雷を取得
    pub fn owned_torpedo_mut(&mut self, owner: OwnerId, id: TorpedoId) -> Result<&mut Torpedo, CommandError> {
        let torpedo = self.torpedoes.get_mut(&id).ok_or(CommandError::NotFound {
            kind: EntityKind::Torpedo,
            id,
        })?;
        ensure_owner(&*torpedo, owner, EntityKind::Torpedo)?;
        Ok(torpedo)
    }

    pub fn torpedoes(&self) -> impl Iterator<Item = &Torpedo> {
        self.torpedoes.values()
    }

    pub fn torpedoes_of(&self, owner: OwnerId) -> impl Iterator<Item = &Torpedo> {
        self.torpedoes.values().filter(move |t| t.is_owned_by(owner))
    }

    pub fn insert_torpedo(&mut self, torpedo: Torpedo) {
        self.torpedoes.insert(torpedo.id, torpedo);
    }

    pub fn remove_torpedo(&mut self, id: &TorpedoId) -> Option<Torpedo> {
        self.torpedoes.remove(id)
    }

    // ---- 反響 ----

    pub fn push_echoes(&mut self, echoes: impl IntoIterator<Item = PendingEcho>) {
        self.pending_echoes.extend(echoes);
    }

    pub fn pending_echo_count(&self) -> usize {
        self.pending_echoes.len()
    }

    /// 到達時刻を過ぎた反響を取り出す
    pub fn drain_due_echoes(&mut self, now: f64) -> Vec<PendingEcho> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_echoes)
            .into_iter()
            .partition(|echo| echo.arrival_time <= now);
        self.pending_echoes = waiting;
        due
    }

    /// 計算フェーズ用のスナップショットを作成
    pub fn snapshot(&mut self, now: f64) -> WorldSnapshot {
        WorldSnapshot {
            subs: self.subs.values().filter(|s| s.health > 0.0).cloned().collect(),
            torpedoes: self.torpedoes.values().cloned().collect(),
            due_echoes: self.drain_due_echoes(now),
        }
    }

    /// 出現位置の探索
    ///
    /// リング中心から `spawn_min_r..=spawn_max_r` の円環内でランダムに試行し、
    /// 既存の全艦から `safe_spawn_separation` 以上離れた位置を返します。
    /// 試行回数内に見つからなければリング中心を返します。
    pub fn find_spawn_position(&mut self, cfg: &WorldConfig) -> (f64, f64) {
        for _ in 0..cfg.spawn_attempts {
            let angle = self.rng.gen_range(-PI..=PI);
            let radius = self.rng.gen_range(cfg.spawn_min_r..=cfg.spawn_max_r);
            let candidate = Position3D::new(cfg.ring.x + angle.cos() * radius, cfg.ring.y + angle.sin() * radius, 0.0);
            let clear = self
                .subs
                .values()
                .all(|s| s.position.distance_xy(&candidate) >= cfg.safe_spawn_separation);
            if clear {
                return (candidate.x, candidate.y);
            }
        }
        debug!(
            attempts = cfg.spawn_attempts,
            "SPAWN_FALLBACK: 安全な出現位置が見つからないためリング中心を使用"
        );
        (cfg.ring.x, cfg.ring.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SubmarineConfig, TorpedoConfig};
    use crate::models::Seeker;

    fn store_with_sub(owner: OwnerId) -> (WorldStore, SubId) {
        let mut world = WorldStore::new(Some(7));
        let id = world.next_id();
        let sub = Submarine::spawn(id, owner, Position3D::new(0.0, 0.0, 100.0), 0.0, 50.0, 0.0, &SubmarineConfig::default());
        world.insert_sub(sub);
        (world, id)
    }

    #[test]
    fn test_owned_lookup_distinguishes_missing_and_foreign() {
        let (mut world, id) = store_with_sub(1);
        assert!(world.owned_sub_mut(1, id).is_ok());
        assert_eq!(world.owned_sub(2, id).unwrap_err().reason_code(), "forbidden");
        assert_eq!(world.owned_sub(1, Uuid::nil()).unwrap_err().reason_code(), "not_found");
    }

    #[test]
    fn test_owner_scoped_listing() {
        let (mut world, id) = store_with_sub(1);
        let parent = world.sub(&id).cloned().unwrap();
        let torpedo_id = world.next_id();
        world.insert_torpedo(Torpedo::launch(torpedo_id, &parent, 0, 600.0, Seeker::Absent, 0.0, &TorpedoConfig::default()));
        assert_eq!(world.subs_of(1).count(), 1);
        assert_eq!(world.subs_of(2).count(), 0);
        assert_eq!(world.torpedoes_of(1).count(), 1);
        assert_eq!(world.owned_torpedo_mut(2, torpedo_id).unwrap_err().reason_code(), "forbidden");
    }

    #[test]
    fn test_drain_due_echoes_keeps_future_ones() {
        let (mut world, id) = store_with_sub(1);
        let echo = |arrival_time| PendingEcho {
            arrival_time,
            range: 100.0,
            bearing: 0.0,
            echo_level: 10.0,
            observer_sub_id: id,
            observer_owner: 1,
            observer_depth: 100.0,
            target_depth: 100.0,
        };
        world.push_echoes([echo(1.0), echo(2.0), echo(3.0)]);
        let due = world.drain_due_echoes(2.0);
        assert_eq!(due.len(), 2);
        assert_eq!(world.pending_echo_count(), 1);
    }

    #[test]
    fn test_spawn_positions_respect_ring_and_separation() {
        let cfg = WorldConfig::default();
        let mut world = WorldStore::new(Some(11));
        for owner in 0..8 {
            let (x, y) = world.find_spawn_position(&cfg);
            let r = x.hypot(y);
            assert!(r >= cfg.spawn_min_r - 1e-9 && r <= cfg.spawn_max_r + 1e-9);
            let p = Position3D::new(x, y, 100.0);
            assert!(world.subs().all(|s| s.position.distance_xy(&p) >= cfg.safe_spawn_separation));
            let id = world.next_id();
            world.insert_sub(Submarine::spawn(id, owner, p, 0.0, 50.0, 0.0, &SubmarineConfig::default()));
        }
    }

    #[test]
    fn test_spawn_falls_back_to_ring_center_when_crowded() {
        let mut cfg = WorldConfig::default();
        cfg.safe_spawn_separation = 1.0e6;
        let (mut world, _) = store_with_sub(1);
        assert_eq!(world.find_spawn_position(&cfg), (cfg.ring.x, cfg.ring.y));
    }

    #[test]
    fn test_seeded_ids_are_deterministic() {
        let mut a = WorldStore::new(Some(42));
        let mut b = WorldStore::new(Some(42));
        assert_eq!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_image_round_trip_restores_records() {
        let (world, id) = store_with_sub(3);
        let restored = WorldStore::from_image(world.image(), None);
        assert_eq!(restored.sub(&id), world.sub(&id));
    }
}
